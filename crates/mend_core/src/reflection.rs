//! Reflection Tracker.
//!
//! Keeps the concluded iterations of a run and derives the
//! [`ReflectionContext`] the next Planner call receives. The Planner never
//! sees raw records, only this summary.

use mend_agents::ReflectionContext;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::run::IterationRecord;
use crate::similarity::StrategySimilarity;

/// Default summary window.
pub const DEFAULT_WINDOW: usize = 3;

/// Iteration history of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReflectionTracker {
    records: Vec<IterationRecord>,
}

impl ReflectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Its index must follow the last one exactly.
    pub fn record(&mut self, record: IterationRecord) -> CoreResult<()> {
        let expected = self.next_index();
        if record.index != expected {
            return Err(CoreError::IterationOutOfOrder {
                expected,
                found: record.index,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Index the next record must carry.
    pub fn next_index(&self) -> u32 {
        self.records.last().map(|r| r.index + 1).unwrap_or(1)
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Trailing run of iterations whose change was applied.
    pub fn consecutive_applied(&self) -> usize {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.change_applied)
            .count()
    }

    /// Strategies of the last `window` iterations, oldest first.
    /// Iterations that failed before planning completed carry no strategy and are skipped.
    pub fn recent_strategies(&self, window: usize) -> Vec<String> {
        let start = self.records.len().saturating_sub(window);
        self.records[start..]
            .iter()
            .filter(|r| !r.strategy.trim().is_empty())
            .map(|r| r.strategy.clone())
            .collect()
    }

    /// Summary with the default similarity threshold.
    pub fn summarize(&self, window: usize) -> ReflectionContext {
        self.summarize_with(window, &StrategySimilarity::default())
    }

    pub fn summarize_with(&self, window: usize, similarity: &StrategySimilarity) -> ReflectionContext {
        let Some(last) = self.records.last() else {
            return ReflectionContext::default();
        };

        let previous_attempt_failed = last.failed();
        let failure_reason = if previous_attempt_failed {
            last.failure_reason.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let recent_strategies = self.recent_strategies(window);
        let should_strategy_change = similarity.is_repetitive(&recent_strategies, window);

        ReflectionContext {
            previous_attempt_failed,
            failure_reason,
            recent_strategies,
            should_strategy_change,
        }
    }
}
