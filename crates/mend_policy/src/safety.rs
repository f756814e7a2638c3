//! Safety Governor.
//!
//! Three guards, evaluated in order with the first trip winning:
//!
//! 1. **Max iterations**: the iteration count reached the ceiling.
//! 2. **Runaway commits**: too many consecutive iterations applied a change.
//! 3. **Repeated strategy**: the newest strategy repeats the ones before it.
//!
//! The max-iteration guard cannot be disabled; the other two can.

use mend_core::{HaltReason, PipelineRun, RunConfig, StrategySimilarity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Guard thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub max_iterations: u32,
    pub runaway_commit_threshold: u32,
    pub strategy_repetition_window: usize,
    pub similarity_threshold: f64,
    pub runaway_guard: bool,
    pub repetition_guard: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for SafetyConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            runaway_commit_threshold: config.runaway_commit_threshold,
            strategy_repetition_window: config.strategy_repetition_window,
            similarity_threshold: config.similarity_threshold,
            runaway_guard: config.runaway_guard,
            repetition_guard: config.repetition_guard,
        }
    }
}

/// Snapshot derived from run history before each check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyState {
    pub iteration_count: usize,
    pub consecutive_commits: usize,
    /// Strategies in the window, before the newest, that the newest repeats.
    pub repeated_strategy_count: usize,
    /// Strategies available in the window, newest included.
    pub strategies_in_window: usize,
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Continue,
    Halt { reason: HaltReason, message: String },
}

impl SafetyDecision {
    pub fn is_halt(&self) -> bool {
        matches!(self, SafetyDecision::Halt { .. })
    }
}

/// Evaluates the guards against a run.
#[derive(Debug, Clone)]
pub struct SafetyGovernor {
    config: SafetyConfig,
    similarity: StrategySimilarity,
}

impl SafetyGovernor {
    pub fn new(config: SafetyConfig) -> Self {
        let similarity = StrategySimilarity::new(config.similarity_threshold);
        Self { config, similarity }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn similarity(&self) -> &StrategySimilarity {
        &self.similarity
    }

    /// Derive the guard inputs from the run history.
    pub fn state(&self, run: &PipelineRun) -> SafetyState {
        let tracker = run.tracker();
        let strategies = tracker.recent_strategies(self.config.strategy_repetition_window);

        SafetyState {
            iteration_count: tracker.len(),
            consecutive_commits: tracker.consecutive_applied(),
            repeated_strategy_count: self.repeats_of_latest(&strategies),
            strategies_in_window: strategies.len(),
        }
    }

    /// How many strategies before the newest one it is similar to.
    fn repeats_of_latest(&self, strategies: &[String]) -> usize {
        match strategies.split_last() {
            Some((latest, prior)) => prior
                .iter()
                .filter(|p| self.similarity.is_similar(latest, p))
                .count(),
            None => 0,
        }
    }

    /// Check every guard in order.
    pub fn check(&self, run: &PipelineRun) -> SafetyDecision {
        let state = self.state(run);
        debug!(run_id = %run.id(), ?state, "Safety check");

        let latest = run
            .tracker()
            .records()
            .iter()
            .rev()
            .map(|r| r.strategy.as_str())
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default();
        let decision = self.evaluate(&state, latest);
        if let SafetyDecision::Halt { reason, message } = &decision {
            warn!(run_id = %run.id(), reason = %reason, "Safety halt: {}", message);
        }
        decision
    }

    /// Check a freshly planned strategy against the recorded ones before any
    /// change is built from it. Only the repetition guard applies.
    pub fn check_strategy(&self, run: &PipelineRun, strategy: &str) -> SafetyDecision {
        if strategy.trim().is_empty() {
            return SafetyDecision::Continue;
        }
        let window = self.config.strategy_repetition_window;
        let mut strategies = run.tracker().recent_strategies(window.saturating_sub(1));
        strategies.push(strategy.to_string());

        let state = SafetyState {
            iteration_count: run.tracker().len(),
            consecutive_commits: 0,
            repeated_strategy_count: self.repeats_of_latest(&strategies),
            strategies_in_window: strategies.len(),
        };
        let decision = self.repetition(&state, strategy).unwrap_or(SafetyDecision::Continue);
        if let SafetyDecision::Halt { message, .. } = &decision {
            warn!(run_id = %run.id(), "Safety halt after planning: {}", message);
        }
        decision
    }

    fn evaluate(&self, state: &SafetyState, latest: &str) -> SafetyDecision {
        let max = self.config.max_iterations as usize;
        if state.iteration_count >= max {
            return SafetyDecision::Halt {
                reason: HaltReason::MaxIterationsReached,
                message: format!("Reached the maximum of {} iterations", max),
            };
        }

        let threshold = self.config.runaway_commit_threshold as usize;
        if self.config.runaway_guard && state.consecutive_commits >= threshold {
            return SafetyDecision::Halt {
                reason: HaltReason::RunawayLoop,
                message: format!(
                    "{} consecutive iterations applied changes without converging",
                    state.consecutive_commits
                ),
            };
        }

        self.repetition(state, latest)
            .unwrap_or(SafetyDecision::Continue)
    }

    /// The repetition guard needs a full window whose newest strategy
    /// repeats enough of the ones before it.
    fn repetition(&self, state: &SafetyState, latest: &str) -> Option<SafetyDecision> {
        let window = self.config.strategy_repetition_window;
        let needed = StrategySimilarity::required_matches(window);
        if !self.config.repetition_guard
            || state.strategies_in_window < window
            || state.repeated_strategy_count < needed
        {
            return None;
        }
        Some(SafetyDecision::Halt {
            reason: HaltReason::RepeatedStrategy,
            message: format!(
                "The same strategy was proposed {} times in a row: \"{}\"",
                window, latest
            ),
        })
    }

    /// Bound the clarification loop by the iteration ceiling.
    pub fn check_clarification(&self, rounds: usize) -> SafetyDecision {
        let max = self.config.max_iterations as usize;
        if rounds >= max {
            warn!(rounds, "Clarification loop hit the iteration ceiling");
            return SafetyDecision::Halt {
                reason: HaltReason::MaxIterationsReached,
                message: format!("Requirements still unclear after {} clarification rounds", rounds),
            };
        }
        SafetyDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_core::{ApprovalMode, IterationRecord};

    fn push(run: &mut PipelineRun, strategy: &str, applied: bool) {
        let mut draft = run.begin_iteration().unwrap();
        draft.set_strategy(strategy);
        let record: IterationRecord = if applied {
            draft.mark_applied("abc");
            draft.approved_but_failed("CI checks failed")
        } else {
            draft.rejected("Reviewer rejected: no")
        };
        run.record_iteration(record).unwrap();
    }

    fn run() -> PipelineRun {
        PipelineRun::bug_fix(ApprovalMode::AutoApprove, "bug")
    }

    #[test]
    fn test_max_iterations_trips_at_ceiling() {
        let governor = SafetyGovernor::new(SafetyConfig {
            max_iterations: 3,
            ..Default::default()
        });
        let mut run = run();
        push(&mut run, "one", false);
        push(&mut run, "two", false);
        assert_eq!(governor.check(&run), SafetyDecision::Continue);
        push(&mut run, "three", false);
        assert!(matches!(
            governor.check(&run),
            SafetyDecision::Halt {
                reason: HaltReason::MaxIterationsReached,
                ..
            }
        ));
    }

    #[test]
    fn test_runaway_counts_consecutive_applied_changes() {
        let governor = SafetyGovernor::new(SafetyConfig {
            runaway_commit_threshold: 2,
            ..Default::default()
        });
        let mut run = run();
        push(&mut run, "alpha fix", true);
        push(&mut run, "beta fix", false);
        push(&mut run, "gamma change", true);
        assert_eq!(governor.state(&run).consecutive_commits, 1);
        assert_eq!(governor.check(&run), SafetyDecision::Continue);

        push(&mut run, "delta rewrite", true);
        assert!(matches!(
            governor.check(&run),
            SafetyDecision::Halt {
                reason: HaltReason::RunawayLoop,
                ..
            }
        ));
    }

    #[test]
    fn test_disabled_guards_leave_max_iterations() {
        let governor = SafetyGovernor::new(SafetyConfig {
            max_iterations: 4,
            runaway_commit_threshold: 1,
            runaway_guard: false,
            repetition_guard: false,
            ..Default::default()
        });
        let mut run = run();
        for _ in 0..3 {
            push(&mut run, "same strategy", true);
            assert_eq!(governor.check(&run), SafetyDecision::Continue);
        }
        push(&mut run, "same strategy", true);
        assert!(matches!(
            governor.check(&run),
            SafetyDecision::Halt {
                reason: HaltReason::MaxIterationsReached,
                ..
            }
        ));
    }

    #[test]
    fn test_max_iterations_wins_over_other_guards() {
        let governor = SafetyGovernor::new(SafetyConfig {
            max_iterations: 3,
            runaway_commit_threshold: 3,
            ..Default::default()
        });
        let mut run = run();
        for _ in 0..3 {
            push(&mut run, "same strategy", true);
        }
        match governor.check(&run) {
            SafetyDecision::Halt { reason, .. } => {
                assert_eq!(reason, HaltReason::MaxIterationsReached)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_counts_repeats_of_the_newest_strategy() {
        let governor = SafetyGovernor::new(SafetyConfig::default());
        let mut run = run();
        push(&mut run, "retry null check on input", false);
        push(&mut run, "retry the null-check on the input", false);

        let state = governor.state(&run);
        assert_eq!(state.repeated_strategy_count, 1);
        assert_eq!(state.strategies_in_window, 2);
        assert_eq!(governor.check(&run), SafetyDecision::Continue);
    }

    #[test]
    fn test_planned_strategy_is_checked_before_it_is_recorded() {
        let governor = SafetyGovernor::new(SafetyConfig::default());
        let mut run = run();
        push(&mut run, "retry null check on input", false);
        assert_eq!(
            governor.check_strategy(&run, "retry the null-check on the input"),
            SafetyDecision::Continue
        );

        push(&mut run, "retry the null-check on the input", false);
        assert!(matches!(
            governor.check_strategy(&run, "add null check retry on input"),
            SafetyDecision::Halt {
                reason: HaltReason::RepeatedStrategy,
                ..
            }
        ));
        assert_eq!(
            governor.check_strategy(&run, "rewrite the input parser"),
            SafetyDecision::Continue
        );
    }

    #[test]
    fn test_planned_strategy_ignores_disabled_repetition_guard() {
        let governor = SafetyGovernor::new(SafetyConfig {
            repetition_guard: false,
            ..Default::default()
        });
        let mut run = run();
        push(&mut run, "same strategy", false);
        push(&mut run, "same strategy", false);
        assert_eq!(governor.check_strategy(&run, "same strategy"), SafetyDecision::Continue);
    }

    #[test]
    fn test_clarification_rounds_are_bounded() {
        let governor = SafetyGovernor::new(SafetyConfig {
            max_iterations: 2,
            ..Default::default()
        });
        assert_eq!(governor.check_clarification(1), SafetyDecision::Continue);
        assert!(governor.check_clarification(2).is_halt());
    }
}
