//! Static output schema descriptors for each role.
//!
//! A [`Schema`] is the single source of truth for a role's output shape: the
//! Contract Validator walks it field by field, and [`Schema::to_json_schema`]
//! renders it for the completion service request.

use serde_json::{json, Map, Value};

/// Semantic type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Boolean,
    Integer,
    StringList,
    IntegerList,
    /// Free-form string keyed mapping.
    Mapping,
    /// Ordered sequence of objects with their own fields.
    ObjectList(&'static [FieldSpec]),
    /// String restricted to a closed set of values.
    Enum(&'static [&'static str]),
}

impl FieldKind {
    /// Name used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::StringList => "array of strings",
            FieldKind::IntegerList => "array of integers",
            FieldKind::Mapping => "object",
            FieldKind::ObjectList(_) => "array of objects",
            FieldKind::Enum(_) => "string",
        }
    }
}

/// One field of an output object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

/// Output schema of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Identifier sent alongside the prompt.
    pub id: &'static str,
    pub fields: &'static [FieldSpec],
}

pub const COMPLEXITY_VALUES: &[&str] = &["low", "medium", "high"];
pub const TEST_TYPE_VALUES: &[&str] = &["unit", "integration", "e2e", "manual"];

const FILE_CHANGE: &[FieldSpec] = &[
    required("path", FieldKind::String),
    required("content", FieldKind::String),
];

const REVIEW_ISSUE: &[FieldSpec] = &[
    required("file", FieldKind::String),
    required("line", FieldKind::Integer),
    required("issue", FieldKind::String),
];

const CLARIFICATION_QUESTION: &[FieldSpec] = &[
    required("question", FieldKind::String),
    required("context", FieldKind::String),
    required("suggested_answers", FieldKind::StringList),
];

const ACCEPTANCE_CRITERION: &[FieldSpec] = &[
    required("criterion", FieldKind::String),
    required("rationale", FieldKind::String),
    required("test_type", FieldKind::Enum(TEST_TYPE_VALUES)),
];

const TECHNICAL_DECISION: &[FieldSpec] = &[
    required("aspect", FieldKind::String),
    required("decision", FieldKind::String),
    required("rationale", FieldKind::String),
    required("alternatives_considered", FieldKind::StringList),
];

const IMPLEMENTATION_STEP: &[FieldSpec] = &[
    required("step_number", FieldKind::Integer),
    required("description", FieldKind::String),
    required("files_affected", FieldKind::StringList),
    required("dependencies", FieldKind::IntegerList),
    required("estimated_complexity", FieldKind::Enum(COMPLEXITY_VALUES)),
];

pub static PLANNER: Schema = Schema {
    id: "planner.v1",
    fields: &[
        required("analysis", FieldKind::String),
        required("files_to_modify", FieldKind::StringList),
        required("strategy", FieldKind::String),
        required("needs_new_tests", FieldKind::Boolean),
        required("coverage_gaps", FieldKind::StringList),
        required("should_strategy_change", FieldKind::Boolean),
    ],
};

pub static CODER: Schema = Schema {
    id: "coder.v1",
    fields: &[
        required("files", FieldKind::ObjectList(FILE_CHANGE)),
        required("commit_message", FieldKind::String),
    ],
};

pub static TESTER: Schema = Schema {
    id: "tester.v1",
    fields: &[
        required("files", FieldKind::ObjectList(FILE_CHANGE)),
        required("test_strategy", FieldKind::String),
    ],
};

pub static REVIEWER: Schema = Schema {
    id: "reviewer.v1",
    fields: &[
        required("approved", FieldKind::Boolean),
        required("issues", FieldKind::ObjectList(REVIEW_ISSUE)),
        required("feedback", FieldKind::String),
    ],
};

pub static DEVOPS: Schema = Schema {
    id: "devops.v1",
    fields: &[
        required("files", FieldKind::ObjectList(FILE_CHANGE)),
        required("commit_message", FieldKind::String),
        optional("target_branch", FieldKind::String),
    ],
};

pub static REQUIREMENTS_GATHER: Schema = Schema {
    id: "requirements_gather.v1",
    fields: &[
        required("gherkin_scenarios", FieldKind::StringList),
        required("needs_clarification", FieldKind::Boolean),
        required(
            "clarification_questions",
            FieldKind::ObjectList(CLARIFICATION_QUESTION),
        ),
        required("requirements_summary", FieldKind::String),
    ],
};

pub static ACCEPTANCE_CRITERIA: Schema = Schema {
    id: "acceptance_criteria.v1",
    fields: &[
        required(
            "acceptance_criteria",
            FieldKind::ObjectList(ACCEPTANCE_CRITERION),
        ),
        required("definition_of_done", FieldKind::StringList),
        required("risk_areas", FieldKind::StringList),
    ],
};

pub static ARCHITECT_PLANNER: Schema = Schema {
    id: "architect_planner.v1",
    fields: &[
        required("technical_design", FieldKind::String),
        required("design_decisions", FieldKind::ObjectList(TECHNICAL_DECISION)),
        required("files_to_create", FieldKind::StringList),
        required("files_to_modify", FieldKind::StringList),
        required("dependencies_needed", FieldKind::StringList),
        optional("design_diagrams", FieldKind::String),
    ],
};

pub static TECHNICAL_PLANNER: Schema = Schema {
    id: "technical_planner.v1",
    fields: &[
        required("implementation_plan", FieldKind::String),
        required(
            "implementation_steps",
            FieldKind::ObjectList(IMPLEMENTATION_STEP),
        ),
        required("files_to_modify", FieldKind::StringList),
        required("strategy", FieldKind::String),
        required("needs_new_tests", FieldKind::Boolean),
        required("test_strategy", FieldKind::String),
    ],
};

impl Schema {
    /// Names of required top-level fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Render as a JSON Schema document for structured-output requests.
    pub fn to_json_schema(&self) -> Value {
        object_schema(self.fields)
    }
}

fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        properties.insert(field.name.to_string(), kind_schema(&field.kind));
    }
    let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn kind_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({ "type": "string" }),
        FieldKind::Boolean => json!({ "type": "boolean" }),
        FieldKind::Integer => json!({ "type": "integer" }),
        FieldKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        FieldKind::IntegerList => json!({ "type": "array", "items": { "type": "integer" } }),
        FieldKind::Mapping => json!({ "type": "object" }),
        FieldKind::ObjectList(fields) => json!({ "type": "array", "items": object_schema(fields) }),
        FieldKind::Enum(values) => json!({ "type": "string", "enum": values }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_json_schema_lists_required_fields() {
        let schema = PLANNER.to_json_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 6);
        assert!(required.contains(&json!("should_strategy_change")));
        assert_eq!(schema["properties"]["files_to_modify"]["items"]["type"], "string");
    }

    #[test]
    fn test_optional_fields_are_not_required() {
        let required: Vec<_> = ARCHITECT_PLANNER.required_fields().collect();
        assert!(!required.contains(&"design_diagrams"));
        assert!(required.contains(&"technical_design"));
    }

    #[test]
    fn test_enum_fields_render_closed_set() {
        let schema = TECHNICAL_PLANNER.to_json_schema();
        let step = &schema["properties"]["implementation_steps"]["items"];
        assert_eq!(
            step["properties"]["estimated_complexity"]["enum"],
            json!(["low", "medium", "high"])
        );
    }
}
