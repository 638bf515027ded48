//! JSON Schema validation for provider payloads.
//!
//! Each payload kind has an embedded schema compiled once on first use.

use std::sync::OnceLock;

use super::SchemaViolation;

const EVALUATION_SCHEMA_JSON: &str = include_str!("../../schemas/evaluation.schema.json");
const OBJECTIVE_BATCH_SCHEMA_JSON: &str = include_str!("../../schemas/objective_batch.schema.json");
const SUBJECTIVE_BATCH_SCHEMA_JSON: &str =
    include_str!("../../schemas/subjective_batch.schema.json");

type Compiled = OnceLock<Result<jsonschema::Validator, String>>;

static EVALUATION: Compiled = OnceLock::new();
static OBJECTIVE_BATCH: Compiled = OnceLock::new();
static SUBJECTIVE_BATCH: Compiled = OnceLock::new();

/// Which embedded schema to check against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaId {
    Evaluation,
    ObjectiveBatch,
    SubjectiveBatch,
}

impl SchemaId {
    fn source(self) -> (&'static Compiled, &'static str) {
        match self {
            SchemaId::Evaluation => (&EVALUATION, EVALUATION_SCHEMA_JSON),
            SchemaId::ObjectiveBatch => (&OBJECTIVE_BATCH, OBJECTIVE_BATCH_SCHEMA_JSON),
            SchemaId::SubjectiveBatch => (&SUBJECTIVE_BATCH, SUBJECTIVE_BATCH_SCHEMA_JSON),
        }
    }
}

fn get_validator(id: SchemaId) -> Result<&'static jsonschema::Validator, String> {
    let (cell, raw) = id.source();
    let compiled = cell.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| format!("invalid schema JSON for {:?}: {}", id, e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("failed to compile {:?} schema: {}", id, e))
    });

    compiled.as_ref().map_err(Clone::clone)
}

/// Check a value against the schema, collecting every violation.
pub(crate) fn check(id: SchemaId, value: &serde_json::Value) -> Result<(), SchemaViolation> {
    let validator = get_validator(id).map_err(SchemaViolation::SchemaUnavailable)?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{} at {}", e, path)
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaViolation::Schema(errors))
    }
}
