//! JSON well-formedness and JSON Schema validation.

use std::fs;
use std::path::Path;

use filescope_meta::{MetadataStream, StreamType, UNAP};
use serde_json::Value;

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};

fn json_stream() -> MetadataStream {
    MetadataStream::new(0)
        .with_mimetype("application/json")
        .with_version(UNAP)
        .with_stream_type(StreamType::Text)
}

fn read_json(path: &Path, limit: u64) -> Result<Result<Value, String>, CheckerFailure> {
    let size = fs::metadata(path)?.len();
    if size > limit {
        return Err(CheckerFailure::Io(std::io::Error::other(format!(
            "file exceeds the read limit of {limit} bytes"
        ))));
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()))
}

pub struct JsonChecker {
    read_limit: u64,
}

impl JsonChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &[CapabilityEntry::new("application/json").priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

impl Checker for JsonChecker {
    fn id(&self) -> CheckerId {
        "JsonChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            result.message("JSON syntax not checked, reporting format metadata only.");
            result.push_stream(json_stream());
            return result.finish(false);
        }
        match read_json(ctx.path, self.read_limit) {
            Ok(Ok(_)) => {
                result.message("JSON file is well-formed.");
                result.push_stream(json_stream());
            }
            Ok(Err(reason)) => result.error(format!("JSON parse error: {reason}")),
            Err(failure) => result.fail(&failure),
        }
        result.finish(true)
    }
}

/// Validates a JSON document against the schema named by the `json_schema` param.
pub struct JsonSchemaChecker {
    read_limit: u64,
}

impl JsonSchemaChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("application/json")
        .validation_only()
        .requires("json_schema")
        .priority(priority::VALIDATOR)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

impl Checker for JsonSchemaChecker {
    fn id(&self) -> CheckerId {
        "JsonSchemaChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let Some(schema_path) = ctx.param("json_schema") else {
            result.error("JSON schema not given.");
            return result.finish(true);
        };

        let schema = match read_json(Path::new(schema_path), self.read_limit) {
            Ok(Ok(schema)) => schema,
            Ok(Err(reason)) => {
                result.error(format!("Schema {schema_path} is not valid JSON: {reason}"));
                return result.finish(true);
            }
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };
        let validator = match jsonschema::validator_for(&schema) {
            Ok(validator) => validator,
            Err(e) => {
                result.error(format!("Failed to compile JSON schema {schema_path}: {e}"));
                return result.finish(true);
            }
        };

        let instance = match read_json(ctx.path, self.read_limit) {
            Ok(Ok(instance)) => instance,
            Ok(Err(reason)) => {
                result.error(format!("JSON parse error: {reason}"));
                return result.finish(true);
            }
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        for error in validator.iter_errors(&instance) {
            result.error(format!("Schema validation: {error}"));
        }
        if result.errors.is_empty() {
            result.message(format!("Document is valid against schema {schema_path}."));
        }
        result.push_stream(json_stream());
        result.finish(true)
    }
}
