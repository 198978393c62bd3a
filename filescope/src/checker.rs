//! The contract every format checker implements.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use filescope_meta::{MetadataStream, WellFormed};

use crate::error::{CheckerFailure, ContractViolation};
use crate::registry::CapabilityEntry;

/// Stable identity of a checker, e.g. `"PngChecker"`.
pub type CheckerId = &'static str;

/// Free-form parameters recognized by individual checkers
/// (`charset`, `schematron`, `json_schema`, ...).
pub type Params = BTreeMap<String, String>;

/// Message a checker reports when it only validates and validation is off.
pub const SKIP_MESSAGE: &str = "Skipping checker: well-formedness check not requested.";

/// What the registry asks a checker before selecting it.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub mimetype: &'a str,
    pub version: Option<&'a str>,
    pub check_wellformed: bool,
    pub params: &'a Params,
}

/// Inputs for one checker run.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeContext<'a> {
    pub path: &'a Path,
    /// Candidate mimetype (predefined or detected).
    pub mimetype: Option<&'a str>,
    /// Predefined version, if the caller gave one.
    pub version: Option<&'a str>,
    pub check_wellformed: bool,
    pub params: &'a Params,
}

impl ScrapeContext<'_> {
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// A format checker.
///
/// `is_supported` must be pure. `scrape` must always return a result: every
/// problem, including a missing external tool, becomes an error string.
pub trait Checker: Send + Sync {
    fn id(&self) -> CheckerId;

    /// The capability rows this checker registers.
    fn capabilities(&self) -> &'static [CapabilityEntry];

    fn is_supported(&self, query: &Query<'_>) -> bool {
        self.capabilities().iter().any(|row| row.accepts(query))
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult;
}

/// Output of one checker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerResult {
    pub checker: CheckerId,
    pub streams: Vec<MetadataStream>,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    pub well_formed: WellFormed,
    failed: bool,
}

impl CheckerResult {
    #[must_use]
    pub fn new(checker: CheckerId) -> Self {
        Self {
            checker,
            streams: Vec::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            well_formed: WellFormed::Unknown,
            failed: false,
        }
    }

    /// Result of a validation-only checker that was asked not to validate.
    #[must_use]
    pub fn skipped(checker: CheckerId) -> Self {
        let mut result = Self::new(checker);
        result.message(SKIP_MESSAGE);
        result
    }

    pub fn message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn push_stream(&mut self, stream: MetadataStream) {
        self.streams.push(stream);
    }

    /// Record that the check could not run. This forces `False` even when
    /// validation was not requested.
    pub fn fail(&mut self, failure: &CheckerFailure) {
        tracing::warn!(checker = self.checker, "{failure}");
        self.errors.push(failure.to_string());
        self.failed = true;
    }

    /// Derive the verdict from the collected errors.
    ///
    /// Without validation the verdict stays `Unknown` unless the checker
    /// failed to run.
    #[must_use]
    pub fn finish(mut self, check_wellformed: bool) -> Self {
        self.well_formed = if self.failed {
            WellFormed::False
        } else if check_wellformed {
            WellFormed::from(self.errors.is_empty())
        } else {
            WellFormed::Unknown
        };
        self
    }

    /// The stream with index 0, if the checker reported one.
    #[must_use]
    pub fn primary_stream(&self) -> Option<&MetadataStream> {
        self.streams.iter().find(|s| s.index == 0)
    }

    /// Check the structural contract of this result.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation`] if the result is labelled with another
    /// checker's identity or reports the same stream index twice.
    pub fn validate(&self, expected: CheckerId) -> Result<(), ContractViolation> {
        if self.checker != expected {
            return Err(ContractViolation::UnknownChecker {
                expected: expected.to_owned(),
                found: self.checker.to_owned(),
            });
        }
        let mut seen = BTreeSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.index) {
                return Err(ContractViolation::DuplicateStreamIndex {
                    checker: self.checker.to_owned(),
                    index: stream.index,
                });
            }
        }
        Ok(())
    }
}
