//! Characterization result types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use filescope_meta::{MetadataStream, WellFormed};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::checker::CheckerResult;
use crate::checkers::dummy::{FILE_EXISTS, SCRAPER_NOT_FOUND};
use crate::error::SourceError;

/// Per-checker breakdown kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckerInfo {
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    pub well_formed: WellFormed,
}

impl From<&CheckerResult> for CheckerInfo {
    fn from(result: &CheckerResult) -> Self {
        Self {
            messages: result.messages.clone(),
            errors: result.errors.clone(),
            well_formed: result.well_formed,
        }
    }
}

/// The characterization of one file.
///
/// Created fresh per request and never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Scrape {
    /// Resolved mimetype, `(:unav)` when unresolved.
    pub mimetype: String,
    /// Resolved version, `(:unav)` when unresolved.
    pub version: String,
    /// `true`, `false`, or `null` when validation was skipped.
    pub well_formed: WellFormed,
    /// Merged streams keyed by index. Serialized as a list sorted by index.
    #[serde(with = "stream_list")]
    #[schemars(with = "Vec<MetadataStream>")]
    pub streams: BTreeMap<usize, MetadataStream>,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    /// Messages and errors of each checker that ran, by checker identity.
    pub info: BTreeMap<String, CheckerInfo>,
    /// Checker identities in execution order.
    pub checkers: Vec<String>,
}

impl Scrape {
    /// Whether no checker supported the file.
    #[must_use]
    pub fn not_recognized(&self) -> bool {
        self.checkers.iter().any(|c| c == SCRAPER_NOT_FOUND)
    }

    /// Whether the file was missing or unreadable, so no checker ran.
    #[must_use]
    pub fn file_missing(&self) -> bool {
        self.well_formed.is_false()
            && matches!(self.checkers.as_slice(), [only] if only == FILE_EXISTS)
    }

    /// Process exit status for this result.
    ///
    /// `0` when well-formed or validation was skipped, `1` when the file is
    /// not well-formed or was not recognized.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.well_formed.is_false() || self.not_recognized())
    }
}

mod stream_list {
    use std::collections::BTreeMap;

    use filescope_meta::MetadataStream;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        streams: &BTreeMap<usize, MetadataStream>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(streams.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<usize, MetadataStream>, D::Error> {
        let list = Vec::<MetadataStream>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|s| (s.index, s)).collect())
    }
}

/// One characterized file in a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub file: PathBuf,
    pub result: Scrape,
}

/// Result of a batch run.
///
/// Callers must check both `results` and `source_errors`. A non-empty
/// `source_errors` means some files were never characterized.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct BatchReport {
    /// Number of files characterized.
    pub characterized_files: usize,
    /// Number of files that could not be characterized at all.
    pub failed_files: usize,
    /// Whether every file is well-formed or skipped and no source error occurred.
    pub ok: bool,
    pub results: Vec<BatchEntry>,
    pub source_errors: Vec<SourceError>,
}

impl BatchReport {
    #[must_use]
    pub fn new(results: Vec<BatchEntry>, source_errors: Vec<SourceError>) -> Self {
        let ok = source_errors.is_empty() && results.iter().all(|e| e.result.exit_code() == 0);
        Self {
            characterized_files: results.len(),
            failed_files: source_errors.len(),
            ok,
            results,
            source_errors,
        }
    }

    /// Number of files whose verdict is not well-formed.
    #[must_use]
    pub fn not_well_formed(&self) -> usize {
        self.results
            .iter()
            .filter(|e| e.result.well_formed.is_false())
            .count()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.ok)
    }
}
