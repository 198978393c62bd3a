//! Checkers that do not inspect a format: the file existence gate, the
//! not-recognized sentinel and predefined-type reconciliation.

use std::fs;
use std::path::Path;

use filescope_meta::{MetadataStream, UNAV, WellFormed, is_concrete};

use crate::checker::{Checker, CheckerId, CheckerResult, Query, ScrapeContext};
use crate::registry::CapabilityEntry;

pub const FILE_EXISTS: CheckerId = "FileExists";
pub const SCRAPER_NOT_FOUND: CheckerId = "ScraperNotFound";
pub const MIME_MATCH: CheckerId = "MimeMatchChecker";

/// Gate run before anything else. A `False` verdict stops characterization.
#[must_use]
pub fn file_exists(path: &Path) -> CheckerResult {
    let mut result = CheckerResult::new(FILE_EXISTS);
    if path.as_os_str().is_empty() {
        result.error("No filename given.");
    } else {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => match fs::File::open(path) {
                Ok(_) => result.message(format!("File {} was found.", path.display())),
                Err(e) => result.error(format!("File {} is not readable: {e}", path.display())),
            },
            Ok(_) => result.error(format!("{} is not a regular file.", path.display())),
            Err(_) => result.error(format!("File {} does not exist.", path.display())),
        }
    }
    let verdict = if result.errors.is_empty() {
        WellFormed::Unknown
    } else {
        WellFormed::False
    };
    result.well_formed = verdict;
    result
}

/// Sentinel selected when no capability row matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperNotFound;

impl Checker for ScraperNotFound {
    fn id(&self) -> CheckerId {
        SCRAPER_NOT_FOUND
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        &[]
    }

    fn is_supported(&self, _query: &Query<'_>) -> bool {
        false
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mimetype = ctx.mimetype.unwrap_or(UNAV);
        let mut result = CheckerResult::new(SCRAPER_NOT_FOUND);
        result.message(format!("No checker supports mimetype '{mimetype}'."));
        result.error("Proper scraper was not found. The file was not analyzed.");
        result.push_stream(MetadataStream::new(0).with_mimetype(mimetype));
        result.well_formed = WellFormed::False;
        result
    }
}

/// Compare the resolved type with the caller's claim.
///
/// A differing mimetype, or a differing concrete version, is an error. A
/// version that could not be resolved is only reported.
#[must_use]
pub fn mime_match(
    resolved_mimetype: &str,
    resolved_version: &str,
    predefined_mimetype: &str,
    predefined_version: Option<&str>,
) -> CheckerResult {
    let mut result = CheckerResult::new(MIME_MATCH);
    if is_concrete(resolved_mimetype) && resolved_mimetype != predefined_mimetype {
        result.error(format!(
            "Predefined mimetype '{predefined_mimetype}' and resolved mimetype '{resolved_mimetype}' mismatch."
        ));
    }
    if let Some(expected) = predefined_version.filter(|v| is_concrete(v)) {
        if !is_concrete(resolved_version) {
            result.message(format!(
                "Predefined version '{expected}' could not be confirmed."
            ));
        } else if resolved_version != expected {
            result.error(format!(
                "Predefined version '{expected}' and resolved version '{resolved_version}' mismatch."
            ));
        }
    }
    if result.errors.is_empty() {
        result.message("Predefined mimetype and version match the resolved values.");
    }
    result.finish(true)
}
