//! SPSS Portable file checker.

use filescope_meta::{MetadataStream, StreamType, UNAP, UNAV};

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::signature;

const MIMETYPE: &str = "application/x-spss-por";

pub struct PsppChecker {
    read_size: usize,
}

impl PsppChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &[CapabilityEntry::new(MIMETYPE).priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_size: config.signature_read_size,
        }
    }
}

impl Checker for PsppChecker {
    fn id(&self) -> CheckerId {
        "PsppChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let header = match signature::read_header(ctx.path, self.read_size) {
            Ok(header) => header,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };

        let portable = signature::identify(&header).is_some_and(|found| found.mimetype == MIMETYPE);
        if portable {
            result.message("File is an SPSS Portable file.");
        } else {
            result.error("File is not SPSS Portable format: SPSSPORT tag not found.");
        }
        let (mimetype, version) = if portable { (MIMETYPE, UNAP) } else { (UNAV, UNAV) };
        result.push_stream(
            MetadataStream::new(0)
                .with_mimetype(mimetype)
                .with_version(version)
                .with_stream_type(StreamType::Binary),
        );
        result.finish(ctx.check_wellformed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checker::Params;
    use filescope_meta::WellFormed;
    use std::fs;

    fn run(bytes: &[u8], validate: bool) -> CheckerResult {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.por");
        fs::write(&path, bytes).unwrap();
        let params = Params::new();
        let ctx = ScrapeContext {
            path: &path,
            mimetype: Some(MIMETYPE),
            version: None,
            check_wellformed: validate,
            params: &params,
        };
        PsppChecker::new(&ToolConfig::default()).scrape(&ctx)
    }

    fn portable_file() -> Vec<u8> {
        let mut bytes = vec![b' '; 464];
        bytes.extend_from_slice(b"SPSSPORTA20240101120000");
        bytes
    }

    #[test]
    fn test_portable_file() {
        let result = run(&portable_file(), true);
        assert_eq!(result.well_formed, WellFormed::True);
        assert_eq!(result.streams[0].mimetype, MIMETYPE);
        assert_eq!(result.streams[0].version, UNAP);
        assert_eq!(result.streams[0].stream_type, StreamType::Binary);
    }

    #[test]
    fn test_not_portable() {
        let result = run(b"not an spss file", true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert_eq!(result.streams[0].mimetype, UNAV);
        assert_eq!(result.streams[0].version, UNAV);
    }

    #[test]
    fn test_without_validation() {
        let result = run(b"not an spss file", false);
        assert_eq!(result.well_formed, WellFormed::Unknown);
    }
}
