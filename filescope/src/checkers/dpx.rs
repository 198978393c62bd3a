//! DPX (SMPTE 268M) header validation.

use std::fs;

use filescope_meta::{MetadataStream, StreamType, UNAV};

use crate::binary::Endian;
use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};

/// Size of the generic file information header.
const GENERIC_HEADER_SIZE: usize = 768;
const OFFSET_IMAGE_DATA: usize = 4;
const OFFSET_VERSION: usize = 8;
const OFFSET_FILE_SIZE: usize = 16;
const OFFSET_PIXELS_PER_LINE: usize = 772;
const OFFSET_LINES_PER_ELEMENT: usize = 776;

/// Fields read from a DPX header.
#[derive(Debug, PartialEq, Eq)]
struct DpxHeader {
    order: Endian,
    image_offset: u32,
    file_size: u32,
    version: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_header(bytes: &[u8]) -> Result<DpxHeader, String> {
    if bytes.len() < GENERIC_HEADER_SIZE {
        return Err("Truncated file".to_owned());
    }
    let order = match bytes.get(0..4) {
        Some(b"SDPX") => Endian::Big,
        Some(b"XPDS") => Endian::Little,
        _ => return Err("Invalid magic number, not a DPX file.".to_owned()),
    };
    let version = bytes
        .get(OFFSET_VERSION..OFFSET_VERSION + 8)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .map(|raw| raw.trim_end_matches('\0').trim().trim_start_matches('V').to_owned())
        .filter(|v| !v.is_empty());
    Ok(DpxHeader {
        order,
        image_offset: order
            .u32_at(bytes, OFFSET_IMAGE_DATA)
            .ok_or_else(|| "Truncated file".to_owned())?,
        file_size: order
            .u32_at(bytes, OFFSET_FILE_SIZE)
            .ok_or_else(|| "Truncated file".to_owned())?,
        version,
        width: order.u32_at(bytes, OFFSET_PIXELS_PER_LINE),
        height: order.u32_at(bytes, OFFSET_LINES_PER_ELEMENT),
    })
}

pub struct DpxChecker;

impl DpxChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("image/x-dpx")
        .versions(&["1.0", "2.0"])
        .validation_only()
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(_config: &ToolConfig) -> Self {
        Self
    }
}

impl Checker for DpxChecker {
    fn id(&self) -> CheckerId {
        "DpxChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let bytes = match fs::read(ctx.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(true);
            }
        };
        let actual = bytes.len();

        let header = match parse_header(&bytes) {
            Ok(header) => header,
            Err(reason) => {
                result.error(reason);
                return result.finish(true);
            }
        };
        tracing::debug!(order = ?header.order, offset = header.image_offset, "read DPX header");

        let offset = usize::try_from(header.image_offset).unwrap_or(usize::MAX);
        let declared = usize::try_from(header.file_size).unwrap_or(usize::MAX);
        if offset > actual {
            result.error(format!(
                "Offset to image data ({offset}) is more than file size ({actual})."
            ));
        } else if declared != actual {
            result.error(format!(
                "Different file sizes from header ({declared}) and filesystem ({actual})."
            ));
        }

        if result.errors.is_empty() {
            result.message(format!("File {} is valid.", ctx.path.display()));
        }
        let mut stream = MetadataStream::new(0)
            .with_mimetype("image/x-dpx")
            .with_version(header.version.as_deref().unwrap_or(UNAV))
            .with_stream_type(StreamType::Image);
        if let (Some(width), Some(height)) = (header.width, header.height) {
            stream = stream
                .with_field("width", width.to_string())
                .with_field("height", height.to_string());
        }
        result.push_stream(stream);
        result.finish(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checker::{Params, Query};
    use filescope_meta::WellFormed;

    /// A big-endian DPX 2.0 file of `len` bytes whose header claims `claimed` bytes.
    fn dpx(len: usize, claimed: u32, offset: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[0..4].copy_from_slice(b"SDPX");
        bytes[4..8].copy_from_slice(&offset.to_be_bytes());
        bytes[8..12].copy_from_slice(b"V2.0");
        bytes[16..20].copy_from_slice(&claimed.to_be_bytes());
        bytes[772..776].copy_from_slice(&16u32.to_be_bytes());
        bytes[776..780].copy_from_slice(&9u32.to_be_bytes());
        bytes
    }

    fn run(bytes: &[u8], validate: bool) -> CheckerResult {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.dpx");
        fs::write(&path, bytes).unwrap();
        let params = Params::new();
        let ctx = ScrapeContext {
            path: &path,
            mimetype: Some("image/x-dpx"),
            version: None,
            check_wellformed: validate,
            params: &params,
        };
        DpxChecker.scrape(&ctx)
    }

    #[test]
    fn test_valid_dpx() {
        let result = run(&dpx(4096, 4096, 2048), true);
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert!(result.messages[0].ends_with("is valid."));
        let stream = &result.streams[0];
        assert_eq!(stream.version, "2.0");
        assert_eq!(stream.get("width"), Some("16"));
        assert_eq!(stream.get("height"), Some("9"));
    }

    #[test]
    fn test_empty_file_is_truncated() {
        let result = run(&[], true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert_eq!(result.errors, vec!["Truncated file"]);
    }

    #[test]
    fn test_size_mismatch() {
        let result = run(&dpx(4095, 4096, 2048), true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].starts_with("Different file sizes"));
    }

    #[test]
    fn test_wrong_endian() {
        let mut bytes = dpx(4096, 4096, 2048);
        bytes[0..4].copy_from_slice(b"XPDS");
        let result = run(&bytes, true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].contains("is more than file size"));
    }

    #[test]
    fn test_without_validation() {
        let result = run(&dpx(4096, 4096, 2048), false);
        assert_eq!(result.well_formed, WellFormed::Unknown);
        assert!(result.messages[0].starts_with("Skipping checker"));
    }

    #[test]
    fn test_is_supported() {
        let params = Params::new();
        let query = |mimetype, version, validate| Query {
            mimetype,
            version,
            check_wellformed: validate,
            params: &params,
        };
        assert!(DpxChecker.is_supported(&query("image/x-dpx", Some("2.0"), true)));
        assert!(DpxChecker.is_supported(&query("image/x-dpx", None, true)));
        assert!(DpxChecker.is_supported(&query("image/x-dpx", Some("1.0"), true)));
        assert!(!DpxChecker.is_supported(&query("image/x-dpx", Some("2.0"), false)));
        assert!(!DpxChecker.is_supported(&query("image/x-dpx", Some("foo"), true)));
        assert!(!DpxChecker.is_supported(&query("foo", Some("2.0"), true)));
    }
}
