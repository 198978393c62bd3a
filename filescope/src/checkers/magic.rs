//! Signature checkers.
//!
//! `MagicChecker` is cross-cutting: it confirms that the leading bytes of a
//! file belong to the claimed format and reads the version from headers that
//! carry one. `MagicTextChecker` does the same for markup text formats, which
//! have no byte signature, and sniffs their character encoding.

use std::borrow::Cow;
use std::sync::LazyLock;

use encoding_rs::{Encoding, ISO_8859_15, UTF_8};
use filescope_meta::{MetadataStream, StreamType, UNAV};
use regex::Regex;

use crate::checker::{Checker, CheckerId, CheckerResult, Query, ScrapeContext};
use crate::checkers::static_regex;
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::signature;

/// Formats whose content is text or has no fixed leading signature.
pub const EXCLUDED_MIMETYPES: &[&str] = &[
    "application/json",
    "application/xhtml+xml",
    "application/warc",
    "application/x-internet-archive",
    "application/x-spss-por",
];

pub struct MagicChecker {
    read_size: usize,
}

impl MagicChecker {
    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_size: config.signature_read_size,
        }
    }
}

fn stream_type_for(mimetype: &str) -> StreamType {
    match mimetype.split('/').next() {
        Some("image") => StreamType::Image,
        Some("video") => StreamType::Other,
        Some("audio") => StreamType::Audio,
        _ => StreamType::Binary,
    }
}

/// PDF/A levels are not visible in the header; keep the claimed level when
/// the header version is one the level allows.
fn pdf_version(claimed: Option<&str>, header: Option<&str>) -> Option<String> {
    let header = header?;
    let allowed: &[&str] = match claimed {
        Some("A-1a" | "A-1b") => &["1.4"],
        Some(level) if level.starts_with("A-2") || level.starts_with("A-3") => {
            &["1.4", "1.5", "1.6", "1.7"]
        }
        _ => return Some(header.to_owned()),
    };
    match claimed {
        Some(level) if allowed.contains(&header) => Some(level.to_owned()),
        _ => Some(header.to_owned()),
    }
}

impl Checker for MagicChecker {
    fn id(&self) -> CheckerId {
        "MagicChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        &[]
    }

    fn is_supported(&self, query: &Query<'_>) -> bool {
        !query.mimetype.starts_with("text/")
            && !EXCLUDED_MIMETYPES.contains(&query.mimetype)
            && signature::knows(query.mimetype)
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
        let claimed = ctx.mimetype.unwrap_or(UNAV);

        let Some(found) = signature::identify(&header) else {
            result.error("File signature not recognized.");
            result.push_stream(MetadataStream::new(0));
            return result.finish(ctx.check_wellformed);
        };

        if signature::compatible(claimed, found.mimetype) {
            let version = if found.mimetype == "application/pdf" {
                pdf_version(ctx.version, found.version.as_deref())
            } else {
                found.version
            };
            result.message(format!("File signature matches {claimed}."));
            result.push_stream(
                MetadataStream::new(0)
                    .with_mimetype(claimed)
                    .with_version(version.unwrap_or_else(|| UNAV.to_owned()))
                    .with_stream_type(stream_type_for(claimed)),
            );
        } else {
            result.error(format!(
                "File signature indicates '{}' but '{claimed}' was expected.",
                found.mimetype
            ));
            result.push_stream(
                MetadataStream::new(0)
                    .with_mimetype(found.mimetype)
                    .with_stream_type(stream_type_for(found.mimetype)),
            );
        }
        result.finish(ctx.check_wellformed)
    }
}

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

static HTML_DOCTYPE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)<!DOCTYPE\s+html\b([^>]*)>"));
static DTD_VERSION: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)//DTD\s+X?HTML\s+([0-9.]+)"));

/// Decode the header with the encoding it most likely uses.
///
/// A byte order mark decides first, then UTF-8 validity (a multi-byte
/// sequence cut by the read limit still counts), then ISO-8859-15.
fn sniff_encoding(bytes: &[u8]) -> (&'static Encoding, Cow<'_, str>) {
    let encoding = match Encoding::for_bom(bytes) {
        Some((encoding, _)) => encoding,
        None => match std::str::from_utf8(bytes) {
            Err(e) if e.error_len().is_some() => ISO_8859_15,
            _ => UTF_8,
        },
    };
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    (encoding, text)
}

fn is_text(text: &str) -> bool {
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r' | '\u{0c}'))
}

/// Version from the document type declaration: the DTD version for
/// HTML 4 and XHTML 1.x, `5` for the bare `<!DOCTYPE html>`.
fn doctype_version(text: &str) -> Option<String> {
    let rest = HTML_DOCTYPE.captures(text)?.get(1)?.as_str();
    if rest.trim().is_empty() {
        return Some("5".to_owned());
    }
    DTD_VERSION
        .captures(rest)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Signature and encoding sniffing for HTML and XHTML.
///
/// Needs no `charset` param. When one is given, `TextEncodingChecker`
/// validates strictly and its charset wins.
pub struct MagicTextChecker {
    read_size: usize,
}

impl MagicTextChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[
        CapabilityEntry::new("text/html").priority(priority::SIGNATURE),
        CapabilityEntry::new("application/xhtml+xml").priority(priority::SIGNATURE),
    ];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_size: config.signature_read_size,
        }
    }
}

impl Checker for MagicTextChecker {
    fn id(&self) -> CheckerId {
        "MagicTextChecker"
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
        let claimed = ctx.mimetype.unwrap_or(UNAV);
        let (encoding, text) = sniff_encoding(&header);

        if !is_text(&text) {
            result.error("File is not a text file");
            result.push_stream(MetadataStream::new(0));
            return result.finish(ctx.check_wellformed);
        }
        if !text.to_ascii_lowercase().contains("<html") {
            result.error(format!("No <html> root element found, '{claimed}' was expected."));
            result.push_stream(MetadataStream::new(0).with_stream_type(StreamType::Text));
            return result.finish(ctx.check_wellformed);
        }
        if claimed == "application/xhtml+xml" && !text.contains(XHTML_NAMESPACE) {
            result.error("XHTML namespace is not declared.");
        }

        result.message(format!("File signature matches {claimed}."));
        result.push_stream(
            MetadataStream::new(0)
                .with_mimetype(claimed)
                .with_version(doctype_version(&text).unwrap_or_else(|| UNAV.to_owned()))
                .with_stream_type(StreamType::Text)
                .with_field("charset", encoding.name()),
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
    use std::path::Path;

    fn scrape(path: &Path, mimetype: &str, version: Option<&str>, validate: bool) -> CheckerResult {
        let params = Params::new();
        let ctx = ScrapeContext {
            path,
            mimetype: Some(mimetype),
            version,
            check_wellformed: validate,
            params: &params,
        };
        MagicChecker::new(&ToolConfig::default()).scrape(&ctx)
    }

    #[test]
    fn test_supported_mimetypes() {
        let checker = MagicChecker::new(&ToolConfig::default());
        let params = Params::new();
        let query = |mimetype| Query {
            mimetype,
            version: None,
            check_wellformed: true,
            params: &params,
        };
        assert!(checker.is_supported(&query("application/pdf")));
        assert!(checker.is_supported(&query("image/png")));
        assert!(!checker.is_supported(&query("text/plain")));
        assert!(!checker.is_supported(&query("application/json")));
        assert!(!checker.is_supported(&query("application/warc")));
    }

    #[test]
    fn test_pdf_a_level_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, b"%PDF-1.7\n").unwrap();

        let result = scrape(&path, "application/pdf", Some("A-2b"), true);
        assert_eq!(result.well_formed, WellFormed::True);
        assert_eq!(result.streams[0].version, "A-2b");

        let plain = scrape(&path, "application/pdf", None, true);
        assert_eq!(plain.streams[0].version, "1.7");

        let wrong_level = scrape(&path, "application/pdf", Some("A-1b"), true);
        assert_eq!(wrong_level.streams[0].version, "1.7");
    }

    #[test]
    fn test_signature_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.png");
        fs::write(&path, b"GIF89a\x01\x00\x01\x00").unwrap();
        let result = scrape(&path, "image/png", None, true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert_eq!(result.streams[0].mimetype, "image/gif");
    }

    #[test]
    fn test_mismatch_without_validation_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.png");
        fs::write(&path, b"\x00\x00\x00\x00").unwrap();
        let result = scrape(&path, "image/png", None, false);
        assert_eq!(result.well_formed, WellFormed::Unknown);
        assert_eq!(result.errors, vec!["File signature not recognized."]);
    }

    // ---- markup text ----

    fn scrape_text(path: &Path, mimetype: &str) -> CheckerResult {
        let params = Params::new();
        let ctx = ScrapeContext {
            path,
            mimetype: Some(mimetype),
            version: None,
            check_wellformed: true,
            params: &params,
        };
        MagicTextChecker::new(&ToolConfig::default()).scrape(&ctx)
    }

    #[test]
    fn test_html5_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, "<!DOCTYPE html>\n<html><body>caf\u{e9}</body></html>\n").unwrap();

        let result = scrape_text(&path, "text/html");
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].mimetype, "text/html");
        assert_eq!(result.streams[0].version, "5");
        assert_eq!(result.streams[0].get("charset"), Some("UTF-8"));
    }

    #[test]
    fn test_html4_latin1_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        let mut body = b"<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\">\n<HTML>".to_vec();
        body.extend_from_slice(b"caf\xe9</HTML>\n");
        fs::write(&path, body).unwrap();

        let result = scrape_text(&path, "text/html");
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].version, "4.01");
        assert_eq!(result.streams[0].get("charset"), Some("ISO-8859-15"));
    }

    #[test]
    fn test_xhtml_needs_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xhtml");
        fs::write(
            &path,
            concat!(
                "<?xml version=\"1.0\"?>\n",
                "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" ",
                "\"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n",
                "<html xmlns=\"http://www.w3.org/1999/xhtml\"><body/></html>\n",
            ),
        )
        .unwrap();
        let result = scrape_text(&path, "application/xhtml+xml");
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].version, "1.1");

        fs::write(&path, "<html><body/></html>").unwrap();
        let result = scrape_text(&path, "application/xhtml+xml");
        assert_eq!(result.well_formed, WellFormed::False);
        assert_eq!(result.errors, vec!["XHTML namespace is not declared."]);
    }

    #[test]
    fn test_text_without_markup_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, "just words\n").unwrap();
        let result = scrape_text(&path, "text/html");
        assert_eq!(result.well_formed, WellFormed::False);

        fs::write(&path, b"\x00\x01\x02<html>").unwrap();
        let result = scrape_text(&path, "text/html");
        assert_eq!(result.errors, vec!["File is not a text file"]);
    }

    #[test]
    fn test_utf8_cut_by_read_limit_is_utf8() {
        let (encoding, _) = sniff_encoding("<html>\u{e9}".as_bytes().split_last().unwrap().1);
        assert_eq!(encoding, UTF_8);
        let (encoding, text) = sniff_encoding(b"\xff\xfe<\x00h\x00");
        assert_eq!(encoding.name(), "UTF-16LE");
        assert_eq!(text, "<h");
    }
}
