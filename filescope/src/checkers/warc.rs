//! Web archive checkers for WARC and ARC files, plain or gzip-compressed.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use filescope_meta::{MetadataStream, StreamType, UNAV};
use flate2::read::MultiGzDecoder;

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};

const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

/// Line-oriented reader over a possibly compressed archive.
struct ArchiveReader {
    inner: Box<dyn BufRead>,
    compressed: bool,
}

impl ArchiveReader {
    fn open(path: &Path) -> io::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let compressed = file.fill_buf()?.starts_with(GZIP_MAGIC);
        let inner: Box<dyn BufRead> = if compressed {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(file)
        };
        Ok(Self { inner, compressed })
    }

    /// Next line without its terminator, `None` at end of input.
    fn line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.inner.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read a record block of `len` bytes, returning how many were present.
    fn block(&mut self, len: u64, keep: usize) -> io::Result<(u64, Vec<u8>)> {
        let mut head = Vec::new();
        let mut taken = (&mut self.inner).take(len);
        taken.by_ref().take(keep as u64).read_to_end(&mut head)?;
        let rest = io::copy(&mut taken, &mut io::sink())?;
        Ok((head.len() as u64 + rest, head))
    }

    /// Skip blank lines between records, returning the next non-blank one.
    fn next_nonblank(&mut self) -> io::Result<Option<String>> {
        while let Some(line) = self.line()? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

fn archive_stream(mimetype: &str, version: &str) -> MetadataStream {
    MetadataStream::new(0)
        .with_mimetype(mimetype)
        .with_version(version)
        .with_stream_type(StreamType::Binary)
}

// ---- WARC ----

const WARC_REQUIRED_HEADERS: &[&str] =
    &["WARC-Type", "WARC-Record-ID", "WARC-Date", "Content-Length"];

/// Version from a `WARC/1.0` line.
fn warc_version(line: &str) -> Option<String> {
    line.split_once("WARC/")
        .map(|(_, rest)| rest.split_whitespace().next().unwrap_or_default().to_owned())
        .filter(|v| !v.is_empty())
}

/// Walk every WARC record, returning the version and record count.
fn walk_warc(
    reader: &mut ArchiveReader,
    errors: &mut Vec<String>,
) -> io::Result<(Option<String>, usize)> {
    let mut version = None;
    let mut records = 0;
    while let Some(first) = reader.next_nonblank()? {
        records += 1;
        let Some(record_version) = warc_version(&first) else {
            errors.push(format!(
                "Record {records}: expected a WARC version line, found '{first}'."
            ));
            return Ok((version, records));
        };
        match &version {
            None => version = Some(record_version),
            Some(v) if *v != record_version => errors.push(format!(
                "Record {records}: version {record_version} differs from {v}."
            )),
            Some(_) => {}
        }

        let mut headers = Vec::new();
        loop {
            match reader.line()? {
                Some(line) if line.is_empty() => break,
                Some(line) => headers.push(line),
                None => {
                    errors.push(format!("Record {records}: truncated header block."));
                    return Ok((version, records));
                }
            }
        }
        let header = |name: &str| {
            headers.iter().find_map(|h| {
                let (key, value) = h.split_once(':')?;
                key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_owned())
            })
        };
        for &required in WARC_REQUIRED_HEADERS {
            if header(required).is_none() {
                errors.push(format!("Record {records}: missing header {required}."));
            }
        }
        let Some(length) = header("Content-Length").and_then(|v| v.parse::<u64>().ok()) else {
            errors.push(format!("Record {records}: invalid or missing Content-Length."));
            return Ok((version, records));
        };
        let (read, _) = reader.block(length, 0)?;
        if read < length {
            errors.push(format!(
                "Record {records}: content truncated, {read} of {length} bytes present."
            ));
            return Ok((version, records));
        }
    }
    Ok((version, records))
}

pub struct WarcChecker;

impl WarcChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("application/warc")
        .versions(&["0.17", "0.18", "1.0"])
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(_config: &ToolConfig) -> Self {
        Self
    }
}

impl Checker for WarcChecker {
    fn id(&self) -> CheckerId {
        "WarcChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let walked = ArchiveReader::open(ctx.path).and_then(|mut reader| {
            if ctx.check_wellformed {
                let mut errors = Vec::new();
                let (version, records) = walk_warc(&mut reader, &mut errors)?;
                Ok((version, records, errors, reader.compressed))
            } else {
                let version = reader.next_nonblank()?.as_deref().and_then(warc_version);
                Ok((version, 0, Vec::new(), reader.compressed))
            }
        });
        let (version, records, errors, compressed) = match walked {
            Ok(walked) => walked,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };

        if compressed {
            result.message("WARC file is gzip compressed.");
        }
        if ctx.check_wellformed && records == 0 && errors.is_empty() {
            result.error("WARC file contains no records.");
        }
        for error in errors {
            result.error(error);
        }
        if ctx.check_wellformed && result.errors.is_empty() {
            result.message(format!("WARC file with {records} records is well-formed."));
        }

        let mimetype = if result.errors.is_empty() {
            "application/warc"
        } else {
            UNAV
        };
        result.push_stream(archive_stream(mimetype, version.as_deref().unwrap_or(UNAV)));
        result.finish(ctx.check_wellformed)
    }
}

// ---- ARC ----

/// Version from the `filedesc` version block, e.g. `1 1 InternetArchive`.
fn arc_version(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let mut tokens = text.lines().next()?.split_whitespace();
    let major = tokens.next()?.parse::<u8>().ok()?;
    let minor = tokens.next()?.parse::<u8>().ok()?;
    Some(format!("{major}.{minor}"))
}

/// Walk every ARC record, returning the version and record count.
fn walk_arc(
    reader: &mut ArchiveReader,
    errors: &mut Vec<String>,
    full: bool,
) -> io::Result<(Option<String>, usize)> {
    let mut version = None;
    let mut records = 0;
    while let Some(header) = reader.next_nonblank()? {
        records += 1;
        if records == 1 && !header.starts_with("filedesc://") {
            errors.push("ARC file does not start with a filedesc record.".to_owned());
            return Ok((version, records));
        }
        let fields: Vec<&str> = header.split_whitespace().collect();
        if fields.len() < 5 {
            errors.push(format!(
                "Record {records}: header has {} fields, expected at least 5.",
                fields.len()
            ));
            return Ok((version, records));
        }
        let Some(length) = fields.last().and_then(|v| v.parse::<u64>().ok()) else {
            errors.push(format!("Record {records}: invalid record length."));
            return Ok((version, records));
        };
        let keep = if records == 1 { 256 } else { 0 };
        let (read, head) = reader.block(length, keep)?;
        if records == 1 {
            version = arc_version(&head);
            if !full {
                return Ok((version, records));
            }
        }
        if read < length {
            errors.push(format!(
                "Record {records}: content truncated, {read} of {length} bytes present."
            ));
            return Ok((version, records));
        }
    }
    Ok((version, records))
}

pub struct ArcChecker;

impl ArcChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &[CapabilityEntry::new("application/x-internet-archive")
            .versions(&["1.0", "1.1"])
            .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(_config: &ToolConfig) -> Self {
        Self
    }
}

impl Checker for ArcChecker {
    fn id(&self) -> CheckerId {
        "ArcChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let mut errors = Vec::new();
        let walked = ArchiveReader::open(ctx.path)
            .and_then(|mut reader| walk_arc(&mut reader, &mut errors, ctx.check_wellformed));
        let (version, records) = match walked {
            Ok(walked) => walked,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };
        if records == 0 {
            errors.push("ARC file contains no records.".to_owned());
        }
        for error in errors {
            result.error(error);
        }
        if ctx.check_wellformed && result.errors.is_empty() {
            result.message(format!("ARC file with {records} records is well-formed."));
        }

        let mimetype = if result.errors.is_empty() {
            "application/x-internet-archive"
        } else {
            UNAV
        };
        result.push_stream(archive_stream(mimetype, version.as_deref().unwrap_or(UNAV)));
        result.finish(ctx.check_wellformed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checker::Params;
    use filescope_meta::WellFormed;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs;
    use std::io::Write;

    fn warc_record(version: &str, body: &str) -> String {
        format!(
            "WARC/{version}\r\nWARC-Type: resource\r\nWARC-Record-ID: <urn:uuid:1>\r\n\
             WARC-Date: 2024-01-01T00:00:00Z\r\nContent-Length: {}\r\n\r\n{body}\r\n\r\n",
            body.len()
        )
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn run(checker: &dyn Checker, bytes: &[u8], mimetype: &str, validate: bool) -> CheckerResult {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive");
        fs::write(&path, bytes).unwrap();
        let params = Params::new();
        let ctx = ScrapeContext {
            path: &path,
            mimetype: Some(mimetype),
            version: None,
            check_wellformed: validate,
            params: &params,
        };
        checker.scrape(&ctx)
    }

    // ---- WARC ----

    #[test]
    fn test_valid_warc() {
        let warc = warc_record("1.0", "hello") + &warc_record("1.0", "world!");
        let result = run(&WarcChecker, warc.as_bytes(), "application/warc", true);
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].mimetype, "application/warc");
        assert_eq!(result.streams[0].version, "1.0");
    }

    #[test]
    fn test_gzip_warc_version_from_first_line() {
        let warc = gzip(warc_record("0.18", "hello").as_bytes());
        let result = run(&WarcChecker, &warc, "application/warc", true);
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].version, "0.18");
        assert!(result.messages.iter().any(|m| m.contains("gzip")));
    }

    #[test]
    fn test_truncated_warc() {
        let mut warc = warc_record("1.0", "hello world");
        warc.truncate(warc.len() - 10);
        let result = run(&WarcChecker, warc.as_bytes(), "application/warc", true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].contains("truncated"));
        assert_eq!(result.streams[0].mimetype, UNAV);
    }

    #[test]
    fn test_missing_header() {
        let warc = "WARC/1.0\r\nContent-Length: 0\r\n\r\n\r\n\r\n";
        let result = run(&WarcChecker, warc.as_bytes(), "application/warc", true);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors.iter().any(|e| e.contains("missing header WARC-Type")));
    }

    #[test]
    fn test_warc_without_validation_reads_version() {
        let result = run(&WarcChecker, b"WARC/0.17\r\ngarbage", "application/warc", false);
        assert_eq!(result.well_formed, WellFormed::Unknown);
        assert_eq!(result.streams[0].version, "0.17");
    }

    // ---- ARC ----

    fn arc_file(minor: u8) -> Vec<u8> {
        let block = format!(
            "1 {minor} InternetArchive\nURL IP-address Archive-date Content-type Archive-length\n"
        );
        let body = "<html></html>";
        format!(
            "filedesc://test.arc 0.0.0.0 20240101000000 text/plain {}\n{block}\n\
             http://example.com/ 93.184.216.34 20240101000000 text/html {}\n{body}\n",
            block.len(),
            body.len()
        )
        .into_bytes()
    }

    #[test]
    fn test_valid_arc() {
        let result = run(&ArcChecker, &arc_file(1), "application/x-internet-archive", true);
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].version, "1.1");
    }

    #[test]
    fn test_gzip_arc() {
        let result = run(&ArcChecker, &gzip(&arc_file(0)), "application/x-internet-archive", true);
        assert_eq!(result.well_formed, WellFormed::True, "{:?}", result.errors);
        assert_eq!(result.streams[0].version, "1.0");
    }

    #[test]
    fn test_arc_without_filedesc() {
        let result = run(
            &ArcChecker,
            b"http://x 1.2.3.4 2024 text/html 0\n",
            "application/x-internet-archive",
            true,
        );
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].contains("filedesc"));
    }
}
