//! Byte signatures of the formats filescope knows.
//!
//! Shared by the signature detector (which proposes a mimetype) and the
//! signature checker (which confirms a claimed one).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// A format identified from leading bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    pub mimetype: &'static str,
    /// Version readable from the header, if the format stores one there.
    pub version: Option<String>,
    /// Whether the match is strong enough to override weaker guesses.
    pub strong: bool,
}

impl Identified {
    fn strong(mimetype: &'static str, version: Option<String>) -> Self {
        Self {
            mimetype,
            version,
            strong: true,
        }
    }

    fn weak(mimetype: &'static str) -> Self {
        Self {
            mimetype,
            version: None,
            strong: false,
        }
    }
}

/// Mimetypes the binary signature table can confirm.
pub const SIGNATURE_MIMETYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/tiff",
    "image/x-dpx",
    "application/warc",
    "application/x-internet-archive",
    "video/mp4",
    "video/quicktime",
    "video/x-matroska",
    "video/MP2T",
    "video/mpeg",
    "video/avi",
    "audio/x-wav",
    "audio/mpeg",
    "audio/flac",
];

/// Offset of the SPSS portable file signature, after the 464-byte splash strings.
const SPSS_PORT_OFFSET: usize = 464;

/// Read at most `limit` leading bytes of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_header(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Whether the mimetype is one the binary signature table covers.
#[must_use]
pub fn knows(mimetype: &str) -> bool {
    SIGNATURE_MIMETYPES.contains(&mimetype)
}

/// Whether `found` is an acceptable signature for a file claimed as `claimed`.
///
/// ISO base media files share one signature family.
#[must_use]
pub fn compatible(claimed: &str, found: &str) -> bool {
    const ISO_BMFF: &[&str] = &["video/mp4", "video/quicktime", "audio/mp4"];
    const MPEG_PROGRAM: &[&str] = &["video/mpeg", "video/MP1S", "video/MP2P"];
    claimed == found
        || (ISO_BMFF.contains(&claimed) && ISO_BMFF.contains(&found))
        || (MPEG_PROGRAM.contains(&claimed) && MPEG_PROGRAM.contains(&found))
}

/// Identify a file from its leading bytes.
#[must_use]
pub fn identify(header: &[u8]) -> Option<Identified> {
    if header.starts_with(b"\xff\xfe") || header.starts_with(b"\xfe\xff") {
        return Some(Identified::weak("text/plain"));
    }
    identify_binary(header).or_else(|| identify_text(header))
}

fn identify_binary(h: &[u8]) -> Option<Identified> {
    if let Some(rest) = h.strip_prefix(b"%PDF-") {
        let version = take_while_version(rest);
        return Some(Identified::strong("application/pdf", version));
    }
    if h.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(Identified::strong("image/png", Some("1.2".to_owned())));
    }
    if h.starts_with(b"\xff\xd8\xff") {
        return Some(Identified::strong("image/jpeg", jfif_version(h)));
    }
    if h.starts_with(b"GIF87a") {
        return Some(Identified::strong("image/gif", Some("1987a".to_owned())));
    }
    if h.starts_with(b"GIF89a") {
        return Some(Identified::strong("image/gif", Some("1989a".to_owned())));
    }
    if h.starts_with(b"II*\0") || h.starts_with(b"MM\0*") {
        return Some(Identified::strong("image/tiff", Some("6.0".to_owned())));
    }
    if h.starts_with(b"SDPX") || h.starts_with(b"XPDS") {
        let version = h
            .get(8..16)
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(|v| v.trim_end_matches('\0').trim_start_matches('V').to_owned())
            .filter(|v| !v.is_empty());
        return Some(Identified::strong("image/x-dpx", version));
    }
    if h.len() >= 12 && &h[0..4] == b"RIFF" {
        return match &h[8..12] {
            b"WAVE" => Some(Identified::strong("audio/x-wav", None)),
            b"AVI " => Some(Identified::strong("video/avi", None)),
            _ => None,
        };
    }
    if h.len() >= 12 && &h[4..8] == b"ftyp" {
        let mimetype = if &h[8..12] == b"qt  " {
            "video/quicktime"
        } else {
            "video/mp4"
        };
        return Some(Identified::strong(mimetype, None));
    }
    if h.starts_with(b"\x1a\x45\xdf\xa3") {
        return Some(Identified::strong("video/x-matroska", None));
    }
    if h.starts_with(b"\x00\x00\x01\xba") || h.starts_with(b"\x00\x00\x01\xb3") {
        return Some(Identified::strong("video/mpeg", None));
    }
    if h.len() > 188 && h[0] == 0x47 && h[188] == 0x47 {
        return Some(Identified::strong("video/MP2T", None));
    }
    if h.starts_with(b"fLaC") {
        return Some(Identified::strong("audio/flac", None));
    }
    if h.starts_with(b"ID3") || (h.len() >= 2 && h[0] == 0xff && h[1] & 0xe0 == 0xe0) {
        return Some(Identified::strong("audio/mpeg", None));
    }
    if h.starts_with(b"\x1f\x8b") {
        return identify_gzip(h);
    }
    if h.get(SPSS_PORT_OFFSET..SPSS_PORT_OFFSET + 8) == Some(b"SPSSPORT".as_slice()) {
        return Some(Identified::strong("application/x-spss-por", None));
    }
    None
}

fn identify_gzip(h: &[u8]) -> Option<Identified> {
    let mut inner = Vec::new();
    // A truncated stream still yields the decompressed prefix we need.
    let _ = MultiGzDecoder::new(h).take(64).read_to_end(&mut inner);
    identify_archive(&inner).or(Some(Identified::weak("application/gzip")))
}

fn identify_archive(h: &[u8]) -> Option<Identified> {
    if let Some(rest) = h.strip_prefix(b"WARC/") {
        return Some(Identified::strong("application/warc", take_while_version(rest)));
    }
    if h.starts_with(b"filedesc://") {
        return Some(Identified::strong("application/x-internet-archive", None));
    }
    None
}

fn identify_text(h: &[u8]) -> Option<Identified> {
    if let Some(found) = identify_archive(h) {
        return Some(found);
    }
    if !looks_like_text(h) {
        return None;
    }
    let body = h.strip_prefix(b"\xef\xbb\xbf").unwrap_or(h);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |i| &body[i..]);
    let mimetype = if start.starts_with(b"<?xml") {
        "text/xml"
    } else if start.starts_with(b"{") || start.starts_with(b"[") {
        "application/json"
    } else if starts_with_ignore_case(start, b"<!doctype html")
        || starts_with_ignore_case(start, b"<html")
    {
        "text/html"
    } else {
        "text/plain"
    };
    Some(Identified::weak(mimetype))
}

/// True when the bytes contain no control characters that never occur in text.
#[must_use]
pub fn looks_like_text(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
}

fn starts_with_ignore_case(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn take_while_version(bytes: &[u8]) -> Option<String> {
    let version: String = bytes
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| char::from(b))
        .collect();
    (!version.is_empty()).then_some(version)
}

fn jfif_version(h: &[u8]) -> Option<String> {
    if h.get(6..11) != Some(b"JFIF\0".as_slice()) {
        return None;
    }
    let major = h.get(11)?;
    let minor = h.get(12)?;
    Some(format!("{major}.{minor:02}"))
}
