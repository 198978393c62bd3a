//! Plain text detection and character encoding validation.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use encoding_rs::{Encoding, UTF_8};
use filescope_meta::{MetadataStream, StreamType, UNAP, UNAV};

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::signature::looks_like_text;

const MEBIBYTE: u64 = 1_048_576;

/// Characters that never occur in a valid text file, whatever the encoding.
const FORBIDDEN_CHARS: &[char] = &[
    '\u{00}', '\u{01}', '\u{02}', '\u{03}', '\u{04}', '\u{05}', '\u{06}', '\u{07}', '\u{08}',
    '\u{0B}', '\u{0C}', '\u{0E}', '\u{0F}', '\u{10}', '\u{11}', '\u{12}', '\u{13}', '\u{14}',
    '\u{15}', '\u{16}', '\u{17}', '\u{18}', '\u{19}', '\u{1A}', '\u{1B}', '\u{1C}', '\u{1D}',
    '\u{1E}', '\u{1F}', '\u{FF}',
];

/// Read at most `limit` bytes. The flag tells whether the file was longer.
fn read_limited(path: &Path, limit: u64) -> io::Result<(Vec<u8>, bool)> {
    let mut buffer = Vec::new();
    File::open(path)?
        .take(limit.saturating_add(1))
        .read_to_end(&mut buffer)?;
    let truncated = buffer.len() as u64 > limit;
    if truncated {
        buffer.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    Ok((buffer, truncated))
}

fn truncation_message(limit: u64) -> String {
    format!("First {} MB read, we skip the remainder.", limit.div_euclid(MEBIBYTE))
}

pub struct TextfileChecker {
    read_limit: u64,
}

impl TextfileChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &[CapabilityEntry::new("text/plain").priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

impl Checker for TextfileChecker {
    fn id(&self) -> CheckerId {
        "TextfileChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        result.message("Trying text detection...");
        let (content, truncated) = match read_limited(ctx.path, self.read_limit) {
            Ok(read) => read,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };
        if truncated {
            result.message(truncation_message(self.read_limit));
        }

        let text_like = looks_like_text(&content)
            || content.starts_with(b"\xff\xfe")
            || content.starts_with(b"\xfe\xff");
        if text_like {
            result.message("File is a text file.");
            result.push_stream(
                MetadataStream::new(0)
                    .with_mimetype("text/plain")
                    .with_version(UNAP)
                    .with_stream_type(StreamType::Text),
            );
        } else {
            result.error("File is not a text file");
        }
        result.finish(ctx.check_wellformed)
    }
}

pub struct TextEncodingChecker {
    read_limit: u64,
}

impl TextEncodingChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[
        CapabilityEntry::new("text/plain").requires("charset"),
        CapabilityEntry::new("text/csv").requires("charset"),
        CapabilityEntry::new("text/xml").requires("charset"),
        CapabilityEntry::new("text/html").requires("charset"),
        CapabilityEntry::new("application/xhtml+xml").requires("charset"),
        CapabilityEntry::new("application/json").requires("charset"),
    ];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

/// Decode strictly, refusing replacement characters.
fn decode(bytes: &[u8], charset: &str) -> Result<String, String> {
    let upper = charset.to_ascii_uppercase();
    if matches!(upper.as_str(), "US-ASCII" | "ASCII") {
        return match bytes.iter().position(|b| !b.is_ascii()) {
            Some(pos) => Err(format!(
                "'ascii' codec can't decode byte 0x{:02x} in position {pos}",
                bytes[pos]
            )),
            None => Ok(String::from_utf8_lossy(bytes).into_owned()),
        };
    }
    let Some(encoding) = Encoding::for_label(charset.as_bytes()) else {
        return Err(format!("unknown encoding: {charset}"));
    };
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((bom_encoding, bom_len)) if bom_encoding == encoding || upper == "UTF-16" => {
            (bom_encoding, &bytes[bom_len..])
        }
        _ => (encoding, bytes),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| format!("'{}' codec can't decode the content", encoding.name()))
}

fn find_forbidden(text: &str) -> Option<(char, usize)> {
    text.chars()
        .enumerate()
        .find(|(_, c)| FORBIDDEN_CHARS.contains(c))
        .map(|(position, c)| (c, position))
}

/// A file declared ISO-8859-15 or UTF-16 that is not plain ASCII but does
/// decode as UTF-8 was most likely mislabeled.
fn possibly_utf8(bytes: &[u8], charset: &str) -> bool {
    match charset.to_ascii_uppercase().as_str() {
        "ISO-8859-15" => {
            !bytes.is_ascii()
                && UTF_8
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .is_some()
        }
        "UTF-16" => std::str::from_utf8(bytes).is_ok(),
        _ => false,
    }
}

impl Checker for TextEncodingChecker {
    fn id(&self) -> CheckerId {
        "TextEncodingChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let charset = ctx.param("charset").unwrap_or(UNAV);
        let stream = MetadataStream::new(0)
            .with_mimetype(ctx.mimetype.unwrap_or(UNAV))
            .with_version(ctx.version.unwrap_or(UNAV))
            .with_stream_type(StreamType::Text)
            .with_field("charset", charset.to_ascii_uppercase())
            .important("charset");

        if charset == UNAV {
            result.error("Character encoding not defined.");
            result.push_stream(stream);
            return result.finish(ctx.check_wellformed);
        }
        if !ctx.check_wellformed {
            result.message(
                "No character encoding validation done, setting predefined encoding value.",
            );
            result.push_stream(stream);
            return result.finish(false);
        }

        let (content, truncated) = match read_limited(ctx.path, self.read_limit) {
            Ok(read) => read,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                result.push_stream(stream);
                return result.finish(true);
            }
        };

        match decode(&content, charset) {
            Err(reason) => result.error(format!("Character decoding error: {reason}")),
            Ok(text) => {
                let skip_forbidden = charset.eq_ignore_ascii_case("UTF-32");
                if let Some((c, position)) = find_forbidden(&text).filter(|_| !skip_forbidden) {
                    result.error(format!(
                        "Character decoding error: Illegal character '\\x{:02X}' in position {position}",
                        u32::from(c)
                    ));
                } else if possibly_utf8(&content, charset) {
                    result.error(
                        "Character decoding error: The character encoding is most likely UTF-8.",
                    );
                } else {
                    result.message("Character encoding validated successfully.");
                }
            }
        }
        if truncated {
            result.message(truncation_message(self.read_limit));
        }
        result.push_stream(stream);
        result.finish(true)
    }
}
