//! CSV structure checker.
//!
//! Recognized params: `delimiter` (default `,`), `separator` (record
//! separator, default `CRLF` or `LF`) and `fields` (expected header names,
//! separated by the delimiter).

use std::fs;

use filescope_meta::{MetadataStream, StreamType, UNAP};

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};

pub struct CsvChecker {
    read_limit: u64,
}

impl CsvChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &[CapabilityEntry::new("text/csv").priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParseError {
    record: usize,
    message: String,
}

/// Split `content` into records of fields, honouring double quotes.
fn parse_records(
    content: &str,
    delimiter: char,
    separator: Option<&str>,
) -> Result<Vec<Vec<String>>, ParseError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek().is_some_and(|(_, next)| *next == '"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        let rest = &content[offset..];
        let separator_len = match separator {
            Some(sep) if rest.starts_with(sep) => Some(sep.len()),
            Some(_) => None,
            None if rest.starts_with("\r\n") => Some(2),
            None if c == '\n' => Some(1),
            None => None,
        };
        if let Some(len) = separator_len {
            record.push(std::mem::take(&mut field));
            records.push(std::mem::take(&mut record));
            for _ in 1..rest[..len].chars().count() {
                chars.next();
            }
            continue;
        }

        if c == delimiter {
            record.push(std::mem::take(&mut field));
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else {
            field.push(c);
        }
    }

    if in_quotes {
        return Err(ParseError {
            record: records.len() + 1,
            message: "unexpected end of data inside quoted field".to_owned(),
        });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn single_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

impl Checker for CsvChecker {
    fn id(&self) -> CheckerId {
        "CsvChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let delimiter_param = ctx.param("delimiter").unwrap_or(",");
        let Some(delimiter) = single_char(delimiter_param) else {
            result.error(format!(
                "CSV delimiter must be a single character, got '{delimiter_param}'."
            ));
            return result.finish(ctx.check_wellformed);
        };
        let separator = ctx.param("separator");

        let bytes = match fs::metadata(ctx.path).and_then(|meta| {
            if meta.len() > self.read_limit {
                Err(std::io::Error::other(format!(
                    "file exceeds the read limit of {} bytes",
                    self.read_limit
                )))
            } else {
                fs::read(ctx.path)
            }
        }) {
            Ok(bytes) => bytes,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };
        let content = String::from_utf8_lossy(&bytes);

        let records = match parse_records(&content, delimiter, separator) {
            Ok(records) => records,
            Err(e) => {
                result.error(format!("CSV error on line {}: {}", e.record, e.message));
                return result.finish(ctx.check_wellformed);
            }
        };

        let Some(header) = records.first() else {
            result.error("CSV file is empty.");
            return result.finish(ctx.check_wellformed);
        };

        if let Some(expected) = ctx.param("fields") {
            let expected: Vec<&str> = expected.split(delimiter).map(str::trim).collect();
            if header.iter().map(|f| f.trim()).ne(expected.iter().copied()) {
                result.error(format!(
                    "CSV not well-formed: field counts or names in the header ({}) do not match the given fields ({}).",
                    header.join(&delimiter.to_string()),
                    expected.join(&delimiter.to_string())
                ));
            }
        }

        for (line, record) in records.iter().enumerate().skip(1) {
            if record.len() != header.len() {
                result.error(format!(
                    "CSV not well-formed: record {} has {} fields, expected {}.",
                    line + 1,
                    record.len(),
                    header.len()
                ));
            }
        }

        if result.errors.is_empty() {
            result.message("CSV file was read successfully.");
        }
        result.push_stream(
            MetadataStream::new(0)
                .with_mimetype("text/csv")
                .with_version(UNAP)
                .with_stream_type(StreamType::Text)
                .with_field("delimiter", delimiter.to_string())
                .with_field("separator", separator.unwrap_or("\r\n"))
                .with_field("first_line", header.join(&delimiter.to_string())),
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

    fn run(content: &str, params: &[(&str, &str)]) -> CheckerResult {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, content).unwrap();
        let params: Params = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let ctx = ScrapeContext {
            path: &path,
            mimetype: Some("text/csv"),
            version: None,
            check_wellformed: true,
            params: &params,
        };
        CsvChecker::new(&ToolConfig::default()).scrape(&ctx)
    }

    #[test]
    fn test_parse_quotes_and_crlf() {
        let records = parse_records("a,\"b,c\"\r\n1,\"say \"\"hi\"\"\"\r\n", ',', None).unwrap();
        assert_eq!(records, vec![vec!["a", "b,c"], vec!["1", "say \"hi\""]]);
    }

    #[test]
    fn test_parse_custom_separator() {
        let records = parse_records("a;b|c;d|", ';', Some("|")).unwrap();
        assert_eq!(records, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_parse_unterminated_quote() {
        let err = parse_records("a,\"b\n", ',', None).unwrap_err();
        assert_eq!(err.record, 1);
    }

    #[test]
    fn test_valid_csv() {
        let result = run("year,brand\n1997,Ford\n2000,Mercury\n", &[]);
        assert_eq!(result.well_formed, WellFormed::True);
        let stream = &result.streams[0];
        assert_eq!(stream.get("first_line"), Some("year,brand"));
        assert_eq!(stream.version, UNAP);
    }

    #[test]
    fn test_ragged_records() {
        let result = run("a,b\n1,2,3\n", &[]);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].contains("record 2 has 3 fields, expected 2"));
    }

    #[test]
    fn test_expected_fields() {
        let ok = run("year;brand\n1997;Ford\n", &[("delimiter", ";"), ("fields", "year;brand")]);
        assert_eq!(ok.well_formed, WellFormed::True);

        let wrong = run("year,brand\n1997,Ford\n", &[("fields", "year,model")]);
        assert_eq!(wrong.well_formed, WellFormed::False);
    }

    #[test]
    fn test_bad_delimiter_param() {
        let result = run("a,b\n", &[("delimiter", ";;")]);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.streams.is_empty());
    }

    #[test]
    fn test_empty_file() {
        let result = run("", &[]);
        assert_eq!(result.errors, vec!["CSV file is empty."]);
    }
}
