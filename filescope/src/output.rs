//! Shared output formatting for characterization results.
//!
//! Provides JSON and plain-text formatters for [`Scrape`] and
//! [`BatchReport`]. Color/terminal formatting belongs to the CLI layer.

use std::io::Write;

use filescope_meta::MetadataStream;

use crate::report::{BatchReport, Scrape};

/// Format a [`Scrape`] as JSON to a writer.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json(scrape: &Scrape, writer: &mut dyn Write) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(scrape)?;
    writeln!(writer, "{json}")?;
    Ok(())
}

/// Format a [`BatchReport`] as JSON to a writer.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_batch_json(report: &BatchReport, writer: &mut dyn Write) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    writeln!(writer, "{json}")?;
    Ok(())
}

fn write_stream(stream: &MetadataStream, writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(
        writer,
        "  [{}] {} {} ({})",
        stream.index, stream.mimetype, stream.version, stream.stream_type
    )?;
    for (key, value) in &stream.fields {
        writeln!(writer, "        {key}: {value}")?;
    }
    Ok(())
}

fn write_section(title: &str, lines: &[String], writer: &mut dyn Write) -> anyhow::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    writeln!(writer, "{}", "-".repeat(80))?;
    writeln!(writer, "  {title}")?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for line in lines {
        writeln!(writer, "  {line}")?;
    }
    writeln!(writer)?;
    Ok(())
}

/// Format a [`Scrape`] as human-readable plain text to a writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human(scrape: &Scrape, writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer)?;
    writeln!(writer, "{}", "=".repeat(80))?;
    writeln!(writer, "  FILE CHARACTERIZATION")?;
    writeln!(writer, "{}", "=".repeat(80))?;
    writeln!(writer)?;
    writeln!(writer, "  Mimetype:       {}", scrape.mimetype)?;
    writeln!(writer, "  Version:        {}", scrape.version)?;
    writeln!(writer, "  Well-formed:    {}", scrape.well_formed)?;
    writeln!(writer, "  Checkers:       {}", scrape.checkers.join(", "))?;
    writeln!(writer)?;

    writeln!(writer, "{}", "-".repeat(80))?;
    writeln!(writer, "  STREAMS")?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for stream in scrape.streams.values() {
        write_stream(stream, writer)?;
    }
    writeln!(writer)?;

    write_section("MESSAGES", &scrape.messages, writer)?;
    write_section("ERRORS", &scrape.errors, writer)?;

    writeln!(writer, "{}", "=".repeat(80))?;
    if scrape.well_formed.is_false() || scrape.not_recognized() {
        writeln!(
            writer,
            "\u{2717} Not well-formed or not recognized ({} error(s))",
            scrape.errors.len()
        )?;
    } else if scrape.well_formed.as_option().is_some() {
        writeln!(writer, "\u{2713} Well-formed")?;
    } else {
        writeln!(writer, "\u{2713} Characterized (well-formedness not checked)")?;
    }
    writeln!(writer, "{}", "=".repeat(80))?;
    Ok(())
}

/// Format a [`BatchReport`] as human-readable plain text to a writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_batch_human(report: &BatchReport, writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer)?;
    writeln!(writer, "{}", "=".repeat(80))?;
    writeln!(writer, "  BATCH CHARACTERIZATION")?;
    writeln!(writer, "{}", "=".repeat(80))?;
    writeln!(writer)?;
    writeln!(writer, "  Files characterized: {}", report.characterized_files)?;
    writeln!(writer, "  Files failed:        {}", report.failed_files)?;
    writeln!(writer, "  Not well-formed:     {}", report.not_well_formed())?;
    writeln!(writer)?;

    if !report.source_errors.is_empty() {
        writeln!(writer, "{}", "-".repeat(80))?;
        writeln!(writer, "  SOURCE ERRORS (files that could not be characterized)")?;
        writeln!(writer, "{}", "-".repeat(80))?;
        for source_err in &report.source_errors {
            writeln!(writer, "{}", source_err.format_human_readable())?;
        }
        writeln!(writer)?;
    }

    writeln!(writer, "{}", "-".repeat(80))?;
    writeln!(writer, "  RESULTS")?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for entry in &report.results {
        let result = &entry.result;
        writeln!(
            writer,
            "{}: {} {} well_formed={}",
            entry.file.display(),
            result.mimetype,
            result.version,
            result.well_formed
        )?;
        for error in &result.errors {
            writeln!(writer, "    {error}")?;
        }
    }
    writeln!(writer)?;

    writeln!(writer, "{}", "=".repeat(80))?;
    if report.ok {
        writeln!(
            writer,
            "\u{2713} All {} files characterized without errors",
            report.characterized_files
        )?;
    } else {
        if !report.source_errors.is_empty() {
            writeln!(
                writer,
                "\u{2717} {} file(s) could not be characterized",
                report.failed_files
            )?;
        }
        let rejected = report
            .results
            .iter()
            .filter(|e| e.result.exit_code() != 0)
            .count();
        if rejected > 0 {
            writeln!(
                writer,
                "\u{2717} {rejected} file(s) not well-formed or not recognized"
            )?;
        }
    }
    writeln!(writer, "{}", "=".repeat(80))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::report::{BatchEntry, CheckerInfo};
    use filescope_meta::{UNAP, WellFormed};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn text_scrape(well_formed: WellFormed) -> Scrape {
        let mut streams = BTreeMap::new();
        streams.insert(
            0,
            MetadataStream::new(0)
                .with_mimetype("text/plain")
                .with_version(UNAP)
                .with_field("charset", "UTF-8"),
        );
        let mut info = BTreeMap::new();
        info.insert(
            "TextfileChecker".to_owned(),
            CheckerInfo {
                messages: vec!["File is a text file.".to_owned()],
                errors: vec![],
                well_formed,
            },
        );
        Scrape {
            mimetype: "text/plain".to_owned(),
            version: UNAP.to_owned(),
            well_formed,
            streams,
            messages: vec!["File is a text file.".to_owned()],
            errors: vec![],
            info,
            checkers: vec!["TextfileChecker".to_owned()],
        }
    }

    #[test]
    fn test_write_json_shape() {
        let mut buf = Vec::new();
        write_json(&text_scrape(WellFormed::True), &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["mimetype"], "text/plain");
        assert_eq!(value["well_formed"], true);
        assert_eq!(value["streams"][0]["charset"], "UTF-8");
        assert_eq!(value["info"]["TextfileChecker"]["well_formed"], true);
    }

    #[test]
    fn test_write_human() {
        let mut buf = Vec::new();
        write_human(&text_scrape(WellFormed::Unknown), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("FILE CHARACTERIZATION"));
        assert!(text.contains("Mimetype:       text/plain"));
        assert!(text.contains("charset: UTF-8"));
        assert!(text.contains("well-formedness not checked"));
    }

    #[test]
    fn test_write_batch_human_failure_summary() {
        let report = BatchReport::new(
            vec![BatchEntry {
                file: PathBuf::from("a.txt"),
                result: text_scrape(WellFormed::False),
            }],
            vec![],
        );
        let mut buf = Vec::new();
        write_batch_human(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Files characterized: 1"));
        assert!(text.contains("1 file(s) not well-formed"));
    }
}
