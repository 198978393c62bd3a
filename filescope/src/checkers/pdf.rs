//! PDF checkers backed by JHOVE, Ghostscript and veraPDF.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::LazyLock;

use filescope_meta::{MetadataStream, StreamType, UNAV};
use regex::Regex;

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::checkers::static_regex;
use crate::config::ToolConfig;
use crate::registry::{CapabilityEntry, VersionPattern, priority};
use crate::shell::{self, ShellOutput};

const MIMETYPE: &str = "application/pdf";

fn pdf_stream(version: &str) -> MetadataStream {
    MetadataStream::new(0)
        .with_mimetype(MIMETYPE)
        .with_version(version)
        .with_stream_type(StreamType::Binary)
}

static JHOVE_STATUS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?m)^\s*Status:\s*(.+?)\s*$"));
static JHOVE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?m)^\s*Version:\s*([0-9]+\.[0-9]+)\s*$"));
static JHOVE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?m)^\s*ErrorMessage:\s*(.+?)\s*$"));

/// Parsed JHOVE text report.
#[derive(Debug, Default, PartialEq, Eq)]
struct JhoveReport {
    status: Option<String>,
    version: Option<String>,
    errors: Vec<String>,
}

impl JhoveReport {
    fn parse(stdout: &str) -> Self {
        let first = |re: &Regex| {
            re.captures(stdout)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_owned())
        };
        Self {
            status: first(&JHOVE_STATUS),
            version: first(&JHOVE_VERSION),
            errors: JHOVE_ERROR
                .captures_iter(stdout)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_owned()))
                .collect(),
        }
    }

    fn is_valid(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s == "Well-Formed and valid")
    }
}

pub struct JhovePdfChecker {
    jhove: PathBuf,
}

impl JhovePdfChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new(MIMETYPE)
        .versions(&["1.2", "1.3", "1.4", "1.5", "1.6", "A-1a", "A-1b"])
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            jhove: config.jhove.clone(),
        }
    }
}

impl Checker for JhovePdfChecker {
    fn id(&self) -> CheckerId {
        "JhovePdfChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let output = match shell::run(
            &self.jhove,
            &[
                OsStr::new("-h"),
                OsStr::new("TEXT"),
                OsStr::new("-m"),
                OsStr::new("PDF-hul"),
                ctx.path.as_os_str(),
            ],
        ) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                result.fail(&output.into_failure(&self.jhove));
                return result.finish(ctx.check_wellformed);
            }
            Err(failure) => {
                result.fail(&failure);
                return result.finish(ctx.check_wellformed);
            }
        };

        let report = JhoveReport::parse(&output.stdout);
        if let Some(status) = &report.status {
            result.message(format!("JHOVE status: {status}"));
        }
        if !report.is_valid() {
            result.error(format!(
                "JHOVE reports the file as '{}'.",
                report.status.as_deref().unwrap_or("unknown")
            ));
            for error in report.errors {
                result.error(error);
            }
        }
        result.push_stream(pdf_stream(report.version.as_deref().unwrap_or(UNAV)));
        result.finish(ctx.check_wellformed)
    }
}

pub struct GhostscriptChecker {
    gs: PathBuf,
}

impl GhostscriptChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new(MIMETYPE)
        .versions(&["1.7", "A-2a", "A-2b", "A-2u", "A-3a", "A-3b", "A-3u"])
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            gs: config.ghostscript.clone(),
        }
    }
}

/// Ghostscript exits 0 for many damaged files and only reports on its streams.
fn ghostscript_errors(output: &ShellOutput) -> Vec<String> {
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .filter(|line| line.contains("**** Error") || line.starts_with("Error:"))
        .map(ToOwned::to_owned)
        .collect()
}

impl Checker for GhostscriptChecker {
    fn id(&self) -> CheckerId {
        "GhostscriptChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            result.message("Ghostscript rendering not run, reporting format metadata only.");
            result.push_stream(pdf_stream(UNAV));
            return result.finish(false);
        }
        let output = match shell::run(
            &self.gs,
            &[
                OsStr::new("-o"),
                OsStr::new("/dev/null"),
                OsStr::new("-sDEVICE=nullpage"),
                OsStr::new("-dNOPAUSE"),
                OsStr::new("-dBATCH"),
                ctx.path.as_os_str(),
            ],
        ) {
            Ok(output) => output,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        let errors = ghostscript_errors(&output);
        if errors.is_empty() && output.success() {
            result.message("Well-Formed and valid");
        } else if errors.is_empty() {
            result.fail(&output.into_failure(&self.gs));
        } else {
            for error in errors {
                result.error(error);
            }
        }
        result.push_stream(pdf_stream(UNAV));
        result.finish(true)
    }
}

static VERAPDF_COMPLIANT: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r#"isCompliant="(true|false)""#));
static VERAPDF_PROFILE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"PDF/A-([123])([ABUabu])"));
static VERAPDF_FAILED_RULES: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r#"failedRules="([0-9]+)""#));

/// PDF/A conformance validation.
pub struct VeraPdfChecker {
    verapdf: PathBuf,
}

/// PDF/A conformance levels, e.g. `A-2b`.
static PDFA_LEVEL: VersionPattern = VersionPattern::new(r"^A-[123][abu]$");

static VERAPDF_CAPABILITIES: [CapabilityEntry; 1] = [CapabilityEntry::new(MIMETYPE)
    .pattern(&PDFA_LEVEL)
    .validation_only()
    .priority(priority::VALIDATOR)];

impl VeraPdfChecker {

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            verapdf: config.verapdf.clone(),
        }
    }
}

/// Conformance level from a veraPDF profile name, e.g. `A-2b`.
fn profile_version(report: &str) -> Option<String> {
    let caps = VERAPDF_PROFILE.captures(report)?;
    let part = caps.get(1)?.as_str();
    let level = caps.get(2)?.as_str().to_ascii_lowercase();
    Some(format!("A-{part}{level}"))
}

impl Checker for VeraPdfChecker {
    fn id(&self) -> CheckerId {
        "VeraPdfChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        &VERAPDF_CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let output = match shell::run(&self.verapdf, &[ctx.path.as_os_str()]) {
            Ok(output) => output,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        let compliant = VERAPDF_COMPLIANT
            .captures(&output.stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str() == "true");
        let Some(compliant) = compliant else {
            result.fail(&output.into_failure(&self.verapdf));
            return result.finish(true);
        };

        let version = profile_version(&output.stdout);
        if compliant {
            result.message("PDF/A validation passed.");
        } else {
            let failed = VERAPDF_FAILED_RULES
                .captures(&output.stdout)
                .and_then(|caps| caps.get(1))
                .map_or("some", |m| m.as_str());
            result.error(format!("PDF/A validation failed: {failed} rule(s) not satisfied."));
        }
        let mut stream = pdf_stream(version.as_deref().unwrap_or(UNAV));
        if version.is_some() {
            stream = stream.important("version");
        }
        result.push_stream(stream);
        result.finish(true)
    }
}
