//! XML checkers: `xmllint` well-formedness and Schematron validation.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use filescope_meta::{MetadataStream, StreamType, UNAV};
use regex::Regex;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::checkers::static_regex;
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::shell::{self, ShellOutput};
use crate::signature::read_header;

static XML_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r#"^\s*<\?xml\s+version\s*=\s*["']([0-9.]+)["']"#));

/// XML version from the declaration; documents without one are XML 1.0.
fn declared_version(path: &Path) -> io::Result<String> {
    let header = read_header(path, 256)?;
    let text = String::from_utf8_lossy(header.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&header))
        .into_owned();
    Ok(XML_DECLARATION
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| "1.0".to_owned(), |m| m.as_str().to_owned()))
}

fn xml_stream(version: &str) -> MetadataStream {
    MetadataStream::new(0)
        .with_mimetype("text/xml")
        .with_version(version)
        .with_stream_type(StreamType::Text)
}

pub struct XmllintChecker {
    xmllint: PathBuf,
}

impl XmllintChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("text/xml")
        .versions(&["1.0"])
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            xmllint: config.xmllint.clone(),
        }
    }
}

impl Checker for XmllintChecker {
    fn id(&self) -> CheckerId {
        "XmllintChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let version = match declared_version(ctx.path) {
            Ok(version) => version,
            Err(e) => {
                result.fail(&CheckerFailure::Io(e));
                return result.finish(ctx.check_wellformed);
            }
        };
        if !ctx.check_wellformed {
            result.message("XML well-formedness not checked, reporting declaration only.");
            result.push_stream(xml_stream(&version));
            return result.finish(false);
        }

        match shell::run(
            &self.xmllint,
            &[OsStr::new("--noout"), OsStr::new("--nonet"), ctx.path.as_os_str()],
        ) {
            Ok(output) if output.success() => {
                result.message("Document is well-formed.");
                result.push_stream(xml_stream(&version));
            }
            Ok(output) => {
                let before = result.errors.len();
                for line in output.stderr_lines() {
                    result.error(line.to_owned());
                }
                if result.errors.len() == before {
                    result.fail(&output.into_failure(&self.xmllint));
                }
            }
            Err(failure) => result.fail(&failure),
        }
        result.finish(true)
    }
}

static ACTIVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"<svrl:active-pattern\b[^>]*>"));
static FIRED_RULE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"<svrl:fired-rule\b[^>]*>"));
static ID_ATTR: LazyLock<Regex> = LazyLock::new(|| static_regex(r#"\bid="([^"]*)""#));
static CONTEXT_ATTR: LazyLock<Regex> = LazyLock::new(|| static_regex(r#"\bcontext="([^"]*)""#));

/// Drop every element matched by `element` whose `attr` value equals the
/// previous such element's value.
fn drop_repeated(svrl: &str, element: &Regex, attr: &Regex) -> String {
    let mut out = String::with_capacity(svrl.len());
    let mut last_end = 0;
    let mut previous: Option<String> = None;
    for found in element.find_iter(svrl) {
        let value = attr
            .captures(found.as_str())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned());
        let repeated = value.is_some() && value == previous;
        out.push_str(&svrl[last_end..found.start()]);
        if !repeated {
            out.push_str(found.as_str());
        }
        last_end = found.end();
        previous = value;
    }
    out.push_str(&svrl[last_end..]);
    out
}

/// Collapse consecutive duplicates of active patterns and fired rules.
fn filter_duplicate_elements(svrl: &str) -> String {
    let patterns = drop_repeated(svrl, &ACTIVE_PATTERN, &ID_ATTR);
    let rules = drop_repeated(&patterns, &FIRED_RULE, &CONTEXT_ATTR);
    rules
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validates XML against the Schematron schema named by the `schematron` param.
pub struct SchematronChecker {
    xsltproc: PathBuf,
    xslt_dir: PathBuf,
    cache_dir: PathBuf,
}

impl SchematronChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("text/xml")
        .validation_only()
        .requires("schematron")
        .priority(priority::VALIDATOR)];

    /// Compilation stylesheets, applied in order.
    const PHASES: &'static [&'static str] = &[
        "iso_dsdl_include.xsl",
        "iso_abstract_expand.xsl",
        "optimize_schematron.xsl",
        "iso_svrl_for_xslt1.xsl",
    ];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            xsltproc: config.xsltproc.clone(),
            xslt_dir: config.schematron_xslt_dir.clone(),
            cache_dir: config.schematron_cache_dir.clone(),
        }
    }

    /// Cache location of the compiled validator, keyed by the schema digest.
    fn cached_validator(&self, schema: &Path) -> io::Result<PathBuf> {
        let digest = Sha256::digest(fs::read(schema)?);
        let basename = schema
            .file_name()
            .map_or_else(|| "schema".into(), |n| n.to_string_lossy());
        Ok(self
            .cache_dir
            .join(format!("{basename}.{digest:x}.validator.xsl")))
    }

    fn xslt(
        &self,
        stylesheet: &Path,
        input: &Path,
        output: Option<&Path>,
        only_messages: bool,
    ) -> Result<ShellOutput, CheckerFailure> {
        let mut args: Vec<&OsStr> = Vec::new();
        if let Some(output) = output {
            args.extend([OsStr::new("-o"), output.as_os_str()]);
        }
        if only_messages {
            args.extend([
                OsStr::new("--stringparam"),
                OsStr::new("outputfilter"),
                OsStr::new("only_messages"),
            ]);
        }
        args.extend([stylesheet.as_os_str(), input.as_os_str()]);
        shell::run(&self.xsltproc, &args)
    }

    /// Compile `schema` into an XSLT validator, reusing a cached one.
    ///
    /// The finished validator is written next to its final name and renamed
    /// into place, so concurrent compilations of the same schema are safe.
    fn compile(&self, schema: &Path, verbose: bool) -> Result<PathBuf, CheckerFailure> {
        let target = self.cached_validator(schema)?;
        if target.is_file() {
            tracing::debug!(validator = %target.display(), "using cached schematron validator");
            return Ok(target);
        }
        fs::create_dir_all(&self.cache_dir)?;
        let workdir = tempfile::tempdir()?;

        let mut input = schema.to_path_buf();
        for (step, phase) in Self::PHASES.iter().enumerate() {
            let output = workdir.path().join(format!("step{}.xsl", step + 1));
            let last = step + 1 == Self::PHASES.len();
            let shell_output = self.xslt(
                &self.xslt_dir.join(phase),
                &input,
                Some(&output),
                last && !verbose,
            )?;
            if !shell_output.success() {
                return Err(shell_output.into_failure(&self.xsltproc));
            }
            input = output;
        }

        let staged = NamedTempFile::new_in(&self.cache_dir)?;
        fs::copy(&input, staged.path())?;
        staged.persist(&target).map_err(|e| CheckerFailure::Io(e.error))?;
        Ok(target)
    }
}

impl Checker for SchematronChecker {
    fn id(&self) -> CheckerId {
        "SchematronChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let Some(schema) = ctx.param("schematron") else {
            result.error("Schematron schema not given.");
            return result.finish(true);
        };
        let verbose = ctx.param("schematron_verbose") == Some("true");

        let validator = match self.compile(Path::new(schema), verbose) {
            Ok(validator) => validator,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };
        let output = match self.xslt(&validator, ctx.path, None, false) {
            Ok(output) if matches!(output.status, Some(0 | 6)) => output,
            Ok(output) => {
                result.fail(&output.into_failure(&self.xsltproc));
                return result.finish(true);
            }
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        for line in output.stderr_lines() {
            result.error(line.to_owned());
        }
        let failed_asserts = output.stdout.matches("<svrl:failed-assert ").count();
        if failed_asserts > 0 {
            result.error(format!(
                "Schematron validation failed: {failed_asserts} failed assertion(s)."
            ));
        } else if !output.success() && result.errors.is_empty() {
            result.error(format!("xsltproc finished with {}.", output.status_text()));
        }

        let report = if !verbose && output.success() {
            filter_duplicate_elements(&output.stdout)
        } else {
            output.stdout
        };
        if !report.trim().is_empty() {
            result.message(report);
        }
        result.push_stream(
            MetadataStream::new(0)
                .with_mimetype(UNAV)
                .with_stream_type(StreamType::Text),
        );
        result.finish(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checker::Params;
    use filescope_meta::WellFormed;

    #[test]
    fn test_declared_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xml");
        fs::write(&path, "<?xml version='1.1' encoding='UTF-8'?><a/>").unwrap();
        assert_eq!(declared_version(&path).unwrap(), "1.1");
        fs::write(&path, "<a/>").unwrap();
        assert_eq!(declared_version(&path).unwrap(), "1.0");
    }

    #[test]
    fn test_filter_duplicate_elements() {
        let svrl = concat!(
            "<svrl:schematron-output>\n",
            "<svrl:active-pattern id=\"p1\"/>\n",
            "<svrl:fired-rule context=\"/a\"/>\n",
            "<svrl:active-pattern id=\"p1\"/>\n",
            "<svrl:fired-rule context=\"/a\"/>\n",
            "<svrl:active-pattern id=\"p2\"/>\n",
            "<svrl:fired-rule context=\"/b\"/>\n",
            "</svrl:schematron-output>\n",
        );
        let filtered = filter_duplicate_elements(svrl);
        assert_eq!(filtered.matches("active-pattern id=\"p1\"").count(), 1);
        assert_eq!(filtered.matches("context=\"/a\"").count(), 1);
        assert!(filtered.contains("id=\"p2\""));
        assert!(filtered.contains("context=\"/b\""));
    }

    #[test]
    fn test_cache_key_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ToolConfig::default();
        config.schematron_cache_dir = dir.path().join("cache");
        let checker = SchematronChecker::new(&config);
        let schema = dir.path().join("rules.sch");
        fs::write(&schema, "<schema/>").unwrap();
        let first = checker.cached_validator(&schema).unwrap();
        fs::write(&schema, "<schema><pattern/></schema>").unwrap();
        let second = checker.cached_validator(&schema).unwrap();
        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("rules.sch."));
    }

    #[test]
    fn test_cached_validator_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ToolConfig::default();
        config.schematron_cache_dir = dir.path().join("cache");
        config.xsltproc = PathBuf::from("/nonexistent/xsltproc");
        let checker = SchematronChecker::new(&config);
        let schema = dir.path().join("rules.sch");
        fs::write(&schema, "<schema/>").unwrap();
        let cached = checker.cached_validator(&schema).unwrap();
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, "<xsl:stylesheet/>").unwrap();
        assert_eq!(checker.compile(&schema, false).unwrap(), cached);
    }

    #[test]
    fn test_missing_xsltproc_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ToolConfig::default();
        config.schematron_cache_dir = dir.path().join("cache");
        config.xsltproc = PathBuf::from("/nonexistent/xsltproc");
        let schema = dir.path().join("rules.sch");
        fs::write(&schema, "<schema/>").unwrap();
        let doc = dir.path().join("doc.xml");
        fs::write(&doc, "<a/>").unwrap();

        let mut params = Params::new();
        params.insert("schematron".to_owned(), schema.to_string_lossy().into_owned());
        let ctx = ScrapeContext {
            path: &doc,
            mimetype: Some("text/xml"),
            version: None,
            check_wellformed: true,
            params: &params,
        };
        let result = SchematronChecker::new(&config).scrape(&ctx);
        assert_eq!(result.well_formed, WellFormed::False);
        assert!(result.errors[0].contains("could not be started"));
    }

    #[test]
    fn test_xmllint_metadata_mode_needs_no_tool() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.xml");
        fs::write(&doc, "<?xml version=\"1.0\"?><a/>").unwrap();
        let mut config = ToolConfig::default();
        config.xmllint = PathBuf::from("/nonexistent/xmllint");
        let params = Params::new();
        let ctx = ScrapeContext {
            path: &doc,
            mimetype: Some("text/xml"),
            version: None,
            check_wellformed: false,
            params: &params,
        };
        let result = XmllintChecker::new(&config).scrape(&ctx);
        assert_eq!(result.well_formed, WellFormed::Unknown);
        assert_eq!(result.streams[0].version, "1.0");
    }
}
