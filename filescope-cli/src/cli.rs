use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use filescope::detector::default_detectors;
use filescope::output;
use filescope::registry::{ValidationMode, VersionMatch};
use filescope::{
    ChecksumAlgorithm, FileConfig, FsSourceConfig, Registry, Scrape, ScrapeRequest, Scraper,
};
use tracing_subscriber::EnvFilter;

use crate::batch;
use crate::server;

#[derive(Parser)]
#[command(name = "filescope", version, about = "File format identification, validation and metadata extraction")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// YAML configuration file with tool paths and detector settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Characterize one file
    Check(CheckArgs),
    /// Characterize every file under one or more paths
    Batch(BatchArgs),
    /// List registered checkers and their capability rows
    Checkers {
        /// Only show checkers with a row for this mimetype
        #[arg(long)]
        mimetype: Option<String>,
    },
    /// Print the JSON Schema of the characterization result
    Schema,
    /// Start the HTTP server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Options shared by `check` and `batch`.
#[derive(Args, Clone)]
pub struct RequestArgs {
    /// Predefined mimetype; skips detection
    #[arg(long)]
    pub mimetype: Option<String>,

    /// Predefined format version
    #[arg(long = "format-version")]
    pub format_version: Option<String>,

    /// Only extract metadata, do not check well-formedness
    #[arg(long)]
    pub no_validate: bool,

    /// Checker parameter as key=value (charset, delimiter, json_schema, schematron, ...)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

impl RequestArgs {
    fn request(&self, path: PathBuf) -> ScrapeRequest {
        let mut request = ScrapeRequest::new(path).check_wellformed(!self.no_validate);
        if let Some(mimetype) = &self.mimetype {
            request = request.mimetype(mimetype.as_str());
        }
        if let Some(version) = &self.format_version {
            request = request.version(version.as_str());
        }
        self.params
            .iter()
            .fold(request, |request, (key, value)| request.param(key.as_str(), value.as_str()))
    }
}

#[derive(Args)]
pub struct CheckArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Also print a checksum of the file
    #[arg(long, value_parser = parse_checksum)]
    pub checksum: Option<ChecksumAlgorithm>,
}

#[derive(Args)]
pub struct BatchArgs {
    /// Files or directories to characterize
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Exclude glob pattern (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    #[arg(long)]
    pub follow_links: bool,

    #[arg(long, default_value_t = 64)]
    pub max_depth: usize,

    #[arg(long, default_value_t = 100_000)]
    pub max_files: usize,

    /// Number of files characterized concurrently (default: available CPUs)
    #[arg(long)]
    pub jobs: Option<NonZeroUsize>,

    #[command(flatten)]
    pub request: RequestArgs,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_checksum(raw: &str) -> Result<ChecksumAlgorithm, String> {
    raw.parse()
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path).context("Could not load configuration"),
        None => Ok(FileConfig::default()),
    }
}

fn build_scraper(config: &FileConfig) -> Scraper {
    let registry = Arc::new(Registry::new(&config.tools));
    Scraper::with_detectors(registry, default_detectors(&config.detectors))
}

/// Run the CLI and return the process exit status.
pub async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Check(args) => run_check(&build_scraper(&config), &args),
        Commands::Batch(args) => {
            let scraper = Arc::new(build_scraper(&config));
            run_batch(scraper, &args).await
        }
        Commands::Checkers { mimetype } => {
            let registry = Registry::new(&config.tools);
            write_checkers(&registry, mimetype.as_deref(), &mut io::stdout().lock())?;
            Ok(0)
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(Scrape);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(0)
        }
        Commands::Serve { host, port } => {
            let scraper = Arc::new(build_scraper(&config));
            server::serve(scraper, &host, port, cli.verbose).await?;
            Ok(0)
        }
    }
}

fn run_check(scraper: &Scraper, args: &CheckArgs) -> anyhow::Result<i32> {
    let mut stdout = io::stdout().lock();
    check(scraper, args, &mut stdout)
}

fn check(scraper: &Scraper, args: &CheckArgs, writer: &mut dyn Write) -> anyhow::Result<i32> {
    let request = args.request.request(args.path.clone());
    let scrape = scraper.characterize(&request)?;
    // A missing file is already reported by the result itself.
    let checksum = match args.checksum {
        Some(algorithm) if !scrape.file_missing() => {
            Some((algorithm, Scrape::checksum(&args.path, algorithm)?))
        }
        _ => None,
    };

    match args.request.format {
        OutputFormat::Json => match checksum {
            Some((algorithm, digest)) => {
                let mut value = serde_json::to_value(&scrape)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert(
                        "checksum".to_owned(),
                        serde_json::json!({ "algorithm": algorithm.as_str(), "value": digest }),
                    );
                }
                writeln!(writer, "{}", serde_json::to_string_pretty(&value)?)?;
            }
            None => output::write_json(&scrape, writer)?,
        },
        OutputFormat::Human => {
            output::write_human(&scrape, writer)?;
            if let Some((algorithm, digest)) = checksum {
                writeln!(writer, "  Checksum ({algorithm}): {digest}")?;
            }
        }
    }
    Ok(scrape.exit_code())
}

async fn run_batch(scraper: Arc<Scraper>, args: &BatchArgs) -> anyhow::Result<i32> {
    let mut fs_config = FsSourceConfig::default();
    fs_config.paths.clone_from(&args.paths);
    fs_config.exclude.clone_from(&args.exclude);
    fs_config.follow_links = args.follow_links;
    fs_config.max_depth = args.max_depth;
    fs_config.max_files = args.max_files;

    let jobs = args
        .jobs
        .or_else(|| std::thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get);
    let template = args.request.request(PathBuf::new());
    let report = batch::characterize_concurrently(scraper, &fs_config, &template, jobs).await?;

    let mut stdout = io::stdout().lock();
    match args.request.format {
        OutputFormat::Json => output::write_batch_json(&report, &mut stdout)?,
        OutputFormat::Human => output::write_batch_human(&report, &mut stdout)?,
    }
    Ok(report.exit_code())
}

fn describe_versions(versions: VersionMatch) -> String {
    match versions {
        VersionMatch::Any => "*".to_owned(),
        VersionMatch::Listed(list) => list.join(", "),
        VersionMatch::Pattern(pattern) => format!("/{pattern}/"),
    }
}

fn write_checkers(
    registry: &Registry,
    mimetype: Option<&str>,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    for checker in registry.checkers() {
        let rows: Vec<_> = checker
            .capabilities()
            .iter()
            .filter(|row| mimetype.is_none_or(|m| row.mimetype == m))
            .collect();
        if rows.is_empty() && mimetype.is_some() {
            continue;
        }
        writeln!(writer, "{}", checker.id())?;
        if checker.capabilities().is_empty() {
            writeln!(writer, "    (any mimetype with a known signature)")?;
        }
        for row in rows {
            let mode = match row.validation {
                ValidationMode::Required => "validation only",
                ValidationMode::Optional => "metadata",
            };
            write!(
                writer,
                "    {} [{}] {mode}, priority {}",
                row.mimetype,
                describe_versions(row.versions),
                row.priority
            )?;
            if let Some(param) = row.required_param {
                write!(writer, ", requires {param}")?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use filescope::ToolConfig;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("charset=UTF-8"),
            Ok(("charset".to_owned(), "UTF-8".to_owned()))
        );
        assert_eq!(parse_param("delimiter=="), Ok(("delimiter".to_owned(), "=".to_owned())));
        assert!(parse_param("charset").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_check_args() {
        let cli = Cli::try_parse_from([
            "filescope",
            "-vv",
            "check",
            "a.pdf",
            "--mimetype",
            "application/pdf",
            "--format-version",
            "A-2b",
            "--param",
            "charset=UTF-8",
            "--format",
            "json",
            "--checksum",
            "sha512",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.path, PathBuf::from("a.pdf"));
        assert_eq!(args.request.format_version.as_deref(), Some("A-2b"));
        assert!(args.request.format == OutputFormat::Json);
        assert_eq!(args.checksum, Some(ChecksumAlgorithm::Sha512));
        let request = args.request.request(args.path.clone());
        assert_eq!(request.params().get("charset").map(String::as_str), Some("UTF-8"));
    }

    #[test]
    fn test_batch_requires_paths() {
        assert!(Cli::try_parse_from(["filescope", "batch"]).is_err());
        assert!(Cli::try_parse_from(["filescope", "batch", "docs", "--jobs", "0"]).is_err());
    }

    #[test]
    fn test_write_checkers_filter() {
        let registry = Registry::new(&ToolConfig::default());
        let mut buf = Vec::new();
        write_checkers(&registry, Some("image/x-dpx"), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("DpxChecker\n"));
        assert!(text.contains("image/x-dpx [1.0, 2.0] validation only"));
        assert!(!text.contains("PngChecker"));
    }

    #[test]
    fn test_run_check_exit_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("ok.json");
        std::fs::write(&good, "{\"a\": 1}").unwrap();
        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{\"a\": ").unwrap();
        let scraper = build_scraper(&FileConfig::default());

        let args = |path: &PathBuf| CheckArgs {
            path: path.clone(),
            request: RequestArgs {
                mimetype: None,
                format_version: None,
                no_validate: false,
                params: vec![],
                format: OutputFormat::Json,
            },
            checksum: None,
        };
        assert_eq!(run_check(&scraper, &args(&good)).unwrap(), 0);
        assert_eq!(run_check(&scraper, &args(&bad)).unwrap(), 1);
    }

    #[test]
    fn test_checksum_of_missing_file_still_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let scraper = build_scraper(&FileConfig::default());
        let args = |path: PathBuf| CheckArgs {
            path,
            request: RequestArgs {
                mimetype: None,
                format_version: None,
                no_validate: false,
                params: vec![],
                format: OutputFormat::Json,
            },
            checksum: Some(ChecksumAlgorithm::Sha256),
        };

        let mut out = Vec::new();
        let code = check(&scraper, &args(tmp.path().join("gone.json")), &mut out).unwrap();
        assert_eq!(code, 1);
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["well_formed"], false);
        assert!(json.get("checksum").is_none());

        let present = tmp.path().join("ok.json");
        std::fs::write(&present, "{}").unwrap();
        let mut out = Vec::new();
        assert_eq!(check(&scraper, &args(present), &mut out).unwrap(), 0);
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["checksum"]["algorithm"], "sha256");
        assert_eq!(json["checksum"]["value"].as_str().unwrap().len(), 64);
    }
}
