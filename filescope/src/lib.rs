//! # filescope
//!
//! File format identification, validation and metadata extraction for
//! digital preservation.
//!
//! A static capability matrix maps `(mimetype, version, validation, params)`
//! to an ordered set of checkers. Each checker inspects the file (in process
//! or through an external tool) and reports streams, messages, errors and a
//! tri-state well-formed verdict. The aggregator reduces those into one
//! [`Scrape`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filescope::{Registry, ScrapeRequest, Scraper, ToolConfig};
//!
//! let registry = Arc::new(Registry::new(&ToolConfig::default()));
//! let scraper = Scraper::new(registry);
//!
//! let request = ScrapeRequest::new("report.pdf")
//!     .mimetype("application/pdf")
//!     .version("A-2b");
//! let scrape = scraper.characterize(&request).unwrap();
//! println!("{} {} well_formed={}", scrape.mimetype, scrape.version, scrape.well_formed);
//! for error in &scrape.errors {
//!     println!("  {error}");
//! }
//! ```

pub mod aggregate;
mod binary;
pub mod checker;
pub mod checkers;
mod checksum;
mod config;
pub mod detector;
mod error;
pub mod output;
pub mod registry;
mod report;
mod scraper;
mod shell;
mod signature;
mod strategy;


pub use checker::{Checker, CheckerId, CheckerResult, Params, Query, ScrapeContext};
pub use checksum::ChecksumAlgorithm;
pub use config::{DetectorConfig, FileConfig, FsSourceConfig, ToolConfig, expand_path};
pub use error::{CheckerFailure, ConfigError, ContractViolation, SourceError, SourceErrorKind};
pub use filescope_meta::{MetadataStream, StreamType, UNAP, UNAV, WellFormed, is_concrete};
pub use registry::{CapabilityEntry, Registration, Registry};
pub use report::{BatchEntry, BatchReport, CheckerInfo, Scrape};
pub use scraper::{ScrapeRequest, Scraper};

use std::path::PathBuf;

use strategy::fs::find_files;

/// Discover the files a batch run will characterize.
///
/// Applies the `max_files` limit: files beyond it are dropped and a single
/// `LimitExceeded` source error names the first one left out.
///
/// # Errors
///
/// Returns an error if `fs_config.paths` is empty or if any provided path
/// does not exist.
pub fn discover(fs_config: &FsSourceConfig) -> anyhow::Result<(Vec<PathBuf>, Vec<SourceError>)> {
    if fs_config.paths.is_empty() {
        anyhow::bail!("No paths provided for characterization");
    }

    for path in &fs_config.paths {
        if !path.exists() {
            anyhow::bail!("Path does not exist: {}", path.display());
        }
    }

    let (mut files, mut source_errors) = find_files(fs_config);

    let budget = fs_config.max_files.saturating_sub(source_errors.len());
    if let Some(first_skipped) = files.get(budget).cloned() {
        files.truncate(budget);
        source_errors.push(SourceError::new(
            first_skipped,
            SourceErrorKind::LimitExceeded,
            format!(
                "Run aborted: max_files limit ({}) reached; remaining files not characterized",
                fs_config.max_files
            ),
        ));
    }

    Ok((files, source_errors))
}

/// Characterize every file under the configured paths, one after another.
///
/// `template` supplies the predefined type, validation flag and params
/// applied to each file; its path is ignored.
///
/// # Errors
///
/// Returns an error if `fs_config.paths` is empty or if any provided path
/// does not exist. Returns `Ok` with `characterized_files: 0` if paths exist
/// but contain no files. Contract violations and discovery failures are
/// reported in `report.source_errors` and never silently discarded.
pub fn characterize_fs(
    scraper: &Scraper,
    fs_config: &FsSourceConfig,
    template: &ScrapeRequest,
) -> anyhow::Result<BatchReport> {
    let (files, mut source_errors) = discover(fs_config)?;

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        match scraper.characterize(&template.with_path(file.clone())) {
            Ok(result) => results.push(BatchEntry { file, result }),
            Err(violation) => source_errors.push(SourceError::new(
                file,
                SourceErrorKind::ContractViolation,
                violation.to_string(),
            )),
        }
    }

    Ok(BatchReport::new(results, source_errors))
}
