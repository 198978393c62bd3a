//! Per-file orchestration: detect, select, run, aggregate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filescope_meta::{UNAV, is_concrete};

use crate::aggregate::{Aggregate, aggregate};
use crate::checker::{CheckerResult, Params, Query, ScrapeContext};
use crate::checkers::dummy::{file_exists, mime_match};
use crate::config::DetectorConfig;
use crate::detector::{
    Detection, Detector, PredefinedDetector, default_detectors, normalize_mimetype,
    select_detection,
};
use crate::error::ContractViolation;
use crate::registry::Registry;
use crate::report::{CheckerInfo, Scrape};

/// What to characterize and how.
#[derive(Debug, Clone)]
#[must_use]
pub struct ScrapeRequest {
    path: PathBuf,
    mimetype: Option<String>,
    version: Option<String>,
    check_wellformed: bool,
    params: Params,
}

impl ScrapeRequest {
    /// A request for `path` with validation on and nothing predefined.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mimetype: None,
            version: None,
            check_wellformed: true,
            params: Params::new(),
        }
    }

    /// Predefined mimetype. Skips detection.
    ///
    /// `UNAV` or an empty string clears it, so detection runs.
    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into()).filter(|m| is_concrete(m));
        self
    }

    /// Predefined version. `UNAV` or an empty string clears it.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into()).filter(|v| is_concrete(v));
        self
    }

    pub fn check_wellformed(mut self, check_wellformed: bool) -> Self {
        self.check_wellformed = check_wellformed;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The same request for another file.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }
}

/// Runs the characterization pipeline over a shared registry.
pub struct Scraper {
    registry: Arc<Registry>,
    detectors: Vec<Box<dyn Detector>>,
}

impl Scraper {
    /// A scraper with the default detector chain.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_detectors(registry, default_detectors(&DetectorConfig::default()))
    }

    #[must_use]
    pub fn with_detectors(registry: Arc<Registry>, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            registry,
            detectors,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Characterize one file.
    ///
    /// File problems never fail this call; they end up in the result's
    /// errors with `well_formed = false`.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation`] if a checker returns a malformed result.
    pub fn characterize(&self, request: &ScrapeRequest) -> Result<Scrape, ContractViolation> {
        let span = tracing::info_span!("characterize", path = %request.path.display());
        let _enter = span.enter();

        let exists = file_exists(&request.path);
        if exists.well_formed.is_false() {
            tracing::info!("file is missing or unreadable");
            let results = vec![exists];
            let merged = aggregate(&results, None);
            return Ok(build(&results, merged));
        }

        let detections = self.detect(request);
        let detection = select_detection(&detections);
        let candidate = detection.map_or(UNAV, |d| d.mimetype.as_str());
        let predefined_version = request.version.as_deref();

        let query = Query {
            mimetype: candidate,
            version: predefined_version,
            check_wellformed: request.check_wellformed,
            params: &request.params,
        };
        let selection = self.registry.select(&query);
        tracing::debug!(
            mimetype = candidate,
            checkers = ?selection.ids(),
            "selected checkers"
        );

        let ctx = ScrapeContext {
            path: &request.path,
            mimetype: is_concrete(candidate).then_some(candidate),
            version: predefined_version,
            check_wellformed: request.check_wellformed,
            params: &request.params,
        };
        let mut results = vec![exists];
        for checker in &selection.checkers {
            tracing::debug!(checker = checker.id(), "running checker");
            let result = checker.scrape(&ctx);
            result.validate(checker.id())?;
            results.push(result);
        }

        let mut merged = aggregate(&results, predefined_version);
        if selection.not_recognized {
            set_version(&mut merged, UNAV);
        }

        if request.mimetype.is_none()
            && let Some(detection) = detection
        {
            note_detector_disagreement(&mut merged, detection);
        }

        if let Some(predefined) = request.mimetype.as_deref()
            && request.check_wellformed
            && !selection.not_recognized
        {
            let reconciled = mime_match(
                &merged.mimetype,
                &merged.version,
                &normalize_mimetype(predefined),
                predefined_version,
            );
            merged.well_formed = merged.well_formed.and(reconciled.well_formed);
            merged.messages.extend(reconciled.messages.iter().cloned());
            merged.errors.extend(reconciled.errors.iter().cloned());
            results.push(reconciled);
        }

        let scrape = build(&results, merged);
        tracing::info!(
            mimetype = %scrape.mimetype,
            version = %scrape.version,
            well_formed = %scrape.well_formed,
            "characterized"
        );
        Ok(scrape)
    }

    fn detect(&self, request: &ScrapeRequest) -> Vec<Detection> {
        match request.mimetype.as_deref() {
            Some(mimetype) => vec![PredefinedDetector::new(Some(mimetype)).detect(&request.path)],
            None => self
                .detectors
                .iter()
                .map(|detector| detector.detect(&request.path))
                .collect(),
        }
    }
}

fn set_version(merged: &mut Aggregate, version: &str) {
    version.clone_into(&mut merged.version);
    if let Some(primary) = merged.streams.get_mut(&0) {
        version.clone_into(&mut primary.version);
    }
}

fn note_detector_disagreement(merged: &mut Aggregate, detection: &Detection) {
    if is_concrete(&merged.mimetype) && merged.mimetype != detection.mimetype {
        merged.messages.push(format!(
            "{} detected mimetype '{}', but checkers resolved '{}'.",
            detection.detector, detection.mimetype, merged.mimetype
        ));
    }
}

fn build(results: &[CheckerResult], merged: Aggregate) -> Scrape {
    let info: BTreeMap<String, CheckerInfo> = results
        .iter()
        .map(|result| (result.checker.to_owned(), CheckerInfo::from(result)))
        .collect();
    Scrape {
        mimetype: merged.mimetype,
        version: merged.version,
        well_formed: merged.well_formed,
        streams: merged.streams,
        messages: merged.messages,
        errors: merged.errors,
        info,
        checkers: results.iter().map(|r| r.checker.to_owned()).collect(),
    }
}
