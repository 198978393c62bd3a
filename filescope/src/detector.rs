//! Detectors propose a candidate mimetype for files submitted without one.
//!
//! A detection is only a registry lookup key. It never becomes the final
//! answer on its own; checkers confirm or contradict it.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use filescope_meta::{UNAV, is_concrete};

use crate::config::DetectorConfig;
use crate::shell;
use crate::signature;

/// One detector's guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub detector: &'static str,
    /// Normalized mimetype, or `UNAV`.
    pub mimetype: String,
    /// Whether this guess should beat non-important ones.
    pub important: bool,
}

impl Detection {
    fn unknown(detector: &'static str) -> Self {
        Self {
            detector,
            mimetype: UNAV.to_owned(),
            important: false,
        }
    }
}

pub trait Detector: Send + Sync {
    fn id(&self) -> &'static str;

    fn detect(&self, path: &Path) -> Detection;
}

/// Map common aliases onto the mimetypes the capability matrix uses.
#[must_use]
pub fn normalize_mimetype(mimetype: &str) -> String {
    let base = mimetype
        .split(';')
        .next()
        .unwrap_or(mimetype)
        .trim()
        .to_ascii_lowercase();
    let canonical = match base.as_str() {
        "application/xml" => "text/xml",
        "audio/wav" | "audio/x-wave" | "audio/vnd.wave" => "audio/x-wav",
        "video/x-msvideo" | "video/msvideo" => "video/avi",
        "video/mp2t" => "video/MP2T",
        "video/mp2p" => "video/MP2P",
        "video/mp1s" => "video/MP1S",
        "audio/mp3" | "audio/x-mpeg" => "audio/mpeg",
        "application/x-warc" => "application/warc",
        "application/x-ia-arc" | "application/x-arc" => "application/x-internet-archive",
        "image/x-ms-bmp" => "image/bmp",
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        "text/json" => "application/json",
        "image/dpx" => "image/x-dpx",
        "audio/x-flac" => "audio/flac",
        _ => return base,
    };
    canonical.to_owned()
}

/// Pick the winning detection: first important concrete, else first concrete.
#[must_use]
pub fn select_detection(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .find(|d| d.important && is_concrete(&d.mimetype))
        .or_else(|| detections.iter().find(|d| is_concrete(&d.mimetype)))
}

/// Reports the caller's mimetype as an important detection.
#[derive(Debug, Clone)]
pub struct PredefinedDetector {
    mimetype: Option<String>,
}

impl PredefinedDetector {
    #[must_use]
    pub fn new(mimetype: Option<&str>) -> Self {
        Self {
            mimetype: mimetype.map(normalize_mimetype),
        }
    }
}

impl Detector for PredefinedDetector {
    fn id(&self) -> &'static str {
        "PredefinedDetector"
    }

    fn detect(&self, _path: &Path) -> Detection {
        match &self.mimetype {
            Some(mimetype) => Detection {
                detector: self.id(),
                mimetype: mimetype.clone(),
                important: true,
            },
            None => Detection::unknown(self.id()),
        }
    }
}

/// Built-in byte signature and text sniffing.
#[derive(Debug, Clone)]
pub struct SignatureDetector {
    read_size: usize,
}

impl SignatureDetector {
    #[must_use]
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            read_size: config.read_size,
        }
    }
}

impl Detector for SignatureDetector {
    fn id(&self) -> &'static str {
        "SignatureDetector"
    }

    fn detect(&self, path: &Path) -> Detection {
        let header = match signature::read_header(path, self.read_size) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(path = %path.display(), "signature read failed: {e}");
                return Detection::unknown(self.id());
            }
        };
        match signature::identify(&header) {
            Some(found) => Detection {
                detector: self.id(),
                mimetype: found.mimetype.to_owned(),
                // Web archives are only recognizable from their leading record.
                important: found.strong
                    && matches!(
                        found.mimetype,
                        "application/warc" | "application/x-internet-archive"
                    ),
            },
            None => Detection::unknown(self.id()),
        }
    }
}

/// Runs `file --brief --mime-type`.
#[derive(Debug, Clone)]
pub struct FileCommandDetector {
    command: PathBuf,
}

impl FileCommandDetector {
    #[must_use]
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            command: config.file_command.clone(),
        }
    }
}

impl Detector for FileCommandDetector {
    fn id(&self) -> &'static str {
        "FileCommandDetector"
    }

    fn detect(&self, path: &Path) -> Detection {
        let output = match shell::run(
            &self.command,
            &[
                OsStr::new("--brief"),
                OsStr::new("--mime-type"),
                path.as_os_str(),
            ],
        ) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                tracing::warn!(detector = self.id(), "file failed: {}", output.stderr.trim());
                return Detection::unknown(self.id());
            }
            Err(e) => {
                tracing::warn!(detector = self.id(), "{e}");
                return Detection::unknown(self.id());
            }
        };
        let raw = output.stdout.trim();
        let mimetype = match raw {
            "" | "application/octet-stream" | "inode/x-empty" => UNAV.to_owned(),
            other => normalize_mimetype(other),
        };
        Detection {
            detector: self.id(),
            important: mimetype == "application/x-internet-archive",
            mimetype,
        }
    }
}

/// The detector chain described by `config`, signature detector first.
#[must_use]
pub fn default_detectors(config: &DetectorConfig) -> Vec<Box<dyn Detector>> {
    let mut detectors: Vec<Box<dyn Detector>> = vec![Box::new(SignatureDetector::new(config))];
    if config.use_file_command {
        detectors.push(Box::new(FileCommandDetector::new(config)));
    }
    detectors
}
