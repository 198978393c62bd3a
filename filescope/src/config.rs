//! Configuration types.
//!
//! Tool locations and limits used by checkers ([`ToolConfig`]), detector
//! settings ([`DetectorConfig`]) and batch discovery options
//! ([`FsSourceConfig`]). All of them have working defaults; a YAML file can
//! override any subset of the first two.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Locations of external tools and resource limits for checkers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ToolConfig {
    pub jhove: PathBuf,
    pub ghostscript: PathBuf,
    pub verapdf: PathBuf,
    pub mediainfo: PathBuf,
    pub ffprobe: PathBuf,
    pub xmllint: PathBuf,
    pub xsltproc: PathBuf,
    /// Directory holding the ISO Schematron compilation stylesheets
    /// (`iso_dsdl_include.xsl`, `iso_abstract_expand.xsl`, `iso_svrl_for_xslt1.xsl`).
    pub schematron_xslt_dir: PathBuf,
    /// Where compiled Schematron validators are cached.
    pub schematron_cache_dir: PathBuf,
    /// Maximum number of bytes the text checkers read (default: 100 MiB).
    pub text_read_limit: u64,
    /// Number of leading bytes inspected for signatures (default: 4096).
    pub signature_read_size: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            jhove: PathBuf::from("jhove"),
            ghostscript: PathBuf::from("gs"),
            verapdf: PathBuf::from("verapdf"),
            mediainfo: PathBuf::from("mediainfo"),
            ffprobe: PathBuf::from("ffprobe"),
            xmllint: PathBuf::from("xmllint"),
            xsltproc: PathBuf::from("xsltproc"),
            schematron_xslt_dir: PathBuf::from("/usr/share/filescope/schematron"),
            schematron_cache_dir: PathBuf::from(
                shellexpand::tilde("~/.cache/filescope/schematron").as_ref(),
            ),
            text_read_limit: 104_857_600,
            signature_read_size: 4096,
        }
    }
}

/// Detector settings, passed explicitly to every detector constructor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct DetectorConfig {
    /// Run the external `file` command after the built-in signature detector.
    pub use_file_command: bool,
    pub file_command: PathBuf,
    /// Number of leading bytes the signature detector reads.
    pub read_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            use_file_command: false,
            file_command: PathBuf::from("file"),
            read_size: 4096,
        }
    }
}

/// Contents of a `filescope.yaml` configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct FileConfig {
    pub tools: ToolConfig,
    pub detectors: DetectorConfig,
}

impl FileConfig {
    /// Load a YAML configuration file and expand `~` / `$VAR` in every path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML for
    /// this shape, or a path refers to an undefined environment variable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|message| ConfigError::Parse {
            path: path.to_owned(),
            message,
        })?;
        config.expanded()
    }

    fn from_yaml(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_saphyr::from_str::<Self>(content).map_err(|e| e.to_string())
    }

    fn expanded(mut self) -> Result<Self, ConfigError> {
        let tools = &mut self.tools;
        for path in [
            &mut tools.jhove,
            &mut tools.ghostscript,
            &mut tools.verapdf,
            &mut tools.mediainfo,
            &mut tools.ffprobe,
            &mut tools.xmllint,
            &mut tools.xsltproc,
            &mut tools.schematron_xslt_dir,
            &mut tools.schematron_cache_dir,
            &mut self.detectors.file_command,
        ] {
            *path = expand_path(path)?;
        }
        Ok(self)
    }
}

/// Expand `~` and environment variables in a configured path.
///
/// # Errors
///
/// Returns an error if the path references an undefined variable.
pub fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let raw = path.to_string_lossy();
    shellexpand::full(&raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| ConfigError::Expand {
            value: raw.to_string(),
            message: e.to_string(),
        })
}

/// Filesystem discovery options for batch characterization.
///
/// NOTE: `paths` is required and must be non-empty.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct FsSourceConfig {
    /// Paths to characterize (files or directories).
    pub paths: Vec<PathBuf>,
    /// Exclude patterns (glob format), matched against the path and file name.
    pub exclude: Vec<String>,
    /// Whether to follow symbolic links (default: `false`).
    pub follow_links: bool,
    /// Maximum directory traversal depth (default: 64).
    pub max_depth: usize,
    /// Maximum number of files to characterize (default: `100_000`).
    pub max_files: usize,
}

impl Default for FsSourceConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude: Vec::new(),
            follow_links: false,
            max_depth: 64,
            max_files: 100_000,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_at_path_lookups() {
        let cfg = ToolConfig::default();
        assert_eq!(cfg.jhove, PathBuf::from("jhove"));
        assert_eq!(cfg.ghostscript, PathBuf::from("gs"));
        assert!(!cfg.schematron_cache_dir.to_string_lossy().starts_with('~'));
        assert!(!DetectorConfig::default().use_file_command);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = FileConfig::from_yaml(
            "tools:\n  jhove: /opt/jhove/jhove\n  text_read_limit: 1024\ndetectors:\n  use_file_command: true\n",
        )
        .unwrap();
        assert_eq!(cfg.tools.jhove, PathBuf::from("/opt/jhove/jhove"));
        assert_eq!(cfg.tools.text_read_limit, 1024);
        assert_eq!(cfg.tools.ffprobe, PathBuf::from("ffprobe"));
        assert!(cfg.detectors.use_file_command);
        assert_eq!(cfg.detectors.read_size, 4096);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = FileConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg.tools.xmllint, PathBuf::from("xmllint"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/filescope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_expands_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filescope.yaml");
        fs::write(&path, "tools:\n  xsltproc: $HOME/bin/xsltproc\n").unwrap();
        let cfg = FileConfig::load(&path).unwrap();
        assert!(!cfg.tools.xsltproc.to_string_lossy().contains('$'));
        assert!(cfg.tools.xsltproc.ends_with("bin/xsltproc"));
    }

    #[test]
    fn test_expand_undefined_variable() {
        let err = expand_path(Path::new("$FILESCOPE_SURELY_UNDEFINED_VAR/x")).unwrap_err();
        assert!(matches!(err, ConfigError::Expand { .. }));
    }
}
