//! Filesystem batch source.
//!
//! Discovers the files a batch run characterizes. Properties enforced here:
//! - Symlinks are not followed by default (`follow_links: false`)
//! - Resolved paths must stay within the root they were found under
//! - Device files, pipes, and sockets are skipped
//! - Maximum directory depth is enforced

use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

use crate::config::FsSourceConfig;
use crate::error::{SourceError, SourceErrorKind};

/// Version-control metadata directories never worth characterizing.
pub const SKIP_DIRS: &[&str] = &[".git", ".hg", ".svn"];

fn matches_exclude(path: &Path, exclude_patterns: &[Pattern]) -> bool {
    let path_str = path.to_string_lossy();
    exclude_patterns.iter().any(|pattern| {
        pattern.matches(&path_str)
            || path
                .file_name()
                .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
    })
}

/// `true` if the entry should be walked (it is not a skip dir).
fn is_not_skip_dir(entry: &walkdir::DirEntry) -> bool {
    if entry.file_type().is_dir()
        && entry.depth() > 0
        && let Some(name) = entry.file_name().to_str()
    {
        return !SKIP_DIRS.contains(&name);
    }
    true
}

#[cfg(unix)]
fn is_special_file(entry: &walkdir::DirEntry) -> bool {
    use std::os::unix::fs::FileTypeExt;
    entry.metadata().map(|m| m.file_type()).is_ok_and(|ft| {
        ft.is_block_device() || ft.is_char_device() || ft.is_fifo() || ft.is_socket()
    })
}

#[cfg(not(unix))]
fn is_special_file(_entry: &walkdir::DirEntry) -> bool {
    false
}

/// Find all files to characterize under the configured paths.
///
/// Returns `(files, source_errors)`, files sorted and deduplicated. Walk
/// errors, bad exclude patterns and boundary violations go to
/// `source_errors` and are never dropped.
#[must_use]
pub fn find_files(config: &FsSourceConfig) -> (Vec<PathBuf>, Vec<SourceError>) {
    let mut files = Vec::new();
    let mut source_errors = Vec::new();

    let mut exclude_patterns = Vec::with_capacity(config.exclude.len());
    for pat_str in &config.exclude {
        match Pattern::new(pat_str) {
            Ok(pat) => exclude_patterns.push(pat),
            Err(e) => source_errors.push(SourceError::new(
                PathBuf::from(pat_str),
                SourceErrorKind::InvalidExcludePattern,
                format!("Invalid exclude glob pattern '{pat_str}': {e}"),
            )),
        }
    }

    for root in &config.paths {
        let canonical_root = match root.canonicalize() {
            Ok(r) => r,
            Err(e) => {
                source_errors.push(SourceError::new(
                    root.clone(),
                    SourceErrorKind::IoError,
                    format!("Failed to canonicalize root path: {e}"),
                ));
                continue;
            }
        };

        if root.is_file() {
            if !matches_exclude(root, &exclude_patterns) {
                files.push(root.clone());
            }
            continue;
        }

        if !root.is_dir() {
            continue;
        }

        for entry_result in WalkDir::new(root)
            .follow_links(config.follow_links)
            .max_depth(config.max_depth)
            .into_iter()
            .filter_entry(is_not_skip_dir)
        {
            let entry = match entry_result {
                Ok(e) => e,
                Err(walk_err) => {
                    let path = walk_err
                        .path()
                        .map_or_else(|| root.clone(), Path::to_path_buf);
                    source_errors.push(SourceError::new(
                        path,
                        SourceErrorKind::WalkError,
                        format!("Directory traversal error: {walk_err}"),
                    ));
                    continue;
                }
            };

            let file_path = entry.path();
            if !file_path.is_file() || is_special_file(&entry) {
                continue;
            }

            // Catches symlink escapes even when follow_links is on.
            match file_path.canonicalize() {
                Ok(canonical_path) if !canonical_path.starts_with(&canonical_root) => {
                    source_errors.push(SourceError::new(
                        file_path.to_path_buf(),
                        SourceErrorKind::OutsideRoot,
                        format!(
                            "Path resolves outside root: {} -> {}",
                            file_path.display(),
                            canonical_path.display()
                        ),
                    ));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    source_errors.push(SourceError::new(
                        file_path.to_path_buf(),
                        SourceErrorKind::IoError,
                        format!("Failed to canonicalize path: {e}"),
                    ));
                    continue;
                }
            }

            if matches_exclude(file_path, &exclude_patterns) {
                continue;
            }

            files.push(file_path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    (files, source_errors)
}
