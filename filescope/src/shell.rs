//! Blocking execution of external characterization tools.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Command;

use crate::error::CheckerFailure;

/// Captured output of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit status rendered for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.status
            .map_or_else(|| "killed by signal".to_owned(), |code| format!("exit code {code}"))
    }

    /// Non-empty stderr lines, trimmed.
    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Convert an unexpected exit status into a failure.
    #[must_use]
    pub fn into_failure(self, tool: &Path) -> CheckerFailure {
        CheckerFailure::ToolFailed {
            tool: tool.display().to_string(),
            status: self.status_text(),
            stderr: self.stderr.trim().to_owned(),
        }
    }
}

/// Run `program` with `args` and wait for it.
///
/// No timeout is applied; a hanging tool hangs the calling checker.
///
/// # Errors
///
/// Returns [`CheckerFailure::ToolNotFound`] if the program cannot be started.
/// A non-zero exit status is not an error here.
pub fn run(program: &Path, args: &[&OsStr]) -> Result<ShellOutput, CheckerFailure> {
    tracing::debug!(program = %program.display(), ?args, "running external tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| spawn_failure(program, source))?;
    Ok(ShellOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn spawn_failure(program: &Path, source: io::Error) -> CheckerFailure {
    CheckerFailure::ToolNotFound {
        tool: program.display().to_string(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program() {
        let err = run(Path::new("/nonexistent/tool"), &[]).unwrap_err();
        assert!(matches!(err, CheckerFailure::ToolNotFound { .. }));
        assert!(err.to_string().starts_with("/nonexistent/tool could not be started"));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_status_and_streams() {
        let output = run(
            Path::new("sh"),
            &[OsStr::new("-c"), OsStr::new("echo out; echo err >&2; exit 3")],
        )
        .unwrap();
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr_lines().collect::<Vec<_>>(), vec!["err"]);
        assert_eq!(output.status_text(), "exit code 3");
    }
}
