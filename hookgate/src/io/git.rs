//! Checked-out branch lookup for the git validator.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

/// A git working tree rooted at the project directory.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    root: PathBuf,
}

impl GitCheckout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Name of the checked-out branch, `None` on a detached HEAD.
    ///
    /// Errors when `root` is not inside a repository or git is missing.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn branch(&self) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(["symbolic-ref", "--quiet", "--short", "HEAD"])
            .current_dir(&self.root)
            .output()
            .context("spawn git symbolic-ref")?;
        match output.status.code() {
            Some(0) => {
                let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
                debug!(branch = %branch, "checked-out branch");
                Ok(Some(branch).filter(|name| !name.is_empty()))
            }
            // `--quiet` exits 1 without output when HEAD is detached.
            Some(1) => Ok(None),
            _ => bail!(
                "git symbolic-ref failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_repository_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(GitCheckout::new(temp.path()).branch().is_err());
    }

    #[test]
    fn fresh_repository_reports_its_initial_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = Command::new("git")
            .args(["init", "--quiet", "--initial-branch=trunk"])
            .current_dir(temp.path())
            .status();
        // Skip where git is unavailable or too old for --initial-branch.
        if !init.is_ok_and(|status| status.success()) {
            return;
        }
        let branch = GitCheckout::new(temp.path()).branch().expect("branch");
        assert_eq!(branch.as_deref(), Some("trunk"));
    }
}
