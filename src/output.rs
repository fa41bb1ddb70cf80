//! Where digests are written.
//!
//! The output directory is a process-wide resource: resolved and created on
//! first use, then shared read-only. `create_dir_all` makes creation idempotent,
//! so a directory left over from an earlier run is fine.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::{Config, ENV_OUTPUT_DIR};

pub const SUBDIR: &str = "repo_eater";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Host output root: config, then `$REPO_EATER_OUTPUT_DIR`, then `./output`.
pub fn host_output_directory(cfg: &Config) -> PathBuf {
    if let Some(dir) = &cfg.output_dir {
        return dir.clone();
    }
    std::env::var_os(ENV_OUTPUT_DIR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output"))
}

static PROCESS_OUTPUT_DIR: OnceLock<OutputDir> = OnceLock::new();

/// Process-wide `<host>/repo_eater`, created on first call.
///
/// Later calls return the first resolution even if `cfg` differs.
pub fn output_dir(cfg: &Config) -> Result<&'static OutputDir> {
    if let Some(dir) = PROCESS_OUTPUT_DIR.get() {
        return Ok(dir);
    }
    let dir = OutputDir::ensure(host_output_directory(cfg).join(SUBDIR))?;
    // A racing initializer may have won; both created the same directory.
    Ok(PROCESS_OUTPUT_DIR.get_or_init(|| dir))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    /// Create `path` (and parents) if missing.
    pub fn ensure(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create output directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `content` to `{timestamp}_{repo_name}.txt` and return the full path.
    pub fn write_digest(&self, repo_url: &str, content: &str, at: NaiveDateTime) -> Result<PathBuf> {
        let path = self.path.join(output_filename(repo_url, at));
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Last `/` segment of the URL after trailing slashes are stripped.
pub fn repo_name_from_url(repo_url: &str) -> &str {
    let trimmed = repo_url.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn output_filename(repo_url: &str, at: NaiveDateTime) -> String {
    format!("{}_{}.txt", at.format(TIMESTAMP_FORMAT), repo_name_from_url(repo_url))
}
