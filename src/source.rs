//! Repository source resolution and checkout.
//!
//! Accepts local directories and remote git URLs (`https://`, `http://`,
//! `git@host:owner/repo`, or bare `host/owner/repo`). GitHub/GitLab style
//! `/tree/<branch>/<path>` and `/blob/<branch>/<path>` suffixes select a branch
//! and a subpath inside the checkout.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tempfile::TempDir;

use crate::config::CloneConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    Local {
        path: PathBuf,
    },
    Remote {
        clone_url: String,
        host: String,
        owner: String,
        repo: String,
        branch: Option<String>,
        subpath: Option<String>,
    },
}

fn ssh_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:ssh://)?git@([^:/]+)[:/](.+)$").unwrap())
}

fn scheme_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.-]*)://([^/]+)/?(.*)$").unwrap())
}

fn bare_host_regex() -> &'static Regex {
    // `github.com/owner/repo` without a scheme: first segment must look like a hostname.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)+)/(.+)$").unwrap())
}

impl RepoSource {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("Invalid repository URL: empty input");
        }

        if let Some(rest) = input.strip_prefix("file://") {
            return Ok(RepoSource::Local {
                path: PathBuf::from(rest),
            });
        }

        if let Some(caps) = ssh_regex().captures(input) {
            let host = caps[1].to_string();
            let path = caps[2].to_string();
            return Self::remote_from_parts(input, input.to_string(), host, &path, "ssh");
        }

        if let Some(caps) = scheme_regex().captures(input) {
            let scheme = caps[1].to_ascii_lowercase();
            let host = caps[2].to_string();
            let path = caps[3].to_string();
            if !matches!(scheme.as_str(), "http" | "https" | "ssh" | "git") {
                bail!("Invalid repository URL: unsupported scheme `{scheme}` in {input}");
            }
            return Self::remote_from_parts(input, String::new(), host, &path, &scheme);
        }

        let as_path = Path::new(input);
        if as_path.is_dir() {
            return Ok(RepoSource::Local {
                path: as_path.to_path_buf(),
            });
        }

        if let Some(caps) = bare_host_regex().captures(input) {
            let host = caps[1].to_string();
            let path = caps[2].to_string();
            return Self::remote_from_parts(input, String::new(), host, &path, "https");
        }

        Err(anyhow!(
            "Invalid repository URL: {input} is neither a git URL nor an existing directory"
        ))
    }

    /// Split `owner/repo[/tree|blob/<branch>/<subpath>]` and build the clone URL.
    ///
    /// `clone_url` is used verbatim when non-empty (ssh form); otherwise it is
    /// rebuilt from scheme, host and the owner/repo prefix.
    fn remote_from_parts(
        input: &str,
        clone_url: String,
        host: String,
        path: &str,
        scheme: &str,
    ) -> Result<Self> {
        let path = path.split(['?', '#']).next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            bail!("Invalid repository URL: expected <host>/<owner>/<repo> in {input}");
        }
        // The subpath is joined onto the checkout root; it must stay inside it.
        if segments.iter().any(|s| *s == "..") {
            bail!("Invalid repository URL: `..` segments are not allowed in {input}");
        }

        // GitLab nests groups (`group/sub/repo/-/tree/main`); everything before the
        // `-` / `tree` / `blob` marker belongs to the repository path.
        let marker = segments
            .iter()
            .position(|s| matches!(*s, "tree" | "blob" | "-"))
            .filter(|&i| i >= 2);
        let repo_end = marker.unwrap_or(segments.len());
        let repo_segments = &segments[..repo_end];

        let mut branch = None;
        let mut subpath = None;
        if let Some(i) = marker {
            let mut rest = &segments[i..];
            if rest.first() == Some(&"-") {
                rest = &rest[1..];
            }
            if matches!(rest.first(), Some(&"tree") | Some(&"blob")) && rest.len() >= 2 {
                branch = Some(rest[1].to_string());
                if rest.len() > 2 {
                    subpath = Some(rest[2..].join("/"));
                }
            }
        }

        let owner = repo_segments[..repo_segments.len() - 1].join("/");
        let repo_raw = repo_segments[repo_segments.len() - 1];
        let repo = repo_raw.strip_suffix(".git").unwrap_or(repo_raw).to_string();

        let clone_url = if !clone_url.is_empty() && marker.is_none() {
            clone_url
        } else if scheme == "ssh" {
            format!("git@{host}:{}", repo_segments.join("/"))
        } else {
            format!("{scheme}://{host}/{}", repo_segments.join("/"))
        };

        Ok(RepoSource::Remote {
            clone_url,
            host,
            owner,
            repo,
            branch,
            subpath,
        })
    }

    /// Human-readable name used in the digest summary and tree root.
    pub fn display_name(&self) -> String {
        match self {
            RepoSource::Local { path } => local_dir_name(path),
            RepoSource::Remote { owner, repo, .. } => format!("{owner}/{repo}"),
        }
    }

    /// Name of the tree root directory (`owner-repo` for remotes).
    pub fn slug(&self) -> String {
        match self {
            RepoSource::Local { path } => local_dir_name(path),
            RepoSource::Remote { owner, repo, .. } => {
                format!("{}-{repo}", owner.replace('/', "-"))
            }
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            RepoSource::Remote { branch, .. } => branch.as_deref(),
            RepoSource::Local { .. } => None,
        }
    }

    pub fn subpath(&self) -> Option<&str> {
        match self {
            RepoSource::Remote { subpath, .. } => subpath.as_deref(),
            RepoSource::Local { .. } => None,
        }
    }
}

fn local_dir_name(path: &Path) -> String {
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    canon
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| canon.to_string_lossy().to_string())
}

/// A directory ready to be scanned. Remote checkouts are deleted on drop.
#[derive(Debug)]
pub struct Checkout {
    root: PathBuf,
    _tmp: Option<TempDir>,
}

impl Checkout {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub fn fetch(source: &RepoSource, cfg: &CloneConfig) -> Result<Checkout> {
    match source {
        RepoSource::Local { path } => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Repository path does not exist: {}", path.display()))?;
            if !meta.is_dir() {
                bail!("Repository path is not a directory: {}", path.display());
            }
            Ok(Checkout {
                root: path.clone(),
                _tmp: None,
            })
        }
        RepoSource::Remote {
            clone_url, branch, ..
        } => {
            let tmp = tempfile::Builder::new()
                .prefix("repo_eater-")
                .tempdir()
                .context("Failed to create temporary clone directory")?;
            let dest = tmp.path().join("repo");
            git_clone(cfg, clone_url, branch.as_deref(), &dest)?;
            Ok(Checkout {
                root: dest,
                _tmp: Some(tmp),
            })
        }
    }
}

fn git_clone(cfg: &CloneConfig, url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
    let mut cmd = Command::new(&cfg.git_binary);
    cmd.arg("clone").arg("--single-branch");
    if cfg.depth > 0 {
        cmd.arg("--depth").arg(cfg.depth.to_string());
    }
    if let Some(b) = branch {
        cmd.arg("--branch").arg(b);
    }
    cmd.arg(url).arg(dest);
    // Never block on a credential prompt.
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    tracing::debug!("cloning {url} into {}", dest.display());
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to run `{} clone`; is git installed?", cfg.git_binary))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let msg = stderr.trim();
        if msg.is_empty() {
            bail!("git clone of {url} failed with {}", output.status);
        }
        bail!("git clone of {url} failed: {msg}");
    }
    Ok(())
}
