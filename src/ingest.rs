use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::digest::{decode_text, render_content, render_summary, render_tree, SummaryInput};
use crate::scanner::{scan_repository, FileEntry, ScanOptions};
use crate::source::{fetch, RepoSource};

/// Flattened view of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ingestion {
    pub summary: String,
    pub tree: String,
    pub content: String,
}

/// Turns a repository reference (URL or local path) into an [`Ingestion`].
pub trait Ingestor: Send + Sync {
    fn ingest(&self, source: &str) -> Result<Ingestion>;
}

/// Default ingestor: shallow `git clone` (or a local directory), gitignore-aware
/// walk, text files concatenated in path order.
#[derive(Debug, Clone, Default)]
pub struct GitIngestor {
    cfg: Config,
}

impl GitIngestor {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }
}

impl Ingestor for GitIngestor {
    fn ingest(&self, source: &str) -> Result<Ingestion> {
        let src = RepoSource::parse(source)?;
        let checkout = fetch(&src, &self.cfg.clone)?;

        let target = src.subpath().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let opts = ScanOptions {
            repo_root: checkout.root().to_path_buf(),
            target,
            max_file_bytes: self.cfg.scan.max_file_bytes,
            exclude_dir_names: self.cfg.scan.exclude_dir_names.clone(),
        };
        let entries = scan_repository(&opts)
            .with_context(|| format!("Failed to scan {}", src.display_name()))?;
        tracing::debug!("scanned {} files from {}", entries.len(), src.display_name());

        let files = read_entries(&entries);

        let rel_paths: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();
        let tree = render_tree(&src.slug(), &rel_paths);
        let content = render_content(&files);
        let summary = render_summary(&SummaryInput {
            repository: &src.display_name(),
            branch: src.branch(),
            subpath: src.subpath(),
            files_analyzed: files.len(),
            content_chars: content.chars().count(),
            chars_per_token: self.cfg.tokenizer.chars_per_token,
        });

        Ok(Ingestion {
            summary,
            tree,
            content,
        })
    }
}

/// Read scanned files in parallel as `(relative path, text)` pairs, keeping scan
/// order. A file that vanished or became unreadable since the scan is left out
/// of both the tree and the content.
fn read_entries(entries: &[FileEntry]) -> Vec<(String, Option<String>)> {
    entries
        .par_iter()
        .filter_map(|e| {
            let bytes = match std::fs::read(&e.abs_path) {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!("skipping unreadable file {}: {err}", e.abs_path.display());
                    return None;
                }
            };
            let rel = e.rel_display().trim_start_matches("./").to_string();
            Some((rel, decode_text(bytes)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &std::path::Path, rel: &str, body: &[u8]) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, body).unwrap();
    }

    #[test]
    fn ingests_local_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("demo");
        touch(&root, "src/main.rs", b"fn main() {}\n");
        touch(&root, "README.md", b"# demo\n");
        touch(&root, "data.bin", &[1, 0, 2, 3]);
        touch(&root, "Cargo.lock", b"# lock\n");

        let out = GitIngestor::default()
            .ingest(root.to_str().unwrap())
            .unwrap();

        assert!(out.summary.starts_with("Repository: demo\n"));
        assert!(out.summary.contains("Files analyzed: 3\n"));
        assert!(out.tree.contains("└── demo/\n"));
        assert!(out.tree.contains("main.rs"));
        assert!(!out.tree.contains("Cargo.lock"));

        // Path order: README.md, data.bin, src/main.rs.
        let readme = out.content.find("FILE: README.md").unwrap();
        let bin = out.content.find("FILE: data.bin").unwrap();
        let main = out.content.find("FILE: src/main.rs").unwrap();
        assert!(readme < bin && bin < main);
        assert!(out.content.contains("fn main() {}\n"));
        assert!(out.content.contains("[Non-text file]"));
    }

    #[test]
    fn unreadable_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.txt", b"alpha\n");
        let entry = |rel: &str| FileEntry {
            abs_path: tmp.path().join(rel),
            rel_path: PathBuf::from(rel),
            bytes: 6,
        };
        // `gone.txt` was scanned but removed before the read.
        let files = read_entries(&[entry("a.txt"), entry("gone.txt")]);
        assert_eq!(files, vec![("a.txt".to_string(), Some("alpha\n".to_string()))]);
    }

    #[test]
    fn missing_local_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing").join("repo");
        let err = GitIngestor::default()
            .ingest(&format!("file://{}", missing.display()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("does not exist"));
    }
}
