use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Directories that never contribute useful text to a digest.
const NOISE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    ".nuxt",
    ".tox",
    ".idea",
    ".vscode",
];

/// Lockfiles, source maps and binary media.
const NOISE_FILES: &[&str] = &[
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/yarn.lock",
    "**/Cargo.lock",
    "**/poetry.lock",
    "**/*.map",
    "**/*.min.js",
    "**/*.svg",
    "**/*.png",
    "**/*.ico",
    "**/*.jpg",
    "**/*.jpeg",
    "**/*.gif",
    "**/*.webp",
    "**/*.pdf",
    "**/*.zip",
    "**/*.gz",
    "**/*.woff",
    "**/*.woff2",
    "**/*.ttf",
    "**/*.exe",
    "**/*.dll",
    "**/*.so",
    "**/*.dylib",
    "**/*.pyc",
];

fn default_overrides(repo_root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);

    // Overrides use gitignore syntax here: a leading `!` marks an ignore.
    for pat in NOISE_FILES {
        ob.add(&format!("!{pat}"))?;
    }

    // For directories, ignore both the entry and its descendants, otherwise the
    // walker may still descend into it.
    let mut dirs: Vec<&str> = NOISE_DIRS.to_vec();
    dirs.extend(
        exclude_dir_names
            .iter()
            .map(|d| d.trim().trim_matches('/'))
            .filter(|d| !d.is_empty()),
    );
    for d in dirs {
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub bytes: u64,
}

impl FileEntry {
    /// Relative path with `/` separators on every platform.
    pub fn rel_display(&self) -> String {
        self.rel_path.to_string_lossy().replace('\\', "/")
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub repo_root: PathBuf,
    pub target: PathBuf,
    pub max_file_bytes: u64,
    pub exclude_dir_names: Vec<String>,
}

impl ScanOptions {
    pub fn target_root(&self) -> PathBuf {
        if self.target.is_absolute() {
            self.target.clone()
        } else {
            self.repo_root.join(&self.target)
        }
    }
}

pub fn scan_repository(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    let target_root = opts.target_root();

    let meta = std::fs::metadata(&target_root)
        .with_context(|| format!("Target does not exist: {}", target_root.display()))?;

    if meta.is_file() {
        return scan_single_file(opts, &target_root);
    }

    let overrides = default_overrides(&opts.repo_root, &opts.exclude_dir_names)?;
    let walker = WalkBuilder::new(&target_root)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .require_git(false)
        .overrides(overrides)
        .build();

    let mut entries = Vec::new();
    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("skipping unreadable entry: {e}");
                continue;
            }
        };

        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        let bytes = match std::fs::metadata(&abs_path).map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };

        if bytes == 0 || bytes > opts.max_file_bytes {
            continue;
        }

        let rel_path = path_relative_to(&abs_path, &opts.repo_root)?;
        entries.push(FileEntry {
            abs_path,
            rel_path,
            bytes,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn scan_single_file(opts: &ScanOptions, abs_path: &Path) -> Result<Vec<FileEntry>> {
    let ov = default_overrides(&opts.repo_root, &opts.exclude_dir_names)?;
    if ov.matched(abs_path, /* is_dir */ false).is_ignore() {
        return Ok(vec![]);
    }

    let bytes = std::fs::metadata(abs_path)?.len();
    if bytes == 0 || bytes > opts.max_file_bytes {
        return Ok(vec![]);
    }

    let rel_path = path_relative_to(abs_path, &opts.repo_root)?;
    Ok(vec![FileEntry {
        abs_path: abs_path.to_path_buf(),
        rel_path,
        bytes,
    }])
}

fn path_relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", path.display(), base.display()))?;
    Ok(rel.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, body).unwrap();
    }

    fn opts(root: &Path) -> ScanOptions {
        ScanOptions {
            repo_root: root.to_path_buf(),
            target: PathBuf::from("."),
            max_file_bytes: 1024,
            exclude_dir_names: vec!["generated".into()],
        }
    }

    fn rels(entries: &[FileEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.rel_display().trim_start_matches("./").to_string())
            .collect()
    }

    #[test]
    fn skips_noise_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "src/main.rs", "fn main() {}\n");
        touch(root, "README.md", "# hi\n");
        touch(root, "Cargo.lock", "lock\n");
        touch(root, "node_modules/x/index.js", "x\n");
        touch(root, "generated/out.rs", "// gen\n");
        touch(root, "logo.png", "not really a png");
        touch(root, "empty.txt", "");

        let entries = scan_repository(&opts(root)).unwrap();
        assert_eq!(rels(&entries), vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn respects_size_ceiling() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "big.txt", &"a".repeat(2048));
        touch(root, "small.txt", "a");

        let entries = scan_repository(&opts(root)).unwrap();
        assert_eq!(rels(&entries), vec!["small.txt"]);
    }

    #[test]
    fn honours_gitignore_without_git_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, ".gitignore", "secret.txt\n");
        touch(root, "secret.txt", "hidden\n");
        touch(root, "kept.txt", "kept\n");

        let entries = scan_repository(&opts(root)).unwrap();
        assert_eq!(rels(&entries), vec!["kept.txt"]);
    }

    #[test]
    fn single_file_target() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "src/lib.rs", "pub fn x() {}\n");

        let mut o = opts(root);
        o.target = PathBuf::from("src/lib.rs");
        let entries = scan_repository(&o).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_display(), "src/lib.rs");
    }

    #[test]
    fn missing_target_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut o = opts(tmp.path());
        o.target = PathBuf::from("nope");
        assert!(scan_repository(&o).is_err());
    }
}
