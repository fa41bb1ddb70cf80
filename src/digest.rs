//! Text rendering of an ingested repository: summary, directory tree and the
//! concatenated file bodies.

use std::collections::BTreeMap;

use crate::tokens::{estimate_tokens_from_chars, humanize_count};

const RULE: &str = "================================================";
pub const NON_TEXT_MARKER: &str = "[Non-text file]";

/// Sniff window for NUL bytes when deciding whether a file is text.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Decode file bytes as text, or `None` for binary / non-UTF-8 content.
pub fn decode_text(bytes: Vec<u8>) -> Option<String> {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

#[derive(Default)]
struct DirNode {
    dirs: BTreeMap<String, DirNode>,
    files: Vec<String>,
}

impl DirNode {
    fn insert(&mut self, rel_path: &str) {
        let mut parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
        let Some(file) = parts.pop() else { return };
        let mut node = self;
        for dir in parts {
            node = node.dirs.entry(dir.to_string()).or_default();
        }
        node.files.push(file.to_string());
    }

    fn render(&self, prefix: &str, out: &mut String) {
        let mut files = self.files.clone();
        files.sort();
        let total = self.dirs.len() + files.len();
        let children = self
            .dirs
            .iter()
            .map(|(name, node)| (name.as_str(), Some(node)))
            .chain(files.iter().map(|f| (f.as_str(), None)));

        for (i, (name, dir)) in children.enumerate() {
            let last = i + 1 == total;
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(name);
            match dir {
                Some(node) => {
                    out.push_str("/\n");
                    let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
                    node.render(&child_prefix, out);
                }
                None => out.push('\n'),
            }
        }
    }
}

/// Box-drawing tree of `rel_paths` under a single `root_name/` entry.
pub fn render_tree(root_name: &str, rel_paths: &[String]) -> String {
    let mut root = DirNode::default();
    for p in rel_paths {
        root.insert(p);
    }

    let mut out = String::from("Directory structure:\n");
    out.push_str("└── ");
    out.push_str(root_name.trim_end_matches('/'));
    out.push_str("/\n");
    root.render("    ", &mut out);
    out
}

/// Concatenate files as `FILE:` blocks. `None` bodies render as the non-text marker.
pub fn render_content(files: &[(String, Option<String>)]) -> String {
    let mut out = String::new();
    for (path, body) in files {
        out.push_str(RULE);
        out.push('\n');
        out.push_str("FILE: ");
        out.push_str(path);
        out.push('\n');
        out.push_str(RULE);
        out.push('\n');
        out.push_str(body.as_deref().unwrap_or(NON_TEXT_MARKER));
        out.push_str("\n\n");
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct SummaryInput<'a> {
    pub repository: &'a str,
    pub branch: Option<&'a str>,
    pub subpath: Option<&'a str>,
    pub files_analyzed: usize,
    pub content_chars: usize,
    pub chars_per_token: usize,
}

pub fn render_summary(s: &SummaryInput<'_>) -> String {
    let mut out = format!("Repository: {}\n", s.repository);
    if let Some(b) = s.branch {
        out.push_str(&format!("Branch: {b}\n"));
    }
    if let Some(p) = s.subpath {
        out.push_str(&format!("Subpath: {p}\n"));
    }
    out.push_str(&format!("Files analyzed: {}\n", s.files_analyzed));
    let est = estimate_tokens_from_chars(s.content_chars, s.chars_per_token);
    out.push_str(&format!("\nEstimated tokens: {}", humanize_count(est)));
    out
}
