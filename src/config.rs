use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".repo_eater.json";
pub const ENV_OUTPUT_DIR: &str = "REPO_EATER_OUTPUT_DIR";
pub const ENV_MODEL: &str = "REPO_EATER_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Model name handed to the tokenizer (e.g. "gpt-3.5-turbo", "gpt-4o").
    pub model: String,
    /// Heuristic used for the "Estimated tokens" line of the digest summary.
    pub chars_per_token: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            chars_per_token: 4,
        }
    }
}

/// Controls repository scanning behavior (what to skip).
///
/// Note: `.gitignore` is always respected by the scanner; these are additional
/// hard skips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (e.g. "generated", "tmp").
    ///
    /// These are compared against path components, not full paths.
    pub exclude_dir_names: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            // 512 KB default: enough for any real source file, blocks log/generated bloat.
            max_file_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// `git clone --depth`; 0 means a full clone.
    pub depth: u32,
    pub git_binary: String,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            depth: 1,
            git_binary: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host output root. Digests go to `{output_dir}/repo_eater/`.
    /// When unset, `./output` is used.
    pub output_dir: Option<PathBuf>,
    pub tokenizer: TokenizerConfig,
    pub scan: ScanConfig,
    pub clone: CloneConfig,
}

impl Config {
    /// Overlay `REPO_EATER_*` environment variables onto a loaded config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Ok(model) = std::env::var(ENV_MODEL) {
            let model = model.trim();
            if !model.is_empty() {
                self.tokenizer.model = model.to_string();
            }
        }
        self
    }
}

pub fn load_config(dir: &Path) -> Config {
    let primary = dir.join(CONFIG_FILE_NAME);

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    match serde_json::from_str::<Config>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("ignoring invalid {}: {e}", primary.display());
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.tokenizer.model, "gpt-3.5-turbo");
        assert_eq!(cfg.clone.depth, 1);
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{"tokenizer": {"model": "gpt-4o"}, "scan": {"exclude_dir_names": ["vendor"]}}"#,
        )
        .unwrap();

        let cfg = load_config(tmp.path());
        assert_eq!(cfg.tokenizer.model, "gpt-4o");
        assert_eq!(cfg.tokenizer.chars_per_token, 4);
        assert_eq!(cfg.scan.exclude_dir_names, vec!["vendor".to_string()]);
        assert_eq!(cfg.scan.max_file_bytes, 512 * 1024);
    }

    #[test]
    fn invalid_json_falls_back() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "{ not json").unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.tokenizer.model, "gpt-3.5-turbo");
    }
}
