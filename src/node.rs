//! Graph-node surface: the repository ingestion handler and the registration
//! table a host scheduler reads (declarations, execution, re-execution keys).

use anyhow::{anyhow, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::ingest::{GitIngestor, Ingestion, Ingestor};
use crate::output::{output_dir, OutputDir};
use crate::tokens::{count_tokens, format_count, TiktokenEncoder, TokenEncoder};

pub type NodeInputs = Map<String, Value>;

pub const ERROR_PREFIX: &str = "Error ingesting repository: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    #[serde(rename = "STRING")]
    String,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "STRING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub multiline: bool,
    pub default: &'static str,
}

/// What a host needs to list, wire and schedule a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDefinition {
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub function: &'static str,
    pub required: Vec<InputField>,
    pub return_types: Vec<FieldKind>,
    pub return_names: Vec<&'static str>,
}

impl NodeDefinition {
    /// `{"required": {"<name>": ["STRING", {"multiline": false, "default": "..."}]}}`
    pub fn input_types(&self) -> Value {
        let mut required = Map::new();
        for f in &self.required {
            required.insert(
                f.name.to_string(),
                json!([f.kind.as_str(), { "multiline": f.multiline, "default": f.default }]),
            );
        }
        json!({ "required": required })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "display_name": self.display_name,
            "category": self.category,
            "function": self.function,
            "input": self.input_types(),
            "output": self.return_types,
            "output_name": self.return_names,
        })
    }
}

pub trait Node: Send + Sync {
    fn definition(&self) -> NodeDefinition;

    /// Run the node; one string per declared output.
    fn execute(&self, inputs: &NodeInputs) -> Result<Vec<String>>;

    /// Cache key for the scheduler: the node re-runs when this changes.
    fn is_changed(&self, inputs: &NodeInputs) -> Result<String>;
}

/// Lets one node instance sit in a registry and be used directly elsewhere.
impl<N: Node + ?Sized> Node for Arc<N> {
    fn definition(&self) -> NodeDefinition {
        (**self).definition()
    }

    fn execute(&self, inputs: &NodeInputs) -> Result<Vec<String>> {
        (**self).execute(inputs)
    }

    fn is_changed(&self, inputs: &NodeInputs) -> Result<String> {
        (**self).is_changed(inputs)
    }
}

fn required_str<'a>(inputs: &'a NodeInputs, name: &str) -> Result<&'a str> {
    inputs
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing required input `{name}` (string)"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub content: String,
    pub token_count: usize,
    pub path: PathBuf,
    pub summary: String,
    pub tree: String,
}

impl IngestionResult {
    pub fn formatted_token_count(&self) -> String {
        format_count(self.token_count)
    }
}

/// Ingests a repository URL into a text digest, saves it and counts its tokens.
pub struct RepoEaterNode {
    ingestor: Box<dyn Ingestor>,
    encoder: Box<dyn TokenEncoder>,
    output: OutputDir,
}

impl RepoEaterNode {
    pub const CLASS_NAME: &'static str = "RepoEaterNode";
    pub const DISPLAY_NAME: &'static str = "GitHub Repo Eater";
    pub const DEFAULT_URL: &'static str = "https://github.com/username/repository";

    /// Git-backed ingestor, tiktoken encoder for the configured model, and the
    /// process-wide output directory.
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self::with_parts(
            Box::new(GitIngestor::new(cfg.clone())),
            Box::new(TiktokenEncoder::for_model(cfg.tokenizer.model.clone())),
            output_dir(cfg)?.clone(),
        ))
    }

    pub fn with_parts(
        ingestor: Box<dyn Ingestor>,
        encoder: Box<dyn TokenEncoder>,
        output: OutputDir,
    ) -> Self {
        Self {
            ingestor,
            encoder,
            output,
        }
    }

    pub fn output(&self) -> &OutputDir {
        &self.output
    }

    pub fn static_definition() -> NodeDefinition {
        NodeDefinition {
            name: Self::CLASS_NAME,
            display_name: Self::DISPLAY_NAME,
            category: "utils",
            function: "ingest_repo",
            required: vec![InputField {
                name: "repo_url",
                kind: FieldKind::String,
                multiline: false,
                default: Self::DEFAULT_URL,
            }],
            return_types: vec![FieldKind::String, FieldKind::String],
            return_names: vec!["repo_content", "token_count"],
        }
    }

    /// `(content, formatted_token_count)`, or `(error message, "0")`. Never fails.
    pub fn ingest_repo(&self, repo_url: &str) -> (String, String) {
        match self.ingest_repo_detailed(repo_url) {
            Ok(res) => {
                let count = res.formatted_token_count();
                (res.content, count)
            }
            Err(e) => {
                let msg = format!("{ERROR_PREFIX}{e:#}");
                tracing::error!("{msg}");
                (msg, "0".to_string())
            }
        }
    }

    /// Fallible core of [`Self::ingest_repo`], also exposing summary and tree.
    pub fn ingest_repo_detailed(&self, repo_url: &str) -> Result<IngestionResult> {
        let Ingestion {
            summary,
            tree,
            content,
        } = self.ingestor.ingest(repo_url)?;

        let path = self
            .output
            .write_digest(repo_url, &content, Local::now().naive_local())?;
        tracing::info!("Repository content saved to {}", path.display());

        let token_count = count_tokens(self.encoder.as_ref(), &content);

        Ok(IngestionResult {
            content,
            token_count,
            path,
            summary,
            tree,
        })
    }

    pub fn is_changed_key(repo_url: &str) -> String {
        repo_url.to_string()
    }
}

impl Node for RepoEaterNode {
    fn definition(&self) -> NodeDefinition {
        Self::static_definition()
    }

    fn execute(&self, inputs: &NodeInputs) -> Result<Vec<String>> {
        let url = required_str(inputs, "repo_url")?;
        let (content, count) = self.ingest_repo(url);
        Ok(vec![content, count])
    }

    fn is_changed(&self, inputs: &NodeInputs) -> Result<String> {
        Ok(Self::is_changed_key(required_str(inputs, "repo_url")?))
    }
}

/// Class name -> node table handed to the host.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<&'static str, Box<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every node this crate ships.
    pub fn with_defaults(cfg: &Config) -> Result<Self> {
        Ok(Self::with_repo_eater(Arc::new(RepoEaterNode::new(cfg)?)))
    }

    /// Default registry around an existing ingestion node, shared with the caller.
    pub fn with_repo_eater(node: Arc<RepoEaterNode>) -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(node));
        reg
    }

    pub fn register(&mut self, node: Box<dyn Node>) {
        let name = node.definition().name;
        self.nodes.insert(name, node);
    }

    pub fn get(&self, class_name: &str) -> Option<&dyn Node> {
        self.nodes.get(class_name).map(|n| n.as_ref())
    }

    pub fn class_names(&self) -> Vec<&'static str> {
        self.nodes.keys().copied().collect()
    }

    pub fn display_name_mappings(&self) -> BTreeMap<&'static str, &'static str> {
        self.nodes
            .values()
            .map(|n| {
                let d = n.definition();
                (d.name, d.display_name)
            })
            .collect()
    }

    pub fn definitions(&self) -> Vec<NodeDefinition> {
        self.nodes.values().map(|n| n.definition()).collect()
    }

    fn node(&self, class_name: &str) -> Result<&dyn Node> {
        self.get(class_name)
            .ok_or_else(|| anyhow!("Unknown node class `{class_name}`"))
    }

    pub fn execute(&self, class_name: &str, inputs: &NodeInputs) -> Result<Vec<String>> {
        self.node(class_name)?.execute(inputs)
    }

    pub fn is_changed(&self, class_name: &str, inputs: &NodeInputs) -> Result<String> {
        self.node(class_name)?.is_changed(inputs)
    }
}
