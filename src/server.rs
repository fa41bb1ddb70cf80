use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};

use crate::config::Config;
use crate::node::{NodeInputs, NodeRegistry, RepoEaterNode};
use crate::tokens::{count_tokens, format_count, TiktokenEncoder};

/// The ingestion node and the registry that exposes it. Both hold the same node.
struct Nodes {
    registry: NodeRegistry,
    ingest: Arc<RepoEaterNode>,
}

pub struct ServerState {
    cfg: Config,
    nodes: Option<Nodes>,
    /// One encoder per resolved tokenizer, not per model alias.
    encoders: HashMap<Tokenizer, TiktokenEncoder>,
}

impl ServerState {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            nodes: None,
            encoders: HashMap::new(),
        }
    }

    /// Node construction touches the filesystem (output dir), so build on first use.
    fn nodes(&mut self) -> Result<&Nodes> {
        let nodes = match self.nodes.take() {
            Some(n) => n,
            None => {
                let ingest = Arc::new(RepoEaterNode::new(&self.cfg)?);
                Nodes {
                    registry: NodeRegistry::with_repo_eater(Arc::clone(&ingest)),
                    ingest,
                }
            }
        };
        Ok(&*self.nodes.insert(nodes))
    }

    fn registry(&mut self) -> Result<&NodeRegistry> {
        Ok(&self.nodes()?.registry)
    }

    /// Cached encoder for `model`, or `None` when tiktoken does not know it.
    fn encoder(&mut self, model: &str) -> Option<&TiktokenEncoder> {
        let tokenizer = get_tokenizer(model)?;
        Some(
            self.encoders
                .entry(tokenizer)
                .or_insert_with(|| TiktokenEncoder::for_model(model)),
        )
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "ingest_repo",
                        "description": "Fetch a git repository (URL or local path), flatten every text file into one digest, save it under the output directory and return the content with its token count.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repo_url": { "type": "string", "description": "Repository URL (https, ssh, host/owner/repo) or local directory. /tree/<branch>/<path> selects a branch and subdirectory." },
                                "include_summary": { "type": "boolean", "description": "Optional: prepend the digest summary (default false)" },
                                "include_tree": { "type": "boolean", "description": "Optional: prepend the directory tree (default false)" }
                            },
                            "required": ["repo_url"]
                        }
                    },
                    {
                        "name": "count_tokens",
                        "description": "Count tokens in a text with a tiktoken model encoding; falls back to a whitespace word count if the model is unknown.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "text": { "type": "string" },
                                "model": { "type": "string", "description": "Optional: model name (default from config, usually gpt-3.5-turbo)" }
                            },
                            "required": ["text"]
                        }
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let ok = |text: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": false }
            })
        };

        let err = |msg: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": msg }], "isError": true }
            })
        };

        match name {
            "ingest_repo" => {
                let Some(url) = args.get("repo_url").and_then(|v| v.as_str()) else {
                    return err("Missing repo_url".to_string());
                };
                let include_summary = args.get("include_summary").and_then(|v| v.as_bool()).unwrap_or(false);
                let include_tree = args.get("include_tree").and_then(|v| v.as_bool()).unwrap_or(false);

                let node = match self.nodes() {
                    Ok(n) => &n.ingest,
                    Err(e) => return err(format!("ingest_repo failed: {e:#}")),
                };
                match node.ingest_repo_detailed(url) {
                    Ok(res) => {
                        let mut out = String::new();
                        if include_summary {
                            out.push_str(&res.summary);
                            out.push_str("\n\n");
                        }
                        if include_tree {
                            out.push_str(&res.tree);
                            out.push('\n');
                        }
                        out.push_str(&format!(
                            "Saved: {}\nTokens: {}\n\n",
                            res.path.display(),
                            res.formatted_token_count()
                        ));
                        out.push_str(&res.content);
                        ok(out)
                    }
                    Err(e) => err(format!("{}{e:#}", crate::node::ERROR_PREFIX)),
                }
            }
            "count_tokens" => {
                let Some(text) = args.get("text").and_then(|v| v.as_str()) else {
                    return err("Missing text".to_string());
                };
                let model = args
                    .get("model")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| self.cfg.tokenizer.model.clone());
                let n = match self.encoder(&model) {
                    Some(enc) => count_tokens(enc, text),
                    None => count_tokens(&TiktokenEncoder::for_model(model.as_str()), text),
                };
                ok(format_count(n))
            }
            _ => err(format!("Tool not found: {name}")),
        }
    }

    fn nodes_list(&mut self, id: serde_json::Value) -> serde_json::Value {
        match self.registry() {
            Ok(reg) => {
                let nodes: Vec<serde_json::Value> = reg.definitions().iter().map(|d| d.to_json()).collect();
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "nodes": nodes,
                        "display_names": reg.display_name_mappings()
                    }
                })
            }
            Err(e) => rpc_error(id, -32603, format!("node registry unavailable: {e:#}")),
        }
    }

    fn nodes_call(&mut self, id: serde_json::Value, params: &serde_json::Value, is_changed: bool) -> serde_json::Value {
        let Some(class_type) = params.get("class_type").and_then(|v| v.as_str()) else {
            return rpc_error(id, -32602, "Missing class_type".to_string());
        };
        let inputs: NodeInputs = params
            .get("inputs")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let reg = match self.registry() {
            Ok(r) => r,
            Err(e) => return rpc_error(id, -32603, format!("node registry unavailable: {e:#}")),
        };

        let result = if is_changed {
            reg.is_changed(class_type, &inputs).map(|key| json!({ "key": key }))
        } else {
            reg.execute(class_type, &inputs).map(|outputs| json!({ "outputs": outputs }))
        };

        match result {
            Ok(v) => json!({ "jsonrpc": "2.0", "id": id, "result": v }),
            Err(e) => rpc_error(id, -32602, format!("{e:#}")),
        }
    }
}

fn rpc_error(id: serde_json::Value, code: i64, message: String) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Handle one parsed JSON-RPC message. Notifications (no `id`) return `None`.
pub fn handle_message(state: &mut ServerState, msg: &serde_json::Value) -> Option<serde_json::Value> {
    // JSON-RPC notifications have no "id" field; don't respond.
    let id = msg.get("id")?.clone();
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = msg.get("params").cloned().unwrap_or(json!({}));

    let reply = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(json!("2024-11-05")),
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "repo-eater", "version": env!("CARGO_PKG_VERSION") }
            }
        }),
        "ping" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {}
        }),
        "tools/list" => state.tool_list(id),
        "tools/call" => state.tool_call(id, &params),
        "nodes/list" => state.nodes_list(id),
        "nodes/execute" => state.nodes_call(id, &params, false),
        "nodes/isChanged" => state.nodes_call(id, &params, true),
        // Return empty lists for resources/prompts; we don't implement them.
        "resources/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "resources": [] }
        }),
        "prompts/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "prompts": [] }
        }),
        _ => rpc_error(id, -32601, format!("Method not found: {method}")),
    };
    Some(reply)
}

pub fn run_stdio_server(cfg: Config) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    let mut state = ServerState::new(cfg);

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("dropping unparsable message: {e}");
                continue;
            }
        };

        if let Some(reply) = handle_message(&mut state, &msg) {
            writeln!(stdout, "{}", reply)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
