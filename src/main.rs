use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use repo_eater::config::load_config;
use repo_eater::node::{NodeRegistry, RepoEaterNode};
use repo_eater::server::run_stdio_server;
use repo_eater::tokens::{count_tokens, format_count, TiktokenEncoder};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "repo-eater")]
#[command(version)]
#[command(about = "Flatten a git repository into one LLM-ready text file and count its tokens")]
struct Cli {
    /// Repository URL (https, ssh, host/owner/repo) or local directory
    #[arg(value_name = "REPO_URL")]
    repo_url: Option<String>,

    /// Host output root; the digest goes to {DIR}/repo_eater/
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Tokenizer model name
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Print the digest summary to stderr
    #[arg(long)]
    summary: bool,

    /// Print the directory tree to stderr
    #[arg(long)]
    tree: bool,

    /// Print the full content to stdout
    #[arg(long)]
    print: bool,

    /// Print a JSON result (path, token count, summary, tree) to stdout
    #[arg(long, conflicts_with = "print")]
    json: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start MCP stdio server
    Mcp,
    /// Print the node registration table as JSON
    Nodes,
    /// Count tokens in a file
    Count {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let mut cfg = load_config(&cwd).with_env_overrides();
    if let Some(dir) = cli.output_dir.clone() {
        cfg.output_dir = Some(dir);
    }
    if let Some(model) = cli.model.clone() {
        cfg.tokenizer.model = model;
    }

    match cli.cmd {
        Some(Command::Mcp) => return run_stdio_server(cfg),
        Some(Command::Nodes) => {
            let reg = NodeRegistry::with_defaults(&cfg)?;
            let nodes: Vec<_> = reg.definitions().iter().map(|d| d.to_json()).collect();
            let out = json!({
                "nodes": nodes,
                "display_names": reg.display_name_mappings(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }
        Some(Command::Count { file }) => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let enc = TiktokenEncoder::for_model(cfg.tokenizer.model.clone());
            println!("{}", format_count(count_tokens(&enc, &text)));
            return Ok(());
        }
        None => {}
    }

    let url = cli
        .repo_url
        .context("Missing REPO_URL (or use a subcommand: mcp, nodes, count)")?;

    let node = RepoEaterNode::new(&cfg)?;
    let pb = spinner(&format!("ingesting {url}..."));
    let res = node.ingest_repo_detailed(&url);
    pb.finish_and_clear();

    let res = match res {
        Ok(r) => r,
        Err(e) => {
            // Same text a host would see in the content output.
            eprintln!("{}{e:#}", repo_eater::node::ERROR_PREFIX);
            std::process::exit(1);
        }
    };

    if cli.summary {
        eprintln!("{}\n", res.summary);
    }
    if cli.tree {
        eprintln!("{}", res.tree);
    }

    if cli.json {
        let out = json!({
            "path": res.path,
            "tokenCount": res.token_count,
            "tokenCountFormatted": res.formatted_token_count(),
            "summary": res.summary,
            "tree": res.tree,
            "totalChars": res.content.chars().count(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if cli.print {
        print!("{}", res.content);
    } else {
        eprintln!(
            "Wrote {} ({} tokens)",
            res.path.display(),
            res.formatted_token_count()
        );
    }

    Ok(())
}
