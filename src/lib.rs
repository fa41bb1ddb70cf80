//! Repository ingestion: turn a git repository into one text digest, save it,
//! and report its token count. Usable as a library, a graph node
//! ([`node::RepoEaterNode`]), a CLI, or an MCP stdio server.

pub mod config;
pub mod digest;
pub mod ingest;
pub mod node;
pub mod output;
pub mod scanner;
pub mod server;
pub mod source;
pub mod tokens;

pub use ingest::{GitIngestor, Ingestion, Ingestor};
pub use node::{IngestionResult, Node, NodeRegistry, RepoEaterNode};
pub use tokens::{count_tokens, format_count, TiktokenEncoder, TokenEncoder};
