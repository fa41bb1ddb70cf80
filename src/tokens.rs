//! Token counting.
//!
//! Exact counts come from a [`TokenEncoder`] (tiktoken BPE by default). When the
//! encoder cannot be built or fails, callers fall back to a whitespace word count,
//! which is a rough lower bound but never aborts the surrounding operation.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

pub trait TokenEncoder: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;
}

static BPE_TABLES: OnceLock<Mutex<HashMap<Tokenizer, Arc<CoreBPE>>>> = OnceLock::new();

/// BPE tables for `tokenizer`, loaded at most once per process.
///
/// Model aliases resolve to a handful of tokenizers, so the table stays small
/// no matter how many model names callers send.
pub fn shared_bpe(tokenizer: Tokenizer) -> Result<Arc<CoreBPE>> {
    let tables = BPE_TABLES.get_or_init(Default::default);
    let mut tables = tables
        .lock()
        .map_err(|_| anyhow!("tokenizer table lock poisoned"))?;
    if let Some(bpe) = tables.get(&tokenizer) {
        return Ok(Arc::clone(bpe));
    }
    let bpe = Arc::new(tiktoken_rs::get_bpe_from_tokenizer(tokenizer)?);
    tables.insert(tokenizer, Arc::clone(&bpe));
    tracing::debug!("loaded {tokenizer:?} BPE tables");
    Ok(bpe)
}

/// tiktoken encoder for a model name. The model is resolved to its tokenizer up
/// front; the shared BPE tables are fetched on first use.
pub struct TiktokenEncoder {
    model: String,
    tokenizer: Option<Tokenizer>,
    bpe: OnceLock<Arc<CoreBPE>>,
}

impl TiktokenEncoder {
    pub fn for_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            tokenizer: get_tokenizer(&model),
            model,
            bpe: OnceLock::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `None` when tiktoken does not know the model.
    pub fn tokenizer(&self) -> Option<Tokenizer> {
        self.tokenizer
    }

    fn bpe(&self) -> Result<&CoreBPE> {
        if let Some(bpe) = self.bpe.get() {
            return Ok(&**bpe);
        }
        let tokenizer = self
            .tokenizer
            .ok_or_else(|| anyhow!("no tokenizer for model `{}`", self.model))?;
        let bpe = shared_bpe(tokenizer)?;
        Ok(&**self.bpe.get_or_init(|| bpe))
    }
}

impl Default for TiktokenEncoder {
    fn default() -> Self {
        Self::for_model(DEFAULT_MODEL)
    }
}

impl TokenEncoder for TiktokenEncoder {
    fn count(&self, text: &str) -> Result<usize> {
        // Special-token markers such as `<|endoftext|>` are counted as plain text.
        Ok(self.bpe()?.encode_ordinary(text).len())
    }
}

/// Count tokens with `encoder`, falling back to whitespace-separated words.
pub fn count_tokens(encoder: &dyn TokenEncoder, text: &str) -> usize {
    match encoder.count(text) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Error counting tokens: {e:#}; using word count");
            word_count(text)
        }
    }
}

/// Whitespace-separated words. The ASCII separators `\x1c`..=`\x1f` split words
/// too, which `char::is_whitespace` alone does not do.
pub fn word_count(text: &str) -> usize {
    text.split(|c: char| c.is_whitespace() || ('\x1c'..='\x1f').contains(&c))
        .filter(|w| !w.is_empty())
        .count()
}

/// `1234567` -> `"1,234,567"`.
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn estimate_tokens_from_chars(total_chars: usize, chars_per_token: usize) -> usize {
    if chars_per_token == 0 {
        return total_chars;
    }
    total_chars.div_ceil(chars_per_token)
}

/// Compact form for summaries: `950`, `12.3k`, `4.5M`.
///
/// The unit is picked after rounding to one decimal, so `999_960` reads `1.0M`.
pub fn humanize_count(n: usize) -> String {
    let thousands = (n as f64 / 100.0).round() / 10.0;
    if thousands >= 1_000.0 {
        format!("{:.1}M", (n as f64 / 100_000.0).round() / 10.0)
    } else if n >= 1_000 {
        format!("{thousands:.1}k")
    } else {
        n.to_string()
    }
}
