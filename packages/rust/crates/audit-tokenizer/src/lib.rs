#![allow(clippy::doc_markdown)]

//! High-performance BPE token counting for the audit sidecar.
//!
//! Wraps `tiktoken-rs` behind a single process-wide cached encoder so the
//! admission hot path never pays model-load cost more than once. The encoder
//! is selected once at startup via [`set_default_model`] (or left at the
//! built-in default) and is immutable afterwards — the contract this crate
//! exists to satisfy is "deterministic, pure, thread-safe, callable from the
//! request hot path".
//!
//! ```rust
//! use audit_tokenizer::count_tokens;
//!
//! let text = "Hello, world!";
//! assert!(count_tokens(text) > 0);
//! ```

mod pruner;

pub use pruner::{shorten, Message};

use std::sync::OnceLock;
use thiserror::Error;

/// Errors for tokenization operations.
#[derive(Error, Debug)]
pub enum TokenizerError {
    /// The requested encoding name is not one this crate knows how to load.
    #[error("unknown tokenizer model: {0}")]
    UnknownModel(String),
    /// The underlying BPE model failed to initialize.
    #[error("tokenizer model initialization failed: {0}")]
    ModelInit(String),
    /// Token decoding failed (should not happen for well-formed token ids).
    #[error("token decoding failed: {0}")]
    Decoding(String),
}

/// Encoding used when no model is explicitly configured.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

static DEFAULT_MODEL: OnceLock<String> = OnceLock::new();
static ENCODER: OnceLock<tiktoken_rs::CoreBPE> = OnceLock::new();

/// Configure the process-wide default model name. Must be called, if at all,
/// before the first call to [`count_tokens`] or [`truncate`] — later calls are
/// ignored, matching the "lazily initialized once" contract for the shared
/// encoder.
pub fn set_default_model(model: impl Into<String>) {
    let _ = DEFAULT_MODEL.set(model.into());
}

fn default_model_name() -> &'static str {
    DEFAULT_MODEL.get().map(String::as_str).unwrap_or(DEFAULT_ENCODING)
}

fn load_bpe(model: &str) -> Result<tiktoken_rs::CoreBPE, TokenizerError> {
    match model {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "p50k_edit" => tiktoken_rs::p50k_edit(),
        "r50k_base" => tiktoken_rs::r50k_base(),
        other => return Err(TokenizerError::UnknownModel(other.to_string())),
    }
    .map_err(|e| TokenizerError::ModelInit(e.to_string()))
}

fn default_encoder() -> &'static tiktoken_rs::CoreBPE {
    ENCODER.get_or_init(|| {
        let model = default_model_name();
        load_bpe(model).unwrap_or_else(|e| {
            panic!("failed to initialize default tokenizer model `{model}`: {e}")
        })
    })
}

/// Count tokens in `text` using the process-wide default encoder.
///
/// Deterministic and safe to call concurrently from request handlers; the
/// encoder is initialized exactly once, on first use.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    default_encoder().encode_with_special_tokens(text).len()
}

/// Count tokens in `text` using a specific named encoding, bypassing the
/// cached default encoder. Intended for callers that need to account against
/// a different model family than the process default.
pub fn count_tokens_with_model(text: &str, model: &str) -> Result<usize, TokenizerError> {
    let bpe = load_bpe(model)?;
    Ok(bpe.encode_with_special_tokens(text).len())
}

/// Truncate `text` to at most `max_tokens` tokens under the default encoder.
#[must_use]
pub fn truncate(text: &str, max_tokens: usize) -> String {
    let bpe = default_encoder();
    let tokens = bpe.encode_with_special_tokens(text);
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    let truncated: Vec<_> = tokens.into_iter().take(max_tokens).collect();
    bpe.decode(truncated).unwrap_or_default()
}

/// Get the canonical encoding name for a model family identifier.
#[must_use]
pub fn get_encoding_name(model: &str) -> &'static str {
    match model {
        "gpt-4" | "gpt-3.5-turbo" | "cl100k_base" => "cl100k_base",
        "gpt-3" | "code-davinci-002" | "p50k_base" => "p50k_base",
        "gpt-2" | "r50k_base" => "r50k_base",
        _ => DEFAULT_ENCODING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tokens_simple() {
        let text = "Hello, world! This is a test.";
        assert!(count_tokens(text) > 0);
    }

    #[test]
    fn truncate_short_is_noop() {
        let text = "Hello";
        assert_eq!(truncate(text, 100), "Hello");
    }

    #[test]
    fn truncate_long_shrinks() {
        let text = "one two three four five six seven eight nine ten".repeat(20);
        let truncated = truncate(&text, 5);
        assert!(count_tokens(&truncated) <= 5);
    }

    #[test]
    fn count_tokens_with_model_rejects_unknown() {
        let err = count_tokens_with_model("hi", "not-a-model").unwrap_err();
        assert!(matches!(err, TokenizerError::UnknownModel(_)));
    }

    #[test]
    fn encoding_name_defaults_to_cl100k() {
        assert_eq!(get_encoding_name("something-exotic"), "cl100k_base");
    }
}
