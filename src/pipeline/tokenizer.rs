//! Token counting under the configured model vocabulary.
//!
//! Chunk budgets are only meaningful when counted with the same subword
//! vocabulary the generation model uses — a whitespace estimate can be off
//! by 2–3× on technical text. The adapter loads the model's real
//! `tokenizer.json` through the Hugging Face hub cache (download on first
//! use, local cache afterwards) and wraps it behind the narrow
//! [`TokenCount`] capability so the chunker never sees the heavyweight
//! tokenizer type.

use crate::error::PipelineError;
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;
use tracing::info;

/// The one operation the chunker needs: deterministic, side-effect-free
/// token counting.
///
/// Tests substitute cheap counters (word counts, fixed values) for the real
/// vocabulary.
pub trait TokenCount: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// A subword tokenizer bound to one model id at construction.
pub struct TokenCounter {
    tokenizer: Tokenizer,
    model: String,
}

impl TokenCounter {
    /// Resolve `tokenizer.json` for `model` via the hub and load it.
    ///
    /// This performs blocking I/O (and a network download on a cold cache);
    /// call it from `spawn_blocking` in async contexts. Failure is fatal to
    /// the run — without the vocabulary no budget can be checked.
    pub fn from_pretrained(model: &str) -> Result<Self, PipelineError> {
        let api = Api::new().map_err(|e| PipelineError::TokenizerInit {
            model: model.to_string(),
            detail: e.to_string(),
        })?;
        let path = api
            .model(model.to_string())
            .get("tokenizer.json")
            .map_err(|e| PipelineError::TokenizerInit {
                model: model.to_string(),
                detail: e.to_string(),
            })?;
        let tokenizer = Tokenizer::from_file(&path).map_err(|e| PipelineError::TokenizerInit {
            model: model.to_string(),
            detail: e.to_string(),
        })?;

        info!(model, "tokenizer loaded");
        Ok(Self {
            tokenizer,
            model: model.to_string(),
        })
    }

    /// The model id this counter was constructed for.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCount for TokenCounter {
    fn count(&self, text: &str) -> usize {
        // Encoding failures only occur on malformed tokenizer state, not on
        // input text; an empty count keeps the chunker conservative.
        self.tokenizer
            .encode(text, false)
            .map(|encoding| encoding.len())
            .unwrap_or(0)
    }
}
