//! Token estimation and chunk-budget heuristics.
//!
//! - Token counting: prefer `tiktoken-rs` for OpenAI models and known encodings; fall back to a
//!   whitespace counter for models the tokenizer does not know (typical with Ollama) or when an
//!   encoding fails to load.
//! - Encodings are loaded once per process and shared.
//! - Automatic sizing: derive a per-chunk budget from the model's context window minus a reserve
//!   for the response; callers can override via `SUMMARY_CHUNK_TOKENS`.

use anyhow::Error as TokenizerError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tiktoken_rs::{
    CoreBPE, cl100k_base, model::get_context_size, o200k_base, p50k_base, p50k_edit, r50k_base,
    tokenizer::{Tokenizer, get_tokenizer},
};

pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Tokens kept free in the context window for the model's response.
pub const RESPONSE_TOKEN_RESERVE: usize = 1000;
const MIN_AUTOMATIC_CHUNK_BUDGET: usize = 256;

/// BPE encodings shipped with `tiktoken-rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BpeEncoding {
    /// `o200k_base` (GPT-4o family).
    O200k,
    /// `cl100k_base` (GPT-3.5 / GPT-4).
    Cl100k,
    /// `p50k_base` (Codex, text-davinci-002/003).
    P50k,
    /// `p50k_edit`.
    P50kEdit,
    /// `r50k_base` / `gpt2`.
    R50k,
}

impl BpeEncoding {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "o200k_base" => Some(Self::O200k),
            "cl100k_base" => Some(Self::Cl100k),
            "p50k_base" => Some(Self::P50k),
            "p50k_edit" => Some(Self::P50kEdit),
            "r50k_base" | "gpt2" => Some(Self::R50k),
            _ => None,
        }
    }

    fn load(self) -> Result<CoreBPE, TokenizerError> {
        match self {
            Self::O200k => o200k_base(),
            Self::Cl100k => cl100k_base(),
            Self::P50k => p50k_base(),
            Self::P50kEdit => p50k_edit(),
            Self::R50k => r50k_base(),
        }
    }
}

/// How text is measured for a given model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "encoding")]
pub enum ModelFamily {
    /// Byte-pair encoding via `tiktoken-rs`.
    Bpe(BpeEncoding),
    /// Whitespace-separated words.
    Words,
}

impl ModelFamily {
    /// Resolve the family for a model name or a bare encoding name.
    pub fn for_model(model: &str) -> Self {
        let normalized = model.trim();
        if let Some(encoding) = BpeEncoding::from_name(normalized) {
            return Self::Bpe(encoding);
        }
        match get_tokenizer(normalized) {
            Some(Tokenizer::O200kBase) => Self::Bpe(BpeEncoding::O200k),
            Some(Tokenizer::Cl100kBase) => Self::Bpe(BpeEncoding::Cl100k),
            Some(Tokenizer::P50kBase) => Self::Bpe(BpeEncoding::P50k),
            Some(Tokenizer::P50kEdit) => Self::Bpe(BpeEncoding::P50kEdit),
            Some(Tokenizer::R50kBase) | Some(Tokenizer::Gpt2) => Self::Bpe(BpeEncoding::R50k),
            _ => {
                tracing::trace!(model, "Model unknown to tiktoken; counting words");
                Self::Words
            }
        }
    }
}

/// Maps text to an approximate token count for one model family.
///
/// The same estimator is used for chunk sizing and for the statistics reported to callers, so
/// budgets and reported counts always agree. Cloning is cheap.
#[derive(Clone)]
pub struct TokenEstimator {
    family: ModelFamily,
    counter: TokenCounter,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("family", &self.family)
            .finish()
    }
}

impl TokenEstimator {
    /// Build the estimator for `model`, falling back to word counting when its encoding fails to
    /// load.
    pub fn for_model(model: &str) -> Self {
        Self::for_family(ModelFamily::for_model(model))
    }

    /// Build the estimator for an explicit family.
    pub fn for_family(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Words => Self::words(),
            ModelFamily::Bpe(encoding) => match shared_encoding(encoding) {
                Ok(bpe) => Self {
                    family,
                    counter: Arc::new(move |segment: &str| bpe.encode_ordinary(segment).len()),
                },
                Err(error) => {
                    tracing::warn!(
                        encoding = ?encoding,
                        error = %error,
                        "Tokenizer unavailable; falling back to whitespace counter"
                    );
                    Self::words()
                }
            },
        }
    }

    /// Whitespace word counter.
    pub fn words() -> Self {
        Self {
            family: ModelFamily::Words,
            counter: Arc::new(count_words),
        }
    }

    /// Family this estimator measures with.
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Estimated token count of `text`.
    pub fn estimate(&self, text: &str) -> usize {
        self.counter.as_ref()(text)
    }

    pub(crate) fn counter(&self) -> TokenCounter {
        self.counter.clone()
    }
}

/// Estimate `text` under `family` without keeping an estimator around.
pub fn estimate(text: &str, family: ModelFamily) -> usize {
    TokenEstimator::for_family(family).estimate(text)
}

fn count_words(segment: &str) -> usize {
    let tokens = segment.split_whitespace().count();
    if tokens == 0 && !segment.is_empty() {
        1
    } else {
        tokens
    }
}

fn shared_encoding(encoding: BpeEncoding) -> Result<Arc<CoreBPE>, TokenizerError> {
    static ENCODINGS: OnceLock<Mutex<HashMap<BpeEncoding, Arc<CoreBPE>>>> = OnceLock::new();
    let cache = ENCODINGS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| anyhow::anyhow!("tokenizer cache poisoned"))?;
    if let Some(bpe) = guard.get(&encoding) {
        return Ok(bpe.clone());
    }
    let bpe = Arc::new(encoding.load()?);
    tracing::debug!(encoding = ?encoding, "Loaded BPE encoding");
    guard.insert(encoding, bpe.clone());
    Ok(bpe)
}

/// Context window for `model`; 4096 for models `tiktoken-rs` does not know.
pub fn context_window(model: &str) -> usize {
    get_context_size(model.trim())
}

/// Determine the per-chunk token budget for a request.
///
/// Precedence:
/// 1) Explicit override (`SUMMARY_CHUNK_TOKENS`) wins and is clamped at `>= 1`.
/// 2) Otherwise the model's context window minus [`RESPONSE_TOKEN_RESERVE`], floored at 256.
pub fn determine_chunk_budget(override_tokens: Option<usize>, model: &str) -> usize {
    if let Some(explicit) = override_tokens {
        return explicit.max(1);
    }
    context_window(model)
        .saturating_sub(RESPONSE_TOKEN_RESERVE)
        .max(MIN_AUTOMATIC_CHUNK_BUDGET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counter_treats_whitespace_only_as_one_token() {
        let estimator = TokenEstimator::words();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("   "), 1);
        assert_eq!(estimator.estimate("one two\nthree"), 3);
    }

    #[test]
    fn unknown_models_count_words() {
        assert_eq!(ModelFamily::for_model("llama3:8b"), ModelFamily::Words);
        assert_eq!(ModelFamily::for_model("stub-model"), ModelFamily::Words);
    }

    #[test]
    fn openai_models_resolve_to_bpe() {
        assert_eq!(
            ModelFamily::for_model("gpt-3.5-turbo"),
            ModelFamily::Bpe(BpeEncoding::Cl100k)
        );
        assert_eq!(
            ModelFamily::for_model("gpt-4o"),
            ModelFamily::Bpe(BpeEncoding::O200k)
        );
        assert_eq!(
            ModelFamily::for_model("cl100k_base"),
            ModelFamily::Bpe(BpeEncoding::Cl100k)
        );
    }

    #[test]
    fn bpe_estimates_grow_with_each_word() {
        let estimator = TokenEstimator::for_model("gpt-4");
        let text = "Quarterly numbers beat expectations across every region we operate in.";
        let mut previous = 0;
        for (end, _) in text.match_indices(' ') {
            let count = estimator.estimate(&text[..end]);
            assert!(count >= previous, "estimate shrank at byte {end}");
            previous = count;
        }
        assert!(estimator.estimate(text) >= previous);
    }

    #[test]
    fn chunk_budget_prefers_override() {
        assert_eq!(determine_chunk_budget(Some(42), "gpt-4"), 42);
        assert_eq!(determine_chunk_budget(Some(0), "gpt-4"), 1);
    }

    #[test]
    fn chunk_budget_reserves_response_tokens() {
        assert_eq!(determine_chunk_budget(None, "custom-model"), 3096);
        assert_eq!(
            determine_chunk_budget(None, "gpt-4"),
            context_window("gpt-4") - RESPONSE_TOKEN_RESERVE
        );
    }
}
