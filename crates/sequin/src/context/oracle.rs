//! Token counting.
//!
//! A [`TokenOracle`] answers one question: how many tokens does this text,
//! message, or sequence cost for the configured backend? Counting is pure
//! and deterministic for a fixed oracle, which is what the context window's
//! eviction arithmetic relies on.
//!
//! A message is counted as a single string built from its populated fields,
//! each rendered as ` <key> <value>` in the order role, content,
//! function_call (as JSON), name, then trimmed. A user message `"hi"` is
//! therefore counted as `"role user content hi"`.

use crate::Message;
use crate::config::TokenizerKind;
use std::sync::{Arc, OnceLock};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Default characters per token for the heuristic oracle.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Counts tokens for a particular backend.
pub trait TokenOracle: Send + Sync {
    /// Tokens in a piece of raw text.
    fn count_text(&self, text: &str) -> usize;

    /// Tokens in one message, counted over its flattened text form.
    fn count_message(&self, message: &Message) -> usize {
        self.count_text(&message_text(message))
    }

    /// Sum of [`count_message`](Self::count_message) over a sequence.
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Flatten a message into the text that is counted.
pub fn message_text(message: &Message) -> String {
    let mut text = format!(" role {}", message.role());
    if let Some(content) = message.content() {
        text.push_str(" content ");
        text.push_str(content);
    }
    if let Some(call) = message.call() {
        let json = serde_json::json!({"name": call.name, "arguments": call.arguments});
        text.push_str(" function_call ");
        text.push_str(&json.to_string());
    }
    if let Some(name) = message.name() {
        text.push_str(" name ");
        text.push_str(name);
    }
    text.trim().to_string()
}

// ── Tiktoken ───────────────────────────────────────────────────────

/// Fallback encoding shared by every oracle whose model is unknown.
fn cl100k() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load cl100k_base encoding: {e}");
            None
        }
    })
    .as_ref()
}

enum Encoding {
    Model(CoreBPE),
    Fallback(&'static CoreBPE),
}

/// BPE token counts via `tiktoken-rs`.
pub struct TiktokenOracle {
    encoding: Encoding,
}

impl TiktokenOracle {
    /// Encoding for `model`, falling back to `cl100k_base` for models
    /// tiktoken does not know. `None` only if no encoding can be loaded.
    pub fn for_model(model: &str) -> Option<Self> {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(Self {
                encoding: Encoding::Model(bpe),
            }),
            Err(_) => {
                debug!("No tiktoken encoding for model {model:?}, using cl100k_base");
                cl100k().map(|bpe| Self {
                    encoding: Encoding::Fallback(bpe),
                })
            }
        }
    }

    fn bpe(&self) -> &CoreBPE {
        match &self.encoding {
            Encoding::Model(bpe) => bpe,
            Encoding::Fallback(bpe) => bpe,
        }
    }
}

impl TokenOracle for TiktokenOracle {
    fn count_text(&self, text: &str) -> usize {
        self.bpe().encode_with_special_tokens(text).len()
    }
}

// ── Estimates ──────────────────────────────────────────────────────

/// Character-count estimate: `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicOracle {
    chars_per_token: f64,
}

impl HeuristicOracle {
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenOracle for HeuristicOracle {
    fn count_text(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordOracle;

impl TokenOracle for WordOracle {
    fn count_text(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

impl TokenizerKind {
    /// Build the oracle this kind names. A tiktoken oracle that cannot load
    /// any encoding degrades to the heuristic.
    pub fn build(self, model: &str) -> Arc<dyn TokenOracle> {
        match self {
            TokenizerKind::Tiktoken => match TiktokenOracle::for_model(model) {
                Some(oracle) => Arc::new(oracle),
                None => {
                    warn!("No tiktoken encoding available, estimating tokens from characters");
                    Arc::new(HeuristicOracle::default())
                }
            },
            TokenizerKind::Heuristic => Arc::new(HeuristicOracle::default()),
            TokenizerKind::Words => Arc::new(WordOracle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_includes_populated_fields_in_order() {
        let msg = Message::function_result("get_current_weather", "sunny");
        assert_eq!(
            message_text(&msg),
            "role function content sunny name get_current_weather"
        );
    }

    #[test]
    fn message_text_serializes_call() {
        let msg = Message::function_call("f", "{}");
        let text = message_text(&msg);
        assert!(text.starts_with("role assistant function_call "));
        assert!(text.contains(r#""name":"f""#));
        assert!(!text.contains("content"));
    }

    #[test]
    fn word_oracle_counts_message_overhead() {
        let oracle = WordOracle;
        assert_eq!(oracle.count_message(&Message::user("one two three")), 6);
        assert_eq!(oracle.count_text("  spaced   out  "), 2);
    }

    #[test]
    fn count_messages_sums() {
        let oracle = WordOracle;
        let msgs = vec![Message::system("a"), Message::user("b c")];
        assert_eq!(oracle.count_messages(&msgs), 4 + 5);
        assert_eq!(oracle.count_messages(&[]), 0);
    }

    #[test]
    fn heuristic_rounds_up() {
        let oracle = HeuristicOracle::new(4.0);
        assert_eq!(oracle.count_text(""), 0);
        assert_eq!(oracle.count_text("abcd"), 1);
        assert_eq!(oracle.count_text("abcde"), 2);
    }

    #[test]
    fn heuristic_rejects_bad_ratio() {
        let oracle = HeuristicOracle::new(0.0);
        assert_eq!(oracle.count_text("abcdefg"), 2);
    }

    #[test]
    fn tiktoken_known_and_unknown_models_count() {
        let known = TiktokenOracle::for_model("gpt-3.5-turbo").unwrap();
        let unknown = TiktokenOracle::for_model("my-local-llama").unwrap();
        let text = "Hello, world!";
        assert!(known.count_text(text) > 0);
        // gpt-3.5-turbo is itself a cl100k model.
        assert_eq!(known.count_text(text), unknown.count_text(text));
    }

    #[test]
    fn tiktoken_is_deterministic() {
        let oracle = TiktokenOracle::for_model("gpt-4").unwrap();
        let msg = Message::user("The quick brown fox jumps over the lazy dog.");
        assert_eq!(oracle.count_message(&msg), oracle.count_message(&msg));
    }

    #[test]
    fn kind_builds_matching_oracle() {
        let words = TokenizerKind::Words.build("ignored");
        assert_eq!(words.count_text("a b c"), 3);
        let heuristic = TokenizerKind::Heuristic.build("ignored");
        assert_eq!(heuristic.count_text("abcdefg"), 2);
    }
}
