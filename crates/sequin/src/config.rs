//! JSON configuration file.
//!
//! Every field has a default, so an empty object `{}` is a valid config.
//! The file is loaded once at startup and passed by reference into the
//! constructors that need it; there is no global configuration state.
//!
//! ```json
//! {
//!   "sessions_dir": "~/.local/share/sequin/sessions",
//!   "provider": { "base_url": "http://localhost:8080/v1", "model": "gpt-3.5-turbo" },
//!   "context": { "length": 4096, "offset": 256, "reserve": 0.1, "tokenizer": "tiktoken" },
//!   "chat_completions": { "max_tokens": 512 },
//!   "system_prompt": "You are a helpful assistant.",
//!   "functions": { "enabled": true, "max_chain": 3, "workdir": "." }
//! }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONTEXT_LENGTH: usize = 2048;
pub const DEFAULT_OFFSET: usize = 256;
pub const DEFAULT_RESERVE: f64 = 0.1;
pub const DEFAULT_MAX_TOKENS: usize = 512;
pub const DEFAULT_MAX_CHAIN: usize = 3;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<name>_context.json` and `<name>_transcript.json`.
    /// A leading `~` is expanded to the home directory.
    pub sessions_dir: PathBuf,
    pub provider: ProviderConfig,
    pub context: ContextConfig,
    pub chat_completions: CompletionConfig,
    pub system_prompt: String,
    pub functions: FunctionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            provider: ProviderConfig::default(),
            context: ContextConfig::default(),
            chat_completions: CompletionConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            functions: FunctionsConfig::default(),
        }
    }
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer key. Local
    /// servers usually need none; an unset variable sends no header.
    pub api_key_env: String,
    pub temperature: f32,
    pub stream: bool,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-3.5-turbo".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.7,
            stream: true,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

/// Which token oracle to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// Model-specific BPE encoding.
    #[default]
    Tiktoken,
    /// Characters-per-token estimate.
    Heuristic,
    /// Whitespace word count.
    Words,
}

/// Context window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// The backend's maximum sequence length in tokens.
    pub length: usize,
    /// Safety margin added to the count of every prospective sequence.
    pub offset: usize,
    /// Fraction of the upper bound reported as the reserved upper bound.
    pub reserve: f64,
    pub tokenizer: TokenizerKind,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_CONTEXT_LENGTH,
            offset: DEFAULT_OFFSET,
            reserve: DEFAULT_RESERVE,
            tokenizer: TokenizerKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Tokens the backend may generate per reply.
    pub max_tokens: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Function calling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    pub enabled: bool,
    /// Calls executed per round before the chain is cut off.
    pub max_chain: usize,
    /// Root directory for the file-reading built-in.
    pub workdir: PathBuf,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chain: DEFAULT_MAX_CHAIN,
            workdir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load a config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.sessions_dir = expand_home(&config.sessions_dir);
        config.functions.workdir = expand_home(&config.functions.workdir);
        debug!(
            "Loaded config from {} (model={}, sessions_dir={})",
            path.display(),
            config.provider.model,
            config.sessions_dir.display()
        );
        Ok(config)
    }

    /// Override the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.provider.model = model.into();
        self
    }

    /// Override the sessions directory.
    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = dir.into();
        self
    }
}

fn default_sessions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sequin")
        .join("sessions")
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
