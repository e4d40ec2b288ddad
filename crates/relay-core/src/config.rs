use std::collections::BTreeSet;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_CONFIG_PATH: &str = "relay.toml";
/// Discord returns at most 100 messages per history page.
pub const MAX_HISTORY_LIMIT: usize = 100;

pub const DISCORD_TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";
pub const COMPLETION_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const PORT_ENV: &str = "PORT";

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub character: CharacterConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
}

/// Liveness endpoint for the hosting platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot login token. Usually supplied through `DISCORD_BOT_TOKEN`.
    #[serde(default)]
    pub bot_token: String,
}

/// OpenAI-compatible chat completion endpoint (OpenRouter by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Usually supplied through `OPENROUTER_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Base URL without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound for a single completion request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `X-Title` so OpenRouter can attribute usage.
    #[serde(default)]
    pub app_name: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            app_name: None,
        }
    }
}

/// When to join a conversation without being mentioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Lower-cased substrings that make a message eligible for a reply.
    /// Empty disables keyword triggers entirely (mentions still work).
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Substrings that mark a message as a question.
    #[serde(default = "default_question_markers")]
    pub question_markers: Vec<String>,
    /// Reply probability for keyword + question.
    #[serde(default = "default_question_probability")]
    pub question_probability: f64,
    /// Reply probability for keyword only.
    #[serde(default = "default_keyword_probability")]
    pub keyword_probability: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            keywords: BTreeSet::new(),
            question_markers: default_question_markers(),
            question_probability: default_question_probability(),
            keyword_probability: default_keyword_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How many recent channel messages are sent as conversation context.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// JSON file with `{ "system_prompt": "..." }`, re-read for every reply.
    #[serde(default = "default_character_path")]
    pub path: String,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            path: default_character_path(),
        }
    }
}

/// Fixed user-facing texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Published immediately, then edited in place with the answer.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Replaces the placeholder when a reply cannot be produced.
    #[serde(default = "default_apology")]
    pub apology: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            apology: default_apology(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api".to_string()
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "openai/gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_question_markers() -> Vec<String> {
    [
        "?", "？", "ですか", "ますか", "でしょうか", "教えて", "なに", "何", "誰", "だれ", "どう",
        "いつ", "どこ", "what", "who", "how", "when", "where", "tell me",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_question_probability() -> f64 {
    0.9
}
fn default_keyword_probability() -> f64 {
    0.7
}
fn default_max_history() -> usize {
    50
}
fn default_character_path() -> String {
    "character.json".to_string()
}
fn default_placeholder() -> String {
    "考え中...".to_string()
}
fn default_apology() -> String {
    "エラーが発生しました。もう一度試してください。".to_string()
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides, then
    /// pick up the well-known secret and port variables and validate.
    ///
    /// Nested keys use a double underscore: `RELAY_TRIGGER__KEYWORD_PROBABILITY=0.5`.
    /// The file is optional; a missing file leaves every field at its default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let mut config: RelayConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults. No env lookup, no validation.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let mut config: RelayConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Overlay the hosting-platform variables: both secrets and `PORT`.
    ///
    /// Non-empty environment values win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(DISCORD_TOKEN_ENV) {
            self.discord.bot_token = token;
        }
        if let Some(key) = non_empty(COMPLETION_KEY_ENV) {
            self.completion.api_key = key;
        }
        if let Some(port) = non_empty(PORT_ENV) {
            match port.trim().parse::<u16>() {
                Ok(p) => self.health.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PORT"),
            }
        }
    }

    /// Lower-case keywords and question markers so matching can run on
    /// lower-cased message text. Blank entries are dropped.
    pub fn normalize(&mut self) {
        self.trigger.keywords = self
            .trigger
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self.trigger.question_markers = self
            .trigger
            .question_markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self.completion.base_url = self.completion.base_url.trim_end_matches('/').to_string();
    }

    /// Reject configurations that would fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(RelayError::MissingSecret {
                env: DISCORD_TOKEN_ENV,
                key: "discord.bot_token",
            });
        }
        if self.completion.api_key.trim().is_empty() {
            return Err(RelayError::MissingSecret {
                env: COMPLETION_KEY_ENV,
                key: "completion.api_key",
            });
        }
        self.validate_settings()
    }

    /// Everything `validate` checks except the secrets.
    pub fn validate_settings(&self) -> Result<()> {
        check_probability(
            "trigger.question_probability",
            self.trigger.question_probability,
        )?;
        check_probability(
            "trigger.keyword_probability",
            self.trigger.keyword_probability,
        )?;

        let t = self.completion.temperature;
        if !(0.0..=2.0).contains(&t) {
            return Err(RelayError::InvalidValue {
                field: "completion.temperature",
                reason: format!("{t} is outside 0.0..=2.0"),
            });
        }
        if self.completion.max_tokens == 0 {
            return Err(RelayError::InvalidValue {
                field: "completion.max_tokens",
                reason: "must be greater than zero".into(),
            });
        }
        if self.completion.timeout_secs == 0 {
            return Err(RelayError::InvalidValue {
                field: "completion.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if !self.completion.base_url.starts_with("http://")
            && !self.completion.base_url.starts_with("https://")
        {
            return Err(RelayError::InvalidValue {
                field: "completion.base_url",
                reason: format!("{} is not an http(s) URL", self.completion.base_url),
            });
        }

        let h = self.context.max_history;
        if h == 0 || h > MAX_HISTORY_LIMIT {
            return Err(RelayError::InvalidValue {
                field: "context.max_history",
                reason: format!("{h} is outside 1..={MAX_HISTORY_LIMIT}"),
            });
        }

        if self.messages.placeholder.trim().is_empty() {
            return Err(RelayError::InvalidValue {
                field: "messages.placeholder",
                reason: "must not be empty".into(),
            });
        }
        if self.messages.apology.trim().is_empty() {
            return Err(RelayError::InvalidValue {
                field: "messages.apology",
                reason: "must not be empty".into(),
            });
        }
        // The placeholder is filtered out of history by exact match, so the
        // apology must stay distinguishable from it.
        if self.messages.placeholder == self.messages.apology {
            return Err(RelayError::InvalidValue {
                field: "messages.apology",
                reason: "must differ from messages.placeholder".into(),
            });
        }

        Ok(())
    }
}

fn check_probability(field: &'static str, p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(RelayError::InvalidValue {
            field,
            reason: format!("{p} is outside 0.0..=1.0"),
        })
    }
}
