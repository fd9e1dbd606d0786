use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Main configuration structure for the concierge service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub vector_store: VectorStoreConfig,
    pub retrieval: RetrievalConfig,
    pub intent: IntentConfig,
    pub scheduling: SchedulingConfig,
    pub answer: AnswerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory holding `index.html`, served at `/`
    pub static_dir: String,
    pub body_limit_bytes: usize,
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used for streamed answers
    pub chat_model: String,
    /// Model used for intent classification and slot extraction
    pub utility_model: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub url: String,
    pub api_key: String,
    pub rpc_function: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Similarity score threshold for filtering search results (0.0-1.0)
    pub similarity_threshold: f32,
    pub match_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Number of trailing turns shown to the classifier
    pub history_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub enabled: bool,
    /// Replies accepted as a final "yes" to the confirmation question
    pub affirmative_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    /// Require HTML output with a restricted tag set
    pub html_output: bool,
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// Always returns a config; call `validate` to find problems.
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("CONCIERGE_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }),
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::warn!("Config file not found at {} - using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str::<Config>(contents)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(bind) = lookup("CONCIERGE_BIND") {
            self.server.bind = bind;
        } else if let Some(port) = lookup("PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                self.server.bind = format!("0.0.0.0:{port_num}");
            }
        }
        if let Some(dir) = lookup("CONCIERGE_STATIC_DIR") {
            self.server.static_dir = dir;
        }

        // Gemini overrides
        if let Some(api_key) = lookup("GEMINI_API_KEY") {
            self.gemini.api_key = api_key;
        }
        if let Some(base_url) = lookup("GEMINI_BASE_URL") {
            self.gemini.base_url = base_url;
        }
        if let Some(model) = lookup("GEMINI_CHAT_MODEL") {
            self.gemini.chat_model = model;
        }
        if let Some(model) = lookup("GEMINI_UTILITY_MODEL") {
            self.gemini.utility_model = model;
        }
        if let Some(model) = lookup("GEMINI_EMBEDDING_MODEL") {
            self.gemini.embedding_model = model;
        }

        // Vector store overrides
        if let Some(url) = lookup("SUPABASE_URL") {
            self.vector_store.url = url;
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.vector_store.api_key = key;
        }
        if let Some(function) = lookup("VECTOR_SEARCH_RPC") {
            self.vector_store.rpc_function = function;
        }

        // Retrieval overrides
        if let Some(threshold) = lookup("RETRIEVAL_SIMILARITY_THRESHOLD") {
            if let Ok(threshold_val) = threshold.parse() {
                self.retrieval.similarity_threshold = threshold_val;
            }
        }
        if let Some(count) = lookup("RETRIEVAL_MATCH_COUNT") {
            if let Ok(count_val) = count.parse() {
                self.retrieval.match_count = count_val;
            }
        }

        if let Some(window) = lookup("INTENT_HISTORY_WINDOW") {
            if let Ok(window_val) = window.parse() {
                self.intent.history_window = window_val;
            }
        }
        if let Some(flag) = lookup("ANSWER_HTML_OUTPUT") {
            if let Some(v) = parse_flag(&flag) {
                self.answer.html_output = v;
            }
        }
        if let Some(flag) = lookup("SCHEDULING_ENABLED") {
            if let Some(v) = parse_flag(&flag) {
                self.scheduling.enabled = v;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.gemini.api_key.trim().is_empty() {
            return Err("GEMINI_API_KEY environment variable must be set".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err("Retrieval similarity threshold must be between 0.0 and 1.0".into());
        }
        if self.retrieval.match_count == 0 {
            return Err("Retrieval match_count cannot be 0".into());
        }
        if self.intent.history_window == 0 {
            return Err("Intent history_window cannot be 0".into());
        }
        if self.server.bind.ends_with(":0") {
            return Err("Server port cannot be 0".into());
        }
        Ok(())
    }

    /// Non-fatal problems worth a warning at startup
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.vector_store.url.trim().is_empty() {
            warnings.push(
                "SUPABASE_URL not set - every retrieval will report a search error".to_string(),
            );
        }
        if self.vector_store.api_key.trim().is_empty() {
            warnings.push("SUPABASE_KEY not set - search requests are unauthenticated".to_string());
        }
        warnings
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gemini: GeminiConfig::default(),
            vector_store: VectorStoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            intent: IntentConfig::default(),
            scheduling: SchedulingConfig::default(),
            answer: AnswerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            static_dir: "static".to_string(),
            body_limit_bytes: 5 * 1024 * 1024,
            cors_permissive: true,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            utility_model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            rpc_function: "match_documents".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            match_count: 5,
        }
    }
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self { history_window: 6 }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            affirmative_phrases: [
                "yes",
                "yes please",
                "yep",
                "confirm",
                "confirmed",
                "correct",
                "that's right",
                "sure",
                "ok",
                "okay",
                "sí",
                "si",
                "confirmo",
                "correcto",
                "de acuerdo",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self { html_output: true }
    }
}
