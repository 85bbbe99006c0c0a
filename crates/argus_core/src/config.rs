use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArgusConfig {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub ai: AiConfig,
    pub data: DataConfig,
    /// When set, safe-call wrappers re-throw instead of swallowing.
    pub debug_errors: bool,
}

impl ArgusConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. Env var overrides are applied after loading.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ArgusConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults with
    /// env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(n) = v.parse() {
                self.server.port = n;
            }
        }
        if let Ok(v) = std::env::var("HOT_WINDOW_DAYS") {
            if let Ok(n) = v.parse() {
                self.ingest.hot_window_days = n;
            }
        }
        if let Ok(v) = std::env::var("PROCESS_OWN_MESSAGES") {
            self.ingest.process_own_messages = parse_bool(&v, self.ingest.process_own_messages);
        }
        if let Ok(v) = std::env::var("SKIP_GROUP_MESSAGES") {
            self.ingest.skip_group_messages = parse_bool(&v, self.ingest.skip_group_messages);
        }
        if let Ok(v) = std::env::var("AI_TIER_MODE") {
            if let Some(mode) = TierMode::parse_str(&v) {
                self.ai.tier_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("AI_COOLDOWN_BASE_SEC") {
            if let Ok(n) = v.parse() {
                self.ai.cooldown_base_secs = n;
            }
        }
        if let Ok(v) = std::env::var("AI_CACHE_TTL_SEC") {
            if let Ok(n) = v.parse() {
                self.ai.cache_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("AI_CACHE_MAX_SIZE") {
            if let Ok(n) = v.parse() {
                self.ai.cache_max_size = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.ai.base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.ai.model = v;
        }
        if let Ok(v) = std::env::var("LLM_EMBED_MODEL") {
            self.ai.embed_model = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.ai.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("EMBED_DIM") {
            if let Ok(n) = v.parse() {
                self.ai.embed_dim = n;
            }
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.data.dir = v;
        }
        if let Ok(v) = std::env::var("BACKUP_RETENTION_DAYS") {
            if let Ok(n) = v.parse() {
                self.data.backup_retention_days = n;
            }
        }
        if let Ok(v) = std::env::var("DEBUG_ERRORS") {
            self.debug_errors = parse_bool(&v, self.debug_errors);
        }
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v.to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => default,
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Process outbound (own-sent) messages as ingestion candidates.
    pub process_own_messages: bool,
    /// Drop messages whose chat id is a group.
    pub skip_group_messages: bool,
    /// Created-at recency filter on search, in days.
    pub hot_window_days: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            process_own_messages: true,
            skip_group_messages: false,
            hot_window_days: 90,
        }
    }
}

/// Which implementation of an AI-backed operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierMode {
    #[default]
    Auto,
    ForceT1,
    ForceT2,
    ForceT3,
}

impl TierMode {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "force-t1" => Some(Self::ForceT1),
            "force-t2" => Some(Self::ForceT2),
            "force-t3" => Some(Self::ForceT3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ForceT1 => "force-t1",
            Self::ForceT2 => "force-t2",
            Self::ForceT3 => "force-t3",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub tier_mode: TierMode,
    /// Base cooldown after the first failure, in seconds.
    pub cooldown_base_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_size: usize,
    /// OpenAI-compatible endpoint root.
    pub base_url: String,
    pub model: String,
    pub embed_model: String,
    pub api_key: Option<String>,
    pub embed_dim: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            tier_mode: TierMode::Auto,
            cooldown_base_secs: 30,
            cache_ttl_secs: 3_600,
            cache_max_size: 500,
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            api_key: None,
            embed_dim: 768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root for the dead-letter log, failed reminders, and backups.
    pub dir: String,
    pub backup_retention_days: i64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
            backup_retention_days: 7,
        }
    }
}

impl DataConfig {
    pub fn dead_letter_path(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join("dead-letter.jsonl")
    }

    pub fn failed_reminders_path(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join("failed-reminders.jsonl")
    }

    pub fn backups_dir(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join("backups")
    }
}

// ============================================================================
// Tests
// ============================================================================
