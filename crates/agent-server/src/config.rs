//! Server configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::orchestrator::OrchestratorConfig;
use agent_core::settings::CompressionSettings;
use tracing::warn;

/// Where conversations are kept
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(AgentError::Config(format!("unknown storage backend: {other}"))),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub database_path: PathBuf,
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    pub model_timeout: Duration,
    /// Base system prompt override
    pub system_prompt: Option<String>,
    /// Compression policy for conversations without their own
    pub compression: CompressionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            storage: StorageBackend::Memory,
            database_path: PathBuf::from("data/conversations.db"),
            max_iterations: 10,
            tool_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(120),
            system_prompt: None,
            compression: CompressionSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            storage: parsed(&lookup, "AGENT_STORAGE", defaults.storage),
            database_path: lookup("AGENT_DATABASE_PATH")
                .map_or(defaults.database_path, PathBuf::from),
            max_iterations: parsed(&lookup, "AGENT_MAX_ITERATIONS", defaults.max_iterations),
            tool_timeout: Duration::from_secs(parsed(
                &lookup,
                "AGENT_TOOL_TIMEOUT_SECS",
                defaults.tool_timeout.as_secs(),
            )),
            model_timeout: Duration::from_secs(parsed(
                &lookup,
                "AGENT_MODEL_TIMEOUT_SECS",
                defaults.model_timeout.as_secs(),
            )),
            system_prompt: lookup("AGENT_SYSTEM_PROMPT").filter(|p| !p.trim().is_empty()),
            compression: CompressionSettings {
                enabled: flag(&lookup, "AGENT_COMPRESSION_ENABLED", defaults.compression.enabled),
                message_threshold: parsed(
                    &lookup,
                    "AGENT_COMPRESSION_THRESHOLD",
                    defaults.compression.message_threshold,
                ),
                keep_recent_messages: parsed(
                    &lookup,
                    "AGENT_COMPRESSION_KEEP_RECENT",
                    defaults.compression.keep_recent_messages,
                ),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("AGENT_MAX_ITERATIONS must be at least 1".into()));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: self.max_iterations,
            model_timeout: Some(self.model_timeout),
            default_compression: Some(self.compression),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, "Invalid configuration value, using default");
        default
    })
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %raw, "Invalid configuration flag, using default");
            default
        }
    }
}
