//! Settings for the pseudonymization pipeline and the agent bridge
//!
//! Loaded from an optional TOML file plus `KALYPSO_`-prefixed environment
//! overrides (nested keys use `__`, e.g. `KALYPSO_AGENT__MODEL`). The
//! Anthropic credential itself comes only from `ANTHROPIC_API_KEY` and is
//! never written to the settings file.

use crate::error::{KalypsoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Private store: source tables plus the key registry. Never exposed.
    pub private_db_path: PathBuf,

    /// Anonymous store: the redacted, pseudonymized mirror the agent queries
    pub anon_db_path: PathBuf,

    /// Conversation agent settings
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            private_db_path: PathBuf::from("private.db"),
            anon_db_path: PathBuf::from("anon.db"),
            agent: AgentSettings::default(),
        }
    }
}

/// Settings for the external reasoning agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model identifier
    pub model: String,

    /// Max tokens per response
    pub max_tokens: usize,

    /// API base URL
    pub api_base: String,

    /// Hard cap on tool dispatches per question
    pub max_tool_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1024,
            api_base: "https://api.anthropic.com".to_string(),
            max_tool_turns: 12,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or `kalypso.toml` in the working
    /// directory if present, with environment overrides applied on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("private_db_path", "private.db")?
            .set_default("anon_db_path", "anon.db")?;

        match path {
            Some(p) => {
                debug!("Loading settings from {}", p.display());
                builder = builder.add_source(config::File::from(p));
            }
            None => {
                builder = builder.add_source(config::File::with_name("kalypso").required(false));
            }
        }

        let cfg = builder
            .add_source(config::Environment::with_prefix("KALYPSO").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Write a starter settings file with the defaults
    pub fn write_default(path: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(&Settings::default())
            .map_err(|e| KalypsoError::Other(format!("failed to render settings: {}", e)))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_paths() {
        let settings = Settings::default();
        assert_eq!(settings.private_db_path, PathBuf::from("private.db"));
        assert_eq!(settings.anon_db_path, PathBuf::from("anon.db"));
        assert!(settings.agent.max_tool_turns > 0);
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kalypso.toml");
        Settings::write_default(&path).unwrap();

        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded.anon_db_path, Settings::default().anon_db_path);
        assert_eq!(loaded.agent.model, AgentSettings::default().model);
    }
}
