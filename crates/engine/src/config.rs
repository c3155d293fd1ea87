use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

pub const DEFAULT_CONFIRMATION_WINDOW_SECS: u64 = 120;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Per-session tuning, usually read from the `[session]` table of the
/// operator console's TOML config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long a finalized batch waits for confirmation before reverting.
    pub confirmation_window_secs: u64,
    /// How often the host is expected to call `Session::tick`. Expiry is
    /// only observed on a tick, so `Session::remaining` reports whole ticks.
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confirmation_window_secs: DEFAULT_CONFIRMATION_WINDOW_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    session: SessionConfig,
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        file.session.validate()?;
        Ok(file.session)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.confirmation_window_secs == 0 {
            return Err(EngineError::Config(
                "confirmation_window_secs must be at least 1".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::Config("tick_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn confirmation_window(&self) -> Duration {
        Duration::from_secs(self.confirmation_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
