// Engine configuration
//
// Defaults suit an interactive workbench. The MCP server overrides a few of
// them from the environment.

use crate::serializer::DEFAULT_MAX_DEPTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FILE_NAME: &str = "untitled.js";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Budget for a plain (non-debug) run when the caller gives none
    pub default_timeout_ms: u64,
    /// Budget for a single watch expression or breakpoint condition
    pub evaluation_timeout_ms: u64,
    /// Budget for replaying the lines before a pause to capture variables
    pub replay_timeout_ms: u64,
    /// QuickJS heap limit per sandbox, in bytes
    pub memory_limit: usize,
    /// Delay between entering `stepping` and the follow-up pause
    pub step_delay_ms: u64,
    /// Nesting bound for serialized values
    pub max_depth: usize,
    /// Broadcast buffer per subscriber
    pub event_capacity: usize,
    pub default_file_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            evaluation_timeout_ms: 1_000,
            replay_timeout_ms: 2_000,
            memory_limit: 64 * 1024 * 1024,
            step_delay_ms: 50,
            max_depth: DEFAULT_MAX_DEPTH,
            event_capacity: 256,
            default_file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `JSDEBUG_TIMEOUT_MS`, `JSDEBUG_STEP_DELAY_MS`
    /// and `JSDEBUG_MEMORY_LIMIT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_number("JSDEBUG_TIMEOUT_MS") {
            config.default_timeout_ms = ms;
        }
        if let Some(ms) = env_number("JSDEBUG_STEP_DELAY_MS") {
            config.step_delay_ms = ms;
        }
        if let Some(bytes) = env_number("JSDEBUG_MEMORY_LIMIT") {
            config.memory_limit = bytes as usize;
        }
        config
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout_ms, 10_000);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.default_file_name, "untitled.js");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"stepDelayMs": 5, "defaultTimeoutMs": 250}"#).unwrap();
        assert_eq!(config.step_delay_ms, 5);
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.evaluation_timeout_ms, 1_000);
    }
}
