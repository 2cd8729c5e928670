//! Engine tuning configuration.
//!
//! Loaded with CLI-flag > `config.toml` > built-in-default precedence: a
//! missing or malformed file is logged and downgraded to a default rather
//! than treated as a hard error.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Max concurrent outbound HTTP requests (listing fetches + HEADs +
    /// downloads combined).
    pub fetch_gate_capacity: usize,
    /// `reqwest::ClientBuilder::pool_max_idle_per_host`.
    pub pool_max_idle_per_host: usize,
    /// Width of the caller-supplied semaphore used by `walk.rs`'s
    /// traversal helpers; must exceed the deepest recursion a traversal
    /// can reach or it can deadlock against itself.
    pub traversal_semaphore_width: usize,
    /// How often `EngineHost`'s maintenance loop ticks `Later` (seconds).
    pub later_tick_seconds: u64,
    /// `AutoStore`'s debounce window before a dirty folder record is
    /// persisted (~4s).
    pub debounce_seconds: u64,
    /// After this many `exact_size` calls on one folder node with an
    /// unresolved size, dispatch HEADs for every still-unknown file in it.
    pub batch_refinement_threshold: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_gate_capacity: 20,
            pool_max_idle_per_host: 100,
            traversal_semaphore_width: 64,
            later_tick_seconds: 10,
            debounce_seconds: 4,
            batch_refinement_threshold: 4,
        }
    }
}

pub fn load_config(path: &Path) -> EngineConfig {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return EngineConfig::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
            EngineConfig::default()
        }
    }
}
