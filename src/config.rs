//! Engine configuration with validation, defaults, and environment overrides.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Tunable constants of the game engine. Defaults carry the reference
/// behavior of the production service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Price of one card, in credits.
    pub card_cost: u64,
    /// Balance granted lazily on first contact.
    pub starting_balance: u64,
    /// Number of distinct card layouts in the catalog.
    pub pool_size: u32,
    /// Lobby countdown, fixed length, not reset by later joins.
    pub countdown_secs: u64,
    /// Delay between consecutive number calls.
    pub call_interval_ms: u64,
    /// Minimum real roster size for a session to pay out to real players.
    pub organic_threshold: usize,
    /// Calls made before the covert-win rule starts rolling.
    pub covert_min_calls: usize,
    /// Per-call probability of a covert house win once eligible.
    pub covert_win_probability: f64,
    /// Winner share of the pot, in percent. The remainder is house margin.
    pub payout_percent: u64,
    /// How many recent calls are echoed with each number broadcast.
    pub recent_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            card_cost: 100,
            starting_balance: 1_000,
            pool_size: 500,
            countdown_secs: 10,
            call_interval_ms: 2_000,
            organic_threshold: 5,
            covert_min_calls: 15,
            covert_win_probability: 0.15,
            payout_percent: 85,
            recent_history: 5,
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> Result<(), ConfigError> {
        if let Ok(cost) = env::var("BINGO_CARD_COST") {
            config.card_cost = parse_env("BINGO_CARD_COST", &cost)?;
        }
        if let Ok(balance) = env::var("BINGO_STARTING_BALANCE") {
            config.starting_balance = parse_env("BINGO_STARTING_BALANCE", &balance)?;
        }
        if let Ok(pool) = env::var("BINGO_POOL_SIZE") {
            config.pool_size = parse_env("BINGO_POOL_SIZE", &pool)?;
        }
        if let Ok(secs) = env::var("BINGO_COUNTDOWN_SECS") {
            config.countdown_secs = parse_env("BINGO_COUNTDOWN_SECS", &secs)?;
        }
        if let Ok(ms) = env::var("BINGO_CALL_INTERVAL_MS") {
            config.call_interval_ms = parse_env("BINGO_CALL_INTERVAL_MS", &ms)?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        if config.card_cost == 0 {
            return Err(ConfigError::InvalidValue {
                field: "card_cost".to_string(),
                value: "0".to_string(),
                reason: "Card cost cannot be zero".to_string(),
            });
        }

        if config.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: "0".to_string(),
                reason: "Card pool cannot be empty".to_string(),
            });
        }

        if config.organic_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "organic_threshold".to_string(),
                value: "0".to_string(),
                reason: "Organic-play threshold cannot be zero".to_string(),
            });
        }

        if !(config.covert_win_probability > 0.0 && config.covert_win_probability < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "covert_win_probability".to_string(),
                value: config.covert_win_probability.to_string(),
                reason: "Probability must be strictly between 0 and 1".to_string(),
            });
        }

        if config.payout_percent == 0 || config.payout_percent > 100 {
            return Err(ConfigError::InvalidValue {
                field: "payout_percent".to_string(),
                value: config.payout_percent.to_string(),
                reason: "Payout percent must be in 1..=100".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write to {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "Invalid numeric value".to_string(),
    })
}
