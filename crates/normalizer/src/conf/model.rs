//! Model — AgentConfig and related structs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Pattern files, merged in order.
    pub patterns_files: Vec<String>,
    pub max_training_lines: u32,
    pub pattern_matching_enabled: bool,
    pub geoip_enabled: bool,
    pub maxmind_db_dir: Option<String>,
    pub cache_sweep_interval_secs: u64,
    pub queue_capacity: usize,
    /// Keep only pattern groups whose source rule matches this regex.
    pub whitelist: Option<String>,
    /// Drop pattern groups whose source rule matches this regex.
    pub blacklist: Option<String>,
    pub multiline: MultilineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_lines: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            patterns_files: vec!["/etc/logagent/patterns.toml".to_string()],
            max_training_lines: 100,
            pattern_matching_enabled: true,
            geoip_enabled: false,
            maxmind_db_dir: None,
            cache_sweep_interval_secs: 300,
            queue_capacity: 10_000,
            whitelist: None,
            blacklist: None,
            multiline: MultilineConfig::default(),
        }
    }
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 300,
            max_lines: 500,
        }
    }
}

impl MultilineConfig {
    /// Validate multiline configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.timeout_ms == 0 {
                return Err("multiline.timeout_ms must be > 0 when multiline is enabled".to_string());
            }
            if self.max_lines == 0 {
                return Err("multiline.max_lines must be > 0 when multiline is enabled".to_string());
            }
        }
        Ok(())
    }
}
