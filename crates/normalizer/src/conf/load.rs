//! Load — config loading from file and environment variables.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::Regex;

use super::model::AgentConfig;

const DEFAULT_CONFIG_FILE: &str = "/etc/logagent/agent.toml";
const DEFAULT_TRAINING_LINES: u32 = 100;

impl AgentConfig {
    /// Load configuration from file or environment variables
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("LOGAGENT_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!("Config file not found at {}, using environment variables", config_path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AgentConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay values from `var`, a lookup over environment-style keys.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(files) = var("LOGAGENT_PATTERNS_FILES") {
            self.patterns_files = files
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(lines) = var("LOGAGENT_MAX_TRAINING_LINES") {
            self.max_training_lines = training_lines(&lines);
        }
        if let Some(enabled) = var("PATTERN_MATCHING_ENABLED") {
            self.pattern_matching_enabled = enabled.trim() != "false";
        }
        if let Some(enabled) = var("GEOIP_ENABLED") {
            self.geoip_enabled = geoip_flag(&enabled);
        }
        if let Some(dir) = var("MAXMIND_DB_DIR") {
            self.maxmind_db_dir = Some(dir);
        }
        if let Some(secs) = var("LOGAGENT_CACHE_SWEEP_SECS").and_then(|s| s.trim().parse().ok()) {
            self.cache_sweep_interval_secs = secs;
        }
    }

    /// Validate that configuration values are sane
    pub fn validate(&self) -> Result<(), String> {
        if self.patterns_files.is_empty() {
            return Err("patterns_files must list at least one pattern file".to_string());
        }
        if self.cache_sweep_interval_secs == 0 {
            return Err("cache_sweep_interval_secs must be > 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be > 0".to_string());
        }
        self.multiline.validate()?;

        for (name, rule) in [("whitelist", &self.whitelist), ("blacklist", &self.blacklist)] {
            if let Some(rule) = rule {
                Regex::new(rule).map_err(|e| format!("{} is not a valid regex: {}", name, e))?;
            }
        }
        Ok(())
    }
}

/// Non-numeric or zero values fall back to the default window.
fn training_lines(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => DEFAULT_TRAINING_LINES,
    }
}

/// `true`, or any number greater than zero.
fn geoip_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw == "true" || raw.parse::<f64>().map(|n| n > 0.0).unwrap_or(false)
}
