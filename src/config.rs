use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::AnalysisMode;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub enforcement: EnforcementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            analysis: AnalysisConfig::default(),
            oracle: OracleConfig::default(),
            enforcement: EnforcementConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/logwarden/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("logwarden/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.general.db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Which rule set to run with
    #[serde(default = "default_mode")]
    pub mode: AnalysisMode,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            mode: default_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Log files to tail each cycle. Missing files are skipped; the cycle
    /// fails only when every source is unreadable.
    #[serde(default = "default_log_paths")]
    pub log_paths: Vec<String>,

    /// Analysis window in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Lines read from the tail of each file
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Substrings flagged as suspicious in UAs and URLs
    #[serde(default = "default_suspicious_tokens")]
    pub suspicious_tokens: Vec<String>,

    /// Per-cycle thresholds used by the scorer
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,

    #[serde(default = "default_failed_ratio")]
    pub failed_ratio: f64,

    #[serde(default = "default_user_agent_threshold")]
    pub user_agent_threshold: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            log_paths: default_log_paths(),
            interval_secs: default_interval(),
            max_lines: default_max_lines(),
            suspicious_tokens: default_suspicious_tokens(),
            requests_per_minute: default_requests_per_minute(),
            failed_ratio: default_failed_ratio(),
            user_agent_threshold: default_user_agent_threshold(),
        }
    }
}

impl AnalysisConfig {
    /// Mode-appropriate defaults for the analysis window
    pub fn for_mode(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Security => Self::default(),
            AnalysisMode::AccessLog => Self {
                log_paths: vec![
                    "/var/log/nginx/access.log".to_string(),
                    "/var/log/apache2/access.log".to_string(),
                ],
                interval_secs: 300,
                max_lines: 2000,
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Chat completions endpoint (OpenAI-compatible)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key; empty means the oracle is skipped and the
    /// deterministic fallback decides
    #[serde(default)]
    pub api_key: String,

    /// Default model id; overridable per cycle
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_oracle_timeout(),
        }
    }
}

impl OracleConfig {
    /// Mode-appropriate sampling and timeout parameters
    pub fn for_mode(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Security => Self::default(),
            AnalysisMode::AccessLog => Self {
                temperature: 0.2,
                max_tokens: 1000,
                timeout_secs: 30,
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Block duration in seconds (0 = permanent)
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: i64,

    /// Path to the .htaccess file used by the htaccess backend
    #[serde(default = "default_htaccess_path")]
    pub htaccess_path: String,

    /// Addresses never blocked regardless of score
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            block_duration_secs: default_block_duration(),
            htaccess_path: default_htaccess_path(),
            whitelist: default_whitelist(),
        }
    }
}

impl EnforcementConfig {
    pub fn for_mode(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Security => Self::default(),
            AnalysisMode::AccessLog => Self {
                block_duration_secs: 3600,
                ..Self::default()
            },
        }
    }
}

// Default value functions
fn default_db_path() -> String {
    "/var/lib/logwarden/logwarden.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> AnalysisMode {
    AnalysisMode::Security
}

fn default_log_paths() -> Vec<String> {
    vec![
        "/var/log/ufw.log".to_string(),
        "/var/log/kern.log".to_string(),
        "/var/log/auth.log".to_string(),
        "/var/log/syslog".to_string(),
        "/var/log/fail2ban.log".to_string(),
    ]
}

fn default_interval() -> u64 {
    600 // 10 minutes
}

fn default_max_lines() -> usize {
    5000
}

fn default_suspicious_tokens() -> Vec<String> {
    ["bot", "crawler", "scan", "exploit", "hack", "attack"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_requests_per_minute() -> u64 {
    100
}

fn default_failed_ratio() -> f64 {
    0.3
}

fn default_user_agent_threshold() -> usize {
    5
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_oracle_timeout() -> u64 {
    45
}

fn default_block_duration() -> i64 {
    7200 // 2 hours
}

fn default_htaccess_path() -> String {
    "/var/www/html/.htaccess".to_string()
}

fn default_whitelist() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}
