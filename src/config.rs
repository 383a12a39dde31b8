// Configuration File Support
//
// This module provides configuration file parsing for the kubenlp gateway.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/kubenlp/config.toml

use crate::tools::{
    ExecutionPolicy, ExecutionTimeout, GatewayConfig, DEFAULT_ALLOWED_VERBS, DEFAULT_BINARY,
    DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS,
};
use crate::translator::{
    OpenAiTranslator, PredictTranslator, Translator, DEFAULT_MODEL, DEFAULT_TRANSLATOR_URL,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Command execution configuration
    pub gateway: GatewaySettings,

    /// Translator service configuration
    pub translator: TranslatorConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

/// Command execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    /// External binary, resolved through PATH
    pub binary: String,

    /// Execution deadline in seconds
    pub timeout_secs: u64,

    /// Allowed leading verbs
    pub allowed_verbs: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            allowed_verbs: DEFAULT_ALLOWED_VERBS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl GatewaySettings {
    /// Build the immutable gateway configuration
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig::default()
            .with_binary(self.binary.clone())
            .with_timeout(ExecutionTimeout::from_secs(self.timeout_secs))
            .with_policy(ExecutionPolicy::new(&self.allowed_verbs))
    }
}

/// Translator service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Backend type (predict, openai)
    pub backend: String,

    /// Base URL of the translator service
    pub url: String,

    /// Timeout in seconds for translator requests
    pub timeout_secs: u64,

    /// Model name (openai backend)
    pub model: String,

    /// Environment variable holding the API key (openai backend)
    pub api_key_env: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            backend: "predict".to_string(),
            url: DEFAULT_TRANSLATOR_URL.to_string(),
            timeout_secs: 30,
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl TranslatorConfig {
    /// Build the configured translator client
    pub fn build(&self) -> Result<Arc<dyn Translator>> {
        let timeout = Duration::from_secs(self.timeout_secs);

        match self.backend.to_lowercase().as_str() {
            "predict" => Ok(Arc::new(PredictTranslator::new(&self.url, timeout)?)),
            "openai" => {
                let api_key = std::env::var(&self.api_key_env).ok();
                if api_key.is_none() {
                    tracing::warn!(
                        "{} is not set; calling the translator without credentials",
                        self.api_key_env
                    );
                }
                Ok(Arc::new(OpenAiTranslator::new(
                    &self.url,
                    &self.model,
                    api_key,
                    timeout,
                )?))
            }
            other => anyhow::bail!("Unknown translator backend: {}", other),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, returns default configuration
    /// (with environment overrides applied).
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/kubenlp/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "kubenlp", "kubenlp") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("kubenlp").join("config.toml")
        }
    }

    /// Apply overrides from the process environment
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup
    ///
    /// Variables take precedence over config file values:
    /// - KUBENLP_LOG_LEVEL, KUBENLP_LOG_FORMAT
    /// - PORT, KUBENLP_PORT (the latter wins), KUBENLP_HOST
    /// - KUBENLP_BINARY, KUBENLP_TIMEOUT_SECS, KUBENLP_ALLOWED_VERBS
    /// - KUBENLP_TRANSLATOR_URL, KUBENLP_TRANSLATOR_BACKEND, OPENAI_MODEL
    /// - KUBENLP_METRICS_ENABLED
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Logging overrides
        if let Some(level) = lookup("KUBENLP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("KUBENLP_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Server overrides
        for key in ["PORT", "KUBENLP_PORT"] {
            if let Some(port) = lookup(key).and_then(|p| p.parse::<u16>().ok()) {
                self.server.port = port;
            }
        }
        if let Some(host) = lookup("KUBENLP_HOST") {
            self.server.host = host;
        }

        // Gateway overrides
        if let Some(binary) = lookup("KUBENLP_BINARY") {
            self.gateway.binary = binary;
        }
        if let Some(secs) = lookup("KUBENLP_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            if (1..=MAX_TIMEOUT_SECS).contains(&secs) {
                self.gateway.timeout_secs = secs;
            }
        }
        if let Some(verbs) = lookup("KUBENLP_ALLOWED_VERBS") {
            let verbs: Vec<String> = verbs
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if !verbs.is_empty() {
                self.gateway.allowed_verbs = verbs;
            }
        }

        // Translator overrides
        if let Some(url) = lookup("KUBENLP_TRANSLATOR_URL") {
            self.translator.url = url;
        }
        if let Some(backend) = lookup("KUBENLP_TRANSLATOR_BACKEND") {
            self.translator.backend = backend;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.translator.model = model;
        }

        // Metrics overrides
        if let Some(enabled) = lookup("KUBENLP_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate server configuration
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        // Validate gateway configuration
        if self.gateway.binary.trim().is_empty() {
            anyhow::bail!("Gateway binary must not be empty");
        }
        if self.gateway.timeout_secs == 0 {
            anyhow::bail!("Gateway timeout must be > 0 seconds");
        }
        if self.gateway.timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "Gateway timeout must be at most {} seconds, got {}",
                MAX_TIMEOUT_SECS,
                self.gateway.timeout_secs
            );
        }
        if self.gateway.allowed_verbs.is_empty() {
            anyhow::bail!("Allowed verb list must not be empty");
        }
        if let Some(blank) = self.gateway.allowed_verbs.iter().position(|v| v.trim().is_empty()) {
            anyhow::bail!("Allowed verb #{} is blank", blank + 1);
        }
        if let Some(verb) = self.gateway.allowed_verbs.iter().find(|v| v.contains(char::is_whitespace)) {
            anyhow::bail!("Allowed verb '{}' contains whitespace", verb);
        }

        // Validate translator configuration
        match self.translator.backend.to_lowercase().as_str() {
            "predict" | "openai" => {}
            _ => anyhow::bail!(
                "Invalid translator backend: {}. Must be 'predict' or 'openai'",
                self.translator.backend
            ),
        }
        if self.translator.url.trim().is_empty() {
            anyhow::bail!("Translator URL must not be empty");
        }
        if self.translator.timeout_secs == 0 {
            anyhow::bail!("Translator timeout must be > 0 seconds");
        }
        if self.translator.timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "Translator timeout must be at most {} seconds",
                MAX_TIMEOUT_SECS
            );
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.gateway.binary, "kubectl");
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(
            config.gateway.allowed_verbs,
            vec!["get", "describe", "logs", "exec", "rollout", "scale"]
        );
        assert_eq!(config.translator.backend, "predict");
        assert_eq!(config.translator.model, "gpt-4o-mini");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_gateway() {
        let mut config = Config::default();
        config.gateway.binary = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.allowed_verbs.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
        config.gateway.timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());
        config.gateway.timeout_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.allowed_verbs.push("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.allowed_verbs.push("get pods".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_translator() {
        let mut config = Config::default();
        config.translator.backend = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.translator.url = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.translator.backend = "OpenAI".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path);
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[server]
host = "127.0.0.1"
port = 8080

[gateway]
binary = "oc"
timeout_secs = 10
allowed_verbs = ["get", "top"]

[translator]
backend = "openai"
url = "https://api.example.com"
model = "gpt-4o"

[metrics]
enabled = false
"#;

        fs::write(temp_file.path(), toml_content).unwrap();

        let content = fs::read_to_string(temp_file.path()).unwrap();
        let config: Config = toml::from_str(&content).unwrap();
        let config = config.apply_overrides(no_env);
        config.validate().unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gateway.binary, "oc");
        assert_eq!(config.gateway.timeout_secs, 10);
        assert_eq!(config.gateway.allowed_verbs, vec!["get", "top"]);
        assert_eq!(config.translator.backend, "openai");
        assert_eq!(config.translator.model, "gpt-4o");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging
level = "debug"
"#; // Invalid TOML

        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path());
        assert!(config.is_err());
    }

    #[test]
    fn test_config_partial_toml() {
        let config: Config = toml::from_str(
            r#"
[gateway]
timeout_secs = 5
"#,
        )
        .unwrap();

        assert_eq!(config.gateway.timeout_secs, 5);
        // Other fields should have defaults
        assert_eq!(config.gateway.binary, "kubectl");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().apply_overrides(env(&[
            ("KUBENLP_LOG_LEVEL", "debug"),
            ("KUBENLP_LOG_FORMAT", "json"),
            ("PORT", "5000"),
            ("KUBENLP_BINARY", "/usr/local/bin/kubectl"),
            ("KUBENLP_TIMEOUT_SECS", "12"),
            ("KUBENLP_ALLOWED_VERBS", "get, logs ,,top"),
            ("KUBENLP_TRANSLATOR_URL", "http://translator:5000"),
            ("KUBENLP_TRANSLATOR_BACKEND", "openai"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("KUBENLP_METRICS_ENABLED", "false"),
        ]));

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.gateway.binary, "/usr/local/bin/kubectl");
        assert_eq!(config.gateway.timeout_secs, 12);
        assert_eq!(config.gateway.allowed_verbs, vec!["get", "logs", "top"]);
        assert_eq!(config.translator.url, "http://translator:5000");
        assert_eq!(config.translator.backend, "openai");
        assert_eq!(config.translator.model, "gpt-4o");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_kubenlp_port_wins_over_port() {
        let config =
            Config::default().apply_overrides(env(&[("PORT", "5000"), ("KUBENLP_PORT", "6000")]));
        assert_eq!(config.server.port, 6000);
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let config = Config::default().apply_overrides(env(&[
            ("PORT", "not-a-port"),
            ("KUBENLP_TIMEOUT_SECS", "0"),
            ("KUBENLP_ALLOWED_VERBS", " , "),
            ("KUBENLP_METRICS_ENABLED", "maybe"),
        ]));

        // Should keep defaults for invalid values
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.gateway.allowed_verbs.len(), 6);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_env_timeout_override_is_capped() {
        let config = Config::default()
            .apply_overrides(env(&[("KUBENLP_TIMEOUT_SECS", "18446744073709551615")]));
        assert_eq!(config.gateway.timeout_secs, 30);
        assert!(config.validate().is_ok());

        let config = Config::default()
            .apply_overrides(env(&[("KUBENLP_TIMEOUT_SECS", "86400")]));
        assert_eq!(config.gateway.timeout_secs, 86_400);
    }

    #[test]
    fn test_oversized_timeout_in_file_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[gateway]\ntimeout_secs = 100000\n").unwrap();

        let err = Config::load_from_path(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("at most"));
    }

    #[test]
    fn test_to_gateway_config() {
        let mut settings = GatewaySettings::default();
        settings.binary = "oc".to_string();
        settings.timeout_secs = 7;
        settings.allowed_verbs = vec!["Get".to_string()];

        let gateway = settings.to_gateway_config();
        assert_eq!(gateway.binary, "oc");
        assert_eq!(gateway.timeout.duration(), Duration::from_secs(7));
        assert!(gateway.policy.is_allowed("get"));
        assert!(!gateway.policy.is_allowed("logs"));
    }

    #[test]
    fn test_translator_build() {
        let config = TranslatorConfig::default();
        let translator = config.build().unwrap();
        assert_eq!(translator.name(), "predict");

        let config = TranslatorConfig {
            backend: "openai".to_string(),
            api_key_env: "KUBENLP_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..Default::default()
        };
        assert_eq!(config.build().unwrap().name(), "openai");

        let config = TranslatorConfig {
            backend: "nope".to_string(),
            ..Default::default()
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "info".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_log_level_parsing_invalid() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = Config::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Log level {} should be valid", level);
        }
    }
}
