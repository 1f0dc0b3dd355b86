//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! A few keys can be overridden from the environment (`FEEDRELAY_PROXY`,
//! `FEEDRELAY_TARGET`, `FEEDRELAY_WEBHOOK_TOKEN`); the environment wins.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::PipelineConfig;
use crate::net::WebConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `webhook_token`.
#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Relative paths are resolved against the config directory.
    pub database: String,

    /// Messaging target every update is delivered to (chat id, channel name...).
    pub target: String,

    /// Polling delay in seconds. Feeds are spread over `delay / 60` one-minute buckets.
    pub poll_delay_secs: u64,

    /// Per-attempt timeout for feed fetches.
    pub fetch_timeout_secs: u64,

    /// User-Agent sent with every request.
    pub user_agent: String,

    /// Proxy URL (`http://`, `https://`, `socks5://`, `socks5h://`).
    pub proxy: Option<String>,

    /// Connect directly to private, loopback and link-local addresses.
    pub proxy_bypass_private: bool,

    /// Connect directly to these domains and their subdomains.
    pub proxy_bypass_domains: Vec<String>,

    /// Prefer IPv6 when the host has an AAAA record.
    pub ipv6_prior: bool,

    /// Maximum in-flight fetches across all feeds.
    pub fetch_concurrency: usize,

    /// Maximum concurrent renders.
    pub render_concurrency: usize,

    /// Maximum concurrent deliveries.
    pub send_concurrency: usize,

    /// Webhook that receives rendered messages. Without it messages are only logged.
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook.
    pub webhook_token: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "feeds.db".to_string(),
            target: String::new(),
            poll_delay_secs: 300,
            fetch_timeout_secs: 12,
            user_agent: crate::net::DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            proxy_bypass_private: false,
            proxy_bypass_domains: Vec::new(),
            ipv6_prior: false,
            fetch_concurrency: 5,
            render_concurrency: 7,
            send_concurrency: 3,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

/// Mask webhook_token in Debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("target", &self.target)
            .field("poll_delay_secs", &self.poll_delay_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .field("proxy_bypass_private", &self.proxy_bypass_private)
            .field("proxy_bypass_domains", &self.proxy_bypass_domains)
            .field("ipv6_prior", &self.ipv6_prior)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("render_concurrency", &self.render_concurrency)
            .field("send_concurrency", &self.send_concurrency)
            .field("webhook_url", &self.webhook_url)
            .field(
                "webhook_token",
                &self.webhook_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 14] = [
        "database",
        "target",
        "poll_delay_secs",
        "fetch_timeout_secs",
        "user_agent",
        "proxy",
        "proxy_bypass_private",
        "proxy_bypass_domains",
        "ipv6_prior",
        "fetch_concurrency",
        "render_concurrency",
        "send_concurrency",
        "webhook_url",
        "webhook_token",
    ];

    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a corrupted or huge file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            poll_delay_secs = config.poll_delay_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Environment overrides. `lookup` is injected so tests don't touch the
    /// process environment.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(proxy) = lookup("FEEDRELAY_PROXY").filter(|v| !v.is_empty()) {
            self.proxy = Some(proxy);
        }
        if let Some(target) = lookup("FEEDRELAY_TARGET").filter(|v| !v.is_empty()) {
            self.target = target;
        }
        if let Some(token) = lookup("FEEDRELAY_WEBHOOK_TOKEN").filter(|v| !v.is_empty()) {
            self.webhook_token = Some(SecretString::from(token));
        }
    }

    /// Number of one-minute buckets feeds are spread across (1..=60).
    ///
    /// Halves round to even, so 150s gives 2 and 210s gives 4.
    pub fn poll_interval_minutes(&self) -> u32 {
        let minutes = (self.poll_delay_secs as f64 / 60.0).round_ties_even() as u32;
        minutes.clamp(1, 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn web_config(&self) -> WebConfig {
        WebConfig {
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            proxy_bypass_private: self.proxy_bypass_private,
            proxy_bypass_domains: self.proxy_bypass_domains.clone(),
            ipv6_prior: self.ipv6_prior,
            max_concurrency: self.fetch_concurrency.max(1),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            render_concurrency: self.render_concurrency.max(1),
            send_concurrency: self.send_concurrency.max(1),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(test_name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedrelay_config_test_{}", test_name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_delay_secs, 300);
        assert_eq!(config.fetch_timeout_secs, 12);
        assert_eq!(config.fetch_concurrency, 5);
        assert_eq!(config.render_concurrency, 7);
        assert_eq!(config.send_concurrency, 3);
        assert!(config.proxy.is_none());
        assert!(!config.proxy_bypass_private);
        assert!(config.webhook_token.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load_file(path).unwrap();
        assert_eq!(config.poll_delay_secs, 300);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.database, "feeds.db");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
database = "/var/lib/feedrelay/feeds.db"
target = "-100123"
poll_delay_secs = 600
proxy = "socks5://127.0.0.1:1080"
proxy_bypass_private = true
proxy_bypass_domains = ["example.com", "internal.net"]
ipv6_prior = true
fetch_concurrency = 2
webhook_url = "https://hooks.example.com/relay"
webhook_token = "token-123"
"#,
        );

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.database, "/var/lib/feedrelay/feeds.db");
        assert_eq!(config.target, "-100123");
        assert_eq!(config.poll_delay_secs, 600);
        assert_eq!(config.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert!(config.proxy_bypass_private);
        assert_eq!(config.proxy_bypass_domains, vec!["example.com", "internal.net"]);
        assert!(config.ipv6_prior);
        assert_eq!(config.fetch_concurrency, 2);
        assert_eq!(config.render_concurrency, 7); // default
        assert_eq!(
            config.webhook_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("token-123".to_string())
        );
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "target = \"42\"\ntotally_fake_key = 1\n");
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.target, "42");
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "poll_delay_secs = \"soon\"\n");
        assert!(Config::load_file(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config {
            target: "from-file".to_string(),
            ..Config::default()
        };
        config.apply_env(|key| match key {
            "FEEDRELAY_TARGET" => Some("from-env".to_string()),
            "FEEDRELAY_PROXY" => Some("http://proxy:8080".to_string()),
            "FEEDRELAY_WEBHOOK_TOKEN" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.target, "from-env");
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:8080"));
        // Empty values do not override
        assert!(config.webhook_token.is_none());
    }

    #[test]
    fn test_poll_interval_minutes() {
        let mut config = Config::default();
        assert_eq!(config.poll_interval_minutes(), 5);

        config.poll_delay_secs = 90; // 1.5 rounds to 2
        assert_eq!(config.poll_interval_minutes(), 2);

        config.poll_delay_secs = 150; // 2.5 rounds to even
        assert_eq!(config.poll_interval_minutes(), 2);

        config.poll_delay_secs = 270; // 4.5 rounds to even
        assert_eq!(config.poll_interval_minutes(), 4);

        config.poll_delay_secs = 10; // rounds to 0, clamped to 1
        assert_eq!(config.poll_interval_minutes(), 1);

        config.poll_delay_secs = 7200; // capped at 60
        assert_eq!(config.poll_interval_minutes(), 60);
    }

    #[test]
    fn test_debug_masks_webhook_token() {
        let config = Config {
            webhook_token: Some(SecretString::from("super-secret-token")),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
