//! Configuration for Bulkmail

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Daily quota configuration
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Campaign dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Open tracking and unsubscribe links
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Session authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// System-wide SMTP account used when a request names none
    pub mail: Option<MailConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins (empty allows any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "memory".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Daily quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Sends per day on the free plan
    #[serde(default = "default_free_daily_limit")]
    pub free_daily_limit: i32,

    /// Sends per day on the premium plan
    #[serde(default = "default_premium_daily_limit")]
    pub premium_daily_limit: i32,

    /// Grant premium immediately instead of queueing an admin request
    #[serde(default)]
    pub auto_approve_upgrades: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: default_free_daily_limit(),
            premium_daily_limit: default_premium_daily_limit(),
            auto_approve_upgrades: false,
        }
    }
}

fn default_free_daily_limit() -> i32 {
    10
}

fn default_premium_daily_limit() -> i32 {
    100
}

/// Campaign dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Lower bound of the randomized pause between sends
    #[serde(default = "default_pacing_min_ms")]
    pub pacing_min_ms: u64,

    /// Upper bound of the randomized pause between sends
    #[serde(default = "default_pacing_max_ms")]
    pub pacing_max_ms: u64,

    /// Campaigns allowed to run at the same time
    #[serde(default = "default_max_concurrent_campaigns")]
    pub max_concurrent_campaigns: usize,

    /// SMTP submissions allowed in flight across the process
    #[serde(default = "default_send_slots")]
    pub send_slots: usize,

    /// Timeout for a single SMTP session in seconds
    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pacing_min_ms: default_pacing_min_ms(),
            pacing_max_ms: default_pacing_max_ms(),
            max_concurrent_campaigns: default_max_concurrent_campaigns(),
            send_slots: default_send_slots(),
            smtp_timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_pacing_min_ms() -> u64 {
    2000
}

fn default_pacing_max_ms() -> u64 {
    5000
}

fn default_max_concurrent_campaigns() -> usize {
    4
}

fn default_send_slots() -> usize {
    1
}

fn default_smtp_timeout() -> u64 {
    30
}

/// Open tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Externally reachable base URL of this service
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Append an open-tracking pixel to HTML bodies
    #[serde(default = "default_tracking_enabled")]
    pub open_pixel: bool,

    /// Key for signing unsubscribe links
    #[serde(default)]
    pub unsubscribe_secret: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            open_pixel: default_tracking_enabled(),
            unsubscribe_secret: None,
        }
    }
}

fn default_public_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_tracking_enabled() -> bool {
    true
}

/// Session authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// Addresses that receive the admin role on registration
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            admin_emails: Vec::new(),
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

/// System SMTP account, normally supplied through the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// SMTP relay host
    pub smtp_server: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Login and From address
    pub email: String,

    /// SMTP password
    pub password: String,

    /// Display name for the From header
    pub from_name: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// Load configuration from the first file found and the environment
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./bulkmail.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/bulkmail/config.toml"),
        ];

        let path = paths.iter().find(|p| p.exists());
        if let Some(path) = path {
            tracing::info!(path = %path.display(), "Loading configuration file");
        }

        Self::build(path.map(PathBuf::as_path))
    }

    fn build(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path.to_path_buf()).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("BULKMAIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply the bare `PORT` and `DATABASE_URL` variables used by hosting platforms
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid PORT value: {}", port)))?;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.backend = "postgres".to_string();
            self.database.url = Some(url);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.database.backend, "memory");
        assert_eq!(config.quota.free_daily_limit, 10);
        assert_eq!(config.quota.premium_daily_limit, 100);
        assert_eq!(config.dispatch.send_slots, 1);
        assert!(config.mail.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8080

[database]
backend = "postgres"
url = "postgres://localhost/bulkmail"

[quota]
free_daily_limit = 25
auto_approve_upgrades = true

[dispatch]
pacing_min_ms = 0
pacing_max_ms = 0

[tracking]
unsubscribe_secret = "s3cret"

[mail]
smtp_server = "smtp.example.com"
email = "news@example.com"
password = "secret"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.quota.free_daily_limit, 25);
        assert_eq!(config.quota.premium_daily_limit, 100);
        assert!(config.quota.auto_approve_upgrades);
        assert_eq!(config.dispatch.pacing_max_ms, 0);
        assert_eq!(config.tracking.unsubscribe_secret.as_deref(), Some("s3cret"));
        assert!(config.tracking.open_pixel);

        let mail = config.mail.unwrap();
        assert_eq!(mail.smtp_port, 587);
        assert_eq!(mail.email, "news@example.com");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|key| match key {
                "PORT" => Some("9090".to_string()),
                "DATABASE_URL" => Some("postgres://db/bulkmail".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/bulkmail"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| (key == "PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }
}
