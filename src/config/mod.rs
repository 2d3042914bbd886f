use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public origin used to build gateway callback URLs.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// In-process gateway for development.
    #[default]
    Virtual,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,
    /// Provider name sent with every invoice request.
    pub name: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Pending online payments older than this are treated as abandoned.
    pub stale_pending_minutes: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::Virtual,
            name: "Melli".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 30,
            stale_pending_minutes: 60,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://gymdesk.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.access_token_minutes", 60)?
            .set_default("auth.refresh_token_days", 30)?
            .set_default("gateway.kind", "virtual")?
            .set_default("gateway.name", "Melli")?
            .set_default("gateway.timeout_secs", 30)?
            .set_default("gateway.stale_pending_minutes", 60)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with GYMDESK__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("GYMDESK").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://gymdesk.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                access_token_minutes: 60,
                refresh_token_days: 30,
            },
            gateway: GatewayConfig::default(),
        }
    }
}
