use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

use crate::payments::fees::FeeSchedule;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    pub fees: FeeConfig,
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    /// Signing secret of the platform-level webhook endpoint.
    pub webhook_secret: Option<String>,
    /// Signing secret of the endpoint receiving connected-account events.
    pub connect_webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeeConfig {
    pub processing_rate_bps: u32,
    pub fixed_fee_cents: i64,
    pub platform_rate_bps: u32,
}

impl FeeConfig {
    pub fn schedule(&self) -> FeeSchedule {
        FeeSchedule {
            processing_rate_bps: self.processing_rate_bps,
            fixed_fee_cents: self.fixed_fee_cents,
            platform_rate_bps: self.platform_rate_bps,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// How long a processed event id is remembered for dedup.
    pub retention_hours: i64,
    pub purge_interval_secs: u64,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://offertory.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("fees.processing_rate_bps", 290)?
            .set_default("fees.fixed_fee_cents", 30)?
            .set_default("fees.platform_rate_bps", 100)?
            .set_default("webhooks.retention_hours", 72)?
            .set_default("webhooks.purge_interval_secs", 3600)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with OFFERTORY__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("OFFERTORY").separator("__"))

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
            },
            database: DatabaseConfig {
                url: "sqlite://offertory.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            stripe: StripeConfig::default(),
            fees: FeeConfig {
                processing_rate_bps: 290,
                fixed_fee_cents: 30,
                platform_rate_bps: 100,
            },
            webhooks: WebhookConfig {
                retention_hours: 72,
                purge_interval_secs: 3600,
            },
        }
    }
}
