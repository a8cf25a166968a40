use config::{ConfigError, Environment, File};
use message_bus::{GroupConfig, NatsConfig, SubscriberConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub insert_timeout_secs: u64,
    pub bootstrap_schema: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsSettings {
    pub url: String,
    pub group_id: String,
    pub ack_wait_secs: u64,
    pub max_deliver: i64,
    pub restart_delay_secs: u64,
    pub duplicate_window_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8091)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.idle_timeout_secs", 30 * 60)?
            .set_default("database.max_lifetime_secs", 60 * 60)?
            .set_default("database.insert_timeout_secs", 5)?
            .set_default("database.bootstrap_schema", true)?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("nats.group_id", "ledger-consumption-group")?
            .set_default("nats.ack_wait_secs", 30)?
            .set_default("nats.max_deliver", -1)?
            .set_default("nats.restart_delay_secs", 5)?
            .set_default("nats.duplicate_window_secs", 120)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/ledger-{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("LEDGER_SERVICE").separator("__"));

        // The ledger may live in its own database; fall back to the shared one.
        if let Ok(db_url) = env::var("LEDGER_DATABASE_URL").or_else(|_| env::var("DATABASE_URL")) {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(port) = env::var("SERVICE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("database.min_connections exceeds database.max_connections".to_string());
        }

        if self.database.insert_timeout_secs == 0 {
            return Err("database.insert_timeout_secs must be positive".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.nats.group_id.is_empty() {
            return Err("Consumer group id is required".to_string());
        }

        // JetStream stops delivering a message that reaches the cap.
        if self.nats.max_deliver != -1 {
            return Err("nats.max_deliver must be -1 (redeliver until acknowledged)".to_string());
        }

        Ok(())
    }

    pub fn insert_timeout(&self) -> Duration {
        Duration::from_secs(self.database.insert_timeout_secs)
    }

    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats.url.clone(),
            connection_name: "ledger-service".to_string(),
            duplicate_window: Duration::from_secs(self.nats.duplicate_window_secs),
            ..NatsConfig::default()
        }
    }

    pub fn group_config(&self) -> GroupConfig {
        GroupConfig {
            group_id: self.nats.group_id.clone(),
            ack_wait: Duration::from_secs(self.nats.ack_wait_secs),
            max_deliver: self.nats.max_deliver,
        }
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            restart_delay: Duration::from_secs(self.nats.restart_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8091,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/ledger".to_string(),
                max_connections: 10,
                min_connections: 2,
                acquire_timeout_secs: 5,
                idle_timeout_secs: 1800,
                max_lifetime_secs: 3600,
                insert_timeout_secs: 5,
                bootstrap_schema: true,
            },
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                group_id: "ledger-consumption-group".to_string(),
                ack_wait_secs: 30,
                max_deliver: -1,
                restart_delay_secs: 5,
                duplicate_window_secs: 120,
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_insert_timeout() {
        let mut config = valid();
        config.database.insert_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nats_mapping() {
        let config = valid();
        assert_eq!(config.group_config().group_id, "ledger-consumption-group");
        assert_eq!(config.nats_config().connection_name, "ledger-service");
        assert_eq!(config.insert_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_capped_redelivery() {
        let mut config = valid();
        config.nats.max_deliver = 5;
        assert_eq!(
            config.validate(),
            Err("nats.max_deliver must be -1 (redeliver until acknowledged)".to_string())
        );
        assert_eq!(valid().group_config().max_deliver, -1);
    }
}
