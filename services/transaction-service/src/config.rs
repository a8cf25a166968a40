use config::{ConfigError, Environment, File};
use message_bus::{GroupConfig, NatsConfig, PublisherConfig, SubscriberConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsSettings,
    pub publisher: PublisherSettings,
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

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublisherSettings {
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.idle_timeout_secs", 30 * 60)?
            .set_default("database.max_lifetime_secs", 60 * 60)?
            .set_default("database.bootstrap_schema", true)?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("nats.group_id", "transaction-group")?
            .set_default("nats.ack_wait_secs", 30)?
            .set_default("nats.max_deliver", -1)?
            .set_default("nats.restart_delay_secs", 5)?
            .set_default("nats.duplicate_window_secs", 120)?
            .set_default("publisher.max_retry_attempts", 3)?
            .set_default("publisher.initial_retry_delay_ms", 100)?
            .set_default("publisher.max_retry_delay_ms", 2000)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(Environment::with_prefix("TRANSACTION_SERVICE").separator("__"));

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
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

        if self.publisher.max_retry_attempts == 0 {
            return Err("publisher.max_retry_attempts must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats.url.clone(),
            connection_name: "transaction-service".to_string(),
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

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_retry_attempts: self.publisher.max_retry_attempts,
            initial_retry_delay: Duration::from_millis(self.publisher.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.publisher.max_retry_delay_ms),
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
                port: 8090,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/bank".to_string(),
                max_connections: 10,
                min_connections: 2,
                acquire_timeout_secs: 5,
                idle_timeout_secs: 1800,
                max_lifetime_secs: 3600,
                bootstrap_schema: true,
            },
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                group_id: "transaction-group".to_string(),
                ack_wait_secs: 30,
                max_deliver: -1,
                restart_delay_secs: 5,
                duplicate_window_secs: 120,
            },
            publisher: PublisherSettings {
                max_retry_attempts: 3,
                initial_retry_delay_ms: 100,
                max_retry_delay_ms: 2000,
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_pool_bounds() {
        let mut config = valid();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_database_url() {
        let mut config = valid();
        config.database.url.clear();
        assert_eq!(config.validate(), Err("Database URL is required".to_string()));
    }

    #[test]
    fn test_group_config_mapping() {
        let group = valid().group_config();
        assert_eq!(group.group_id, "transaction-group");
        assert_eq!(group.ack_wait, Duration::from_secs(30));
        assert_eq!(group.max_deliver, -1);
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
