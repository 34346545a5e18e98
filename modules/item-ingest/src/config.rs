use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Nats,
    InMemory,
}

impl ChannelType {
    pub fn from_env() -> Self {
        match env::var("CHANNEL_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => ChannelType::Nats,
            "inmemory" => ChannelType::InMemory,
            _ => {
                tracing::warn!("Unknown CHANNEL_TYPE, defaulting to inmemory");
                ChannelType::InMemory
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

impl StoreType {
    pub fn from_env() -> Self {
        match env::var("STORE_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreType::Postgres,
            "inmemory" => StoreType::InMemory,
            _ => {
                tracing::warn!("Unknown STORE_TYPE, defaulting to inmemory");
                StoreType::InMemory
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub channel_type: ChannelType,
    pub store_type: StoreType,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub stream_name: String,
    pub subject: String,
    pub consumer_name: String,
    /// Ack deadline granted by the channel per delivery attempt
    pub ack_wait: Duration,
    /// Bound on concurrently processed deliveries
    pub max_in_flight: usize,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let channel_type = ChannelType::from_env();
        let store_type = StoreType::from_env();

        let database_url = match store_type {
            StoreType::Postgres => Some(
                env::var("DATABASE_URL")
                    .map_err(|_| "DATABASE_URL must be set for the postgres store".to_string())?,
            ),
            StoreType::InMemory => None,
        };

        let nats_url = match channel_type {
            ChannelType::Nats => Some(
                env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            ),
            ChannelType::InMemory => None,
        };

        let stream_name =
            env::var("ITEMS_STREAM").unwrap_or_else(|_| "ITEM_EVENTS".to_string());
        let subject =
            env::var("ITEMS_SUBJECT").unwrap_or_else(|_| "items.events.>".to_string());
        let consumer_name =
            env::var("ITEMS_CONSUMER").unwrap_or_else(|_| "item-ingest".to_string());

        let ack_wait_secs: u64 = env::var("ACK_WAIT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| "ACK_WAIT_SECONDS must be a positive integer".to_string())?;

        let max_in_flight: usize = env::var("MAX_IN_FLIGHT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| "MAX_IN_FLIGHT must be a positive integer".to_string())?;
        if max_in_flight == 0 {
            return Err("MAX_IN_FLIGHT must be at least 1".to_string());
        }

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Self {
            channel_type,
            store_type,
            database_url,
            nats_url,
            stream_name,
            subject,
            consumer_name,
            ack_wait: Duration::from_secs(ack_wait_secs),
            max_in_flight,
            host,
            port,
        })
    }

    /// Renew the ack deadline at half its expiry so a slow store write never
    /// silently expires into a duplicate redelivery
    pub fn ack_extend_interval(&self) -> Duration {
        self.ack_wait / 2
    }
}
