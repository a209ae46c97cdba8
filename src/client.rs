//! Client builder and connection factory.
//!
//! The [`ClientBuilder`] provides a fluent API over [`ClientConfig`]. It
//! builds a [`ClientFactory`], which owns the id generator shared by every
//! connection it creates:
//! 1. Connection ids (third component of the channel identity)
//! 2. Request ids (GET/SET request ids and subscription ids)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cmwlight_client::{Client, FieldMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = Client::builder()
//!         .heartbeat_interval(Duration::from_millis(500))
//!         .subscription_timeout(Duration::from_secs(2))
//!         .build()?;
//!
//!     let mut connection = factory.tcp_connection("tcp://server:5000");
//!     connection.subscribe("GSCD001", "SnoopTriggerEvents", "FAIR.SELECTOR.ALL", FieldMap::new())?;
//!
//!     loop {
//!         connection.readable().await;
//!         if let Some(message) = connection.receive_data()? {
//!             println!("{message:?}");
//!         }
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use validator::Validate;

use crate::config::{ClientConfig, ConfigError};
use crate::connection::Connection;
use crate::directory::DirectoryResolver;
use crate::error::{CmwLightError, Result};
use crate::transport::{TcpTransport, Transport};

/// Hostname used when the system hostname cannot be read.
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Monotonic id source shared by the connections of one factory.
///
/// Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    connection: AtomicU64,
    request: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next connection id, starting at 1.
    pub fn next_connection_id(&self) -> u64 {
        self.counters.connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next request or subscription id, starting at 1.
    pub fn next_request_id(&self) -> i64 {
        self.counters.request.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn system_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
}

/// Entry point for the fluent builder.
pub struct Client;

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

/// Builder for a [`ClientFactory`].
///
/// Every setter maps to one [`ClientConfig`] field; unset fields keep their
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing (e.g. file-loaded) configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the client heartbeat interval.
    ///
    /// Default: 1 second
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = to_millis(interval);
        self
    }

    /// Set how many heartbeat intervals may pass without server traffic.
    ///
    /// Default: 3
    pub fn heartbeat_allowed_misses(mut self, misses: u32) -> Self {
        self.config.heartbeat_allowed_misses = misses;
        self
    }

    /// Set the reconnect/resubscribe backoff floor.
    ///
    /// Default: 20 ms
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff_ms = to_millis(backoff);
        self
    }

    /// Set the backoff cap.
    ///
    /// Default: 10 seconds
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff_ms = to_millis(backoff);
        self
    }

    /// Set how long a SUBSCRIBE may stay unacknowledged.
    ///
    /// Default: 1 second
    pub fn subscription_timeout(mut self, timeout: Duration) -> Self {
        self.config.subscription_timeout_ms = to_millis(timeout);
        self
    }

    /// Set the retry limit after SUBSCRIBE_EXCEPTION.
    ///
    /// Default: 5
    pub fn subscription_max_retries(mut self, retries: u32) -> Self {
        self.config.subscription_max_retries = retries;
        self
    }

    pub fn client_version(mut self, version: &str) -> Self {
        self.config.client_version = version.to_string();
        self
    }

    /// Use a fixed session id instead of the connection identity.
    pub fn session_id(mut self, session_id: &str) -> Self {
        self.config.session_id = Some(session_id.to_string());
        self
    }

    /// Override the hostname part of connection identities.
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.config.hostname = Some(hostname.to_string());
        self
    }

    /// Validate the configuration and build the factory.
    pub fn build(self) -> Result<ClientFactory> {
        ClientFactory::new(self.config)
    }
}

/// Creates connections that share one configuration and id generator.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    config: ClientConfig,
    ids: IdGenerator,
    hostname: String,
}

impl ClientFactory {
    /// Create a factory from a configuration.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration fails validation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(ConfigError::from)?;
        let hostname = config.hostname.clone().unwrap_or_else(system_hostname);
        Ok(Self {
            config,
            ids: IdGenerator::new(),
            hostname,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Create a disconnected connection to `address` over `transport`.
    ///
    /// The first housekeeping tick (or an explicit `connect`) opens it.
    pub fn connection<T: Transport>(&self, address: &str, transport: T) -> Connection<T> {
        Connection::new(
            address,
            transport,
            self.config.clone(),
            self.ids.clone(),
            self.hostname.clone(),
        )
    }

    /// Create a disconnected connection over ZMTP/TCP.
    pub fn tcp_connection(&self, address: &str) -> Connection<TcpTransport> {
        self.connection(address, TcpTransport::new())
    }

    /// Resolve `device` through `resolver` and connect to its server.
    ///
    /// # Errors
    ///
    /// `Directory` if the device is unknown or has no address.
    pub fn connection_for_device<T: Transport>(
        &self,
        resolver: &dyn DirectoryResolver,
        device: &str,
        transport: T,
    ) -> Result<Connection<T>> {
        let devices = resolver.resolve(&[device.to_string()])?;
        let address = devices
            .iter()
            .find(|info| info.name == device)
            .and_then(|info| info.address())
            .ok_or_else(|| CmwLightError::Directory(format!("no address for device '{device}'")))?;
        tracing::debug!(device, address, "resolved device");
        Ok(self.connection(address, transport))
    }
}
