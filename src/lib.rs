//! # cmwlight-client
//!
//! Rust client for the CMW "RDA light" device access protocol.
//!
//! This crate lets applications read, write and subscribe to accelerator
//! device properties served over CMW-light, with heartbeats, automatic
//! reconnect with exponential backoff and resubscription after a reset.
//!
//! ## Architecture
//!
//! - **Codec** ([`codec`]): tag-value encoding of header and context frames
//! - **Protocol** ([`protocol`]): wire constants, [`Message`](protocol::Message)
//!   model and multi-frame encode/decode with descriptor validation
//! - **Transport** ([`transport`]): multipart-message channel (ZMTP/TCP or in-memory)
//! - **Connection** ([`Connection`]): handshake, heartbeat and subscription state machine
//! - **Poller** ([`Poller`]): one wait over many connections
//!
//! ## Example
//!
//! ```no_run
//! use cmwlight_client::{Client, FieldMap};
//!
//! #[tokio::main]
//! async fn main() -> cmwlight_client::Result<()> {
//!     let factory = Client::builder().build()?;
//!     let mut connection = factory.tcp_connection("tcp://fel0001:5000");
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

pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod selector;
pub mod transport;

mod backoff;
mod client;
mod connection;
mod poller;
mod subscription;

pub use backoff::{Backoff, BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF, MAX_BACK_OFF};
pub use client::{Client, ClientBuilder, ClientFactory, IdGenerator};
pub use codec::{FieldMap, FieldValue};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionState};
pub use directory::{DeviceInfo, DirectoryResolver, StaticDirectory};
pub use error::{CmwLightError, ProtocolError, Result};
pub use poller::Poller;
pub use selector::FairSelector;
pub use subscription::{Subscription, SubscriptionState, Subscriptions};
