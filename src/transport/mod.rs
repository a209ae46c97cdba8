//! Transport module - the message-oriented channel under a connection.
//!
//! A [`Transport`] moves whole multipart messages (ordered frames) between
//! the client and one server. It is non-blocking except for
//! [`Transport::readable`], which the poller awaits to multiplex several
//! connections.
//!
//! Implementations:
//! - [`TcpTransport`] - tokio TCP socket speaking ZMTP 3.0 as a DEALER
//! - [`MemoryTransport`] - in-process channel pair with a scriptable
//!   [`MemoryPeer`], for tests and embedding

use std::future::Future;
use std::io;

use bytes::Bytes;

mod memory;
mod tcp;
pub mod zmtp;

pub use memory::{memory_pair, MemoryPeer, MemoryTransport, PeerEvent};
pub use tcp::{parse_address, TcpTransport};

/// A bidirectional multipart-message channel to one server.
///
/// `open` and `close` may be called repeatedly over the lifetime of a
/// connection; every `open` starts a fresh channel with the given identity.
pub trait Transport {
    /// Start a channel to `address`, announcing `identity` to the peer.
    ///
    /// Completing the underlying connection may happen later; messages sent
    /// in the meantime are queued.
    fn open(&mut self, address: &str, identity: &str) -> io::Result<()>;

    /// Drop the channel and any queued or buffered messages.
    fn close(&mut self);

    /// Queue one multipart message for sending.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the channel is closed, or the I/O error that broke it.
    fn send(&mut self, frames: Vec<Bytes>) -> io::Result<()>;

    /// Take one received message without blocking.
    ///
    /// Returns `Ok(None)` if nothing is available or the channel is closed.
    fn try_recv(&mut self) -> io::Result<Option<Vec<Bytes>>>;

    /// Resolve once `try_recv` may make progress.
    ///
    /// May resolve spuriously. Never resolves for a closed channel.
    fn readable(&mut self) -> impl Future<Output = ()> + Send + '_;
}
