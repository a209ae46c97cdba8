//! Multiplexes several connections behind one wait.
//!
//! [`Poller::poll`] waits until any connection is readable or has
//! housekeeping due (bounded by a timeout), then gives every connection one
//! `receive_data` turn until one yields a message. The turn order starts
//! one past the connection that produced the previous message, so a busy
//! connection cannot starve the others.
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use std::time::Duration;
//! use cmwlight_client::{Client, FieldMap, Poller};
//!
//! # async fn run() -> cmwlight_client::Result<()> {
//! let factory = Client::builder().build()?;
//! let mut poller = Poller::new();
//! for address in ["tcp://server1:5000", "tcp://server2:5000"] {
//!     let mut connection = factory.tcp_connection(address);
//!     connection.subscribe("GSCD001", "SnoopTriggerEvents", "FAIR.SELECTOR.ALL", FieldMap::new())?;
//!     poller.add(connection);
//! }
//! poller
//!     .run(Duration::from_millis(100), |index, message| {
//!         println!("{index}: {message:?}");
//!         ControlFlow::Continue(())
//!     })
//!     .await
//! # }
//! ```

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use futures::future::select_all;

use crate::connection::{clock_now, Connection};
use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Transport;

/// A set of connections polled together.
pub struct Poller<T> {
    connections: Vec<Connection<T>>,
    /// Index the next pass starts at.
    next: usize,
}

impl<T: Transport> Poller<T> {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            next: 0,
        }
    }

    /// Add a connection and return its index.
    pub fn add(&mut self, connection: Connection<T>) -> usize {
        self.connections.push(connection);
        self.connections.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Connection<T>> {
        self.connections.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection<T>> {
        self.connections.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection<T>> {
        self.connections.iter()
    }

    /// Wait up to `timeout` for activity, then return the next message with
    /// the index of its connection.
    ///
    /// # Errors
    ///
    /// A malformed message from any connection. Other connections keep
    /// their pending data for the next call.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Option<(usize, Message)>> {
        if self.connections.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let waits = self
            .connections
            .iter_mut()
            .map(|connection| Box::pin(connection.readable()));
        // Timing out only means nothing happened; the pass below still runs.
        let _ = tokio::time::timeout(timeout, select_all(waits)).await;

        self.poll_once_at(clock_now())
    }

    /// One pass over all connections without waiting.
    pub fn poll_once_at(&mut self, now: Instant) -> Result<Option<(usize, Message)>> {
        let count = self.connections.len();
        if count == 0 {
            return Ok(None);
        }
        let start = self.next % count;
        for offset in 0..count {
            let index = (start + offset) % count;
            let received = self.connections[index].receive_data_at(now);
            if !matches!(received, Ok(None)) {
                self.next = (index + 1) % count;
                return received.map(|message| message.map(|message| (index, message)));
            }
        }
        Ok(None)
    }

    /// Poll until `handler` breaks or an error occurs.
    pub async fn run<F>(&mut self, timeout: Duration, mut handler: F) -> Result<()>
    where
        F: FnMut(usize, Message) -> ControlFlow<()>,
    {
        loop {
            if let Some((index, message)) = self.poll(timeout).await? {
                if handler(index, message).is_break() {
                    return Ok(());
                }
            }
        }
    }
}

impl<T: Transport> Default for Poller<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::connection::ConnectionState;
    use crate::transport::{memory_pair, MemoryPeer, MemoryTransport};

    fn poller(count: usize) -> (Poller<MemoryTransport>, Vec<MemoryPeer>) {
        let factory = Client::builder().hostname("test").build().unwrap();
        let mut poller = Poller::new();
        let mut peers = Vec::new();
        for i in 0..count {
            let (transport, peer) = memory_pair();
            poller.add(factory.connection(&format!("tcp://server{i}:1"), transport));
            peers.push(peer);
        }
        (poller, peers)
    }

    fn ack() -> Message {
        Message::ServerConnectAck {
            version: "1.0.0".into(),
        }
    }

    #[tokio::test]
    async fn test_empty_poller_times_out() {
        let mut poller: Poller<MemoryTransport> = Poller::new();
        let result = poller.poll(Duration::from_millis(5)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_poll_connects_and_delivers() {
        let (mut poller, peers) = poller(2);

        // First pass opens both connections.
        assert!(poller.poll(Duration::from_millis(10)).await.unwrap().is_none());
        assert!(poller.iter().all(|c| c.state() == ConnectionState::Connecting));

        peers[1].send(&ack()).unwrap();
        let (index, message) = poller
            .poll(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(index, 1);
        assert_eq!(message, ack());
        assert_eq!(poller.get(1).unwrap().state(), ConnectionState::Connected);
        assert_eq!(poller.get(0).unwrap().state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_rotation_is_fair() {
        let (mut poller, peers) = poller(2);
        let now = clock_now();
        poller.poll_once_at(now).unwrap();
        for peer in &peers {
            peer.send(&ack()).unwrap();
            peer.send(&ack()).unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..4 {
            let (index, _) = poller.poll_once_at(now).unwrap().expect("message");
            order.push(index);
        }
        assert_eq!(order, vec![0, 1, 0, 1]);
    }
}
