//! In-process transport backed by tokio unbounded channels.
//!
//! [`memory_pair`] returns the client side ([`MemoryTransport`]) and a
//! [`MemoryPeer`] that plays the server: it observes opens, closes and
//! every message the client sends, and can inject replies.
//!
//! # Example
//!
//! ```
//! use cmwlight_client::protocol::Message;
//! use cmwlight_client::transport::{memory_pair, PeerEvent, Transport};
//!
//! let (mut transport, mut peer) = memory_pair();
//! transport.open("tcp://server:1234", "host/1/1/1").unwrap();
//! assert!(matches!(peer.try_event(), Some(PeerEvent::Opened { .. })));
//!
//! peer.send(&Message::ServerHeartbeat).unwrap();
//! assert!(transport.try_recv().unwrap().is_some());
//! ```

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::Transport;
use crate::error::{ProtocolError, Result};
use crate::protocol::{decode, encode, Message};

/// What the peer observes from the client side.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Opened { address: String, identity: String },
    Frames(Vec<Bytes>),
    Closed,
}

/// Create a connected client transport and scriptable peer.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, events) = unbounded_channel();
    let (to_client, from_peer) = unbounded_channel();
    let refuse = Arc::new(AtomicBool::new(false));

    let transport = MemoryTransport {
        to_peer,
        from_peer,
        pending: None,
        open: false,
        refuse: refuse.clone(),
    };
    let peer = MemoryPeer {
        events,
        to_client,
        refuse,
    };
    (transport, peer)
}

/// Client side of an in-process channel.
#[derive(Debug)]
pub struct MemoryTransport {
    to_peer: UnboundedSender<PeerEvent>,
    from_peer: UnboundedReceiver<Vec<Bytes>>,
    /// Message taken off the channel by `readable()`, handed out first.
    pending: Option<Vec<Bytes>>,
    open: bool,
    refuse: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn discard_inbound(&mut self) {
        self.pending = None;
        while self.from_peer.try_recv().is_ok() {}
    }

    fn notify(&self, event: PeerEvent) -> io::Result<()> {
        self.to_peer
            .send(event)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory peer dropped"))
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, address: &str, identity: &str) -> io::Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("memory peer refused {address}"),
            ));
        }
        self.discard_inbound();
        self.notify(PeerEvent::Opened {
            address: address.to_string(),
            identity: identity.to_string(),
        })?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.notify(PeerEvent::Closed);
        }
        self.discard_inbound();
    }

    fn send(&mut self, frames: Vec<Bytes>) -> io::Result<()> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.notify(PeerEvent::Frames(frames))
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<Bytes>>> {
        if !self.open {
            return Ok(None);
        }
        if let Some(frames) = self.pending.take() {
            return Ok(Some(frames));
        }
        match self.from_peer.try_recv() {
            Ok(frames) => Ok(Some(frames)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "memory peer dropped",
            )),
        }
    }

    fn readable(&mut self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            if !self.open {
                return std::future::pending().await;
            }
            if self.pending.is_some() {
                return;
            }
            // A dropped peer also wakes us up; try_recv reports it.
            if let Some(frames) = self.from_peer.recv().await {
                self.pending = Some(frames);
            }
        }
    }
}

/// Server side of an in-process channel.
#[derive(Debug)]
pub struct MemoryPeer {
    events: UnboundedReceiver<PeerEvent>,
    to_client: UnboundedSender<Vec<Bytes>>,
    refuse: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Next event, if any, without waiting.
    pub fn try_event(&mut self) -> Option<PeerEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event. `None` once the client side is dropped.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    /// All events observed so far.
    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::iter::from_fn(|| self.try_event()).collect()
    }

    /// Decode every message sent so far, skipping open and close events.
    pub fn drain_messages(&mut self) -> std::result::Result<Vec<Message>, ProtocolError> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                PeerEvent::Frames(frames) => Some(decode(&frames)),
                _ => None,
            })
            .collect()
    }

    /// Encode and deliver a message to the client.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_frames(encode(message)?)?;
        Ok(())
    }

    /// Deliver raw frames to the client.
    pub fn send_frames(&self, frames: Vec<Bytes>) -> io::Result<()> {
        self.to_client
            .send(frames)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory transport dropped"))
    }

    /// Make subsequent `open` calls fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_open() {
        let (mut transport, _peer) = memory_pair();
        let err = transport.send(vec![Bytes::from_static(&[0x22])]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_open_send_close_events() {
        let (mut transport, mut peer) = memory_pair();
        transport.open("tcp://a:1", "id").unwrap();
        transport.send(vec![Bytes::from_static(&[0x22])]).unwrap();
        transport.close();

        assert_eq!(
            peer.drain_events(),
            vec![
                PeerEvent::Opened {
                    address: "tcp://a:1".into(),
                    identity: "id".into()
                },
                PeerEvent::Frames(vec![Bytes::from_static(&[0x22])]),
                PeerEvent::Closed,
            ]
        );
    }

    #[test]
    fn test_close_discards_inbound() {
        let (mut transport, peer) = memory_pair();
        transport.open("a", "id").unwrap();
        peer.send(&Message::ServerHeartbeat).unwrap();
        transport.close();
        transport.open("a", "id").unwrap();
        assert!(transport.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_refused_open() {
        let (mut transport, peer) = memory_pair();
        peer.refuse_connections(true);
        let err = transport.open("a", "id").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(!transport.is_open());
    }

    #[test]
    fn test_dropped_peer_is_an_error() {
        let (mut transport, peer) = memory_pair();
        transport.open("a", "id").unwrap();
        drop(peer);
        assert!(transport.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_readable_then_try_recv() {
        let (mut transport, peer) = memory_pair();
        transport.open("a", "id").unwrap();
        peer.send(&Message::ServerHeartbeat).unwrap();

        transport.readable().await;
        let frames = transport.try_recv().unwrap().unwrap();
        assert_eq!(decode(&frames).unwrap(), Message::ServerHeartbeat);
        assert!(transport.try_recv().unwrap().is_none());
    }
}
