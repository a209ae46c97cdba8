//! Connection state machine for one server.
//!
//! A [`Connection`] owns one [`Transport`] channel and drives the handshake,
//! heartbeats, timeout detection, reconnect with backoff and the
//! subscriptions hosted on it. It never blocks: every call does a bounded
//! amount of work, and [`Connection::receive_data`] is meant to be called
//! in a loop (see [`Poller`](crate::Poller)).
//!
//! ```text
//! Disconnected --connect--> Connecting --SERVER_CONNECT_ACK--> Connected
//!      ^                        |                                  |
//!      +------- timeout / I/O error (backoff doubles) -------------+
//! ```
//!
//! Every method that depends on time has an `_at` variant taking `now`
//! explicitly; the plain variants read the clock.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::client::IdGenerator;
use crate::codec::FieldMap;
use crate::config::ClientConfig;
use crate::error::{CmwLightError, Result};
use crate::protocol::{decode, encode, validate_filters, Message, ReplyKind, RequestContext};
use crate::subscription::{Subscription, SubscriptionState, Subscriptions};
use crate::transport::Transport;

/// Deadlines are exclusive (`now > deadline`); wake up just after them.
const EXPIRY_SLACK: Duration = Duration::from_millis(1);

/// Current time on the tokio clock, so paused-time tests drive the state machine.
pub(crate) fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// CLIENT_CONNECT sent, waiting for SERVER_CONNECT_ACK.
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client side of one CMW-light server connection.
///
/// Created by [`ClientFactory`](crate::ClientFactory). Subscriptions added
/// with [`subscribe`](Self::subscribe) survive resets: they are demoted to
/// `Unsubscribed` and sent again once the connection is back.
pub struct Connection<T> {
    address: String,
    transport: T,
    config: ClientConfig,
    ids: IdGenerator,
    hostname: String,
    connection_id: u64,
    channel_seq: u64,
    identity: String,
    state: ConnectionState,
    backoff: Backoff,
    /// Last CLIENT_HB (or connect attempt while disconnected).
    last_hb_sent: Option<Instant>,
    /// Last message of any kind from the server.
    last_hb_received: Instant,
    subscriptions: Subscriptions,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(
        address: impl Into<String>,
        transport: T,
        config: ClientConfig,
        ids: IdGenerator,
        hostname: String,
    ) -> Self {
        let connection_id = ids.next_connection_id();
        let backoff = config.backoff();
        let mut connection = Self {
            address: address.into(),
            transport,
            config,
            ids,
            hostname,
            connection_id,
            channel_seq: 0,
            identity: String::new(),
            state: ConnectionState::Disconnected,
            backoff,
            last_hb_sent: None,
            last_hb_received: clock_now(),
            subscriptions: Subscriptions::new(),
        };
        connection.identity = connection.channel_identity();
        connection
    }

    fn channel_identity(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.hostname,
            std::process::id(),
            self.connection_id,
            self.channel_seq
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect backoff; doubles on every failed attempt.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Identity of the current channel: `{hostname}/{pid}/{connection}/{channel}`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Session id put in request headers.
    pub fn session_id(&self) -> &str {
        self.config.session_id.as_deref().unwrap_or(&self.identity)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscription(&self, id: i64) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start the handshake. No-op unless disconnected.
    pub fn connect(&mut self) {
        self.connect_at(clock_now());
    }

    pub fn connect_at(&mut self, now: Instant) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.channel_seq += 1;
        self.identity = self.channel_identity();
        self.last_hb_sent = Some(now);

        if let Err(err) = self.transport.open(&self.address, &self.identity) {
            self.backoff.advance();
            warn!(
                address = %self.address,
                error = %err,
                retry_in = ?self.backoff.current(),
                "connect failed"
            );
            return;
        }

        let connect = Message::connect(self.config.client_version.clone());
        if let Err(err) = self.send_message(&connect) {
            self.reset(now, &err);
            return;
        }
        self.last_hb_received = now;
        self.set_state(ConnectionState::Connecting);
    }

    /// Send a CLIENT_HB now.
    ///
    /// # Errors
    ///
    /// `NotConnected` while disconnected. An I/O error also resets the connection.
    pub fn send_heartbeat(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(CmwLightError::NotConnected);
        }
        let now = clock_now();
        self.send_or_reset(now, &Message::ClientHeartbeat)?;
        self.last_hb_sent = Some(now);
        Ok(())
    }

    /// Register a subscription and return its id.
    ///
    /// Nothing is sent here; the SUBSCRIBE goes out on the next connected
    /// housekeeping tick.
    ///
    /// # Errors
    ///
    /// `UnsupportedFilter` if a filter value is not a string, int, long or bool.
    pub fn subscribe(
        &mut self,
        device: &str,
        property: &str,
        selector: &str,
        filters: FieldMap,
    ) -> Result<i64> {
        validate_filters(&filters)?;
        let id = self.ids.next_request_id();
        let context = RequestContext::new(selector).with_filters(filters);
        self.subscriptions.insert(Subscription::new(
            id,
            device,
            property,
            context,
            self.config.backoff(),
        ));
        debug!(id, device, property, selector, "subscription added");
        Ok(id)
    }

    /// Drop a subscription, sending UNSUBSCRIBE if it is on the wire.
    ///
    /// # Errors
    ///
    /// `UnknownSubscription` if `id` is not registered.
    pub fn unsubscribe(&mut self, id: i64) -> Result<()> {
        let subscription = self
            .subscriptions
            .remove(id)
            .ok_or(CmwLightError::UnknownSubscription(id))?;
        debug!(id, state = %subscription.state(), "subscription removed");

        if subscription.state() != SubscriptionState::Unsubscribed
            && self.state == ConnectionState::Connected
        {
            let message = Message::unsubscribe(
                self.session_id(),
                id,
                subscription.device(),
                subscription.property(),
                subscription.context().clone(),
            );
            // Fire-and-forget: a failed send only resets the connection.
            let _ = self.send_or_reset(clock_now(), &message);
        }
        Ok(())
    }

    /// Send a GET and return its request id. The reply carries the same id.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless connected; I/O errors also reset the connection.
    pub fn send_get(&mut self, device: &str, property: &str, selector: &str) -> Result<i64> {
        self.ensure_connected()?;
        let id = self.ids.next_request_id();
        let message = Message::get(
            self.session_id(),
            id,
            device,
            property,
            RequestContext::new(selector),
        );
        self.send_or_reset(clock_now(), &message)?;
        Ok(id)
    }

    /// Send a SET with an encoded body and return its request id.
    ///
    /// # Errors
    ///
    /// Same as [`send_get`](Self::send_get).
    pub fn send_set(
        &mut self,
        device: &str,
        property: &str,
        selector: &str,
        data: Bytes,
    ) -> Result<i64> {
        self.ensure_connected()?;
        let id = self.ids.next_request_id();
        let message = Message::set(
            self.session_id(),
            id,
            device,
            property,
            data,
            RequestContext::new(selector),
        );
        self.send_or_reset(clock_now(), &message)?;
        Ok(id)
    }

    /// One housekeeping step followed by at most one non-blocking read.
    ///
    /// Returns the next message for the caller, or `None` if there is none
    /// this tick. Heartbeats are consumed here. Transport failures reset the
    /// connection and are not returned.
    ///
    /// # Errors
    ///
    /// `Protocol` if the received frames are malformed.
    pub fn receive_data(&mut self) -> Result<Option<Message>> {
        self.receive_data_at(clock_now())
    }

    pub fn receive_data_at(&mut self, now: Instant) -> Result<Option<Message>> {
        if self.housekeeping(now) {
            return Ok(None);
        }

        let frames = match self.transport.try_recv() {
            Ok(Some(frames)) => frames,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.reset(now, &err);
                return Ok(None);
            }
        };
        trace!(frames = frames.len(), "received message");

        let message = match decode(&frames) {
            Ok(message) => message,
            Err(err) => {
                error!(address = %self.address, error = %err, "malformed message");
                return Err(err.into());
            }
        };

        if self.apply(now, &message) {
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Time-driven maintenance. Returns `true` if it reset the connection,
    /// in which case there is nothing to read this tick.
    pub fn housekeeping(&mut self, now: Instant) -> bool {
        let timeout = self.config.heartbeat_timeout();
        match self.state {
            ConnectionState::Disconnected => {
                let due = self
                    .last_hb_sent
                    .map_or(true, |sent| now >= sent + self.backoff.current());
                if due {
                    self.connect_at(now);
                }
                false
            }
            ConnectionState::Connecting => {
                if now > self.last_hb_received + timeout {
                    self.reset(now, &"connect acknowledgement timed out");
                    return true;
                }
                false
            }
            ConnectionState::Connected => {
                let heartbeat_due = self
                    .last_hb_sent
                    .map_or(true, |sent| now >= sent + self.config.heartbeat_interval());
                if heartbeat_due {
                    if self.send_or_reset(now, &Message::ClientHeartbeat).is_err() {
                        return true;
                    }
                    self.last_hb_sent = Some(now);
                }
                if now > self.last_hb_received + timeout {
                    self.reset(now, &"server heartbeat timed out");
                    return true;
                }
                self.advance_subscriptions(now)
            }
        }
    }

    /// Wait until the transport has data or housekeeping has work due.
    ///
    /// May return spuriously; follow with [`receive_data`](Self::receive_data).
    pub async fn readable(&mut self) {
        let wake_at = tokio::time::Instant::from_std(self.wake_at(clock_now()));
        tokio::select! {
            _ = self.transport.readable() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }

    /// Earliest instant at which `housekeeping` has something to do.
    pub fn wake_at(&self, now: Instant) -> Instant {
        let silence = self.last_hb_received + self.config.heartbeat_timeout() + EXPIRY_SLACK;
        match self.state {
            ConnectionState::Disconnected => self
                .last_hb_sent
                .map_or(now, |sent| sent + self.backoff.current()),
            ConnectionState::Connecting => silence,
            ConnectionState::Connected => {
                let heartbeat = self
                    .last_hb_sent
                    .map_or(now, |sent| sent + self.config.heartbeat_interval());
                self.subscriptions
                    .iter()
                    .filter_map(|subscription| subscription.wake_at(now))
                    .fold(heartbeat.min(silence), Instant::min)
            }
        }
    }

    fn advance_subscriptions(&mut self, now: Instant) -> bool {
        let timeout = self.config.subscription_timeout();
        let session_id = self.session_id().to_string();
        let due: Vec<Message> = self
            .subscriptions
            .iter_mut()
            .filter_map(|subscription| {
                subscription.tick(now, timeout).then(|| {
                    Message::subscribe(
                        &session_id,
                        subscription.id(),
                        subscription.device(),
                        subscription.property(),
                        subscription.context().clone(),
                    )
                })
            })
            .collect();

        for message in &due {
            if let Some(header) = message.header() {
                debug!(
                    id = header.id,
                    device = %header.device_name,
                    property = %header.property_name,
                    "subscribing"
                );
            }
            if self.send_or_reset(now, message).is_err() {
                return true;
            }
        }
        false
    }

    /// Apply the side effects of an inbound message. Returns `false` if the
    /// message is consumed here.
    fn apply(&mut self, now: Instant, message: &Message) -> bool {
        self.last_hb_received = now;
        match message {
            Message::ServerHeartbeat => {
                trace!("server heartbeat");
                false
            }
            Message::ServerConnectAck { version } => {
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Connected);
                    self.backoff.reset();
                    self.last_hb_sent = Some(now);
                    info!(
                        address = %self.address,
                        identity = %self.identity,
                        version = %version,
                        "connected"
                    );
                } else {
                    warn!(state = %self.state, "unexpected connect acknowledgement");
                }
                true
            }
            Message::Reply(reply) => {
                if self.state != ConnectionState::Connected {
                    warn!(
                        state = %self.state,
                        request_type = %reply.kind.request_type(),
                        "data received before connection established"
                    );
                }
                let id = reply.header.id;
                match &reply.kind {
                    ReplyKind::SubscribeAck { source_id } => match self.subscriptions.get_mut(id) {
                        Some(subscription) => {
                            subscription.acknowledged(*source_id);
                            debug!(id, source_id, "subscribed");
                        }
                        None => debug!(id, "acknowledgement for unknown subscription"),
                    },
                    ReplyKind::SubscribeException(exception) => {
                        self.subscription_rejected(now, id, &exception.message)
                    }
                    _ => {}
                }
                true
            }
            other => {
                warn!(message_type = %other.message_type(), "unexpected message from server");
                true
            }
        }
    }

    fn subscription_rejected(&mut self, now: Instant, id: i64, reason: &str) {
        let max_retries = self.config.subscription_max_retries;
        let Some(subscription) = self.subscriptions.get_mut(id) else {
            debug!(id, "exception for unknown subscription");
            return;
        };
        if subscription.rejected(now, max_retries) {
            warn!(
                id,
                reason,
                retries = subscription.retries(),
                retry_in = ?subscription.backoff().current(),
                "subscription rejected"
            );
        } else {
            warn!(id, reason, max_retries, "subscription dropped after repeated rejection");
            self.subscriptions.remove(id);
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(CmwLightError::NotConnected)
        }
    }

    fn send_message(&mut self, message: &Message) -> Result<()> {
        let frames = encode(message)?;
        trace!(message_type = %message.message_type(), frames = frames.len(), "sending");
        self.transport.send(frames)?;
        Ok(())
    }

    /// Send; an I/O failure resets the connection before being returned.
    fn send_or_reset(&mut self, now: Instant, message: &Message) -> Result<()> {
        let result = self.send_message(message);
        if let Err(CmwLightError::Io(err)) = &result {
            let reason = err.to_string();
            self.reset(now, &reason);
        }
        result
    }

    /// Drop the channel, double the backoff and demote every subscription.
    /// The next connect attempt is due once the backoff elapses.
    fn reset(&mut self, now: Instant, reason: &dyn fmt::Display) {
        self.backoff.advance();
        info!(
            address = %self.address,
            state = %self.state,
            reason = %reason,
            retry_in = ?self.backoff.current(),
            "connection reset"
        );
        self.transport.close();
        self.set_state(ConnectionState::Disconnected);
        self.last_hb_sent = Some(now);
        self.subscriptions.demote_all();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(address = %self.address, from = %self.state, to = %state, "state change");
            self.state = state;
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldValue;
    use crate::protocol::{ExceptionMessage, Header, Reply};
    use crate::transport::{memory_pair, MemoryPeer, MemoryTransport, PeerEvent};

    const ADDRESS: &str = "tcp://server:5000";

    fn connection() -> (Connection<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = memory_pair();
        let connection = Connection::new(
            ADDRESS,
            transport,
            ClientConfig::default(),
            IdGenerator::new(),
            "testhost".to_string(),
        );
        (connection, peer)
    }

    fn connected(now: Instant) -> (Connection<MemoryTransport>, MemoryPeer) {
        let (mut conn, mut peer) = connection();
        conn.connect_at(now);
        peer.send(&Message::ServerConnectAck {
            version: "1.0.0".into(),
        })
        .unwrap();
        assert!(conn.receive_data_at(now).unwrap().is_some());
        assert_eq!(conn.state(), ConnectionState::Connected);
        peer.drain_events();
        (conn, peer)
    }

    fn subscribe_ack(id: i64) -> Message {
        Message::Reply(Reply {
            header: Header {
                id,
                ..Header::default()
            },
            kind: ReplyKind::SubscribeAck { source_id: 1 },
        })
    }

    #[test]
    fn test_connect_opens_channel_with_identity() {
        let (mut conn, mut peer) = connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let now = Instant::now();
        conn.connect_at(now);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let identity = conn.identity().to_string();
        let parts: Vec<&str> = identity.split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "testhost");
        assert_eq!(parts[1], std::process::id().to_string());
        assert_eq!(parts[3], "1");

        let events = peer.drain_events();
        assert_eq!(
            events[0],
            PeerEvent::Opened {
                address: ADDRESS.into(),
                identity,
            }
        );
        let connect = decode(match &events[1] {
            PeerEvent::Frames(frames) => frames,
            other => panic!("unexpected event: {other:?}"),
        })
        .unwrap();
        assert_eq!(connect, Message::connect("1.0.0"));

        // Second connect is a no-op.
        conn.connect_at(now);
        assert!(peer.drain_events().is_empty());
    }

    #[test]
    fn test_refused_open_backs_off() {
        let (mut conn, peer) = connection();
        peer.refuse_connections(true);

        let now = Instant::now();
        conn.connect_at(now);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.backoff().current(), Duration::from_millis(40));

        // Not retried before the backoff elapses.
        peer.refuse_connections(false);
        assert!(conn.receive_data_at(now + Duration::from_millis(39)).unwrap().is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.receive_data_at(now + Duration::from_millis(40)).unwrap().is_none());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_each_channel_gets_new_identity() {
        let (mut conn, _peer) = connection();
        let now = Instant::now();
        conn.connect_at(now);
        let first = conn.identity().to_string();

        conn.housekeeping(now + Duration::from_millis(3001));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.housekeeping(now + Duration::from_secs(4));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_ne!(conn.identity(), first);
        assert!(conn.identity().ends_with("/2"));
    }

    #[test]
    fn test_heartbeat_consumed_and_sent() {
        let now = Instant::now();
        let (mut conn, mut peer) = connected(now);

        peer.send(&Message::ServerHeartbeat).unwrap();
        assert!(conn.receive_data_at(now).unwrap().is_none());
        assert!(peer.drain_messages().unwrap().is_empty());

        let later = now + Duration::from_millis(1000);
        peer.send(&Message::ServerHeartbeat).unwrap();
        assert!(conn.receive_data_at(later).unwrap().is_none());
        assert_eq!(peer.drain_messages().unwrap(), vec![Message::ClientHeartbeat]);
    }

    #[test]
    fn test_get_requires_connection() {
        let (mut conn, _peer) = connection();
        assert!(matches!(
            conn.send_get("DEV", "Prop", ""),
            Err(CmwLightError::NotConnected)
        ));
        assert!(matches!(
            conn.send_heartbeat(),
            Err(CmwLightError::NotConnected)
        ));
    }

    #[test]
    fn test_get_and_set_use_fresh_ids() {
        let now = Instant::now();
        let (mut conn, mut peer) = connected(now);

        let get = conn.send_get("DEV", "Prop", "FAIR.SELECTOR.ALL").unwrap();
        let set = conn
            .send_set("DEV", "Setting", "", Bytes::from_static(&[1, 2]))
            .unwrap();
        assert_ne!(get, set);

        let sent = peer.drain_messages().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header().unwrap().id, get);
        assert_eq!(sent[0].header().unwrap().session_id, conn.session_id());
        assert_eq!(sent[1].header().unwrap().id, set);
    }

    #[test]
    fn test_subscribe_rejects_unsupported_filter() {
        let (mut conn, _peer) = connection();
        let mut filters = FieldMap::new();
        filters.insert("x".into(), FieldValue::Double(1.5));
        let err = conn.subscribe("DEV", "Prop", "", filters).unwrap_err();
        assert!(matches!(err, CmwLightError::UnsupportedFilter { .. }));
        assert!(conn.subscriptions().is_empty());
    }

    #[test]
    fn test_subscribe_ack_routes_by_id() {
        let now = Instant::now();
        let (mut conn, mut peer) = connected(now);
        let first = conn.subscribe("DEV", "A", "", FieldMap::new()).unwrap();
        let second = conn.subscribe("DEV", "B", "", FieldMap::new()).unwrap();

        conn.housekeeping(now);
        assert_eq!(peer.drain_messages().unwrap().len(), 2);

        peer.send(&subscribe_ack(second)).unwrap();
        assert!(conn.receive_data_at(now).unwrap().is_some());
        assert_eq!(
            conn.subscription(first).unwrap().state(),
            SubscriptionState::Subscribing
        );
        assert_eq!(
            conn.subscription(second).unwrap().state(),
            SubscriptionState::Subscribed
        );
    }

    #[test]
    fn test_unsubscribe() {
        let now = Instant::now();
        let (mut conn, mut peer) = connected(now);
        let id = conn.subscribe("DEV", "Prop", "", FieldMap::new()).unwrap();

        // Never sent: removed silently.
        conn.unsubscribe(id).unwrap();
        assert!(peer.drain_messages().unwrap().is_empty());
        assert!(matches!(
            conn.unsubscribe(id),
            Err(CmwLightError::UnknownSubscription(_))
        ));

        let id = conn.subscribe("DEV", "Prop", "", FieldMap::new()).unwrap();
        conn.housekeeping(now);
        peer.send(&subscribe_ack(id)).unwrap();
        conn.receive_data_at(now).unwrap();
        peer.drain_events();

        conn.unsubscribe(id).unwrap();
        let sent = peer.drain_messages().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].request_type(),
            Some(crate::protocol::RequestType::Unsubscribe)
        );
        assert!(conn.subscription(id).is_none());
    }

    #[test]
    fn test_subscribe_exception_retries_then_drops() {
        let now = Instant::now();
        let (mut conn, mut peer) = connected(now);
        let id = conn.subscribe("DEV", "Prop", "", FieldMap::new()).unwrap();
        conn.housekeeping(now);

        let rejection = Message::Reply(Reply {
            header: Header {
                id,
                ..Header::default()
            },
            kind: ReplyKind::SubscribeException(ExceptionMessage {
                message: "no such property".into(),
                ..ExceptionMessage::default()
            }),
        });

        for retry in 1..=5 {
            peer.send(&rejection).unwrap();
            assert!(conn.receive_data_at(now).unwrap().is_some());
            let sub = conn.subscription(id).unwrap();
            assert_eq!(sub.retries(), retry);
            assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        }
        peer.send(&rejection).unwrap();
        conn.receive_data_at(now).unwrap();
        assert!(conn.subscription(id).is_none());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        let now = Instant::now();
        let (mut conn, peer) = connected(now);
        peer.send_frames(vec![Bytes::from_static(&[0x7f])]).unwrap();
        let err = conn.receive_data_at(now).unwrap_err();
        assert!(matches!(err, CmwLightError::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_dropped_peer_resets() {
        let now = Instant::now();
        let (mut conn, peer) = connected(now);
        drop(peer);
        assert!(conn.receive_data_at(now).unwrap().is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.backoff().current(), Duration::from_millis(40));
    }

    #[test]
    fn test_wake_at() {
        let now = Instant::now();
        let (mut conn, _peer) = connection();
        assert_eq!(conn.wake_at(now), now);

        conn.connect_at(now);
        assert_eq!(
            conn.wake_at(now),
            now + Duration::from_millis(3000) + EXPIRY_SLACK
        );

        let (mut conn, _peer) = connected(now);
        assert_eq!(conn.wake_at(now), now + Duration::from_millis(1000));
        conn.subscribe("DEV", "Prop", "", FieldMap::new()).unwrap();
        assert_eq!(conn.wake_at(now), now);
    }

    #[test]
    fn test_session_id_override() {
        let (transport, _peer) = memory_pair();
        let config = ClientConfig {
            session_id: Some("fixed".into()),
            ..ClientConfig::default()
        };
        let conn = Connection::new(ADDRESS, transport, config, IdGenerator::new(), "h".into());
        assert_eq!(conn.session_id(), "fixed");
    }
}
