//! Subscription bookkeeping for one connection.
//!
//! Each subscription walks `Unsubscribed -> Subscribing -> Subscribed`.
//! An unacknowledged SUBSCRIBE times out back to `Unsubscribed` and is
//! resent after a per-subscription backoff. A connection reset demotes every
//! subscription to `Unsubscribed` so it is sent again from scratch.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::backoff::Backoff;
use crate::codec::FieldMap;
use crate::protocol::RequestContext;

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Not on the wire; a SUBSCRIBE is sent once the deadline passes.
    Unsubscribed,
    /// SUBSCRIBE sent, waiting for the acknowledgement.
    Subscribing,
    /// Acknowledged by the server.
    Subscribed,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Unsubscribed => "Unsubscribed",
            SubscriptionState::Subscribing => "Subscribing",
            SubscriptionState::Subscribed => "Subscribed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One standing subscription to a device property.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: i64,
    device: String,
    property: String,
    context: RequestContext,
    state: SubscriptionState,
    backoff: Backoff,
    /// `None` means due immediately.
    deadline: Option<Instant>,
    retries: u32,
    source_id: Option<i64>,
}

impl Subscription {
    pub(crate) fn new(
        id: i64,
        device: &str,
        property: &str,
        context: RequestContext,
        backoff: Backoff,
    ) -> Self {
        Self {
            id,
            device: device.to_string(),
            property: property.to_string(),
            context,
            state: SubscriptionState::Unsubscribed,
            backoff,
            deadline: None,
            retries: 0,
            source_id: None,
        }
    }

    /// Subscription id, also used as the request id of its SUBSCRIBE.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn selector(&self) -> &str {
        &self.context.selector
    }

    pub fn filters(&self) -> &FieldMap {
        &self.context.filters
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// SUBSCRIBE_EXCEPTIONs since the last acknowledgement.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Source id from the acknowledgement, once subscribed.
    pub fn source_id(&self) -> Option<i64> {
        self.source_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn is_due(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |deadline| now >= deadline)
    }

    /// When the next `tick` has work to do, `None` while subscribed.
    pub(crate) fn wake_at(&self, now: Instant) -> Option<Instant> {
        match self.state {
            SubscriptionState::Subscribed => None,
            _ => Some(self.deadline.unwrap_or(now)),
        }
    }

    /// Advance on a connected tick. Returns `true` if a SUBSCRIBE must be sent now.
    pub(crate) fn tick(&mut self, now: Instant, subscription_timeout: Duration) -> bool {
        match self.state {
            SubscriptionState::Subscribing if self.is_due(now) => {
                self.backoff.advance();
                self.state = SubscriptionState::Unsubscribed;
                self.deadline = Some(now + self.backoff.current());
                tracing::warn!(
                    id = self.id,
                    device = %self.device,
                    property = %self.property,
                    retry_in = ?self.backoff.current(),
                    "subscription timed out"
                );
                false
            }
            SubscriptionState::Unsubscribed if self.is_due(now) => {
                self.state = SubscriptionState::Subscribing;
                self.deadline = Some(now + subscription_timeout);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn acknowledged(&mut self, source_id: i64) {
        self.state = SubscriptionState::Subscribed;
        self.backoff.reset();
        self.deadline = None;
        self.retries = 0;
        self.source_id = Some(source_id);
    }

    /// Handle a SUBSCRIBE_EXCEPTION. Returns `false` once retries are exhausted.
    pub(crate) fn rejected(&mut self, now: Instant, max_retries: u32) -> bool {
        self.retries += 1;
        if self.retries > max_retries {
            return false;
        }
        self.backoff.advance();
        self.state = SubscriptionState::Unsubscribed;
        self.deadline = Some(now + self.backoff.current());
        true
    }

    /// Forget wire state after a connection reset.
    pub(crate) fn demote(&mut self) {
        self.state = SubscriptionState::Unsubscribed;
        self.deadline = None;
        self.backoff.reset();
        self.source_id = None;
    }
}

/// Subscriptions of one connection, keyed by id.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: BTreeMap<i64, Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, subscription: Subscription) {
        self.entries.insert(subscription.id, subscription);
    }

    pub(crate) fn get_mut(&mut self, id: i64) -> Option<&mut Subscription> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: i64) -> Option<Subscription> {
        self.entries.remove(&id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> {
        self.entries.values_mut()
    }

    pub(crate) fn demote_all(&mut self) {
        for subscription in self.entries.values_mut() {
            subscription.demote();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn subscription() -> Subscription {
        Subscription::new(
            1,
            "GSCD001",
            "SnoopTriggerEvents",
            RequestContext::new("FAIR.SELECTOR.ALL"),
            Backoff::default(),
        )
    }

    #[test]
    fn test_new_subscription_is_due() {
        let mut sub = subscription();
        let now = Instant::now();
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert!(sub.tick(now, TIMEOUT));
        assert_eq!(sub.state(), SubscriptionState::Subscribing);
        assert_eq!(sub.deadline(), Some(now + TIMEOUT));
        // Only sent once while waiting.
        assert!(!sub.tick(now + Duration::from_millis(10), TIMEOUT));
    }

    #[test]
    fn test_timeout_backs_off() {
        let mut sub = subscription();
        let now = Instant::now();
        sub.tick(now, TIMEOUT);

        let later = now + TIMEOUT;
        assert!(!sub.tick(later, TIMEOUT));
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert_eq!(sub.backoff().current(), Duration::from_millis(40));
        assert_eq!(sub.deadline(), Some(later + Duration::from_millis(40)));

        assert!(!sub.tick(later + Duration::from_millis(39), TIMEOUT));
        assert!(sub.tick(later + Duration::from_millis(40), TIMEOUT));
    }

    #[test]
    fn test_acknowledged_resets_backoff() {
        let mut sub = subscription();
        let now = Instant::now();
        sub.tick(now, TIMEOUT);
        sub.tick(now + TIMEOUT, TIMEOUT);
        sub.acknowledged(9);
        assert_eq!(sub.state(), SubscriptionState::Subscribed);
        assert_eq!(sub.backoff().current(), Duration::from_millis(20));
        assert_eq!(sub.source_id(), Some(9));
        assert!(!sub.tick(now + TIMEOUT * 10, TIMEOUT));
    }

    #[test]
    fn test_rejected_bounded() {
        let mut sub = subscription();
        let now = Instant::now();
        assert!(sub.rejected(now, 2));
        assert!(sub.rejected(now, 2));
        assert!(!sub.rejected(now, 2));
        assert_eq!(sub.retries(), 3);
    }

    #[test]
    fn test_demote_all() {
        let mut subs = Subscriptions::new();
        let mut sub = subscription();
        sub.acknowledged(1);
        subs.insert(sub);

        subs.demote_all();
        let sub = subs.get(1).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert_eq!(sub.deadline(), None);
        assert_eq!(sub.source_id(), None);
    }
}
