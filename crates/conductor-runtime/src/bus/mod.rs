//! Event bus: process-local publish/subscribe keyed by topic string
//!
//! Same-topic subscribers run in subscription order. Nothing is promised about
//! ordering across topics. Every publish iterates a snapshot of the subscriber
//! list, so callbacks may subscribe or unsubscribe freely while being invoked;
//! subscribers added during a publish do not see that publish.
//!
//! A subscription may carry an owner tag. The router uses it to keep a
//! routed sequence's own trigger subscription from playing it a second time.

use crate::config::BusConfig;
use crate::telemetry::{ConductorTelemetry, Counter};
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Callback invoked for every publish on a subscribed topic
pub type BusCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    owner: Option<String>,
    callback: BusCallback,
}

struct BusInner {
    topics: DashMap<String, Vec<Subscriber>>,
    config: BusConfig,
    telemetry: Arc<ConductorTelemetry>,
}

impl BusInner {
    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut removed = false;
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed = subscribers.len() != before;
        }
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        removed
    }
}

/// Topic-keyed publish/subscribe primitive. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: &BusConfig, telemetry: Arc<ConductorTelemetry>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                config: config.clone(),
                telemetry,
            }),
        }
    }

    /// Register `callback` for `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_arc(topic, Arc::new(callback))
    }

    pub fn subscribe_arc(&self, topic: impl Into<String>, callback: BusCallback) -> Subscription {
        self.insert(topic.into(), None, callback)
    }

    /// Register `callback` for `topic`, tagged with `owner`.
    pub fn subscribe_owned<F>(
        &self,
        topic: impl Into<String>,
        owner: impl Into<String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(topic.into(), Some(owner.into()), Arc::new(callback))
    }

    fn insert(&self, topic: String, owner: Option<String>, callback: BusCallback) -> Subscription {
        let id = SubscriptionId::generate();

        debug!(
            topic = %topic,
            subscription_id = %id,
            owner = owner.as_deref().unwrap_or("-"),
            "Bus subscription registered"
        );

        self.inner.topics.entry(topic.clone()).or_default().push(Subscriber {
            id,
            owner,
            callback,
        });

        Subscription {
            id,
            topic,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `payload` to the current subscribers of `topic`.
    ///
    /// Failing or panicking subscribers are logged and skipped. Returns the
    /// number of subscribers that completed successfully.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        self.publish_excluding(topic, payload, |_| false)
    }

    /// Like [`EventBus::publish`], but skips owned subscriptions whose owner
    /// matches `skip`. Untagged subscriptions always receive the payload.
    pub fn publish_excluding<S>(&self, topic: &str, payload: &Value, skip: S) -> usize
    where
        S: Fn(&str) -> bool,
    {
        // Clone out of the map so no shard lock is held while callbacks run.
        let snapshot: Vec<Subscriber> = match self.inner.topics.get(topic) {
            Some(subscribers) => subscribers
                .iter()
                .filter(|s| !s.owner.as_deref().is_some_and(&skip))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if snapshot.is_empty() {
            if self.inner.config.warn_on_empty_publish {
                warn!(topic = %topic, "Published to topic with no subscribers");
            }
            return 0;
        }

        let mut delivered = 0;
        for subscriber in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(payload)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    self.inner.telemetry.increment(Counter::BusSubscriberFailures);
                    warn!(
                        topic = %topic,
                        subscription_id = %subscriber.id,
                        error = %e,
                        "Bus subscriber failed"
                    );
                }
                Err(_) => {
                    self.inner.telemetry.increment(Counter::BusSubscriberFailures);
                    warn!(
                        topic = %topic,
                        subscription_id = %subscriber.id,
                        "Bus subscriber panicked"
                    );
                }
            }
        }

        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&BusConfig::default(), Arc::new(ConductorTelemetry::default()))
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription. Returns false if it was already gone or the
    /// bus no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => {
                let removed = bus.remove(&self.topic, self.id);
                debug!(topic = %self.topic, subscription_id = %self.id, "Bus subscription removed");
                removed
            }
            None => false,
        }
    }
}
