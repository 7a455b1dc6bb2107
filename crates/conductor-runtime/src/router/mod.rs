//! Topic router: publish a topic, fan out to every route in the topics manifest
//!
//! Before fan-out a topic's perf policy may drop or delay the publish:
//!
//! - `dedupeWindowMs`: an identical payload seen within the window is dropped.
//!   When the topic lists `correlationKeys`, only those fields are compared.
//! - `debounceMs`: only the last publish of a burst is dispatched, once the
//!   topic has been quiet for the delay
//! - `throttleMs`: leading edge; publishes closer than the interval to the
//!   last dispatch are dropped
//!
//! Each route plays independently. A failing route is logged and does not
//! stop the others.

mod policy;

use crate::bus::{EventBus, Subscription};
use crate::config::RouterConfig;
use crate::engine::{Conductor, PlayInput};
use crate::error::PlayError;
use crate::manifest::TopicsManifest;
use crate::telemetry::{ConductorTelemetry, Counter};
use conductor_types::{Payload, Route};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use policy::{fingerprint, Decision, TopicState};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of one route's play
#[derive(Debug)]
pub struct RouteOutcome {
    pub route: Route,
    pub result: Result<Payload, PlayError>,
}

impl RouteOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What happened to a publish
#[derive(Debug)]
pub enum PublishOutcome {
    /// No plugin declares the topic; nothing ran
    UnknownTopic,
    Deduplicated,
    Throttled,
    /// Deferred; dispatch happens once the debounce delay passes quietly
    Debounced,
    /// Fanned out; one outcome per route, in manifest order
    Dispatched(Vec<RouteOutcome>),
}

impl PublishOutcome {
    /// Number of plays started by this publish
    pub fn plays(&self) -> usize {
        match self {
            PublishOutcome::Dispatched(outcomes) => outcomes.len(),
            _ => 0,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, PublishOutcome::Dispatched(_))
    }
}

struct RouterInner {
    manifest: RwLock<Arc<TopicsManifest>>,
    bus: EventBus,
    states: DashMap<String, TopicState>,
    generations: AtomicU64,
    config: RouterConfig,
    telemetry: Arc<ConductorTelemetry>,
}

/// Routes published topics to sequences. Cheap to clone.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new(
        manifest: TopicsManifest,
        bus: EventBus,
        config: &RouterConfig,
        telemetry: Arc<ConductorTelemetry>,
    ) -> Self {
        info!(topics = manifest.len(), "Event router created");
        Self {
            inner: Arc::new(RouterInner {
                manifest: RwLock::new(Arc::new(manifest)),
                bus,
                states: DashMap::new(),
                generations: AtomicU64::new(0),
                config: config.clone(),
                telemetry,
            }),
        }
    }

    /// A router sharing `conductor`'s bus, router config and counters
    pub fn for_conductor(manifest: TopicsManifest, conductor: &Conductor) -> Self {
        Self::new(
            manifest,
            conductor.bus().clone(),
            &conductor.config().router,
            Arc::clone(conductor.telemetry()),
        )
    }

    /// Publish `payload` on `topic`.
    ///
    /// Unknown topics are a logged no-op. Otherwise the perf policy is
    /// applied, bus subscribers of the topic are notified, and every route
    /// is played with the payload.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        conductor: &Conductor,
    ) -> PublishOutcome {
        let manifest = self.manifest();
        let Some(def) = manifest.get(topic) else {
            debug!(topic = %topic, "Publish on unknown topic ignored");
            return PublishOutcome::UnknownTopic;
        };

        if let Some(policy) = def.perf.as_ref().filter(|p| !p.is_empty()) {
            let decision = {
                let mut state = self.inner.states.entry(topic.to_string()).or_default();
                let decision = state.evaluate(
                    policy,
                    fingerprint(&payload, def.correlation_keys.as_deref()),
                    Instant::now(),
                    self.inner.config.dedupe_capacity,
                );
                if let Decision::Debounce(_) = decision {
                    let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
                    state.debounce_generation = generation + 1;
                    state.pending = Some(payload.clone());
                }
                (decision, state.debounce_generation)
            };

            match decision {
                (Decision::Deduplicated, _) => {
                    self.inner.telemetry.increment(Counter::PublishesSuppressed);
                    debug!(topic = %topic, "Duplicate publish suppressed");
                    return PublishOutcome::Deduplicated;
                }
                (Decision::Throttled, _) => {
                    self.inner.telemetry.increment(Counter::PublishesSuppressed);
                    debug!(topic = %topic, "Publish throttled");
                    return PublishOutcome::Throttled;
                }
                (Decision::Debounce(delay), generation) => {
                    self.schedule_debounced(topic, generation, delay, conductor.clone());
                    return PublishOutcome::Debounced;
                }
                (Decision::Dispatch, _) => {}
            }
        }

        let routes = def.routes.clone();
        drop(manifest);
        PublishOutcome::Dispatched(self.dispatch(topic, &routes, payload, conductor).await)
    }

    /// Register a raw listener for `topic` on the underlying bus.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(topic, callback)
    }

    /// Swap in a rebuilt manifest. Policy state, including pending debounced
    /// publishes, is discarded.
    pub fn reload(&self, manifest: TopicsManifest) {
        let topics = manifest.len();
        *self.inner.manifest.write() = Arc::new(manifest);
        self.inner.states.clear();
        info!(topics, "Topics manifest reloaded");
    }

    /// Current manifest snapshot
    pub fn manifest(&self) -> Arc<TopicsManifest> {
        Arc::clone(&self.inner.manifest.read())
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    async fn dispatch(
        &self,
        topic: &str,
        routes: &[Route],
        payload: Value,
        conductor: &Conductor,
    ) -> Vec<RouteOutcome> {
        self.inner.telemetry.increment(Counter::PublishesDispatched);

        // Routed sequences already play once below; their own trigger
        // subscriptions on this topic are skipped.
        let routed: HashSet<&str> = routes.iter().map(|r| r.sequence_id.as_str()).collect();
        self.inner
            .bus
            .publish_excluding(topic, &payload, |owner| routed.contains(owner));

        let plays = routes.iter().map(|route| {
            let input = PlayInput::from(payload.clone());
            async move {
                let result = conductor
                    .play(route.plugin_id.clone(), route.sequence_id.clone(), input)
                    .await;
                if let Err(e) = &result {
                    warn!(topic = %topic, route = %route, error = %e, "Routed play failed");
                }
                RouteOutcome {
                    route: route.clone(),
                    result,
                }
            }
        });

        let outcomes = join_all(plays).await;
        debug!(
            topic = %topic,
            routes = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.is_ok()).count(),
            "Publish dispatched"
        );
        outcomes
    }

    fn schedule_debounced(
        &self,
        topic: &str,
        generation: u64,
        delay: Duration,
        conductor: Conductor,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %topic, "No async runtime; debounced publish dropped");
            return;
        };

        let router = self.clone();
        let topic = topic.to_string();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;

            let payload = {
                let Some(mut state) = router.inner.states.get_mut(&topic) else {
                    return;
                };
                if state.debounce_generation != generation {
                    return;
                }
                state.pending.take()
            };
            let Some(payload) = payload else {
                return;
            };

            let routes = match router.manifest().get(&topic) {
                Some(def) => def.routes.clone(),
                None => return,
            };
            router.dispatch(&topic, &routes, payload, &conductor).await;
        });
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("topics", &self.inner.manifest.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{Beat, Movement, PerfPolicy, Sequence, TopicDef, TopicsCatalog};
    use crate::engine::HandlerMap;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_conductor(sequence_id: &str) -> (Conductor, Arc<AtomicUsize>) {
        let conductor = Conductor::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handlers = HandlerMap::new().with_fn("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        let sequence = Sequence::new(sequence_id, "")
            .with_movement(Movement::new("m").with_beat(Beat::pure(1, "counted", "count")));
        conductor.mount(sequence, &handlers, "P").unwrap();
        (conductor, count)
    }

    #[tokio::test]
    async fn test_unknown_topic_is_noop() {
        let (conductor, count) = counting_conductor("s");
        let router = EventRouter::for_conductor(TopicsManifest::default(), &conductor);

        let outcome = router.publish("nope", json!({}), &conductor).await;
        assert!(matches!(outcome, PublishOutcome::UnknownTopic));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reload_replaces_routes_and_policy_state() {
        let (conductor, count) = counting_conductor("s");
        let deduped = TopicsCatalog::default().with_topic(
            "t",
            TopicDef::new(vec![Route::new("P", "s")]).with_perf(PerfPolicy::dedupe(60_000)),
        );
        let router =
            EventRouter::for_conductor(TopicsManifest::build(&[deduped.clone()], &[]), &conductor);

        router.publish("t", json!({"a": 1}), &conductor).await;
        assert!(matches!(
            router.publish("t", json!({"a": 1}), &conductor).await,
            PublishOutcome::Deduplicated
        ));

        router.reload(TopicsManifest::build(&[deduped], &[]));
        assert_eq!(router.publish("t", json!({"a": 1}), &conductor).await.plays(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        router.reload(TopicsManifest::default());
        assert!(matches!(
            router.publish("t", json!({"a": 1}), &conductor).await,
            PublishOutcome::UnknownTopic
        ));
    }

    #[tokio::test]
    async fn test_raw_subscribers_see_dispatched_publishes() {
        let (conductor, _) = counting_conductor("s");
        let catalog =
            TopicsCatalog::default().with_topic("t", TopicDef::new(vec![Route::new("P", "s")]));
        let router = EventRouter::for_conductor(TopicsManifest::build(&[catalog], &[]), &conductor);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = router.subscribe("t", move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        });

        router.publish("t", json!({"n": 1}), &conductor).await;
        subscription.unsubscribe();
        router.publish("t", json!({"n": 2}), &conductor).await;

        assert_eq!(*seen.lock(), vec![json!({"n": 1})]);
    }
}
