//! The Conductor: mounts sequences and plays them beat by beat

use crate::bus::{EventBus, Subscription};
use crate::config::ConductorConfig;
use crate::engine::context::SequenceContext;
use crate::engine::handler::{BeatInput, HandlerMap, PlayInput};
use crate::engine::io::StageIo;
use crate::engine::registry::{MountedSequence, SequenceRegistry};
use crate::error::{ConductorError, HandlerError, PlayError};
use crate::manifest::InteractionManifest;
use crate::plugin::PluginRegistration;
use crate::telemetry::{ConductorTelemetry, Counter};
use conductor_types::{merge_into, CorrelationId, Payload, PluginId, Sequence, SequenceId};
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn, Instrument};

pub(crate) type RegistrationSlot = Arc<OnceCell<PluginRegistration>>;

pub(crate) struct ConductorInner {
    config: ConductorConfig,
    registry: SequenceRegistry,
    bus: EventBus,
    io: Arc<StageIo>,
    telemetry: Arc<ConductorTelemetry>,
    registrations: DashMap<PluginId, RegistrationSlot>,
}

/// Sequence engine handle. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Conductor {
    inner: Arc<ConductorInner>,
}

impl Conductor {
    /// A conductor whose stage-crew beats get an in-memory store
    pub fn new(config: ConductorConfig) -> Self {
        Self::with_io(config, StageIo::in_memory())
    }

    pub fn with_io(config: ConductorConfig, io: StageIo) -> Self {
        let telemetry = Arc::new(ConductorTelemetry::new(&config.telemetry));
        let bus = EventBus::new(&config.bus, Arc::clone(&telemetry));

        info!(
            correlation_key = %config.engine.correlation_key,
            subscribe_triggers = config.engine.subscribe_triggers,
            "Conductor created"
        );

        Self {
            inner: Arc::new(ConductorInner {
                config,
                registry: SequenceRegistry::default(),
                bus,
                io: Arc::new(io),
                telemetry,
                registrations: DashMap::new(),
            }),
        }
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register `sequence` under its id.
    ///
    /// Every beat's handler must be present in `handlers`, otherwise nothing
    /// is registered and [`ConductorError::HandlerNotFound`] is returned.
    /// Mounting an id that is already present replaces the old entry,
    /// including its trigger subscriptions.
    pub fn mount(
        &self,
        sequence: Sequence,
        handlers: &HandlerMap,
        plugin_id: impl Into<PluginId>,
    ) -> Result<(), ConductorError> {
        let plugin_id = plugin_id.into();
        let mounted = match MountedSequence::resolve(sequence, handlers, plugin_id.clone()) {
            Ok(mounted) => Arc::new(mounted),
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "Sequence mount rejected");
                return Err(e);
            }
        };

        let previous = self
            .inner
            .registry
            .install(Arc::clone(&mounted), |m| self.subscribe_triggers(m));

        match previous {
            Some(old) if old.plugin_id() != &plugin_id => warn!(
                sequence_id = %mounted.id(),
                previous_plugin = %old.plugin_id(),
                plugin_id = %plugin_id,
                "Sequence re-mounted by a different plugin; last mount wins"
            ),
            Some(_) => debug!(
                sequence_id = %mounted.id(),
                plugin_id = %plugin_id,
                "Sequence re-mounted"
            ),
            None => {
                self.inner.telemetry.increment(Counter::SequencesMounted);
                info!(
                    sequence_id = %mounted.id(),
                    plugin_id = %plugin_id,
                    beats = mounted.steps().len(),
                    "Sequence mounted"
                );
            }
        }

        Ok(())
    }

    /// Remove a sequence and its trigger subscriptions. In-flight plays keep
    /// the entry they already resolved.
    pub fn unmount(&self, sequence_id: &SequenceId) -> bool {
        let removed = self.inner.registry.remove(sequence_id).is_some();
        if removed {
            info!(sequence_id = %sequence_id, "Sequence unmounted");
        }
        removed
    }

    pub fn is_mounted(&self, sequence_id: &SequenceId) -> bool {
        self.inner.registry.contains(sequence_id)
    }

    pub fn sequence_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Mounted sequence ids, sorted
    pub fn mounted_sequences(&self) -> Vec<SequenceId> {
        self.inner.registry.ids()
    }

    pub fn mounted(&self, sequence_id: &SequenceId) -> Option<Arc<MountedSequence>> {
        self.inner.registry.get(sequence_id)
    }

    /// Number of live bus subscriptions installed for the sequence's triggers
    pub fn trigger_subscription_count(&self, sequence_id: &SequenceId) -> usize {
        self.inner.registry.trigger_count(sequence_id)
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Run every beat of the sequence in order.
    ///
    /// Returns the accumulated payload. On failure the error carries the
    /// payload produced so far; the sequence stays mounted.
    pub async fn play(
        &self,
        plugin_id: impl Into<PluginId>,
        sequence_id: impl Into<SequenceId>,
        input: impl Into<PlayInput>,
    ) -> Result<Payload, PlayError> {
        let plugin_id = plugin_id.into();
        let sequence_id = sequence_id.into();
        let correlation_id = CorrelationId::generate();

        let span = tracing::info_span!(
            "play",
            plugin_id = %plugin_id,
            sequence_id = %sequence_id,
            correlation_id = %correlation_id.short(),
        );

        self.run(plugin_id, sequence_id, correlation_id, input.into(), span.clone())
            .instrument(span)
            .await
    }

    /// Resolve `key` through `manifest` and play the route's sequence.
    pub async fn play_interaction(
        &self,
        manifest: &InteractionManifest,
        key: &str,
        input: impl Into<PlayInput>,
    ) -> Result<Payload, PlayError> {
        let route = manifest.resolve(key)?.clone();
        debug!(interaction = key, route = %route, "Interaction resolved");
        self.play(route.plugin_id, route.sequence_id, input).await
    }

    async fn run(
        &self,
        plugin_id: PluginId,
        sequence_id: SequenceId,
        correlation_id: CorrelationId,
        input: PlayInput,
        span: tracing::Span,
    ) -> Result<Payload, PlayError> {
        let telemetry = &self.inner.telemetry;
        telemetry.increment(Counter::PlaysStarted);

        let Some(mounted) = self.inner.registry.get(&sequence_id) else {
            telemetry.increment(Counter::PlaysFailed);
            warn!("Play requested for unmounted sequence");
            return Err(ConductorError::SequenceNotFound {
                plugin_id,
                sequence_id,
            }
            .into());
        };

        if mounted.plugin_id() != &plugin_id {
            debug!(owner = %mounted.plugin_id(), "Sequence owned by a different plugin");
        }

        let PlayInput { payload, callbacks } = input;

        let mut data = payload.clone();
        data.insert(
            self.inner.config.engine.correlation_key.clone(),
            Value::String(correlation_id.to_string()),
        );
        let beat_input = BeatInput::new(data, callbacks);

        let steps = mounted.steps();
        let mut ctx = SequenceContext::new(
            self.clone(),
            plugin_id,
            sequence_id.clone(),
            correlation_id,
            payload,
            Arc::clone(&self.inner.io),
            steps.first().map(|s| &s.beat),
            span,
        );

        debug!(beats = steps.len(), "Play started");

        for (index, step) in steps.iter().enumerate() {
            let beat = &step.beat;
            ctx.enter_beat(&step.movement, index, beat);

            if self.inner.config.engine.trace_beats {
                debug!(
                    movement = %step.movement,
                    beat = beat.beat,
                    event = %beat.event,
                    handler = %beat.handler,
                    kind = %beat.kind,
                    "Beat started"
                );
            }

            let outcome = AssertUnwindSafe(step.handler.handle(&beat_input, &mut ctx))
                .catch_unwind()
                .await;
            telemetry.increment(Counter::BeatsExecuted);

            // A recorded gate violation fails the play even if the handler
            // swallowed the error and returned Ok.
            if let Some(violation) = ctx.take_violation() {
                telemetry.increment(Counter::GateViolations);
                telemetry.increment(Counter::PlaysFailed);
                error!(
                    beat = beat.beat,
                    event = %beat.event,
                    "Play aborted by resource access violation"
                );
                return Err(PlayError::new(violation.into(), ctx.into_payload()));
            }

            let failure = match outcome {
                Ok(Ok(Some(fragment))) => {
                    merge_into(ctx.payload_mut(), fragment);
                    continue;
                }
                Ok(Ok(None)) => continue,
                Ok(Err(HandlerError::ResourceAccess(violation))) => {
                    telemetry.increment(Counter::GateViolations);
                    ConductorError::ResourceAccess(violation)
                }
                Ok(Err(e)) => ConductorError::HandlerExecution {
                    sequence_id: sequence_id.clone(),
                    beat: beat.beat,
                    event: beat.event.clone(),
                    handler: beat.handler.clone(),
                    message: e.to_string(),
                },
                Err(panic) => ConductorError::HandlerExecution {
                    sequence_id: sequence_id.clone(),
                    beat: beat.beat,
                    event: beat.event.clone(),
                    handler: beat.handler.clone(),
                    message: panic_message(&*panic),
                },
            };

            telemetry.increment(Counter::PlaysFailed);
            error!(
                beat = beat.beat,
                event = %beat.event,
                handler = %beat.handler,
                error = %failure,
                "Play failed"
            );
            return Err(PlayError::new(failure, ctx.into_payload()));
        }

        telemetry.increment(Counter::PlaysSucceeded);
        debug!("Play completed");
        Ok(ctx.into_payload())
    }

    fn subscribe_triggers(&self, mounted: &MountedSequence) -> Vec<Subscription> {
        if !self.inner.config.engine.subscribe_triggers {
            return Vec::new();
        }

        mounted
            .sequence()
            .events
            .triggers
            .iter()
            .map(|topic| {
                let conductor = Arc::downgrade(&self.inner);
                let plugin_id = mounted.plugin_id().clone();
                let sequence_id = mounted.id().clone();

                let owner = sequence_id.to_string();
                self.inner.bus.subscribe_owned(topic.clone(), owner, move |payload: &Value| {
                    let Some(inner) = conductor.upgrade() else {
                        return Ok(());
                    };
                    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                        anyhow::anyhow!("no async runtime to play triggered sequence {sequence_id}")
                    })?;

                    let conductor = Conductor { inner };
                    let plugin_id = plugin_id.clone();
                    let sequence_id = sequence_id.clone();
                    let input = PlayInput::from(payload.clone());
                    handle.spawn(async move {
                        let result = conductor.play(plugin_id, sequence_id.clone(), input).await;
                        if let Err(e) = result {
                            warn!(sequence_id = %sequence_id, error = %e, "Triggered play failed");
                        }
                    });
                    Ok(())
                })
            })
            .collect()
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    pub fn telemetry(&self) -> &Arc<ConductorTelemetry> {
        &self.inner.telemetry
    }

    /// Completed registration for `plugin_id`, if any
    pub fn registration(&self, plugin_id: &PluginId) -> Option<PluginRegistration> {
        self.inner
            .registrations
            .get(plugin_id)
            .and_then(|slot| slot.get().cloned())
    }

    pub(crate) fn registration_slot(&self, plugin_id: &PluginId) -> RegistrationSlot {
        Arc::clone(
            self.inner
                .registrations
                .entry(plugin_id.clone())
                .or_default()
                .value(),
        )
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new(ConductorConfig::default())
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("sequences", &self.inner.registry.len())
            .field("plugins", &self.inner.registrations.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
