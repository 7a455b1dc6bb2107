//! Per-play sequence context

use crate::engine::conductor::Conductor;
use crate::engine::io::{ResourceGate, StageIo};
use crate::error::ResourceAccessViolation;
use conductor_types::{Beat, BeatKind, CorrelationId, Payload, PluginId, SequenceId};
use serde_json::Value;
use std::sync::Arc;

/// Position of the beat currently executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatPosition {
    pub movement: String,
    /// Zero-based index into the flattened beat list
    pub index: usize,
    pub beat: u32,
    pub event: String,
    pub handler: String,
    pub kind: BeatKind,
}

/// State shared by every beat of one `play`.
///
/// Created when the play starts and dropped when it ends. Two concurrent
/// plays never share a context.
pub struct SequenceContext {
    conductor: Conductor,
    plugin_id: PluginId,
    sequence_id: SequenceId,
    correlation_id: CorrelationId,
    payload: Payload,
    gate: ResourceGate,
    span: tracing::Span,
    position: Option<BeatPosition>,
}

impl SequenceContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conductor: Conductor,
        plugin_id: PluginId,
        sequence_id: SequenceId,
        correlation_id: CorrelationId,
        payload: Payload,
        io: Arc<StageIo>,
        first_beat: Option<&Beat>,
        span: tracing::Span,
    ) -> Self {
        let gate = ResourceGate::new(io, &sequence_id, first_beat);
        Self {
            conductor,
            plugin_id,
            sequence_id,
            correlation_id,
            payload,
            gate,
            span,
            position: None,
        }
    }

    /// Accumulated payload: the caller's input plus every merged handler result
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.payload.insert(key.into(), value);
    }

    /// The IO capability.
    ///
    /// Fails with a [`ResourceAccessViolation`] for anything but a
    /// `stage-crew` beat. The attempt is recorded and fails the play
    /// regardless of what the handler does with the error.
    pub fn io(&mut self) -> Result<Arc<StageIo>, ResourceAccessViolation> {
        let result = self.gate.access();
        if let Err(violation) = &result {
            tracing::error!(
                parent: &self.span,
                error = %violation,
                "Pure beat attempted io access"
            );
        }
        result
    }

    /// The owning conductor, for nested plays
    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    /// Structured logger scoped to this play. Events recorded under it carry
    /// the plugin, sequence and correlation ids.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn sequence_id(&self) -> &SequenceId {
        &self.sequence_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn position(&self) -> Option<&BeatPosition> {
        self.position.as_ref()
    }

    /// Kind the gate is currently scoped to
    pub fn kind(&self) -> BeatKind {
        self.gate.kind()
    }

    pub(crate) fn enter_beat(&mut self, movement: &str, index: usize, beat: &Beat) {
        self.gate.scope_to(beat);
        self.position = Some(BeatPosition {
            movement: movement.to_string(),
            index,
            beat: beat.beat,
            event: beat.event.clone(),
            handler: beat.handler.clone(),
            kind: beat.kind,
        });
    }

    pub(crate) fn take_violation(&mut self) -> Option<ResourceAccessViolation> {
        self.gate.take_violation()
    }

    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }
}

impl std::fmt::Debug for SequenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceContext")
            .field("plugin_id", &self.plugin_id)
            .field("sequence_id", &self.sequence_id)
            .field("correlation_id", &self.correlation_id)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
