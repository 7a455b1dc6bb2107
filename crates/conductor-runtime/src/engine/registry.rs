//! Sequence registry: sequence id → mounted sequence

use crate::bus::Subscription;
use crate::engine::handler::{BeatHandler, HandlerMap};
use crate::error::ConductorError;
use chrono::{DateTime, Utc};
use conductor_types::{Beat, PluginId, Sequence, SequenceId};
use dashmap::DashMap;
use std::sync::Arc;

/// A beat with its handler already resolved
#[derive(Clone)]
pub struct MountedBeat {
    pub movement: String,
    pub beat: Beat,
    pub handler: Arc<dyn BeatHandler>,
}

impl std::fmt::Debug for MountedBeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedBeat")
            .field("movement", &self.movement)
            .field("beat", &self.beat)
            .finish_non_exhaustive()
    }
}

/// A validated sequence ready to play
#[derive(Debug)]
pub struct MountedSequence {
    sequence: Sequence,
    plugin_id: PluginId,
    steps: Vec<MountedBeat>,
    mounted_at: DateTime<Utc>,
}

impl MountedSequence {
    /// Resolve every beat's handler. Fails on the first name missing from
    /// `handlers`; nothing partial is produced.
    pub fn resolve(
        sequence: Sequence,
        handlers: &HandlerMap,
        plugin_id: PluginId,
    ) -> Result<Self, ConductorError> {
        if sequence.id.0.trim().is_empty() {
            return Err(ConductorError::InvalidSequence(format!(
                "sequence from plugin {plugin_id} has an empty id"
            )));
        }

        let mut movement_ids = std::collections::HashSet::new();
        for movement in &sequence.movements {
            if !movement.id.is_empty() && !movement_ids.insert(movement.id.as_str()) {
                tracing::warn!(
                    sequence_id = %sequence.id,
                    movement = %movement.id,
                    "Duplicate movement id; beats still run in array order"
                );
            }
        }

        let mut steps = Vec::with_capacity(sequence.beat_count());
        for movement in &sequence.movements {
            for beat in &movement.beats {
                let handler = handlers.get(&beat.handler).ok_or_else(|| {
                    ConductorError::HandlerNotFound {
                        sequence_id: sequence.id.clone(),
                        beat: beat.beat,
                        event: beat.event.clone(),
                        handler: beat.handler.clone(),
                    }
                })?;
                steps.push(MountedBeat {
                    movement: movement.id.clone(),
                    beat: beat.clone(),
                    handler: Arc::clone(handler),
                });
            }
        }

        Ok(Self {
            sequence,
            plugin_id,
            steps,
            mounted_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &SequenceId {
        &self.sequence.id
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn steps(&self) -> &[MountedBeat] {
        &self.steps
    }

    pub fn mounted_at(&self) -> DateTime<Utc> {
        self.mounted_at
    }
}

/// Registry of mounted sequences and their trigger subscriptions
#[derive(Default)]
pub(crate) struct SequenceRegistry {
    entries: DashMap<SequenceId, Arc<MountedSequence>>,
    triggers: DashMap<SequenceId, Vec<Subscription>>,
}

impl SequenceRegistry {
    /// Swap `mounted` into its slot.
    ///
    /// The previous entry's trigger subscriptions are removed before
    /// `subscribe` installs the new ones, all under the slot's lock, so a
    /// sequence never holds more than one subscription per trigger.
    pub(crate) fn install<F>(
        &self,
        mounted: Arc<MountedSequence>,
        subscribe: F,
    ) -> Option<Arc<MountedSequence>>
    where
        F: FnOnce(&MountedSequence) -> Vec<Subscription>,
    {
        let id = mounted.id().clone();
        let mut slot = self.triggers.entry(id.clone()).or_default();
        for subscription in slot.drain(..) {
            subscription.unsubscribe();
        }
        *slot = subscribe(&mounted);
        let previous = self.entries.insert(id, mounted);
        drop(slot);
        previous
    }

    pub(crate) fn remove(&self, id: &SequenceId) -> Option<Arc<MountedSequence>> {
        if let Some((_, subscriptions)) = self.triggers.remove(id) {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        }
        self.entries.remove(id).map(|(_, mounted)| mounted)
    }

    pub(crate) fn get(&self, id: &SequenceId) -> Option<Arc<MountedSequence>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn contains(&self, id: &SequenceId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn ids(&self) -> Vec<SequenceId> {
        let mut ids: Vec<SequenceId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn trigger_count(&self, id: &SequenceId) -> usize {
        self.triggers.get(id).map(|s| s.len()).unwrap_or(0)
    }
}
