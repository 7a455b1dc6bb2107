//! Stage-crew IO capability and the gate that guards it
//!
//! Only `stage-crew` beats receive a live [`StageIo`]. A `pure` beat asking
//! for it gets a [`ResourceAccessViolation`], and the gate remembers the
//! attempt so the play fails even if the handler discards the error.

use crate::error::{IoError, ResourceAccessViolation};
use async_trait::async_trait;
use conductor_types::{Beat, BeatKind, SequenceId};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Key/value persistence reachable from stage-crew beats
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, IoError>;

    /// Like [`KvStore::get`], but a missing key is an [`IoError::NotFound`]
    async fn require(&self, key: &str) -> Result<Value, IoError> {
        self.get(key)
            .await?
            .ok_or_else(|| IoError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), IoError>;

    /// Returns the removed value, if there was one
    async fn remove(&self, key: &str) -> Result<Option<Value>, IoError>;
}

/// Process-local [`KvStore`]
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Value>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, IoError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), IoError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, IoError> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

/// The side-effecting capabilities handed to stage-crew beats
#[derive(Clone)]
pub struct StageIo {
    kv: Arc<dyn KvStore>,
}

impl StageIo {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Backed by a fresh [`MemoryKvStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }
}

impl Default for StageIo {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for StageIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageIo").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct BeatScope {
    sequence_id: SequenceId,
    beat: u32,
    event: String,
    kind: BeatKind,
}

/// Per-play gate, re-scoped before every beat
#[derive(Debug)]
pub(crate) struct ResourceGate {
    io: Arc<StageIo>,
    scope: BeatScope,
    violation: Option<ResourceAccessViolation>,
}

impl ResourceGate {
    /// A gate whose initial scope is the sequence's first beat. A sequence
    /// with no beats gets a closed (pure) gate.
    pub(crate) fn new(io: Arc<StageIo>, sequence_id: &SequenceId, first: Option<&Beat>) -> Self {
        let scope = match first {
            Some(beat) => BeatScope {
                sequence_id: sequence_id.clone(),
                beat: beat.beat,
                event: beat.event.clone(),
                kind: beat.kind,
            },
            None => BeatScope {
                sequence_id: sequence_id.clone(),
                beat: 0,
                event: String::new(),
                kind: BeatKind::Pure,
            },
        };
        Self {
            io,
            scope,
            violation: None,
        }
    }

    pub(crate) fn scope_to(&mut self, beat: &Beat) {
        self.scope.beat = beat.beat;
        self.scope.event.clone_from(&beat.event);
        self.scope.kind = beat.kind;
    }

    pub(crate) fn kind(&self) -> BeatKind {
        self.scope.kind
    }

    pub(crate) fn access(&mut self) -> Result<Arc<StageIo>, ResourceAccessViolation> {
        if self.scope.kind.may_access_io() {
            return Ok(Arc::clone(&self.io));
        }

        let violation = ResourceAccessViolation {
            sequence_id: self.scope.sequence_id.clone(),
            beat: self.scope.beat,
            event: self.scope.event.clone(),
            kind: self.scope.kind,
        };
        if self.violation.is_none() {
            self.violation = Some(violation.clone());
        }
        Err(violation)
    }

    pub(crate) fn take_violation(&mut self) -> Option<ResourceAccessViolation> {
        self.violation.take()
    }
}
