//! Beat handlers, handler maps, and the input each beat receives

use crate::engine::context::SequenceContext;
use crate::error::HandlerError;
use async_trait::async_trait;
use conductor_types::Payload;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// What a handler produces: an optional object merged into the running payload
pub type HandlerResult = Result<Option<Payload>, HandlerError>;

/// A beat handler. Implementations may suspend at `.await` points; the engine
/// never pre-empts them.
#[async_trait]
pub trait BeatHandler: Send + Sync {
    async fn handle(&self, input: &BeatInput, ctx: &mut SequenceContext) -> HandlerResult;
}

/// Adapter turning a synchronous closure into a [`BeatHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> BeatHandler for FnHandler<F>
where
    F: Fn(&BeatInput, &mut SequenceContext) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, input: &BeatInput, ctx: &mut SequenceContext) -> HandlerResult {
        (self.0)(input, ctx)
    }
}

/// Wrap a synchronous closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn BeatHandler>
where
    F: Fn(&BeatInput, &mut SequenceContext) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handler name → implementation, supplied by a plugin at mount time
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Arc<dyn BeatHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn BeatHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn BeatHandler>) -> Self {
        self.insert(name, handler);
        self
    }

    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&BeatInput, &mut SequenceContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.with(name, handler_fn(f))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn BeatHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HandlerMap").field("handlers", &names).finish()
    }
}

// ── Caller-supplied callbacks ────────────────────────────────────────

/// UI notification closure carried alongside a play's payload
pub type UiCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Named callbacks (`onDragUpdate`, `onSelectionChange`, ...).
///
/// This is a fire-and-forget channel: a callback that fails or panics is
/// logged at debug level and otherwise ignored. It never fails the beat.
#[derive(Clone, Default)]
pub struct Callbacks {
    entries: HashMap<String, UiCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(callback));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke `name` if present. Returns true only if it ran to completion.
    pub fn notify(&self, name: &str, value: &Value) -> bool {
        let Some(callback) = self.entries.get(name) else {
            return false;
        };
        match catch_unwind(AssertUnwindSafe(|| callback(value))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(callback = name, error = %e, "UI callback failed; ignored");
                false
            }
            Err(_) => {
                tracing::debug!(callback = name, "UI callback panicked; ignored");
                false
            }
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Callbacks").field("names", &names).finish()
    }
}

// ── Inputs ───────────────────────────────────────────────────────────

/// Arguments to [`Conductor::play`](crate::Conductor::play)
#[derive(Clone, Debug, Default)]
pub struct PlayInput {
    pub payload: Payload,
    pub callbacks: Callbacks,
}

impl PlayInput {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(name, callback);
        self
    }
}

impl From<Payload> for PlayInput {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

/// Objects become the payload; `null` is empty; any other value is wrapped
/// as `{"value": v}`.
impl From<Value> for PlayInput {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            Value::Null => Self::default(),
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                Self::new(map)
            }
        }
    }
}

/// What every beat of one invocation receives as `data`: the caller's
/// original payload plus the fields the engine injects. It does not change
/// between beats; accumulated results live in [`SequenceContext::payload`].
#[derive(Clone, Debug)]
pub struct BeatInput {
    data: Payload,
    callbacks: Callbacks,
}

impl BeatInput {
    pub(crate) fn new(data: Payload, callbacks: Callbacks) -> Self {
        Self { data, callbacks }
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Shorthand for `callbacks().notify(..)`.
    pub fn notify(&self, callback: &str, value: &Value) -> bool {
        self.callbacks.notify(callback, value)
    }
}
