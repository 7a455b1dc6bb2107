//! Error types for the Conductor runtime

use conductor_types::{BeatKind, CatalogError, Payload, PluginId, SequenceId};
use thiserror::Error;

/// The Conductor's error taxonomy. None of these are process-fatal.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Unknown interaction key; a caller bug surfaced to the caller
    #[error("no route for interaction key: {0}")]
    RouteNotFound(String),

    #[error("sequence not mounted: {sequence_id} (requested by plugin {plugin_id})")]
    SequenceNotFound {
        plugin_id: PluginId,
        sequence_id: SequenceId,
    },

    /// Mount-time contract violation; nothing was registered
    #[error("handler '{handler}' not found for beat {beat} ({event}) of sequence {sequence_id}")]
    HandlerNotFound {
        sequence_id: SequenceId,
        beat: u32,
        event: String,
        handler: String,
    },

    #[error("invalid sequence definition: {0}")]
    InvalidSequence(String),

    /// A `pure` beat reached for the IO capability
    #[error(transparent)]
    ResourceAccess(#[from] ResourceAccessViolation),

    /// Any other handler failure; the sequence stays mounted
    #[error("handler '{handler}' failed at beat {beat} ({event}) of {sequence_id}: {message}")]
    HandlerExecution {
        sequence_id: SequenceId,
        beat: u32,
        event: String,
        handler: String,
        message: String,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Raised at the point a `pure` beat touches `ctx.io()`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("resource access violation: {kind} beat {beat} ({event}) of {sequence_id} used io")]
pub struct ResourceAccessViolation {
    pub sequence_id: SequenceId,
    pub beat: u32,
    pub event: String,
    pub kind: BeatKind,
}

/// A failed `play`: the error plus whatever payload earlier beats produced.
///
/// The partial payload is diagnostic only; nothing is rolled back.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PlayError {
    #[source]
    pub error: ConductorError,
    pub partial_payload: Payload,
}

impl PlayError {
    pub fn new(error: ConductorError, partial_payload: Payload) -> Self {
        Self {
            error,
            partial_payload,
        }
    }

    pub fn is_resource_violation(&self) -> bool {
        matches!(self.error, ConductorError::ResourceAccess(_))
    }

    pub fn is_sequence_not_found(&self) -> bool {
        matches!(self.error, ConductorError::SequenceNotFound { .. })
    }
}

impl From<ConductorError> for PlayError {
    fn from(error: ConductorError) -> Self {
        Self::new(error, Payload::new())
    }
}

/// What a beat handler may fail with
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    ResourceAccess(#[from] ResourceAccessViolation),

    #[error("io error: {0}")]
    Io(#[from] IoError),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors from the stage-crew IO capability
#[derive(Error, Debug)]
pub enum IoError {
    #[error("key not found: {0}")]
    NotFound(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to initialise tracing: {0}")]
    Tracing(String),
}
