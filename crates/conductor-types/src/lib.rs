//! Core type definitions for the Conductor
//!
//! A plugin describes an interaction as a [`Sequence`]: ordered
//! [`Movement`]s, each an ordered list of [`Beat`]s. Every beat binds an event
//! name to a handler name and declares whether it is a `pure` payload
//! transform or a `stage-crew` beat that may touch external resources.
//!
//! Cross-plugin wiring is described by two manifests:
//!
//! - [`InteractionCatalog`] maps an interaction key to exactly one [`Route`]
//! - [`TopicsCatalog`] maps a topic to a [`TopicDef`] (fan-out routes plus an
//!   optional [`PerfPolicy`])
//!
//! This crate holds only data. Resolution, mounting and execution live in
//! `conductor-runtime`.

#![deny(unsafe_code)]

pub mod error;
pub mod ids;
pub mod manifest;
pub mod payload;
pub mod sequence;

pub use error::CatalogError;
pub use ids::{CorrelationId, PluginId, SequenceId};
pub use manifest::{
    InteractionCatalog, PerfPolicy, Route, TopicDef, TopicVisibility, TopicsCatalog,
};
pub use payload::{merge_into, Payload};
pub use sequence::{Beat, BeatKind, Movement, Sequence, SequenceCatalog, SequenceEvents};
