//! # Conductor Runtime
//!
//! A declarative event-sequencing engine for plugin-based UIs.
//!
//! ## Overview
//!
//! Plugins describe user-facing interactions as **sequences**: ordered
//! movements of beats, where each beat names an event and the handler that
//! runs for it. The runtime mounts those sequences, plays them in strict
//! beat order, and wires plugins together through two manifests:
//!
//! - the **interaction manifest** maps an interaction key to one route
//! - the **topics manifest** maps a topic to fan-out routes with optional
//!   throttle, debounce and dedupe policies
//!
//! Beats are either `pure` (payload transforms) or `stage-crew` (may touch
//! external resources). Only stage-crew beats receive a live IO capability.
//!
//! ## Architecture
//!
//! ```text
//! UI action ──► InteractionManifest ──► Conductor::play ──► beat 1 ► beat 2 ► ...
//!                                            ▲
//! publish(topic) ──► EventRouter ── perf ────┘ (one play per route)
//!                        │
//!                        └──► EventBus subscribers / sequence triggers
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use conductor_runtime::{config::ConductorConfig, Conductor, HandlerMap};
//! use conductor_types::{Beat, Movement, Sequence};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conductor = Conductor::new(ConductorConfig::default());
//!
//!     let sequence = Sequence::new("canvas-component-select", "Select")
//!         .with_movement(
//!             Movement::new("select").with_beat(Beat::pure(1, "canvas:select", "select")),
//!         );
//!     let handlers = HandlerMap::new().with_fn("select", |input, _ctx| {
//!         let mut out = serde_json::Map::new();
//!         out.insert("selected".into(), input.get("id").cloned().unwrap_or_default());
//!         Ok(Some(out))
//!     });
//!
//!     conductor.mount(sequence, &handlers, "CanvasComponentPlugin")?;
//!     let payload = conductor
//!         .play("CanvasComponentPlugin", "canvas-component-select", json!({"id": "e1"}))
//!         .await?;
//!     assert_eq!(payload["selected"], "e1");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod plugin;
pub mod router;
pub mod telemetry;

pub use bus::{EventBus, Subscription, SubscriptionId};
pub use config::ConductorConfig;
pub use engine::{
    handler_fn, BeatHandler, BeatInput, BeatPosition, Callbacks, Conductor, HandlerMap,
    HandlerResult, KvStore, MemoryKvStore, MountedSequence, PlayInput, SequenceContext, StageIo,
};
pub use error::{
    ConductorError, ConfigError, HandlerError, IoError, PlayError, ResourceAccessViolation,
};
pub use manifest::{InteractionManifest, TopicsManifest};
pub use plugin::{
    load_json_sequence_catalogs, CatalogLoadReport, CatalogSource, PluginModule,
    PluginRegistration, RegistrationOutcome, SkippedCatalog, StaticCatalogSource,
};
pub use router::{EventRouter, PublishOutcome, RouteOutcome};
pub use telemetry::{init_tracing, ConductorTelemetry, Counter, TelemetrySnapshot};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
