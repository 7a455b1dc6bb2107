//! Sequence engine
//!
//! A [`Conductor`] owns the registry of mounted sequences. `play` walks a
//! sequence's beats strictly in array order: each handler runs to completion
//! (including any `.await`) before the next begins. Handler results are
//! shallow-merged into the play's payload, and the first failure stops the
//! play with the payload accumulated so far.
//!
//! Concurrent plays, including plays of the same sequence, each get their own
//! [`SequenceContext`] and never observe each other's payload.

mod conductor;
mod context;
mod handler;
mod io;
mod registry;

pub use conductor::Conductor;
pub use context::{BeatPosition, SequenceContext};
pub use handler::{
    handler_fn, BeatHandler, BeatInput, Callbacks, FnHandler, HandlerMap, HandlerResult, PlayInput,
    UiCallback,
};
pub use io::{KvStore, MemoryKvStore, StageIo};
pub use registry::{MountedBeat, MountedSequence};
