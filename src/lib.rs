//! # parallel-anim-core
//!
//! Timed animation sequencer for distributed-training explainer diagrams.
//!
//! This crate provides the platform-agnostic core behind animated diagrams
//! of parameter sharding and model splitting:
//! - A virtual-time timeline with cancellable handles
//! - Declarative step sequences with fan-out, counted repeats and label
//!   dependencies, run by a single interpreter
//! - A typed state store of visual flags that renderers observe
//! - A lifecycle controller handling mount, reset and teardown
//!
//! Drawing is left to the consumer: subscribe to the controller and map the
//! flag snapshot to opacities, offsets and sizes.
//!
//! ## Features
//!
//! - `serde` - Enable serialization/deserialization for scripts and snapshots
//! - `toml` - Load animation scripts from TOML
//! - `web` - Drive a controller from browser timers (WASM)
//!
//! ## Example
//!
//! ```rust
//! use parallel_anim_core::{scenes, AnimationController};
//!
//! let mut controller = AnimationController::new(scenes::model_split());
//! controller.subscribe(|state| {
//!     // redraw from `state`
//!     let _ = state.list(scenes::flags::EXPAND_PARAMS);
//! });
//!
//! controller.mount().unwrap();
//! controller.advance(16).unwrap(); // call from your frame timer
//!
//! controller.reset().unwrap(); // reset button
//! controller.unmount(); // page teardown
//! ```

mod animation;
pub mod scenes;
mod script;
mod sequence;
mod state;
mod timeline;

#[cfg(feature = "web")]
pub mod web;

pub use animation::{AnimationController, CompletionCallback, ControllerError, Lifecycle};
pub use script::{AnimationScript, ScriptError};
pub use sequence::{
    Action, Cursor, IndexRef, Sequence, SequenceBuilder, SequenceError, SequenceRun, Step,
};
pub use state::{
    AnimationState, FlagShape, FlagValue, ObserverId, StateError, StateObserver, StateSchema,
    StateStore, Update,
};
pub use timeline::{Delay, Fired, ScheduleError, Timeline, TimerId};
