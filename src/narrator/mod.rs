//! Event narration pipeline.
//!
//! Game events are filtered, cleaned, deduplicated and bounded, sent to
//! a synthesis backend, and the returned audio files are played one at a
//! time.

pub mod api;
pub mod dispatcher;
pub mod filter;
pub mod gate;
pub mod pipeline;
pub mod playback;
pub mod sanitizer;

pub use pipeline::Narrator;
pub use playback::RodioOutput;
