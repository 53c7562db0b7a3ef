//! Cutline Media Pool
//!
//! Owns at most one decodable handle per asset referenced by the current
//! edit plan and keeps every handle's playback position within a small
//! drift of the shared timeline clock.
//!
//! ```text
//! frame tick ── sync(asset, t, play) ──► intent slot (latest wins)
//!                                             │
//!                                    per-handle task (single flight)
//!                                             │
//!                              seek / play / pause on MediaSource
//! ```
//!
//! Callers never touch a [`MediaSource`] directly once it is pooled; all
//! playback changes go through [`MediaPool::sync`], [`MediaPool::acquire`]
//! and [`MediaPool::release`].

mod handle;
pub mod pool;
pub mod source;

pub use handle::{HandleState, PlaybackIntent};
pub use pool::*;
pub use source::*;
