//! Cutline Render Engine
//!
//! Turns an edit plan into pictures. The real-time path composes pooled
//! media every display frame; the export path drives an external
//! transcoder through per-clip segments and a final concatenation.
//!
//! # Pipeline Architecture
//!
//! ```text
//!                        ┌── Player::tick ── MediaPool::sync ── Compositor ──► preview surface
//! EditPlan (snapshot) ───┤
//!                        └── ExportOrchestrator
//!                                 │
//!                                 ├── clip segments  (copy ─► re-encode)
//!                                 ├── gap segments   (black + silence, or skipped)
//!                                 ▼
//!                            concatenate (copy ─► re-encode)
//!                                 │
//!                                 ▼
//!                             output.mp4
//! ```

pub mod compositor;
pub mod export;
pub mod playback;
pub mod preview;
pub mod process;
pub mod transcode;

pub use compositor::{aspect_fit, ComposeReport, Compositor, FitRect, FrameSampler, OverlayAffine};
pub use export::*;
pub use playback::{Player, TickReport};
pub use preview::{preview_frame, FfmpegFrameSampler};
pub use process::{ProcessGuard, ProcessInfo, ProcessRegistry};
pub use transcode::{
    CancelSource, CancelToken, Container, EncodeParams, FfmpegEngine, ProgressState,
    TranscodeEngine, TranscodeError, TranscodeOp,
};
