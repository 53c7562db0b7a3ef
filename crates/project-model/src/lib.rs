//! Cutline Project Model
//!
//! Defines the core data contracts for Cutline projects:
//! - **Assets:** Imported media sources with intrinsic metadata
//! - **Timeline:** Tracks and the clips placed on them
//! - **Transforms:** Per-clip geometry for overlay lanes
//! - **Project:** The editable graph, its persistence, and editing operations
//! - **Plan:** The immutable, render-ready edit plan derived from a project
//!
//! All timeline and trim positions are integer milliseconds.

pub mod asset;
pub mod edit;
pub mod plan;
pub mod project;
pub mod timeline;
pub mod transform;

pub use asset::*;
pub use plan::*;
pub use project::*;
pub use timeline::*;
pub use transform::*;

/// Timeline or source position in milliseconds.
pub type TimeMs = u64;
