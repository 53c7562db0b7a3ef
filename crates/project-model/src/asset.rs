//! Imported media assets.
//!
//! An asset is immutable once ingested. Clips reference assets by id; the
//! project owns them.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TimeMs;

/// Stable identity of an imported asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Media kind of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Video,
    Audio,
    Image,
}

/// An imported media source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Unique asset identifier.
    pub id: AssetId,

    /// Media kind.
    pub kind: AssetKind,

    /// Source location, absolute or relative to the project root.
    pub path: PathBuf,

    /// Intrinsic duration. Still images carry no intrinsic duration (0).
    #[serde(default)]
    pub duration_ms: TimeMs,

    /// Natural frame size in pixels (0 for audio).
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,

    /// Whether the media carries an audio stream.
    #[serde(default)]
    pub has_audio: bool,
}

impl Asset {
    /// Build a video asset.
    pub fn video(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        duration_ms: TimeMs,
        width: u32,
        height: u32,
        has_audio: bool,
    ) -> Self {
        Self {
            id: AssetId::new(id),
            kind: AssetKind::Video,
            path: path.into(),
            duration_ms,
            width,
            height,
            has_audio,
        }
    }

    /// Build a still-image asset.
    pub fn image(id: impl Into<String>, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            id: AssetId::new(id),
            kind: AssetKind::Image,
            path: path.into(),
            duration_ms: 0,
            width,
            height,
            has_audio: false,
        }
    }

    /// Build an audio-only asset.
    pub fn audio(id: impl Into<String>, path: impl Into<PathBuf>, duration_ms: TimeMs) -> Self {
        Self {
            id: AssetId::new(id),
            kind: AssetKind::Audio,
            path: path.into(),
            duration_ms,
            width: 0,
            height: 0,
            has_audio: true,
        }
    }

    /// Whether the asset is a still image.
    pub fn is_still(&self) -> bool {
        self.kind == AssetKind::Image
    }

    /// Whether the asset produces pictures.
    pub fn is_visual(&self) -> bool {
        matches!(self.kind, AssetKind::Video | AssetKind::Image)
    }

    /// Whether trims must stay inside an intrinsic duration.
    pub fn has_intrinsic_duration(&self) -> bool {
        !self.is_still()
    }

    /// Natural frame size, if the asset is visual and the size is known.
    pub fn natural_size(&self) -> Option<(u32, u32)> {
        if self.is_visual() && self.width > 0 && self.height > 0 {
            Some((self.width, self.height))
        } else {
            None
        }
    }
}
