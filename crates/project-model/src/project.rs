//! Project graph, persistence, and errors.
//!
//! A project is the single source of truth of an editing session: the
//! assets it imported, its tracks, and the clips placed on them. Edit plans
//! are derived from it and never written back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetId, AssetKind};
use crate::plan::{EditPlan, EditPlanBuilder, PlanError};
use crate::timeline::{Clip, ClipId, Track, TrackKind};

/// Top-level project file (`meta/project.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Unique project identifier (UUID).
    pub id: String,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Last modified timestamp (ISO 8601).
    pub modified_at: String,

    /// Output surface of the timeline.
    pub canvas: Canvas,

    /// Imported media.
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Lanes; index 0 is the main track.
    #[serde(default)]
    pub tracks: Vec<Track>,

    /// Every clip placed on any track.
    #[serde(default)]
    pub clips: Vec<Clip>,
}

/// Output surface dimensions and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
        }
    }
}

/// The complete in-memory representation of a loaded project.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    /// Filesystem path to the project directory.
    pub root: PathBuf,

    /// Project graph.
    pub project: Project,
}

impl Project {
    /// Create a new project with a main video track and no media.
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: "1.0".to_string(),
            name: name.into(),
            id: uuid_v4(),
            created_at: now.clone(),
            modified_at: now,
            canvas: Canvas { width, height, fps },
            assets: vec![],
            tracks: vec![Track::new("Main", TrackKind::Video)],
            clips: vec![],
        }
    }

    /// Look up an asset.
    pub fn asset(&self, id: &AssetId) -> Option<&Asset> {
        self.assets.iter().find(|a| &a.id == id)
    }

    /// Look up a clip.
    pub fn clip(&self, id: &ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| &c.id == id)
    }

    pub(crate) fn clip_mut(&mut self, id: &ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|c| &c.id == id)
    }

    /// Index of the track holding a clip.
    pub fn track_of(&self, id: &ClipId) -> Option<usize> {
        self.tracks.iter().position(|t| t.clips.contains(id))
    }

    /// Clips of a track in placement order.
    pub fn clips_on(&self, track_index: usize) -> Vec<&Clip> {
        self.tracks
            .get(track_index)
            .map(|track| track.clips.iter().filter_map(|id| self.clip(id)).collect())
            .unwrap_or_default()
    }

    /// Register an imported asset. Replaces any asset with the same id.
    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.retain(|a| a.id != asset.id);
        self.assets.push(asset);
    }

    /// Append a lane and return its index.
    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Build the render-ready plan, resolving paths as-is.
    pub fn edit_plan(&self) -> Result<EditPlan, PlanError> {
        EditPlanBuilder::new(self).build()
    }

    pub(crate) fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().to_rfc3339();
    }
}

impl LoadedProject {
    /// Load a project from a directory.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();
        let project_path = root.join("meta").join("project.json");

        let project_json =
            std::fs::read_to_string(&project_path).map_err(|e| ProjectError::IoError {
                path: project_path.clone(),
                source: e,
            })?;

        let project: Project =
            serde_json::from_str(&project_json).map_err(|e| ProjectError::ParseError {
                path: project_path,
                source: e,
            })?;

        Ok(Self { root, project })
    }

    /// Save the project graph to disk.
    pub fn save(&self) -> Result<(), ProjectError> {
        let meta_dir = self.root.join("meta");
        std::fs::create_dir_all(&meta_dir).map_err(|e| ProjectError::IoError {
            path: meta_dir.clone(),
            source: e,
        })?;

        let project_path = meta_dir.join("project.json");
        let project_json =
            serde_json::to_string_pretty(&self.project).map_err(|e| ProjectError::ParseError {
                path: project_path.clone(),
                source: e,
            })?;
        std::fs::write(&project_path, project_json).map_err(|e| ProjectError::IoError {
            path: project_path,
            source: e,
        })?;

        Ok(())
    }

    /// Create a new project on disk with the standard directory structure.
    pub fn create(
        root: impl AsRef<Path>,
        name: impl Into<String>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();

        for subdir in &["sources", "meta", "exports"] {
            std::fs::create_dir_all(root.join(subdir)).map_err(|e| ProjectError::IoError {
                path: root.join(subdir),
                source: e,
            })?;
        }

        let loaded = Self {
            root,
            project: Project::new(name, width, height, fps),
        };
        loaded.save()?;
        Ok(loaded)
    }

    /// Resolve an asset path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Build the render-ready plan with asset paths resolved against the root.
    pub fn edit_plan(&self) -> Result<EditPlan, PlanError> {
        EditPlanBuilder::new(&self.project)
            .with_media_root(&self.root)
            .build()
    }

    /// Validate that all referenced source files exist.
    pub fn validate_sources(&self) -> Vec<String> {
        let mut errors = vec![];
        for asset in &self.project.assets {
            let path = self.resolve(&asset.path);
            if !path.exists() {
                errors.push(format!(
                    "Asset {} source missing: {}",
                    asset.id,
                    asset.path.display()
                ));
            }
        }
        errors
    }
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("Unknown clip: {0}")]
    UnknownClip(ClipId),

    #[error("Unknown track index: {0}")]
    UnknownTrack(usize),

    #[error("Track {0} is locked")]
    TrackLocked(usize),

    #[error("Clip {clip} would overlap {other} on track {track}")]
    Overlap {
        clip: ClipId,
        other: ClipId,
        track: usize,
    },

    #[error("Track {track} is a {track_kind:?} track and cannot hold {kind:?} asset {asset}")]
    KindMismatch {
        asset: AssetId,
        kind: AssetKind,
        track: usize,
        track_kind: TrackKind,
    },

    #[error("Invalid edit on clip {clip}: {message}")]
    InvalidEdit { clip: ClipId, message: String },
}

/// Generate a simple UUID v4 without external dependency.
fn uuid_v4() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        (seed & 0xFFFFFFFF) as u32,
        ((seed >> 32) & 0xFFFF) as u16,
        ((seed >> 48) & 0x0FFF) as u16,
        (((seed >> 60) & 0x3F) | 0x80) as u16 | (((seed >> 66) & 0x3FF) as u16) << 6,
        (seed >> 76) & 0xFFFFFFFFFFFF,
    )
}
