//! Edit-plan builder.
//!
//! Turns the project graph into an immutable [`EditPlan`]: per track, the
//! clips sorted by start time with resolved source paths, trim windows and
//! transforms, plus the gaps between consecutive main-track clips.
//!
//! The builder is pure. Invalid input never produces a partial plan; every
//! problem found is collected into one [`PlanError`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::asset::{Asset, AssetId, AssetKind};
use crate::project::{Canvas, Project};
use crate::timeline::{source_time_ms, ClipId, TrackKind};
use crate::transform::TransformNode;
use crate::TimeMs;

/// Index of the always-full-frame main track.
pub const MAIN_TRACK: usize = 0;

/// A render-ready clip reference with absolute timeline bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedClip {
    pub clip_id: ClipId,
    pub asset_id: AssetId,
    pub kind: AssetKind,
    pub track_index: usize,
    pub source_path: PathBuf,
    pub start_ms: TimeMs,
    pub end_ms: TimeMs,
    pub trim_start_ms: TimeMs,
    pub trim_end_ms: TimeMs,
    pub z_index: i32,
    /// Always `None` on the main track.
    pub transform: Option<TransformNode>,
    pub natural_width: u32,
    pub natural_height: u32,
    pub has_audio: bool,
}

impl PlannedClip {
    /// Timeline duration.
    pub fn duration_ms(&self) -> TimeMs {
        self.end_ms - self.start_ms
    }

    /// Whether the clip covers timeline position `t`.
    pub fn contains(&self, t: TimeMs) -> bool {
        t >= self.start_ms && t < self.end_ms
    }

    /// Source position shown at timeline position `t`.
    pub fn source_time_ms(&self, t: TimeMs) -> TimeMs {
        source_time_ms(self.start_ms, self.trim_start_ms, t)
    }

    /// Source position in seconds, as media handles expect it.
    pub fn source_time_secs(&self, t: TimeMs) -> f64 {
        self.source_time_ms(t) as f64 / 1000.0
    }

    /// Whether this clip lives on the main track.
    pub fn is_main(&self) -> bool {
        self.track_index == MAIN_TRACK
    }

    /// Whether the clip's asset is a still image.
    pub fn is_still(&self) -> bool {
        self.kind == AssetKind::Image
    }

    /// Natural frame size when known.
    pub fn natural_size(&self) -> Option<(u32, u32)> {
        if self.natural_width > 0 && self.natural_height > 0 {
            Some((self.natural_width, self.natural_height))
        } else {
            None
        }
    }
}

/// A planned lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedTrack {
    pub index: usize,
    pub name: String,
    pub kind: TrackKind,
    pub visible: bool,
    /// Sorted by start time, non-overlapping.
    pub clips: Vec<PlannedClip>,
}

/// Uncovered range between two consecutive main-track clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start_ms: TimeMs,
    pub end_ms: TimeMs,
    /// Clip ending where the gap starts.
    pub after: ClipId,
    /// Clip starting where the gap ends.
    pub before: ClipId,
}

impl Gap {
    pub fn duration_ms(&self) -> TimeMs {
        self.end_ms - self.start_ms
    }
}

/// One step of the main track in timeline order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MainSegment<'a> {
    Clip(&'a PlannedClip),
    Gap(&'a Gap),
}

impl MainSegment<'_> {
    pub fn start_ms(&self) -> TimeMs {
        match self {
            MainSegment::Clip(clip) => clip.start_ms,
            MainSegment::Gap(gap) => gap.start_ms,
        }
    }

    pub fn duration_ms(&self) -> TimeMs {
        match self {
            MainSegment::Clip(clip) => clip.duration_ms(),
            MainSegment::Gap(gap) => gap.duration_ms(),
        }
    }
}

/// Immutable, render-ready sequencing of a project.
///
/// Rebuilt on every edit and shared by value (usually behind an `Arc`)
/// between the real-time and export consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditPlan {
    pub canvas: Canvas,
    /// Assets referenced by at least one planned clip, paths resolved.
    pub assets: BTreeMap<AssetId, Asset>,
    pub tracks: Vec<PlannedTrack>,
    /// Gaps between consecutive main-track clips, in timeline order.
    pub gaps: Vec<Gap>,
}

impl EditPlan {
    /// An empty plan for a canvas.
    pub fn empty(canvas: Canvas) -> Self {
        Self {
            canvas,
            assets: BTreeMap::new(),
            tracks: vec![],
            gaps: vec![],
        }
    }

    pub fn main_track(&self) -> Option<&PlannedTrack> {
        self.tracks.get(MAIN_TRACK)
    }

    /// Main-track clips in timeline order.
    pub fn main_clips(&self) -> &[PlannedClip] {
        self.main_track().map(|t| t.clips.as_slice()).unwrap_or(&[])
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Main-track clips and gaps interleaved in timeline order.
    pub fn main_timeline(&self) -> Vec<MainSegment<'_>> {
        let mut segments: Vec<MainSegment<'_>> = self
            .main_clips()
            .iter()
            .map(MainSegment::Clip)
            .chain(self.gaps.iter().map(MainSegment::Gap))
            .collect();
        segments.sort_by_key(|s| s.start_ms());
        segments
    }

    /// `(first clip start, last clip end)` of the main track.
    pub fn span(&self) -> Option<(TimeMs, TimeMs)> {
        let clips = self.main_clips();
        Some((clips.first()?.start_ms, clips.last()?.end_ms))
    }

    /// Main-track span length, excluding leading and trailing dead space.
    pub fn span_duration_ms(&self) -> TimeMs {
        self.span().map(|(start, end)| end - start).unwrap_or(0)
    }

    /// End of the last clip on any track.
    pub fn duration_ms(&self) -> TimeMs {
        self.tracks
            .iter()
            .filter_map(|t| t.clips.last())
            .map(|c| c.end_ms)
            .max()
            .unwrap_or(0)
    }

    /// Whether no track holds any clip.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.clips.is_empty())
    }

    pub fn asset(&self, id: &AssetId) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn referenced_assets(&self) -> BTreeSet<AssetId> {
        self.assets.keys().cloned().collect()
    }

    /// Picture-producing clips at `t` on visible video tracks, in drawing
    /// order: ascending z-index, then track index.
    pub fn visible_at(&self, t: TimeMs) -> Vec<&PlannedClip> {
        let mut visible: Vec<&PlannedClip> = self
            .tracks
            .iter()
            .filter(|track| track.visible && track.kind == TrackKind::Video)
            .filter_map(|track| clip_at(&track.clips, t))
            .collect();
        visible.sort_by_key(|c| (c.z_index, c.track_index));
        visible
    }

    /// Every clip at `t` on a visible track, including audio lanes.
    pub fn active_at(&self, t: TimeMs) -> Vec<&PlannedClip> {
        self.tracks
            .iter()
            .filter(|track| track.visible)
            .filter_map(|track| clip_at(&track.clips, t))
            .collect()
    }
}

/// Clip covering `t` in a sorted, non-overlapping clip list.
fn clip_at(clips: &[PlannedClip], t: TimeMs) -> Option<&PlannedClip> {
    let idx = clips.partition_point(|c| c.start_ms <= t);
    let candidate = clips.get(idx.checked_sub(1)?)?;
    candidate.contains(t).then_some(candidate)
}

/// One reason an edit plan could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum PlanIssue {
    #[error("track 0 must be a video track")]
    MainTrackNotVideo,

    #[error("track {track} lists unknown clip {clip}")]
    UnknownClip { track: usize, clip: ClipId },

    #[error("clip {clip} appears on more than one track")]
    ClipOnSeveralTracks { clip: ClipId },

    #[error("clip {clip} references unknown asset {asset}")]
    UnknownAsset { clip: ClipId, asset: AssetId },

    #[error("clip {clip} has an empty timeline range {start_ms}..{end_ms}")]
    EmptyRange {
        clip: ClipId,
        start_ms: TimeMs,
        end_ms: TimeMs,
    },

    #[error("clip {clip} trim window {trim_start_ms}..{trim_end_ms} is invalid for an asset of {asset_duration_ms} ms")]
    BadTrim {
        clip: ClipId,
        trim_start_ms: TimeMs,
        trim_end_ms: TimeMs,
        asset_duration_ms: TimeMs,
    },

    #[error("clip {clip} lasts {timeline_ms} ms on the timeline but exposes {trim_ms} ms of source")]
    DurationMismatch {
        clip: ClipId,
        timeline_ms: TimeMs,
        trim_ms: TimeMs,
    },

    #[error("clip {clip} holds a {asset_kind:?} asset on a {track_kind:?} track")]
    KindMismatch {
        clip: ClipId,
        asset_kind: AssetKind,
        track_kind: TrackKind,
    },

    #[error("clips {first} and {second} overlap on track {track}")]
    Overlap {
        track: usize,
        first: ClipId,
        second: ClipId,
    },
}

/// Structured validation failure of the edit-plan builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanError {
    pub issues: Vec<PlanIssue>,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit plan rejected with {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "; {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PlanError {}

/// Builds an [`EditPlan`] from a project graph.
pub struct EditPlanBuilder<'a> {
    project: &'a Project,
    media_root: Option<PathBuf>,
}

impl<'a> EditPlanBuilder<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self {
            project,
            media_root: None,
        }
    }

    /// Resolve relative asset paths against `root`.
    pub fn with_media_root(mut self, root: impl AsRef<Path>) -> Self {
        self.media_root = Some(root.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<EditPlan, PlanError> {
        let project = self.project;
        let mut issues = Vec::new();

        if project
            .tracks
            .first()
            .is_some_and(|t| t.kind != TrackKind::Video)
        {
            issues.push(PlanIssue::MainTrackNotVideo);
        }

        let mut seen: HashSet<&ClipId> = HashSet::new();
        let mut assets = BTreeMap::new();
        let mut tracks = Vec::with_capacity(project.tracks.len());

        for (index, track) in project.tracks.iter().enumerate() {
            let mut clips = Vec::with_capacity(track.clips.len());

            for clip_id in &track.clips {
                if !seen.insert(clip_id) {
                    issues.push(PlanIssue::ClipOnSeveralTracks {
                        clip: clip_id.clone(),
                    });
                    continue;
                }
                let Some(clip) = project.clip(clip_id) else {
                    issues.push(PlanIssue::UnknownClip {
                        track: index,
                        clip: clip_id.clone(),
                    });
                    continue;
                };
                let Some(asset) = project.asset(&clip.asset_id) else {
                    issues.push(PlanIssue::UnknownAsset {
                        clip: clip.id.clone(),
                        asset: clip.asset_id.clone(),
                    });
                    continue;
                };

                let before = issues.len();
                check_clip(clip, asset, track.kind, &mut issues);
                if issues.len() > before {
                    continue;
                }

                let resolved = self.resolve_asset(asset);
                clips.push(PlannedClip {
                    clip_id: clip.id.clone(),
                    asset_id: asset.id.clone(),
                    kind: asset.kind,
                    track_index: index,
                    source_path: resolved.path.clone(),
                    start_ms: clip.start_ms,
                    end_ms: clip.end_ms,
                    trim_start_ms: clip.trim_start_ms,
                    trim_end_ms: clip.trim_end_ms,
                    z_index: clip.z_index,
                    transform: if index == MAIN_TRACK {
                        None
                    } else {
                        clip.transform
                    },
                    natural_width: asset.width,
                    natural_height: asset.height,
                    has_audio: asset.has_audio,
                });
                assets.entry(asset.id.clone()).or_insert(resolved);
            }

            clips.sort_by(|a, b| {
                a.start_ms
                    .cmp(&b.start_ms)
                    .then_with(|| a.clip_id.cmp(&b.clip_id))
            });
            for pair in clips.windows(2) {
                if pair[0].end_ms > pair[1].start_ms {
                    issues.push(PlanIssue::Overlap {
                        track: index,
                        first: pair[0].clip_id.clone(),
                        second: pair[1].clip_id.clone(),
                    });
                }
            }

            tracks.push(PlannedTrack {
                index,
                name: track.name.clone(),
                kind: track.kind,
                visible: track.visible,
                clips,
            });
        }

        if !issues.is_empty() {
            return Err(PlanError { issues });
        }

        let gaps = tracks
            .first()
            .map(|main| main_track_gaps(&main.clips))
            .unwrap_or_default();

        Ok(EditPlan {
            canvas: project.canvas,
            assets,
            tracks,
            gaps,
        })
    }

    fn resolve_asset(&self, asset: &Asset) -> Asset {
        let mut resolved = asset.clone();
        if let Some(root) = &self.media_root {
            if asset.path.is_relative() {
                resolved.path = root.join(&asset.path);
            }
        }
        resolved
    }
}

fn check_clip(
    clip: &crate::timeline::Clip,
    asset: &Asset,
    track_kind: TrackKind,
    issues: &mut Vec<PlanIssue>,
) {
    if !track_kind.accepts(asset) {
        issues.push(PlanIssue::KindMismatch {
            clip: clip.id.clone(),
            asset_kind: asset.kind,
            track_kind,
        });
    }

    if clip.start_ms >= clip.end_ms {
        issues.push(PlanIssue::EmptyRange {
            clip: clip.id.clone(),
            start_ms: clip.start_ms,
            end_ms: clip.end_ms,
        });
    }

    let trim_inverted = clip.trim_start_ms > clip.trim_end_ms;
    let trim_overrun = asset.has_intrinsic_duration() && clip.trim_end_ms > asset.duration_ms;
    if trim_inverted || trim_overrun {
        issues.push(PlanIssue::BadTrim {
            clip: clip.id.clone(),
            trim_start_ms: clip.trim_start_ms,
            trim_end_ms: clip.trim_end_ms,
            asset_duration_ms: asset.duration_ms,
        });
    } else if asset.has_intrinsic_duration()
        && clip.start_ms < clip.end_ms
        && clip.duration_ms() != clip.trim_len_ms()
    {
        issues.push(PlanIssue::DurationMismatch {
            clip: clip.id.clone(),
            timeline_ms: clip.duration_ms(),
            trim_ms: clip.trim_len_ms(),
        });
    }
}

fn main_track_gaps(clips: &[PlannedClip]) -> Vec<Gap> {
    clips
        .windows(2)
        .filter(|pair| pair[0].end_ms < pair[1].start_ms)
        .map(|pair| Gap {
            start_ms: pair[0].end_ms,
            end_ms: pair[1].start_ms,
            after: pair[0].clip_id.clone(),
            before: pair[1].clip_id.clone(),
        })
        .collect()
}
