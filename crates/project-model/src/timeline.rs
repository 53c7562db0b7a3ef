//! Tracks and clips.
//!
//! A track is an ordered lane of clip ids. Track index 0 is the main track,
//! always rendered full-frame; higher indices are overlay lanes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetId};
use crate::transform::TransformNode;
use crate::TimeMs;

/// Stable identity of a clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(pub String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lane kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// Video lanes take anything with a picture, audio lanes anything audible.
    pub fn accepts(self, asset: &Asset) -> bool {
        match self {
            TrackKind::Video => asset.is_visual(),
            TrackKind::Audio => asset.has_audio,
        }
    }
}

/// An ordered lane of clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Human-readable lane name.
    #[serde(default)]
    pub name: String,

    /// Lane kind.
    pub kind: TrackKind,

    /// Locked lanes refuse editing operations.
    #[serde(default)]
    pub locked: bool,

    /// Hidden lanes are not composited.
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Clips on this lane.
    #[serde(default)]
    pub clips: Vec<ClipId>,
}

fn default_visible() -> bool {
    true
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            locked: false,
            visible: true,
            clips: vec![],
        }
    }
}

/// A placed reference to an asset on a track.
///
/// `start_ms..end_ms` is the absolute timeline range; `trim_start_ms..trim_end_ms`
/// is the exposed window of the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Unique clip identifier.
    pub id: ClipId,

    /// Referenced asset.
    pub asset_id: AssetId,

    /// Timeline start (inclusive).
    pub start_ms: TimeMs,

    /// Timeline end (exclusive).
    pub end_ms: TimeMs,

    /// Source window start, relative to the asset.
    #[serde(default)]
    pub trim_start_ms: TimeMs,

    /// Source window end, relative to the asset.
    pub trim_end_ms: TimeMs,

    /// Stacking order; higher draws later.
    #[serde(default)]
    pub z_index: i32,

    /// Overlay geometry. Ignored on the main track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformNode>,
}

/// Which edge of a clip a trim moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipEdge {
    Start,
    End,
}

impl Clip {
    /// A clip exposing `trim_start_ms..trim_end_ms` of an asset from `start_ms`.
    pub fn new(
        id: impl Into<String>,
        asset_id: AssetId,
        start_ms: TimeMs,
        trim_start_ms: TimeMs,
        trim_end_ms: TimeMs,
    ) -> Self {
        Self {
            id: ClipId::new(id),
            asset_id,
            start_ms,
            end_ms: start_ms + trim_end_ms.saturating_sub(trim_start_ms),
            trim_start_ms,
            trim_end_ms,
            z_index: 0,
            transform: None,
        }
    }

    /// Effective timeline duration.
    pub fn duration_ms(&self) -> TimeMs {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Length of the exposed source window.
    pub fn trim_len_ms(&self) -> TimeMs {
        self.trim_end_ms.saturating_sub(self.trim_start_ms)
    }

    /// Whether the clip covers timeline position `t`.
    pub fn contains(&self, t: TimeMs) -> bool {
        t >= self.start_ms && t < self.end_ms
    }

    /// Whether two clips share any part of the timeline.
    pub fn overlaps(&self, other: &Clip) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }

    /// Source position shown at timeline position `t`.
    ///
    /// `(t - start) + trim_start`; positions before the clip map to `trim_start`.
    pub fn source_time_ms(&self, t: TimeMs) -> TimeMs {
        source_time_ms(self.start_ms, self.trim_start_ms, t)
    }

    /// Split at timeline position `at`, producing two clips whose trim
    /// windows partition this one. Returns `None` unless `start < at < end`.
    pub fn split_at(&self, at: TimeMs, right_id: ClipId) -> Option<(Clip, Clip)> {
        if at <= self.start_ms || at >= self.end_ms {
            return None;
        }
        let cut = self.source_time_ms(at);

        let mut left = self.clone();
        left.end_ms = at;
        left.trim_end_ms = cut;

        let mut right = self.clone();
        right.id = right_id;
        right.start_ms = at;
        right.trim_start_ms = cut;

        Some((left, right))
    }

    /// Shift the clip so it starts at `new_start`, keeping its duration.
    pub fn moved_to(&self, new_start: TimeMs) -> Clip {
        let mut moved = self.clone();
        moved.start_ms = new_start;
        moved.end_ms = new_start + self.duration_ms();
        moved
    }

    /// Move one edge to timeline position `to`, adjusting the trim window by
    /// the same amount. Returns `None` if the edge would cross the other one
    /// or the trim window would start before the asset.
    pub fn trimmed(&self, edge: ClipEdge, to: TimeMs) -> Option<Clip> {
        let mut trimmed = self.clone();
        match edge {
            ClipEdge::Start => {
                if to >= self.end_ms {
                    return None;
                }
                if to >= self.start_ms {
                    let delta = to - self.start_ms;
                    trimmed.trim_start_ms = self.trim_start_ms + delta;
                } else {
                    let delta = self.start_ms - to;
                    trimmed.trim_start_ms = self.trim_start_ms.checked_sub(delta)?;
                }
                trimmed.start_ms = to;
            }
            ClipEdge::End => {
                if to <= self.start_ms {
                    return None;
                }
                if to >= self.end_ms {
                    trimmed.trim_end_ms = self.trim_end_ms + (to - self.end_ms);
                } else {
                    trimmed.trim_end_ms = self.trim_end_ms.checked_sub(self.end_ms - to)?;
                }
                trimmed.end_ms = to;
            }
        }
        Some(trimmed)
    }
}

/// The trim-aware mapping from a timeline position to a source position.
///
/// Shared by the real-time compositor and export segment trimming.
pub fn source_time_ms(clip_start_ms: TimeMs, trim_start_ms: TimeMs, t: TimeMs) -> TimeMs {
    t.saturating_sub(clip_start_ms) + trim_start_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clip(start: TimeMs, trim_start: TimeMs, trim_end: TimeMs) -> Clip {
        Clip::new("c", AssetId::from("a"), start, trim_start, trim_end)
    }

    #[test]
    fn test_source_time_mapping() {
        let c = clip(6000, 1000, 4000);
        assert_eq!(c.end_ms, 9000);
        assert_eq!(c.source_time_ms(6000), 1000);
        assert_eq!(c.source_time_ms(7500), 2500);
        assert!(c.contains(6000));
        assert!(!c.contains(9000));
    }

    #[test]
    fn test_split_partitions_trim_window() {
        let c = clip(6000, 1000, 4000);
        let (left, right) = c.split_at(7000, ClipId::from("c-2")).unwrap();
        assert_eq!(left.end_ms, 7000);
        assert_eq!(right.start_ms, 7000);
        assert_eq!(left.trim_end_ms, 2000);
        assert_eq!(right.trim_start_ms, 2000);
        assert_eq!(right.trim_end_ms, 4000);
        assert_eq!(right.id.as_str(), "c-2");
    }

    #[test]
    fn test_split_at_edges_is_rejected() {
        let c = clip(0, 0, 1000);
        assert!(c.split_at(0, ClipId::from("x")).is_none());
        assert!(c.split_at(1000, ClipId::from("x")).is_none());
    }

    #[test]
    fn test_trim_start_moves_trim_window() {
        let c = clip(1000, 500, 2500);
        let t = c.trimmed(ClipEdge::Start, 1200).unwrap();
        assert_eq!(t.start_ms, 1200);
        assert_eq!(t.trim_start_ms, 700);
        assert_eq!(t.duration_ms(), t.trim_len_ms());

        let extended = c.trimmed(ClipEdge::Start, 600).unwrap();
        assert_eq!(extended.trim_start_ms, 100);
        assert!(c.trimmed(ClipEdge::Start, 400).is_none());
    }

    #[test]
    fn test_trim_end_cannot_cross_start() {
        let c = clip(1000, 0, 2000);
        assert!(c.trimmed(ClipEdge::End, 1000).is_none());
        let t = c.trimmed(ClipEdge::End, 2500).unwrap();
        assert_eq!(t.trim_end_ms, 1500);
    }

    #[test]
    fn test_moved_keeps_duration_and_trim() {
        let c = clip(1000, 300, 1300);
        let m = c.moved_to(5000);
        assert_eq!(m.start_ms, 5000);
        assert_eq!(m.end_ms, 6000);
        assert_eq!(m.trim_start_ms, 300);
    }

    proptest! {
        #[test]
        fn test_split_then_rejoin_reproduces_trim_window(
            start in 0u64..100_000,
            trim_start in 0u64..50_000,
            len in 2u64..50_000,
            frac in 0.0f64..1.0,
        ) {
            let c = clip(start, trim_start, trim_start + len);
            let at = start + 1 + ((len - 2) as f64 * frac) as u64;
            let (left, right) = c.split_at(at, ClipId::from("r")).unwrap();

            prop_assert_eq!(left.trim_end_ms, right.trim_start_ms);
            prop_assert_eq!(left.end_ms, at);
            prop_assert_eq!(right.start_ms, at);
            prop_assert_eq!(left.trim_start_ms, c.trim_start_ms);
            prop_assert_eq!(right.trim_end_ms, c.trim_end_ms);
            prop_assert_eq!(left.duration_ms() + right.duration_ms(), c.duration_ms());
        }

        #[test]
        fn test_split_halves_agree_with_original_mapping(
            start in 0u64..100_000,
            trim_start in 0u64..50_000,
            len in 2u64..50_000,
            probe in 0.0f64..1.0,
        ) {
            let c = clip(start, trim_start, trim_start + len);
            let at = start + len / 2;
            let (left, right) = c.split_at(at, ClipId::from("r")).unwrap();
            let t = start + ((len - 1) as f64 * probe) as u64;
            let half = if left.contains(t) { &left } else { &right };
            prop_assert_eq!(half.source_time_ms(t), c.source_time_ms(t));
        }
    }
}
