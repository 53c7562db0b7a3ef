//! Editing operations on the project graph.
//!
//! Every operation checks the target lane is unlocked and that the result
//! does not overlap a neighbour, so the edit-plan builder only ever sees
//! overlaps in hand-written or foreign project files.

use crate::asset::AssetId;
use crate::project::{Project, ProjectError};
use crate::timeline::{Clip, ClipEdge, ClipId};
use crate::transform::TransformNode;
use crate::TimeMs;

/// Default on-timeline length of a freshly placed still image.
pub const DEFAULT_STILL_DURATION_MS: TimeMs = 5000;

impl Project {
    /// Place an asset on a track at `start_ms`, exposing the whole asset
    /// (or [`DEFAULT_STILL_DURATION_MS`] for stills). Returns the new clip id.
    pub fn place_clip(
        &mut self,
        asset_id: &AssetId,
        track_index: usize,
        start_ms: TimeMs,
    ) -> Result<ClipId, ProjectError> {
        self.writable_track(track_index)?;
        let asset = self
            .asset(asset_id)
            .ok_or_else(|| ProjectError::UnknownAsset(asset_id.clone()))?;
        let track_kind = self.tracks[track_index].kind;
        if !track_kind.accepts(asset) {
            return Err(ProjectError::KindMismatch {
                asset: asset_id.clone(),
                kind: asset.kind,
                track: track_index,
                track_kind,
            });
        }

        let id = self.next_clip_id();
        let mut clip = if asset.has_intrinsic_duration() {
            Clip::new(id.as_str(), asset.id.clone(), start_ms, 0, asset.duration_ms)
        } else {
            let mut still = Clip::new(id.as_str(), asset.id.clone(), start_ms, 0, 0);
            still.end_ms = start_ms + DEFAULT_STILL_DURATION_MS;
            still
        };
        if clip.start_ms >= clip.end_ms {
            return Err(ProjectError::InvalidEdit {
                clip: id,
                message: format!("asset {asset_id} has no duration"),
            });
        }
        clip.z_index = track_index as i32;

        self.check_free(track_index, &clip, None)?;
        self.clips.push(clip);
        self.tracks[track_index].clips.push(id.clone());
        self.touch();
        Ok(id)
    }

    /// Move a clip to a new start position on its track.
    pub fn move_clip(
        &mut self,
        clip_id: &ClipId,
        new_start_ms: TimeMs,
    ) -> Result<(), ProjectError> {
        let (track_index, clip) = self.editable_clip(clip_id)?;
        let moved = clip.moved_to(new_start_ms);
        self.check_free(track_index, &moved, Some(clip_id))?;
        self.replace_clip(moved);
        Ok(())
    }

    /// Move one edge of a clip, keeping the trim window in step.
    pub fn trim_clip(
        &mut self,
        clip_id: &ClipId,
        edge: ClipEdge,
        to_ms: TimeMs,
    ) -> Result<(), ProjectError> {
        let (track_index, clip) = self.editable_clip(clip_id)?;
        let trimmed = clip
            .trimmed(edge, to_ms)
            .ok_or_else(|| ProjectError::InvalidEdit {
                clip: clip_id.clone(),
                message: format!("cannot move {edge:?} edge to {to_ms} ms"),
            })?;

        if let Some(asset) = self.asset(&trimmed.asset_id) {
            if asset.has_intrinsic_duration() && trimmed.trim_end_ms > asset.duration_ms {
                return Err(ProjectError::InvalidEdit {
                    clip: clip_id.clone(),
                    message: format!(
                        "trim end {} ms exceeds asset duration {} ms",
                        trimmed.trim_end_ms, asset.duration_ms
                    ),
                });
            }
        }

        self.check_free(track_index, &trimmed, Some(clip_id))?;
        self.replace_clip(trimmed);
        Ok(())
    }

    /// Split a clip at `at_ms` into two clips whose trim windows partition
    /// the original. Returns the id of the right-hand clip.
    pub fn split_clip(&mut self, clip_id: &ClipId, at_ms: TimeMs) -> Result<ClipId, ProjectError> {
        let (track_index, clip) = self.editable_clip(clip_id)?;
        let right_id = self.next_clip_id();
        let (left, right) =
            clip.split_at(at_ms, right_id.clone())
                .ok_or_else(|| ProjectError::InvalidEdit {
                    clip: clip_id.clone(),
                    message: format!(
                        "split point {at_ms} ms is outside {}..{}",
                        clip.start_ms, clip.end_ms
                    ),
                })?;

        self.replace_clip(left);
        self.clips.push(right);
        let lane = &mut self.tracks[track_index].clips;
        let pos = lane.iter().position(|id| id == clip_id).map_or(lane.len(), |p| p + 1);
        lane.insert(pos, right_id.clone());
        Ok(right_id)
    }

    /// Remove a clip from its track and from the project.
    pub fn delete_clip(&mut self, clip_id: &ClipId) -> Result<Clip, ProjectError> {
        let (track_index, _) = self.editable_clip(clip_id)?;
        self.tracks[track_index].clips.retain(|id| id != clip_id);
        let pos = self
            .clips
            .iter()
            .position(|c| &c.id == clip_id)
            .ok_or_else(|| ProjectError::UnknownClip(clip_id.clone()))?;
        self.touch();
        Ok(self.clips.remove(pos))
    }

    /// Attach, replace, or clear an overlay transform.
    pub fn set_transform(
        &mut self,
        clip_id: &ClipId,
        transform: Option<TransformNode>,
    ) -> Result<(), ProjectError> {
        let (track_index, mut clip) = self.editable_clip(clip_id)?;
        if track_index == crate::plan::MAIN_TRACK && transform.is_some() {
            return Err(ProjectError::InvalidEdit {
                clip: clip_id.clone(),
                message: "main-track clips always fill the frame".to_string(),
            });
        }
        clip.transform = transform;
        self.replace_clip(clip);
        Ok(())
    }

    fn writable_track(&self, track_index: usize) -> Result<(), ProjectError> {
        let track = self
            .tracks
            .get(track_index)
            .ok_or(ProjectError::UnknownTrack(track_index))?;
        if track.locked {
            return Err(ProjectError::TrackLocked(track_index));
        }
        Ok(())
    }

    fn editable_clip(&self, clip_id: &ClipId) -> Result<(usize, Clip), ProjectError> {
        let clip = self
            .clip(clip_id)
            .ok_or_else(|| ProjectError::UnknownClip(clip_id.clone()))?;
        let track_index = self
            .track_of(clip_id)
            .ok_or_else(|| ProjectError::UnknownClip(clip_id.clone()))?;
        self.writable_track(track_index)?;
        Ok((track_index, clip.clone()))
    }

    fn check_free(
        &self,
        track_index: usize,
        candidate: &Clip,
        ignore: Option<&ClipId>,
    ) -> Result<(), ProjectError> {
        let clash = self
            .clips_on(track_index)
            .into_iter()
            .filter(|other| Some(&other.id) != ignore)
            .find(|other| other.overlaps(candidate));
        match clash {
            Some(other) => Err(ProjectError::Overlap {
                clip: candidate.id.clone(),
                other: other.id.clone(),
                track: track_index,
            }),
            None => Ok(()),
        }
    }

    fn replace_clip(&mut self, clip: Clip) {
        if let Some(slot) = self.clip_mut(&clip.id) {
            *slot = clip;
        }
        self.touch();
    }

    fn next_clip_id(&self) -> ClipId {
        let mut n = self.clips.len() + 1;
        loop {
            let candidate = ClipId::new(format!("clip-{n}"));
            if self.clip(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::timeline::{Track, TrackKind};

    fn project() -> Project {
        let mut project = Project::new("Edit", 1920, 1080, 30);
        project.add_asset(Asset::video("a1", "a1.mp4", 5000, 1920, 1080, true));
        project.add_asset(Asset::image("logo", "logo.png", 400, 200));
        project
    }

    #[test]
    fn test_place_exposes_whole_asset() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("a1"), 0, 1000).unwrap();
        let clip = p.clip(&id).unwrap();
        assert_eq!((clip.start_ms, clip.end_ms), (1000, 6000));
        assert_eq!((clip.trim_start_ms, clip.trim_end_ms), (0, 5000));
        assert!(p.edit_plan().is_ok());
    }

    #[test]
    fn test_place_still_uses_default_duration() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("logo"), 0, 0).unwrap();
        assert_eq!(p.clip(&id).unwrap().duration_ms(), DEFAULT_STILL_DURATION_MS);
    }

    #[test]
    fn test_place_rejects_overlap() {
        let mut p = project();
        p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        let err = p.place_clip(&AssetId::from("a1"), 0, 4000).unwrap_err();
        assert!(matches!(err, ProjectError::Overlap { track: 0, .. }));
    }

    #[test]
    fn test_place_rejects_asset_the_track_cannot_hold() {
        let mut p = project();
        p.add_asset(Asset::audio("music", "music.wav", 3000));
        let err = p.place_clip(&AssetId::from("music"), 0, 0).unwrap_err();
        assert!(matches!(
            err,
            ProjectError::KindMismatch {
                track: 0,
                track_kind: TrackKind::Video,
                ..
            }
        ));
        assert!(p.clips.is_empty());

        let audio = p.add_track(Track::new("Music", TrackKind::Audio));
        p.place_clip(&AssetId::from("music"), audio, 0).unwrap();
        // Silent pictures have nothing to offer an audio lane.
        assert!(p.place_clip(&AssetId::from("logo"), audio, 5000).is_err());
        assert!(p.edit_plan().is_ok());
    }

    #[test]
    fn test_locked_track_refuses_edits() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        p.tracks[0].locked = true;
        assert!(matches!(
            p.move_clip(&id, 100),
            Err(ProjectError::TrackLocked(0))
        ));
        assert!(matches!(
            p.place_clip(&AssetId::from("a1"), 0, 9000),
            Err(ProjectError::TrackLocked(0))
        ));
    }

    #[test]
    fn test_split_keeps_lane_order_and_plan_validity() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        let right = p.split_clip(&id, 2000).unwrap();

        assert_eq!(p.tracks[0].clips, vec![id.clone(), right.clone()]);
        let left = p.clip(&id).unwrap();
        let right = p.clip(&right).unwrap();
        assert_eq!(left.trim_end_ms, right.trim_start_ms);
        assert_eq!(left.end_ms, 2000);
        assert_eq!(right.start_ms, 2000);

        let plan = p.edit_plan().unwrap();
        assert!(plan.gaps().is_empty());
        assert_eq!(plan.span_duration_ms(), 5000);
    }

    #[test]
    fn test_trim_beyond_asset_is_rejected() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        let err = p.trim_clip(&id, ClipEdge::End, 6000).unwrap_err();
        assert!(matches!(err, ProjectError::InvalidEdit { .. }));
        p.trim_clip(&id, ClipEdge::End, 3000).unwrap();
        assert_eq!(p.clip(&id).unwrap().trim_end_ms, 3000);
    }

    #[test]
    fn test_move_into_neighbour_is_rejected() {
        let mut p = project();
        let first = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        p.place_clip(&AssetId::from("a1"), 0, 6000).unwrap();
        assert!(p.move_clip(&first, 2000).is_err());
        p.move_clip(&first, 500).unwrap();
        assert_eq!(p.clip(&first).unwrap().start_ms, 500);
    }

    #[test]
    fn test_delete_removes_from_lane() {
        let mut p = project();
        let id = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        let removed = p.delete_clip(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(p.tracks[0].clips.is_empty());
        assert!(p.clips.is_empty());
    }

    #[test]
    fn test_transform_only_on_overlay_tracks() {
        let mut p = project();
        let main = p.place_clip(&AssetId::from("a1"), 0, 0).unwrap();
        let node = TransformNode::new(0.0, 0.0, 100.0, 100.0, 0.0, 1.0);
        assert!(p.set_transform(&main, Some(node)).is_err());

        let overlay = p.add_track(Track::new("PiP", TrackKind::Video));
        let pip = p.place_clip(&AssetId::from("logo"), overlay, 0).unwrap();
        p.set_transform(&pip, Some(node)).unwrap();
        assert_eq!(p.clip(&pip).unwrap().transform, Some(node));
        assert_eq!(p.clip(&pip).unwrap().z_index, 1);
    }
}
