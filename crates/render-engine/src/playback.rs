//! Real-time playback driver.
//!
//! A [`Player`] owns the media pool, the timeline clock and the preview
//! surface. The host calls [`Player::tick`] once per display frame; a tick
//! never waits on media or external processes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cutline_common::clock::{PlaybackClock, RateController};
use cutline_common::config::{AppConfig, PoolConfig};
use cutline_common::error::CutlineResult;
use cutline_media_pool::{Frame, FrameReader, MediaPool, MediaSourceFactory, SyncOutcome};
use cutline_project_model::{AssetId, ClipId, EditPlan, PlannedClip, TimeMs};
use image::RgbaImage;
use tracing::{debug, trace};

use crate::compositor::{ComposeReport, Compositor, FrameSampler};

/// Outcome of one playback tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Timeline position the frame was composed at.
    pub position_ms: TimeMs,
    pub playing: bool,
    pub compose: ComposeReport,
    /// Active clips whose asset failed to load.
    pub unplayable: Vec<ClipId>,
}

/// Drives the media pool and compositor from a shared timeline clock.
pub struct Player {
    plan: Arc<EditPlan>,
    pool: MediaPool,
    clock: PlaybackClock,
    compositor: Compositor,
    frame: RgbaImage,
    pacer: RateController,
    epoch: Instant,
}

impl Player {
    /// A paused player at position zero. Must be created inside a tokio
    /// runtime; every asset the plan references starts loading.
    pub fn new(
        plan: Arc<EditPlan>,
        factory: Arc<dyn MediaSourceFactory>,
        config: PoolConfig,
    ) -> CutlineResult<Self> {
        let mut pool = MediaPool::new(factory, config)?;
        pool.reconcile(&plan);
        let compositor = Compositor::for_plan(&plan);
        let frame = compositor.blank();
        Ok(Self {
            plan,
            pool,
            clock: PlaybackClock::new(),
            compositor,
            frame,
            pacer: RateController::new(30),
            epoch: Instant::now(),
        })
    }

    /// A player using the pool and preview rate from the app configuration.
    pub fn from_config(
        plan: Arc<EditPlan>,
        factory: Arc<dyn MediaSourceFactory>,
        config: &AppConfig,
    ) -> CutlineResult<Self> {
        Ok(Self::new(plan, factory, config.pool.clone())?
            .with_frame_rate(config.playback.preview_fps))
    }

    /// Pace [`Player::poll_at`] to `hz` frames per second.
    pub fn with_frame_rate(mut self, hz: u32) -> Self {
        self.pacer = RateController::new(hz);
        self
    }

    /// Swap in a rebuilt plan after an edit. Handles for assets the new plan
    /// still references stay loaded.
    pub fn set_plan(&mut self, plan: Arc<EditPlan>) {
        self.pool.reconcile(&plan);
        if (plan.canvas.width, plan.canvas.height) != self.compositor.size() {
            self.compositor = Compositor::for_plan(&plan);
            self.frame = self.compositor.blank();
        }
        self.plan = plan;
        let end = self.plan.duration_ms();
        if self.clock.position_ms() > end {
            self.clock.seek(end);
        }
        debug!(duration_ms = end, "Playback plan replaced");
    }

    pub fn plan(&self) -> &Arc<EditPlan> {
        &self.plan
    }

    pub fn pool(&self) -> &MediaPool {
        &self.pool
    }

    pub fn play(&mut self) {
        if self.clock.position_ms() >= self.plan.duration_ms() {
            self.clock.seek(0);
        }
        self.clock.play();
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    pub fn seek(&mut self, position_ms: TimeMs) {
        self.clock.seek(position_ms.min(self.plan.duration_ms()));
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.clock.set_rate(rate);
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn position_ms(&self) -> TimeMs {
        self.clock.position_ms()
    }

    /// The most recently composed frame.
    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    /// Stop playback and silence every handle.
    pub fn stop(&mut self) {
        self.clock.pause();
        self.pool.pause_all_except(&HashSet::new());
    }

    /// Advance one display frame.
    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Tick only when the preview frame interval has elapsed since the last
    /// paced tick. Hosts with a faster loop call this every iteration.
    pub fn poll_at(&mut self, now: Instant) -> Option<TickReport> {
        let elapsed_ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        if self.pacer.should_tick(elapsed_ns) {
            Some(self.tick_at(now))
        } else {
            None
        }
    }

    /// Advance one display frame as of `now`.
    pub fn tick_at(&mut self, now: Instant) -> TickReport {
        let end = self.plan.duration_ms();
        let mut t = self.clock.position_ms_at(now);
        if self.clock.is_playing() && t >= end {
            self.clock.pause_at(now);
            self.clock.seek(end);
            t = end;
            debug!(position_ms = t, "Playback reached the end of the timeline");
        }
        let playing = self.clock.is_playing();

        let mut visible: HashSet<AssetId> = HashSet::new();
        let mut unplayable = vec![];
        for clip in self.plan.active_at(t) {
            let source_secs = clip.source_time_secs(t);
            let mut outcome = self.pool.sync(&clip.asset_id, source_secs, playing);
            if outcome == SyncOutcome::NotResident {
                if let Some(asset) = self.plan.asset(&clip.asset_id) {
                    self.pool.acquire(asset);
                    outcome = self.pool.sync(&clip.asset_id, source_secs, playing);
                }
            }
            trace!(clip = %clip.clip_id, source_secs, playing, ?outcome, "Synced clip");
            if outcome == SyncOutcome::Unplayable {
                unplayable.push(clip.clip_id.clone());
            }
            visible.insert(clip.asset_id.clone());
        }
        self.pool.pause_all_except(&visible);

        let pool = &self.pool;
        let compose = self
            .compositor
            .compose_into(&mut self.frame, &self.plan, t, |clip, _| pool.frame(&clip.asset_id));

        TickReport {
            position_ms: t,
            playing,
            compose,
            unplayable,
        }
    }

    /// A still of the timeline at `t` for scrubbing, sampled at each clip's
    /// trim-mapped source time. Does not move the playhead.
    pub async fn preview_frame(&self, t: TimeMs) -> (RgbaImage, ComposeReport) {
        let sampler = PoolSampler::for_plan(&self.pool, &self.plan, t);
        self.compositor.render_at(&self.plan, t, &sampler).await
    }
}

/// Random access through the readers of ready pool handles.
struct PoolSampler {
    readers: HashMap<AssetId, FrameReader>,
}

impl PoolSampler {
    fn for_plan(pool: &MediaPool, plan: &EditPlan, t: TimeMs) -> Self {
        let readers = plan
            .visible_at(t)
            .into_iter()
            .filter_map(|clip| Some((clip.asset_id.clone(), pool.reader(&clip.asset_id)?)))
            .collect();
        Self { readers }
    }
}

#[async_trait]
impl FrameSampler for PoolSampler {
    async fn sample(&self, clip: &PlannedClip, source_secs: f64) -> CutlineResult<Option<Frame>> {
        match self.readers.get(&clip.asset_id) {
            Some(reader) => reader.at(source_secs).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_common::error::CutlineError;
    use cutline_media_pool::{MediaSource, MediaState, StillImageSource};
    use cutline_project_model::{Asset, Clip, Project, Track, TrackKind, TransformNode};
    use image::Rgba;
    use std::time::Duration;

    /// Solid-color stills keyed by asset id; other ids fail to open.
    struct SolidFactory {
        colors: HashMap<String, [u8; 4]>,
    }

    impl MediaSourceFactory for SolidFactory {
        fn open(&self, asset: &Asset) -> CutlineResult<Arc<dyn MediaSource>> {
            let color = self
                .colors
                .get(asset.id.as_str())
                .ok_or_else(|| CutlineError::media("unsupported"))?;
            let frame = Arc::new(RgbaImage::from_pixel(
                asset.width.max(1),
                asset.height.max(1),
                Rgba(*color),
            ));
            Ok(Arc::new(StillImageSource::from_frame(frame)))
        }
    }

    fn plan() -> Arc<EditPlan> {
        let mut project = Project::new("Tick", 64, 36, 30);
        project.add_asset(Asset::image("base", "base.png", 64, 36));
        project.add_asset(Asset::image("pip", "pip.png", 8, 8));
        project.add_asset(Asset::video("broken", "broken.mp4", 10_000, 64, 36, false));

        let base = Clip::new("c-base", "base".into(), 0, 0, 2000);
        let broken = Clip::new("c-broken", "broken".into(), 2000, 0, 1000);
        project.tracks[0].clips = vec![base.id.clone(), broken.id.clone()];

        let overlay = project.add_track(Track::new("Overlay", TrackKind::Video));
        let mut pip = Clip::new("c-pip", "pip".into(), 500, 0, 1000);
        pip.transform = Some(TransformNode {
            x: 0.0,
            y: 0.0,
            w: 16.0,
            h: 16.0,
            rotation: 0.0,
            opacity: 1.0,
        });
        project.tracks[overlay].clips = vec![pip.id.clone()];
        project.clips = vec![base, broken, pip];
        Arc::new(project.edit_plan().unwrap())
    }

    fn player() -> Player {
        let factory = SolidFactory {
            colors: HashMap::from([
                ("base".to_string(), [0, 0, 255, 255]),
                ("pip".to_string(), [255, 0, 0, 255]),
            ]),
        };
        Player::new(plan(), Arc::new(factory), PoolConfig::default()).unwrap()
    }

    async fn settle(player: &Player) {
        for _ in 0..200 {
            if player.pool().is_ready(&"base".into()) && player.pool().is_ready(&"pip".into()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handles never became ready");
    }

    #[tokio::test]
    async fn test_tick_composes_visible_layers() {
        let mut player = player();
        settle(&player).await;

        player.seek(600);
        let report = player.tick();
        assert_eq!(report.position_ms, 600);
        assert_eq!(
            report.compose.drawn,
            vec![ClipId::from("c-base"), ClipId::from("c-pip")]
        );
        assert_eq!(player.frame().get_pixel(4, 4), &Rgba([255, 0, 0, 255]));
        assert_eq!(player.frame().get_pixel(40, 20), &Rgba([0, 0, 255, 255]));
        assert_eq!(player.pool().state(&"pip".into()), MediaState::Visible);
    }

    #[tokio::test]
    async fn test_offscreen_assets_are_hidden() {
        let mut player = player();
        settle(&player).await;

        player.seek(1600);
        player.tick();
        assert_eq!(player.pool().state(&"pip".into()), MediaState::Hidden);
        assert_eq!(player.pool().state(&"base".into()), MediaState::Visible);
    }

    #[tokio::test]
    async fn test_unplayable_clip_is_skipped_not_fatal() {
        let mut player = player();
        settle(&player).await;

        player.seek(2500);
        let report = player.tick();
        assert_eq!(report.unplayable, vec![ClipId::from("c-broken")]);
        assert_eq!(report.compose.skipped, vec![ClipId::from("c-broken")]);
        assert_eq!(player.frame().get_pixel(10, 10), &Rgba([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_playback_stops_at_end() {
        let mut player = player();
        settle(&player).await;

        player.seek(2990);
        player.play();
        let later = Instant::now() + Duration::from_millis(50);
        let report = player.tick_at(later);
        assert!(!report.playing);
        assert_eq!(report.position_ms, 3000);
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_poll_is_paced_to_the_preview_rate() {
        let mut player = player().with_frame_rate(10);
        let t0 = Instant::now();

        assert!(player.poll_at(t0).is_some());
        assert!(player.poll_at(t0 + Duration::from_millis(50)).is_none());
        assert!(player.poll_at(t0 + Duration::from_millis(100)).is_some());
    }

    #[tokio::test]
    async fn test_from_config_builds_a_paused_player() {
        let factory = SolidFactory {
            colors: HashMap::new(),
        };
        let player = Player::from_config(plan(), Arc::new(factory), &AppConfig::default()).unwrap();
        assert!(!player.is_playing());
        assert_eq!(player.position_ms(), 0);
    }

    #[tokio::test]
    async fn test_preview_frame_does_not_move_playhead() {
        let mut player = player();
        settle(&player).await;
        player.seek(100);

        let (still, report) = player.preview_frame(700).await;
        assert_eq!(report.drawn.len(), 2);
        assert_eq!(still.get_pixel(4, 4), &Rgba([255, 0, 0, 255]));
        assert_eq!(player.position_ms(), 100);
    }

    #[tokio::test]
    async fn test_set_plan_releases_unreferenced_assets() {
        let mut player = player();
        settle(&player).await;

        let mut project = Project::new("Smaller", 64, 36, 30);
        project.add_asset(Asset::image("base", "base.png", 64, 36));
        let clip = Clip::new("c-base", "base".into(), 0, 0, 1000);
        project.tracks[0].clips = vec![clip.id.clone()];
        project.clips = vec![clip];
        player.seek(2500);
        player.set_plan(Arc::new(project.edit_plan().unwrap()));

        assert_eq!(player.pool().state(&"pip".into()), MediaState::Released);
        assert!(player.pool().is_ready(&"base".into()));
        assert_eq!(player.position_ms(), 1000);
    }
}
