//! Decodable media sources.
//!
//! The host supplies decoders through [`MediaSourceFactory`]. Still images
//! are handled in-crate by [`StillImageSource`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{Asset, AssetKind};
use image::RgbaImage;

/// A decoded picture shared between the decoder and the compositor.
pub type Frame = Arc<RgbaImage>;

/// How much of a source is decoded, mirroring media-element ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// A decodable media handle.
///
/// Implementations use interior mutability; the pool guarantees that
/// `seek`, `play` and `pause` on one source are never in flight together.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Start decoding. Resolves once metadata is available.
    async fn load(&self) -> CutlineResult<()>;

    /// Current decode progress.
    fn ready_state(&self) -> ReadyState;

    /// Playback position in source seconds.
    fn position_secs(&self) -> f64;

    /// Whether playback is paused.
    fn is_paused(&self) -> bool;

    /// Move the playback position.
    async fn seek(&self, secs: f64) -> CutlineResult<()>;

    /// Start playback. Resolves once playback has actually started.
    async fn play(&self) -> CutlineResult<()>;

    /// Pause playback.
    async fn pause(&self) -> CutlineResult<()>;

    /// Stop and free decode resources. Called exactly once per pooled handle.
    fn stop(&self);

    /// The frame at the current playback position, if one is decoded.
    fn current_frame(&self) -> Option<Frame>;

    /// Random-access frame for previews. Defaults to the current frame.
    async fn frame_at(&self, _secs: f64) -> CutlineResult<Option<Frame>> {
        Ok(self.current_frame())
    }
}

/// Opens media sources for assets.
pub trait MediaSourceFactory: Send + Sync {
    fn open(&self, asset: &Asset) -> CutlineResult<Arc<dyn MediaSource>>;
}

/// A still image: decoded once off the frame loop, identical at every time.
pub struct StillImageSource {
    path: PathBuf,
    frame: Mutex<Option<Frame>>,
    position_secs: Mutex<f64>,
    paused: AtomicBool,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: Mutex::new(None),
            position_secs: Mutex::new(0.0),
            paused: AtomicBool::new(true),
        }
    }

    /// A source that is already decoded.
    pub fn from_frame(frame: Frame) -> Self {
        let source = Self::new(PathBuf::new());
        *lock(&source.frame) = Some(frame);
        source
    }
}

#[async_trait]
impl MediaSource for StillImageSource {
    async fn load(&self) -> CutlineResult<()> {
        if lock(&self.frame).is_some() {
            return Ok(());
        }
        let path = self.path.clone();
        let decoded = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .map_err(|e| CutlineError::media(format!("image decode task failed: {e}")))??;
        *lock(&self.frame) = Some(Arc::new(decoded.to_rgba8()));
        tracing::debug!(path = %self.path.display(), "Still image decoded");
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        if lock(&self.frame).is_some() {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        }
    }

    fn position_secs(&self) -> f64 {
        *lock(&self.position_secs)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    async fn seek(&self, secs: f64) -> CutlineResult<()> {
        *lock(&self.position_secs) = secs.max(0.0);
        Ok(())
    }

    async fn play(&self) -> CutlineResult<()> {
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    async fn pause(&self) -> CutlineResult<()> {
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.paused.store(true, Ordering::Release);
        lock(&self.frame).take();
    }

    fn current_frame(&self) -> Option<Frame> {
        lock(&self.frame).clone()
    }
}

/// Opens [`StillImageSource`]s for image assets and defers every other kind
/// to an optional host decoder.
pub struct DefaultSourceFactory {
    timed: Option<Arc<dyn MediaSourceFactory>>,
}

impl DefaultSourceFactory {
    /// Images only; timed media is reported unplayable.
    pub fn stills_only() -> Self {
        Self { timed: None }
    }

    /// Images in-crate, video and audio through `timed`.
    pub fn with_timed(timed: Arc<dyn MediaSourceFactory>) -> Self {
        Self { timed: Some(timed) }
    }
}

impl MediaSourceFactory for DefaultSourceFactory {
    fn open(&self, asset: &Asset) -> CutlineResult<Arc<dyn MediaSource>> {
        match (asset.kind, &self.timed) {
            (AssetKind::Image, _) => Ok(Arc::new(StillImageSource::new(asset.path.clone()))),
            (_, Some(timed)) => timed.open(asset),
            (kind, None) => Err(CutlineError::media(format!(
                "no decoder available for {kind:?} asset {}",
                asset.id
            ))),
        }
    }
}

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[tokio::test]
    async fn test_still_image_loads_from_disk() {
        let path = std::env::temp_dir().join("cutline_still_source.png");
        RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let source = StillImageSource::new(&path);
        assert_eq!(source.ready_state(), ReadyState::HaveNothing);
        source.load().await.unwrap();
        assert_eq!(source.ready_state(), ReadyState::HaveEnoughData);

        let frame = source.frame_at(42.0).await.unwrap().unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_image_fails_to_load() {
        let source = StillImageSource::new("/definitely/not/here.png");
        assert!(source.load().await.is_err());
        assert!(source.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_play_pause_toggle() {
        let source = StillImageSource::from_frame(Arc::new(RgbaImage::new(1, 1)));
        assert!(source.is_paused());
        source.play().await.unwrap();
        assert!(!source.is_paused());
        source.seek(3.5).await.unwrap();
        assert_eq!(source.position_secs(), 3.5);
        source.stop();
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_default_factory_rejects_video_without_decoder() {
        let factory = DefaultSourceFactory::stills_only();
        let video = Asset::video("v", "v.mp4", 1000, 640, 360, true);
        assert!(factory.open(&video).is_err());
        let still = Asset::image("i", "i.png", 10, 10);
        assert!(factory.open(&still).is_ok());
    }

    #[test]
    fn test_default_factory_delegates_timed_media() {
        struct Solid;
        impl MediaSourceFactory for Solid {
            fn open(&self, _asset: &Asset) -> CutlineResult<Arc<dyn MediaSource>> {
                let frame = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
                Ok(Arc::new(StillImageSource::from_frame(frame)))
            }
        }

        let factory = DefaultSourceFactory::with_timed(Arc::new(Solid));
        let video = Asset::video("v", "v.mp4", 1000, 640, 360, true);
        assert!(factory.open(&video).is_ok());
    }
}
