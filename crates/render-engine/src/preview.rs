//! Preview frames straight from source files, for hosts without a live
//! media pool (the CLI, thumbnail generation).

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_media_pool::Frame;
use cutline_project_model::{AssetKind, EditPlan, PlannedClip, TimeMs};
use image::RgbaImage;
use tokio::process::Command;
use tracing::debug;

use crate::compositor::{ComposeReport, Compositor, FrameSampler};
use crate::process::ProcessRegistry;

/// Samples video frames by asking ffmpeg for a single PNG at a source time.
/// Still images are decoded once and cached.
pub struct FfmpegFrameSampler {
    binary: String,
    registry: Arc<ProcessRegistry>,
    stills: Mutex<HashMap<std::path::PathBuf, Frame>>,
}

impl FfmpegFrameSampler {
    pub fn new(binary: impl Into<String>, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            binary: binary.into(),
            registry,
            stills: Mutex::new(HashMap::new()),
        }
    }

    /// Arguments extracting the frame at `source_secs` as PNG on stdout.
    pub fn args_for(input: &Path, source_secs: f64) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", source_secs.max(0.0)),
            "-i".into(),
            input.display().to_string(),
            "-frames:v".into(),
            "1".into(),
            "-f".into(),
            "image2pipe".into(),
            "-c:v".into(),
            "png".into(),
            "pipe:1".into(),
        ]
    }

    async fn still(&self, path: &Path) -> CutlineResult<Frame> {
        if let Some(frame) = self.cached(path) {
            return Ok(frame);
        }
        let owned = path.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || image::open(&owned))
            .await
            .map_err(|e| CutlineError::media(format!("image decode task failed: {e}")))??;
        let frame = Arc::new(decoded.to_rgba8());
        self.stills
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf(), frame.clone());
        Ok(frame)
    }

    fn cached(&self, path: &Path) -> Option<Frame> {
        self.stills
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
    }

    async fn video(&self, path: &Path, source_secs: f64) -> CutlineResult<Option<Frame>> {
        let child = Command::new(&self.binary)
            .args(Self::args_for(path, source_secs))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CutlineError::engine_unavailable(format!("{}: {e}", self.binary))
                }
                _ => CutlineError::Io(e),
            })?;
        let _guard = self
            .registry
            .register(child.id().unwrap_or_default(), "preview-frame");

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(CutlineError::transcode(format!(
                "frame extraction at {source_secs:.3}s from {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            // Past the end of the stream.
            return Ok(None);
        }
        let decoded = image::load_from_memory(&output.stdout)?;
        debug!(path = %path.display(), source_secs, "Extracted preview frame");
        Ok(Some(Arc::new(decoded.to_rgba8())))
    }
}

#[async_trait]
impl FrameSampler for FfmpegFrameSampler {
    async fn sample(&self, clip: &PlannedClip, source_secs: f64) -> CutlineResult<Option<Frame>> {
        match clip.kind {
            AssetKind::Image => self.still(&clip.source_path).await.map(Some),
            AssetKind::Video => self.video(&clip.source_path, source_secs).await,
            AssetKind::Audio => Ok(None),
        }
    }
}

/// Render the timeline at `t` with `sampler`, at the plan's canvas size.
pub async fn preview_frame(
    plan: &EditPlan,
    t: TimeMs,
    sampler: &dyn FrameSampler,
) -> (RgbaImage, ComposeReport) {
    Compositor::for_plan(plan).render_at(plan, t, sampler).await
}
