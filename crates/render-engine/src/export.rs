//! Segment-based export orchestration.
//!
//! One segment per main-track clip and gap, written in timeline order into a
//! private working directory, then concatenated into the final file:
//!
//! ```text
//! clip ──► trim-copy ──(fails)──► trim-encode ─┐
//! still ─► still-image ────────────────────────┤
//! gap ───► black+silence ──(fails)──► skipped  ├──► segments.txt ──► concat-copy ──(fails)──► concat-encode
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cutline_common::clock::PlaybackClock;
use cutline_common::config::ExportDefaults;
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{AssetKind, ClipId, EditPlan, Gap, MainSegment, PlannedClip};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::process::ProcessRegistry;
use crate::transcode::{
    concat_list_line, CancelSource, CancelToken, Container, EncodeParams, FfmpegEngine,
    TranscodeEngine, TranscodeError, TranscodeOp,
};

/// User-facing export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub container: Container,

    /// Output width; 0 means source resolution.
    pub width: u32,

    /// Output height; 0 means source resolution.
    pub height: u32,

    /// Output frame rate; 0 means the canvas rate.
    pub fps: u32,

    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,

    /// Output file name. A timestamped name is generated when absent.
    pub filename: Option<String>,

    /// Directory receiving the final file.
    pub output_dir: PathBuf,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            width: 0,
            height: 0,
            fps: 0,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            filename: None,
            output_dir: PathBuf::from("exports"),
        }
    }
}

impl ExportSettings {
    /// Whether the source-resolution sentinel is set.
    pub fn uses_source_resolution(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Final artifact path.
    pub fn output_path(&self) -> PathBuf {
        let ext = self.container.extension();
        let name = match &self.filename {
            Some(name) if Path::new(name).extension().is_some() => name.clone(),
            Some(name) => format!("{name}.{ext}"),
            None => format!(
                "cutline-export-{}.{ext}",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ),
        };
        self.output_dir.join(name)
    }
}

/// Pipeline phase of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Segment,
    ConcatPrep,
    Finalize,
}

/// One progress event. `current` increases by one per event and reaches
/// `total` on the final one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    pub current: u32,
    pub total: u32,
    pub message: String,
}

impl ExportProgress {
    /// Completed fraction [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64).clamp(0.0, 1.0)
        }
    }
}

/// Progress callback for exports.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Output of a finished export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub output_path: PathBuf,

    /// Main-track span minus skipped gaps.
    pub duration_ms: u64,

    pub size_bytes: u64,

    /// Segments concatenated into the output.
    pub segments: usize,

    /// Gaps that could not be synthesized and were dropped.
    pub skipped_gaps: Vec<Gap>,

    /// Clips whose stream copy failed and were re-encoded.
    pub copy_fallbacks: Vec<ClipId>,

    /// Whether concatenation had to re-encode.
    pub concat_reencoded: bool,
}

/// Source window of a clip's export segment: `(start_secs, duration_secs)`.
///
/// The start is the clip's source position at its own timeline start,
/// through the same mapping the compositor samples with.
pub fn segment_window(clip: &PlannedClip) -> (f64, f64) {
    (
        PlaybackClock::ms_to_secs(clip.source_time_ms(clip.start_ms)),
        PlaybackClock::ms_to_secs(clip.duration_ms()),
    )
}

/// Output size for re-encoded segments. The source-resolution sentinel
/// resolves to the first sized main-track clip, then the canvas. Sizes are
/// rounded down to even values for 4:2:0 encoders.
pub fn target_size(plan: &EditPlan, settings: &ExportSettings) -> (u32, u32) {
    let (w, h) = if settings.uses_source_resolution() {
        plan.main_clips()
            .iter()
            .find_map(|c| c.natural_size())
            .unwrap_or((plan.canvas.width, plan.canvas.height))
    } else {
        (settings.width, settings.height)
    };
    ((w & !1).max(2), (h & !1).max(2))
}

/// Whether a clip's segment may be produced by stream copy.
fn copy_eligible(clip: &PlannedClip, target: (u32, u32)) -> bool {
    clip.kind == AssetKind::Video && clip.has_audio && clip.natural_size() == Some(target)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClipOutcome {
    Copied,
    Encoded,
    CopyFellBack,
}

struct ProgressTracker<'a> {
    current: u32,
    total: u32,
    callback: Option<&'a ProgressCallback>,
}

impl ProgressTracker<'_> {
    fn advance(&mut self, phase: ExportPhase, message: String) {
        self.current = (self.current + 1).min(self.total);
        debug!(
            ?phase,
            current = self.current,
            total = self.total,
            message = %message,
            "Export progress"
        );
        if let Some(cb) = self.callback {
            cb(ExportProgress {
                phase,
                current: self.current,
                total: self.total,
                message,
            });
        }
    }
}

/// A running export started with [`ExportOrchestrator::start`].
pub struct ExportHandle {
    cancel: CancelSource,
    task: JoinHandle<CutlineResult<ExportResult>>,
}

impl ExportHandle {
    /// Abort the export. In-flight transcoders are terminated and the
    /// working directory is removed.
    pub fn cancel(&self) {
        info!("Export cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the export to finish.
    pub async fn wait(self) -> CutlineResult<ExportResult> {
        self.task
            .await
            .map_err(|e| CutlineError::export(format!("export task failed: {e}")))?
    }
}

static NEXT_JOB: AtomicU64 = AtomicU64::new(0);

/// Drives a [`TranscodeEngine`] through the segment pipeline and owns the
/// registry of processes it spawns.
#[derive(Clone)]
pub struct ExportOrchestrator {
    engine: Arc<dyn TranscodeEngine>,
    registry: Arc<ProcessRegistry>,
    defaults: ExportDefaults,
    shutdown: Arc<CancelSource>,
}

impl ExportOrchestrator {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        registry: Arc<ProcessRegistry>,
        defaults: ExportDefaults,
    ) -> Self {
        let (shutdown, _) = CancelSource::new();
        Self {
            engine,
            registry,
            defaults,
            shutdown: Arc::new(shutdown),
        }
    }

    /// An orchestrator driving the configured ffmpeg binary.
    pub fn with_ffmpeg(defaults: ExportDefaults) -> Self {
        let registry = ProcessRegistry::new(Duration::from_millis(defaults.kill_grace_ms));
        let engine = Arc::new(FfmpegEngine::new(defaults.ffmpeg_binary.clone(), registry.clone()));
        Self::new(engine, registry, defaults)
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Host shutdown: cancel every export of this orchestrator, refuse new
    /// ones, then terminate every transcoder still running.
    pub async fn shutdown(&self) {
        info!("Export orchestrator shutting down");
        self.shutdown.cancel();
        self.registry.terminate_all().await;
    }

    /// Run an export in the background.
    pub fn start(
        &self,
        plan: Arc<EditPlan>,
        settings: ExportSettings,
        progress: Option<ProgressCallback>,
    ) -> ExportHandle {
        let (cancel, token) = CancelSource::new();
        let this = self.clone();
        let task = tokio::spawn(async move {
            this.export(&plan, &settings, progress.as_ref(), &token).await
        });
        ExportHandle { cancel, task }
    }

    /// Export `plan` to a single file.
    pub async fn export(
        &self,
        plan: &EditPlan,
        settings: &ExportSettings,
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> CutlineResult<ExportResult> {
        if plan.main_clips().is_empty() {
            return Err(CutlineError::validation("main track has no clips to export"));
        }
        let cancel = &cancel.or(&self.shutdown.token());
        check_cancel(cancel)?;
        if !self.engine.is_available().await {
            return Err(CutlineError::engine_unavailable(format!(
                "{} is not available on this system",
                self.engine.name()
            )));
        }

        let work_dir = self.create_work_dir()?;
        info!(
            engine = self.engine.name(),
            work_dir = %work_dir.display(),
            clips = plan.main_clips().len(),
            gaps = plan.gaps().len(),
            "Starting export"
        );

        let result = self
            .run_pipeline(plan, settings, progress, cancel, &work_dir)
            .await;

        match &result {
            Ok(_) if self.defaults.keep_segments => {
                info!(work_dir = %work_dir.display(), "Keeping intermediate segments");
            }
            _ => {
                if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                    warn!(
                        work_dir = %work_dir.display(),
                        error = %e,
                        "Failed to remove export working directory"
                    );
                }
            }
        }

        match &result {
            Ok(done) => info!(
                output = %done.output_path.display(),
                duration_ms = done.duration_ms,
                size_bytes = done.size_bytes,
                segments = done.segments,
                skipped_gaps = done.skipped_gaps.len(),
                "Export complete"
            ),
            Err(e) if e.is_cancelled() => info!("Export cancelled"),
            Err(e) => warn!(error = %e, "Export failed"),
        }
        result
    }

    async fn run_pipeline(
        &self,
        plan: &EditPlan,
        settings: &ExportSettings,
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
        work_dir: &Path,
    ) -> CutlineResult<ExportResult> {
        let target = target_size(plan, settings);
        let params = EncodeParams {
            container: settings.container,
            width: target.0,
            height: target.1,
            fps: if settings.fps == 0 {
                plan.canvas.fps
            } else {
                settings.fps
            },
            video_bitrate_kbps: settings.video_bitrate_kbps,
            audio_bitrate_kbps: settings.audio_bitrate_kbps,
            sample_rate: self.defaults.gap_audio_sample_rate,
        };
        let mut tracker = ProgressTracker {
            current: 0,
            total: (plan.main_clips().len() + plan.gaps().len() + 2) as u32,
            callback: progress,
        };

        let ext = settings.container.extension();
        let mut segments: Vec<PathBuf> = vec![];
        let mut skipped_gaps = vec![];
        let mut copy_fallbacks = vec![];

        for (index, segment) in plan.main_timeline().into_iter().enumerate() {
            check_cancel(cancel)?;
            let output = work_dir.join(format!("segment-{index:03}.{ext}"));
            match segment {
                MainSegment::Clip(clip) => {
                    let outcome = self.clip_segment(clip, &params, target, &output, cancel).await?;
                    if outcome == ClipOutcome::CopyFellBack {
                        copy_fallbacks.push(clip.clip_id.clone());
                    }
                    segments.push(output);
                    tracker.advance(
                        ExportPhase::Segment,
                        format!("clip {} ({:?})", clip.clip_id, outcome),
                    );
                }
                MainSegment::Gap(gap) => {
                    let op = TranscodeOp::Gap {
                        duration_secs: PlaybackClock::ms_to_secs(gap.duration_ms()),
                        params: params.clone(),
                        output: output.clone(),
                    };
                    match self.run_op(&op, cancel).await {
                        Ok(()) => {
                            segments.push(output);
                            tracker.advance(
                                ExportPhase::Segment,
                                format!("gap {}..{} ms filled", gap.start_ms, gap.end_ms),
                            );
                        }
                        Err(TranscodeError::Cancelled) => return Err(CutlineError::Cancelled),
                        Err(e) => {
                            warn!(
                                start_ms = gap.start_ms,
                                end_ms = gap.end_ms,
                                error = %e,
                                "Gap synthesis failed; skipping gap and joining neighbours"
                            );
                            remove_partial(&output);
                            skipped_gaps.push(gap.clone());
                            tracker.advance(
                                ExportPhase::Segment,
                                format!("gap {}..{} ms skipped", gap.start_ms, gap.end_ms),
                            );
                        }
                    }
                }
            }
        }
        check_cancel(cancel)?;

        let list_file = work_dir.join("segments.txt");
        let mut list = String::new();
        for segment in &segments {
            // Entries are relative to the list file.
            let name = segment.file_name().map(Path::new).unwrap_or(segment);
            list.push_str(&concat_list_line(name));
            list.push('\n');
        }
        std::fs::write(&list_file, list)?;
        tracker.advance(
            ExportPhase::ConcatPrep,
            format!("{} segments queued for concatenation", segments.len()),
        );

        let output_path = settings.output_path();
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let concat_reencoded = match self
            .concatenate(&list_file, &params, &output_path, cancel)
            .await
        {
            Ok(reencoded) => reencoded,
            Err(e) => {
                remove_partial(&output_path);
                return Err(e);
            }
        };

        let size_bytes = std::fs::metadata(&output_path)?.len();
        let skipped_ms: u64 = skipped_gaps.iter().map(Gap::duration_ms).sum();
        let duration_ms = plan.span_duration_ms().saturating_sub(skipped_ms);
        tracker.advance(
            ExportPhase::Finalize,
            format!("wrote {} ({size_bytes} bytes)", output_path.display()),
        );

        Ok(ExportResult {
            output_path,
            duration_ms,
            size_bytes,
            segments: segments.len(),
            skipped_gaps,
            copy_fallbacks,
            concat_reencoded,
        })
    }

    async fn clip_segment(
        &self,
        clip: &PlannedClip,
        params: &EncodeParams,
        target: (u32, u32),
        output: &Path,
        cancel: &CancelToken,
    ) -> CutlineResult<ClipOutcome> {
        let (start_secs, duration_secs) = segment_window(clip);

        if clip.is_still() {
            let op = TranscodeOp::StillImage {
                input: clip.source_path.clone(),
                duration_secs,
                params: params.clone(),
                output: output.to_path_buf(),
            };
            self.run_fatal(clip, &op, cancel).await?;
            return Ok(ClipOutcome::Encoded);
        }

        let encode = TranscodeOp::TrimEncode {
            input: clip.source_path.clone(),
            start_secs,
            duration_secs,
            has_audio: clip.has_audio,
            params: params.clone(),
            output: output.to_path_buf(),
        };

        if !copy_eligible(clip, target) {
            self.run_fatal(clip, &encode, cancel).await?;
            return Ok(ClipOutcome::Encoded);
        }

        let copy = TranscodeOp::TrimCopy {
            input: clip.source_path.clone(),
            start_secs,
            duration_secs,
            output: output.to_path_buf(),
        };
        match self.run_op(&copy, cancel).await {
            Ok(()) => Ok(ClipOutcome::Copied),
            Err(TranscodeError::Cancelled) => Err(CutlineError::Cancelled),
            Err(e) => {
                warn!(clip = %clip.clip_id, error = %e, "Stream copy failed; re-encoding segment");
                remove_partial(output);
                self.run_fatal(clip, &encode, cancel).await?;
                Ok(ClipOutcome::CopyFellBack)
            }
        }
    }

    /// Run one op. A failure after cancellation was requested is reported as
    /// cancellation: the process was most likely stopped from outside.
    async fn run_op(&self, op: &TranscodeOp, cancel: &CancelToken) -> Result<(), TranscodeError> {
        match self.engine.run(op, cancel).await {
            Err(e) if cancel.is_cancelled() => {
                debug!(op = op.label(), error = %e, "Transcoder stopped by cancellation");
                Err(TranscodeError::Cancelled)
            }
            result => result,
        }
    }

    /// Run an op whose failure fails the whole export.
    async fn run_fatal(
        &self,
        clip: &PlannedClip,
        op: &TranscodeOp,
        cancel: &CancelToken,
    ) -> CutlineResult<()> {
        self.run_op(op, cancel).await.map_err(|e| match e {
            TranscodeError::Cancelled => CutlineError::Cancelled,
            other => CutlineError::export(format!(
                "clip {} could not be rendered ({}): {other}",
                clip.clip_id,
                op.label()
            )),
        })
    }

    /// Join segments, falling back to a full re-encode. Returns whether the
    /// fallback was used.
    async fn concatenate(
        &self,
        list_file: &Path,
        params: &EncodeParams,
        output: &Path,
        cancel: &CancelToken,
    ) -> CutlineResult<bool> {
        let copy = TranscodeOp::ConcatCopy {
            list_file: list_file.to_path_buf(),
            output: output.to_path_buf(),
        };
        match self.run_op(&copy, cancel).await {
            Ok(()) => return Ok(false),
            Err(TranscodeError::Cancelled) => return Err(CutlineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Stream-copy concatenation failed; re-encoding");
                remove_partial(output);
            }
        }

        let encode = TranscodeOp::ConcatEncode {
            list_file: list_file.to_path_buf(),
            params: params.clone(),
            output: output.to_path_buf(),
        };
        self.run_op(&encode, cancel).await.map_err(|e| match e {
            TranscodeError::Cancelled => CutlineError::Cancelled,
            other => CutlineError::export(format!("concatenation failed: {other}")),
        })?;
        Ok(true)
    }

    fn create_work_dir(&self) -> CutlineResult<PathBuf> {
        let job = NEXT_JOB.fetch_add(1, Ordering::Relaxed);
        let dir = self.defaults.work_root().join(format!(
            "cutline-export-{}-{}-{job}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn check_cancel(cancel: &CancelToken) -> CutlineResult<()> {
    if cancel.is_cancelled() {
        Err(CutlineError::Cancelled)
    } else {
        Ok(())
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_project_model::{Asset, AssetId, Clip, Project, TimeMs};
    use proptest::prelude::*;

    fn planned(start: TimeMs, trim_start: TimeMs, trim_end: TimeMs) -> PlannedClip {
        let mut project = Project::new("Window", 1920, 1080, 30);
        project.add_asset(Asset::video("a", "a.mp4", 1_000_000, 1920, 1080, true));
        let clip = Clip::new("c", AssetId::from("a"), start, trim_start, trim_end);
        project.tracks[0].clips.push(clip.id.clone());
        project.clips.push(clip);
        project.edit_plan().unwrap().main_clips()[0].clone()
    }

    #[test]
    fn test_segment_window_follows_trim() {
        let clip = planned(6000, 1000, 4000);
        assert_eq!(segment_window(&clip), (1.0, 3.0));
    }

    #[test]
    fn test_output_path_naming() {
        let settings = ExportSettings {
            filename: Some("final".to_string()),
            container: Container::Mkv,
            output_dir: PathBuf::from("/out"),
            ..ExportSettings::default()
        };
        assert_eq!(settings.output_path(), PathBuf::from("/out/final.mkv"));

        let explicit = ExportSettings {
            filename: Some("cut.mov".to_string()),
            ..settings.clone()
        };
        assert_eq!(explicit.output_path(), PathBuf::from("/out/cut.mov"));

        let generated = ExportSettings {
            filename: None,
            ..settings
        };
        let name = generated.output_path();
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("cutline-export-"));
        assert!(name.ends_with(".mkv"));
    }

    #[test]
    fn test_target_size_sentinel_uses_first_clip() {
        let clip = planned(0, 0, 1000);
        let mut plan = EditPlan::empty(Default::default());
        plan.tracks = vec![cutline_project_model::PlannedTrack {
            index: 0,
            name: "Main".into(),
            kind: cutline_project_model::TrackKind::Video,
            visible: true,
            clips: vec![PlannedClip {
                natural_width: 1279,
                natural_height: 721,
                ..clip
            }],
        }];
        let settings = ExportSettings::default();
        assert_eq!(target_size(&plan, &settings), (1278, 720));

        let fixed = ExportSettings {
            width: 640,
            height: 360,
            ..settings
        };
        assert_eq!(target_size(&plan, &fixed), (640, 360));
    }

    #[test]
    fn test_copy_only_at_matching_size_with_audio() {
        let clip = planned(0, 0, 1000);
        assert!(copy_eligible(&clip, (1920, 1080)));
        assert!(!copy_eligible(&clip, (1280, 720)));
        let silent = PlannedClip {
            has_audio: false,
            ..clip.clone()
        };
        assert!(!copy_eligible(&silent, (1920, 1080)));
        let still = PlannedClip {
            kind: AssetKind::Image,
            ..clip
        };
        assert!(!copy_eligible(&still, (1920, 1080)));
    }

    #[test]
    fn test_progress_fraction() {
        let p = ExportProgress {
            phase: ExportPhase::ConcatPrep,
            current: 4,
            total: 5,
            message: String::new(),
        };
        assert!((p.fraction() - 0.8).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn test_export_window_matches_compositor_mapping(
            start in 0u64..100_000,
            trim_start in 0u64..50_000,
            len in 1u64..50_000,
            probe in 0.0f64..1.0,
        ) {
            let clip = planned(start, trim_start, trim_start + len);
            let (segment_start, segment_len) = segment_window(&clip);
            let t = start + ((len - 1) as f64 * probe) as u64;

            // Offset into the exported segment plus its source start is the
            // position the compositor samples at the same instant.
            let offset = PlaybackClock::ms_to_secs(t - clip.start_ms);
            prop_assert!((segment_start + offset - clip.source_time_secs(t)).abs() < 1e-9);
            prop_assert!((segment_len - PlaybackClock::ms_to_secs(len)).abs() < 1e-9);
        }
    }
}
