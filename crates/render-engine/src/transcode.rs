//! External transcoding engine abstraction and the ffmpeg implementation.
//!
//! The export pipeline describes each step as a [`TranscodeOp`]; a
//! [`TranscodeEngine`] turns it into a subprocess invocation. Only the
//! engine touches pixels or samples.

use std::future::{poll_fn, Future};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;

use async_trait::async_trait;
use cutline_common::error::CutlineError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::process::ProcessRegistry;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mov,
    Mkv,
    Webm,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
        }
    }

    /// Parse a container name or file extension.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Some(Container::Mp4),
            "mov" => Some(Container::Mov),
            "mkv" => Some(Container::Mkv),
            "webm" => Some(Container::Webm),
            _ => None,
        }
    }
}

/// Encoder parameters shared by every re-encoding operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub container: Container,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub sample_rate: u32,
}

/// One transcoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOp {
    /// Cut `start..start+duration` out of a video without re-encoding.
    TrimCopy {
        input: PathBuf,
        start_secs: f64,
        duration_secs: f64,
        output: PathBuf,
    },
    /// Cut and re-encode, scaling and padding to the target size. Sources
    /// without audio get a silent track.
    TrimEncode {
        input: PathBuf,
        start_secs: f64,
        duration_secs: f64,
        has_audio: bool,
        params: EncodeParams,
        output: PathBuf,
    },
    /// Loop a still image for `duration` with a silent track.
    StillImage {
        input: PathBuf,
        duration_secs: f64,
        params: EncodeParams,
        output: PathBuf,
    },
    /// Synthesize black video with silence.
    Gap {
        duration_secs: f64,
        params: EncodeParams,
        output: PathBuf,
    },
    /// Join segments listed in a concat list file without re-encoding.
    ConcatCopy { list_file: PathBuf, output: PathBuf },
    /// Join segments and re-encode the result.
    ConcatEncode {
        list_file: PathBuf,
        params: EncodeParams,
        output: PathBuf,
    },
}

impl TranscodeOp {
    pub fn output(&self) -> &Path {
        match self {
            TranscodeOp::TrimCopy { output, .. }
            | TranscodeOp::TrimEncode { output, .. }
            | TranscodeOp::StillImage { output, .. }
            | TranscodeOp::Gap { output, .. }
            | TranscodeOp::ConcatCopy { output, .. }
            | TranscodeOp::ConcatEncode { output, .. } => output,
        }
    }

    /// Expected output duration, if the op knows it.
    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            TranscodeOp::TrimCopy { duration_secs, .. }
            | TranscodeOp::TrimEncode { duration_secs, .. }
            | TranscodeOp::StillImage { duration_secs, .. }
            | TranscodeOp::Gap { duration_secs, .. } => Some(*duration_secs),
            TranscodeOp::ConcatCopy { .. } | TranscodeOp::ConcatEncode { .. } => None,
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            TranscodeOp::TrimCopy { .. } => "trim-copy",
            TranscodeOp::TrimEncode { .. } => "trim-encode",
            TranscodeOp::StillImage { .. } => "still-image",
            TranscodeOp::Gap { .. } => "gap",
            TranscodeOp::ConcatCopy { .. } => "concat-copy",
            TranscodeOp::ConcatEncode { .. } => "concat-encode",
        }
    }

    /// Whether this op avoids re-encoding.
    pub fn is_copy(&self) -> bool {
        matches!(self, TranscodeOp::TrimCopy { .. } | TranscodeOp::ConcatCopy { .. })
    }
}

/// Transcoder failures.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("transcoder not found: {message}")]
    NotFound { message: String },

    #[error("failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transcoder exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("transcode cancelled")]
    Cancelled,

    #[error("transcoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TranscodeError> for CutlineError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Cancelled => CutlineError::Cancelled,
            TranscodeError::NotFound { message } => CutlineError::engine_unavailable(message),
            other => CutlineError::transcode(other.to_string()),
        }
    }
}

/// Cooperative cancellation observed by engines and the export pipeline.
/// A token may follow several sources; any one of them cancels it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rxs: Vec<watch::Receiver<bool>>,
}

/// Trigger side of a [`CancelToken`].
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rxs: vec![rx] })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rxs: vec![self.tx.subscribe()],
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rxs: vec![] }
    }

    /// A token cancelled by either this token's sources or `other`'s.
    pub fn or(&self, other: &CancelToken) -> CancelToken {
        let mut rxs = self.rxs.clone();
        rxs.extend(other.rxs.iter().cloned());
        CancelToken { rxs }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rxs.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Sources dropped without
    /// cancelling are ignored; with none left this never resolves.
    pub async fn cancelled(&self) {
        let mut waits: Vec<CancelWait> = self
            .rxs
            .iter()
            .cloned()
            .map(|rx| Box::pin(wait_for_cancel(rx)) as CancelWait)
            .collect();
        poll_fn(|cx| {
            let mut i = 0;
            while i < waits.len() {
                match waits[i].as_mut().poll(cx) {
                    Poll::Ready(true) => return Poll::Ready(()),
                    Poll::Ready(false) => {
                        waits.swap_remove(i);
                    }
                    Poll::Pending => i += 1,
                }
            }
            Poll::Pending
        })
        .await
    }
}

type CancelWait = Pin<Box<dyn Future<Output = bool> + Send>>;

/// True once `rx` reports cancellation, false if its source is dropped first.
async fn wait_for_cancel(mut rx: watch::Receiver<bool>) -> bool {
    loop {
        if *rx.borrow_and_update() {
            return true;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

/// An external transcoding engine.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine can run on this system.
    async fn is_available(&self) -> bool;

    /// Run one operation to completion. Output must be fully written when
    /// this returns `Ok`.
    async fn run(&self, op: &TranscodeOp, cancel: &CancelToken) -> Result<(), TranscodeError>;
}

/// ffmpeg driven as a subprocess.
pub struct FfmpegEngine {
    binary: String,
    registry: Arc<ProcessRegistry>,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<String>, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            binary: binary.into(),
            registry,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Full argument list for an operation.
    pub fn args_for(&self, op: &TranscodeOp) -> Vec<String> {
        let mut args = strings(&["-y", "-hide_banner", "-nostdin", "-loglevel", "error"]);
        args.extend(strings(&["-progress", "pipe:1", "-nostats"]));

        match op {
            TranscodeOp::TrimCopy {
                input,
                start_secs,
                duration_secs,
                output,
            } => {
                args.extend(strings(&["-ss", &secs(*start_secs), "-t", &secs(*duration_secs)]));
                args.push("-i".to_string());
                args.push(path_arg(input));
                args.extend(strings(&["-map", "0:v:0", "-map", "0:a:0?", "-c", "copy"]));
                args.extend(strings(&["-avoid_negative_ts", "make_zero"]));
                args.push(path_arg(output));
            }
            TranscodeOp::TrimEncode {
                input,
                start_secs,
                duration_secs,
                has_audio,
                params,
                output,
            } => {
                args.extend(strings(&["-ss", &secs(*start_secs), "-t", &secs(*duration_secs)]));
                args.push("-i".to_string());
                args.push(path_arg(input));
                if *has_audio {
                    args.extend(strings(&["-map", "0:v:0", "-map", "0:a:0"]));
                } else {
                    args.extend(silence_input(*duration_secs, params.sample_rate));
                    args.extend(strings(&["-map", "0:v:0", "-map", "1:a:0"]));
                }
                args.extend(strings(&["-vf", &fit_filter(params)]));
                args.extend(codec_args(params));
                args.extend(strings(&["-t", &secs(*duration_secs)]));
                args.push(path_arg(output));
            }
            TranscodeOp::StillImage {
                input,
                duration_secs,
                params,
                output,
            } => {
                args.extend(strings(&[
                    "-loop",
                    "1",
                    "-framerate",
                    &params.fps.max(1).to_string(),
                    "-t",
                    &secs(*duration_secs),
                ]));
                args.push("-i".to_string());
                args.push(path_arg(input));
                args.extend(silence_input(*duration_secs, params.sample_rate));
                args.extend(strings(&["-map", "0:v:0", "-map", "1:a:0"]));
                args.extend(strings(&["-vf", &fit_filter(params)]));
                args.extend(codec_args(params));
                args.extend(strings(&["-t", &secs(*duration_secs)]));
                args.push(path_arg(output));
            }
            TranscodeOp::Gap {
                duration_secs,
                params,
                output,
            } => {
                let color = format!(
                    "color=c=black:s={}x{}:r={}",
                    params.width,
                    params.height,
                    params.fps.max(1)
                );
                args.extend(strings(&["-f", "lavfi", "-t", &secs(*duration_secs), "-i", &color]));
                args.extend(silence_input(*duration_secs, params.sample_rate));
                args.extend(strings(&["-map", "0:v:0", "-map", "1:a:0"]));
                args.extend(codec_args(params));
                args.extend(strings(&["-t", &secs(*duration_secs)]));
                args.push(path_arg(output));
            }
            TranscodeOp::ConcatCopy { list_file, output } => {
                args.extend(strings(&["-f", "concat", "-safe", "0", "-i"]));
                args.push(path_arg(list_file));
                args.extend(strings(&["-c", "copy"]));
                args.push(path_arg(output));
            }
            TranscodeOp::ConcatEncode {
                list_file,
                params,
                output,
            } => {
                args.extend(strings(&["-f", "concat", "-safe", "0", "-i"]));
                args.push(path_arg(list_file));
                args.extend(codec_args(params));
                args.push(path_arg(output));
            }
        }
        args
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn run(&self, op: &TranscodeOp, cancel: &CancelToken) -> Result<(), TranscodeError> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        let args = self.args_for(op);
        debug!(op = op.label(), args = ?args, "Running ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscodeError::NotFound {
                    message: format!("{}: {e}", self.binary),
                },
                _ => TranscodeError::Spawn(e),
            })?;

        let pid = child.id().unwrap_or_default();
        let guard = self.registry.register(pid, op.label());
        info!(pid, op = op.label(), output = %op.output().display(), "ffmpeg process started");

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut output = String::new();
                match stderr.read_to_string(&mut output).await {
                    Ok(_) => output,
                    Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
                }
            })
        });

        let progress_task = child.stdout.take().map(|stdout| {
            let label = op.label();
            let expected = op.duration_secs();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut state = ProgressState::default();
                let mut last_advance = Instant::now();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Some((key, value)) = line.trim().split_once('=') else {
                        continue;
                    };
                    let before = state.out_time_secs;
                    state.update(key, value);
                    if key != "progress" {
                        continue;
                    }
                    if state.out_time_secs > before + 0.001 {
                        last_advance = Instant::now();
                    }
                    debug!(
                        op = label,
                        out_time_secs = state.out_time_secs,
                        fraction = state.fraction(expected),
                        "ffmpeg progress"
                    );
                    if last_advance.elapsed().as_secs() >= 10 {
                        warn!(
                            op = label,
                            out_time_secs = state.out_time_secs,
                            "No ffmpeg progress advancement for 10s"
                        );
                        last_advance = Instant::now();
                    }
                }
                state
            })
        });

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = status else {
            info!(pid, op = op.label(), "Cancelling ffmpeg");
            self.registry.terminate(&mut child).await;
            return Err(TranscodeError::Cancelled);
        };
        // Reaped: the pid may be reused from here on.
        drop(guard);
        let status = status?;

        if let Some(task) = progress_task {
            if let Ok(state) = task.await {
                debug!(op = op.label(), complete = state.complete, "ffmpeg progress stream closed");
            }
        }
        let stderr_output = match stderr_task {
            Some(task) => task
                .await
                .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
            None => String::new(),
        };

        if !status.success() {
            return Err(TranscodeError::Failed {
                status: status.code(),
                stderr: stderr_output.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parsed `-progress` key/value stream.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Completed fraction of an op with a known duration.
    pub fn fraction(&self, expected_secs: Option<f64>) -> f64 {
        if self.complete {
            return 1.0;
        }
        match expected_secs {
            Some(total) if total > 0.0 => (self.out_time_secs / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

fn codec_args(params: &EncodeParams) -> Vec<String> {
    let video_bitrate = format!("{}k", params.video_bitrate_kbps.max(500));
    let audio_bitrate = format!("{}k", params.audio_bitrate_kbps.max(64));
    let rate = params.sample_rate.max(8000).to_string();

    let mut args = match params.container {
        Container::Mp4 | Container::Mov | Container::Mkv => strings(&[
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-profile:v",
            "high",
            "-pix_fmt",
            "yuv420p",
            "-b:v",
            &video_bitrate,
            "-c:a",
            "aac",
            "-b:a",
            &audio_bitrate,
        ]),
        Container::Webm => strings(&[
            "-c:v",
            "libvpx-vp9",
            "-b:v",
            &video_bitrate,
            "-c:a",
            "libopus",
            "-b:a",
            &audio_bitrate,
        ]),
    };
    args.extend(strings(&["-r", &params.fps.max(1).to_string(), "-ar", &rate, "-ac", "2"]));
    if matches!(params.container, Container::Mp4 | Container::Mov) {
        args.extend(strings(&["-movflags", "+faststart"]));
    }
    args
}

/// Aspect-preserving scale into the target box, padded with black.
fn fit_filter(params: &EncodeParams) -> String {
    let (w, h) = (params.width, params.height);
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={}",
        params.fps.max(1)
    )
}

fn silence_input(duration_secs: f64, sample_rate: u32) -> Vec<String> {
    strings(&[
        "-f",
        "lavfi",
        "-t",
        &secs(duration_secs),
        "-i",
        &format!("anullsrc=channel_layout=stereo:sample_rate={}", sample_rate.max(8000)),
    ])
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// One line of an ffmpeg concat list.
pub fn concat_list_line(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine() -> FfmpegEngine {
        FfmpegEngine::new("ffmpeg", ProcessRegistry::new(Duration::from_millis(100)))
    }

    fn params() -> EncodeParams {
        EncodeParams {
            container: Container::Mp4,
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            sample_rate: 48000,
        }
    }

    fn window(args: &[String], flag: &str) -> Option<String> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).cloned()
    }

    #[test]
    fn test_trim_copy_args() {
        let op = TranscodeOp::TrimCopy {
            input: "/media/a.mp4".into(),
            start_secs: 1.0,
            duration_secs: 3.0,
            output: "/work/seg-001.mp4".into(),
        };
        let args = engine().args_for(&op);
        assert_eq!(window(&args, "-ss").as_deref(), Some("1.000"));
        assert_eq!(window(&args, "-t").as_deref(), Some("3.000"));
        assert_eq!(window(&args, "-c").as_deref(), Some("copy"));
        assert_eq!(window(&args, "-progress").as_deref(), Some("pipe:1"));
        assert_eq!(args.last().map(String::as_str), Some("/work/seg-001.mp4"));
        assert!(op.is_copy());
    }

    #[test]
    fn test_trim_encode_without_audio_adds_silence() {
        let op = TranscodeOp::TrimEncode {
            input: "/media/a.mp4".into(),
            start_secs: 0.0,
            duration_secs: 2.5,
            has_audio: false,
            params: params(),
            output: "/work/seg.mp4".into(),
        };
        let args = engine().args_for(&op);
        assert!(args.iter().any(|a| a.starts_with("anullsrc=")));
        assert!(args.iter().any(|a| a == "1:a:0"));
        let vf = window(&args, "-vf").unwrap();
        assert!(vf.starts_with("scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(vf.contains("pad=1280:720"));
        assert_eq!(window(&args, "-c:v").as_deref(), Some("libx264"));
    }

    #[test]
    fn test_still_image_loops_input() {
        let op = TranscodeOp::StillImage {
            input: "/media/logo.png".into(),
            duration_secs: 4.0,
            params: params(),
            output: "/work/seg.mp4".into(),
        };
        let args = engine().args_for(&op);
        assert_eq!(window(&args, "-loop").as_deref(), Some("1"));
        assert_eq!(window(&args, "-framerate").as_deref(), Some("30"));
        assert!(args.iter().any(|a| a == "/media/logo.png"));
    }

    #[test]
    fn test_gap_uses_black_and_silence_sources() {
        let op = TranscodeOp::Gap {
            duration_secs: 1.0,
            params: params(),
            output: "/work/gap.mp4".into(),
        };
        let args = engine().args_for(&op);
        assert!(args.iter().any(|a| a == "color=c=black:s=1280x720:r=30"));
        assert!(args
            .iter()
            .any(|a| a == "anullsrc=channel_layout=stereo:sample_rate=48000"));
        assert_eq!(op.duration_secs(), Some(1.0));
    }

    #[test]
    fn test_concat_args() {
        let copy = TranscodeOp::ConcatCopy {
            list_file: "/work/segments.txt".into(),
            output: "/out/final.mp4".into(),
        };
        let args = engine().args_for(&copy);
        assert_eq!(window(&args, "-f").as_deref(), Some("concat"));
        assert_eq!(window(&args, "-safe").as_deref(), Some("0"));
        assert_eq!(window(&args, "-c").as_deref(), Some("copy"));

        let encode = TranscodeOp::ConcatEncode {
            list_file: "/work/segments.txt".into(),
            params: EncodeParams {
                container: Container::Webm,
                ..params()
            },
            output: "/out/final.webm".into(),
        };
        let args = engine().args_for(&encode);
        assert_eq!(window(&args, "-c:v").as_deref(), Some("libvpx-vp9"));
        assert!(!args.iter().any(|a| a == "+faststart"));
    }

    #[test]
    fn test_concat_list_line_escapes_quotes() {
        assert_eq!(
            concat_list_line(Path::new("/work/it's.mp4")),
            "file '/work/it'\\''s.mp4'"
        );
    }

    #[test]
    fn test_progress_state_parsing() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "1500000");
        state.update("progress", "continue");
        assert!((state.out_time_secs - 1.5).abs() < 1e-9);
        assert!((state.fraction(Some(3.0)) - 0.5).abs() < 1e-9);
        assert_eq!(state.fraction(None), 0.0);
        state.update("progress", "end");
        assert_eq!(state.fraction(Some(3.0)), 1.0);
    }

    #[test]
    fn test_container_names() {
        assert_eq!(Container::from_name(".MKV"), Some(Container::Mkv));
        assert_eq!(Container::from_name("m4v"), Some(Container::Mp4));
        assert_eq!(Container::from_name("avi"), None);
        assert_eq!(Container::Webm.extension(), "webm");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = FfmpegEngine::new(
            "/nonexistent/cutline-ffmpeg",
            ProcessRegistry::new(Duration::from_millis(10)),
        );
        assert!(!engine.is_available().await);
        let op = TranscodeOp::ConcatCopy {
            list_file: "l.txt".into(),
            output: "o.mp4".into(),
        };
        let err = engine.run(&op, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, TranscodeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let (source, token) = CancelSource::new();
        assert!(!token.is_cancelled());
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        source.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
        assert!(source.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_combined_token_follows_either_source() {
        let (job, job_token) = CancelSource::new();
        let (host, host_token) = CancelSource::new();
        let combined = job_token.or(&host_token);
        assert!(!combined.is_cancelled());

        // A source dropped without cancelling does not end the wait.
        drop(job);
        let waiter = tokio::spawn({
            let combined = combined.clone();
            async move { combined.cancelled().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        host.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("host cancellation should wake the waiter")
            .unwrap();
        assert!(combined.is_cancelled());
        assert!(!CancelToken::never().or(&CancelToken::never()).is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_is_deregistered_once_reaped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("cutline_reaped_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // Exits at once but a background child keeps stdout and stderr open.
        let script = dir.join("fake-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nsleep 1 &\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = ProcessRegistry::new(Duration::from_millis(100));
        let engine = Arc::new(FfmpegEngine::new(
            script.display().to_string(),
            registry.clone(),
        ));
        let op = TranscodeOp::ConcatCopy {
            list_file: dir.join("segments.txt"),
            output: dir.join("out.mp4"),
        };
        let run = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(&op, &CancelToken::never()).await }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!run.is_finished(), "output pipes should still be draining");
        assert!(registry.is_empty());

        assert!(run.await.unwrap().is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
