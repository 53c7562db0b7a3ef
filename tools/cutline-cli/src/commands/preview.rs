//! Render one timeline frame to a PNG file.

use std::path::PathBuf;
use std::time::Duration;

use cutline_common::config::AppConfig;
use cutline_project_model::LoadedProject;
use cutline_render_engine::{preview_frame, FfmpegFrameSampler, ProcessRegistry};

pub async fn run(
    path: PathBuf,
    at: u64,
    output: Option<PathBuf>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let plan = project
        .edit_plan()
        .map_err(|e| anyhow::anyhow!("Invalid edit plan: {e}"))?;

    let registry = ProcessRegistry::new(Duration::from_millis(config.export.kill_grace_ms));
    let sampler = FfmpegFrameSampler::new(config.export.ffmpeg_binary.clone(), registry);
    let (frame, report) = preview_frame(&plan, at, &sampler).await;

    let output = output.unwrap_or_else(|| path.join("exports").join(format!("preview-{at}.png")));
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    frame.save(&output)?;

    println!("Preview at {at} ms: {}", output.display());
    println!("  Layers drawn: {}", report.drawn.len());
    for clip in &report.skipped {
        println!("  Skipped (no frame): {clip}");
    }
    Ok(())
}
