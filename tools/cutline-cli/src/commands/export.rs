//! Export a project to video.

use std::path::PathBuf;

use cutline_common::config::ExportDefaults;
use cutline_project_model::LoadedProject;
use cutline_render_engine::{
    CancelSource, Container, ExportOrchestrator, ExportProgress, ExportSettings, ProgressCallback,
};

pub struct ExportArgs {
    pub output: Option<PathBuf>,
    pub filename: Option<String>,
    pub container: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
}

pub async fn run(path: PathBuf, args: ExportArgs, defaults: ExportDefaults) -> anyhow::Result<()> {
    println!("Exporting project at: {}", path.display());

    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let plan = project
        .edit_plan()
        .map_err(|e| anyhow::anyhow!("Invalid edit plan: {e}"))?;

    let container = Container::from_name(&args.container).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown container: {}. Use: mp4, mov, mkv, webm",
            args.container
        )
    })?;
    let settings = ExportSettings {
        container,
        width: args.width,
        height: args.height,
        fps: args.fps,
        video_bitrate_kbps: args.video_bitrate,
        audio_bitrate_kbps: args.audio_bitrate,
        filename: args.filename,
        output_dir: args.output.unwrap_or_else(|| path.join("exports")),
    };

    println!("  Output: {}", settings.output_path().display());
    println!("  Container: {container:?}");
    if settings.uses_source_resolution() {
        println!("  Resolution: source");
    } else {
        println!("  Resolution: {}x{}", settings.width, settings.height);
    }
    println!(
        "  Segments: {} clip(s), {} gap(s)",
        plan.main_clips().len(),
        plan.gaps().len()
    );

    let progress_cb: ProgressCallback = Box::new(|p: ExportProgress| {
        print!(
            "\r  Progress: {:.0}% ({}/{}) {:<48}",
            p.fraction() * 100.0,
            p.current,
            p.total,
            p.message,
        );
    });

    let orchestrator = ExportOrchestrator::with_ffmpeg(defaults);
    println!("  Engine: {}", orchestrator.engine_name());
    let (cancel, token) = CancelSource::new();
    let export = orchestrator.export(&plan, &settings, Some(&progress_cb), &token);
    tokio::pin!(export);

    let result = tokio::select! {
        result = &mut export => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted; stopping transcoder...");
            cancel.cancel();
            export.await
        }
    };

    match result {
        Ok(done) => {
            println!("\nExport complete: {}", done.output_path.display());
            println!("  Duration: {} ms", done.duration_ms);
            println!("  Size: {} bytes", done.size_bytes);
            if !done.copy_fallbacks.is_empty() {
                println!("  Re-encoded after copy failure: {}", done.copy_fallbacks.len());
            }
            for gap in &done.skipped_gaps {
                println!(
                    "  Warning: gap {}..{} ms could not be filled and was removed",
                    gap.start_ms, gap.end_ms
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            Err(e.into())
        }
    }
}
