//! Check the transcoding engine.

use std::time::Duration;

use cutline_common::config::AppConfig;
use cutline_render_engine::{FfmpegEngine, ProcessRegistry, TranscodeEngine};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Cutline System Check");
    println!("{}", "=".repeat(50));

    let registry = ProcessRegistry::new(Duration::from_millis(config.export.kill_grace_ms));
    let engine = FfmpegEngine::new(config.export.ffmpeg_binary.clone(), registry);
    let available = engine.is_available().await;
    if available {
        println!("[OK] Transcoder: {}", engine.binary());
    } else {
        println!("[FAIL] Transcoder: {} not found or not runnable", engine.binary());
    }

    let work_root = config.export.work_root();
    if work_root.is_dir() {
        println!("[OK] Working directory root: {}", work_root.display());
    } else {
        println!("[WARN] Working directory root missing: {}", work_root.display());
    }
    println!(
        "[OK] Media pool: {} resident handle(s), {} ms seek threshold",
        config.pool.max_resident, config.pool.seek_threshold_ms
    );

    println!();
    if available {
        println!("All required capabilities are available. Cutline is ready to export.");
    } else {
        println!("Export needs ffmpeg. Install it or set export.ffmpeg_binary in the config.");
    }

    Ok(())
}
