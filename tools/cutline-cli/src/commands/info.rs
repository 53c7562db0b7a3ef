//! Show project information.

use std::path::PathBuf;

use cutline_project_model::LoadedProject;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    let p = &project.project;

    println!("Project: {}", p.name);
    println!("  ID: {}", p.id);
    println!("  Created: {}", p.created_at);
    println!("  Modified: {}", p.modified_at);
    println!(
        "  Canvas: {}x{} @ {}fps",
        p.canvas.width, p.canvas.height, p.canvas.fps
    );
    println!();

    println!("Assets:");
    for asset in &p.assets {
        println!(
            "  {} [{:?}] {} ({} ms, {}x{}{})",
            asset.id,
            asset.kind,
            asset.path.display(),
            asset.duration_ms,
            asset.width,
            asset.height,
            if asset.has_audio { ", audio" } else { "" }
        );
    }
    println!();

    println!("Tracks:");
    for (index, track) in p.tracks.iter().enumerate() {
        let flags = match (track.locked, track.visible) {
            (true, false) => " (locked, hidden)",
            (true, true) => " (locked)",
            (false, false) => " (hidden)",
            (false, true) => "",
        };
        println!("  {index}: {} [{:?}]{flags}", track.name, track.kind);
        for clip in p.clips_on(index) {
            println!(
                "     {} {} {}..{} ms trim {}..{} z{}",
                clip.id,
                clip.asset_id,
                clip.start_ms,
                clip.end_ms,
                clip.trim_start_ms,
                clip.trim_end_ms,
                clip.z_index
            );
        }
    }

    Ok(())
}
