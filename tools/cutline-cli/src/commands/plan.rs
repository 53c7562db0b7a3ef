//! Print the edit plan.

use std::path::PathBuf;

use cutline_project_model::{LoadedProject, MainSegment};

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let plan = project
        .edit_plan()
        .map_err(|e| anyhow::anyhow!("Invalid edit plan: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Main track:");
    for segment in plan.main_timeline() {
        match segment {
            MainSegment::Clip(clip) => println!(
                "  {:>8}..{:<8} clip {} ({}, source {}..{} ms)",
                clip.start_ms,
                clip.end_ms,
                clip.clip_id,
                clip.source_path.display(),
                clip.trim_start_ms,
                clip.trim_end_ms
            ),
            MainSegment::Gap(gap) => println!(
                "  {:>8}..{:<8} gap ({} ms)",
                gap.start_ms,
                gap.end_ms,
                gap.duration_ms()
            ),
        }
    }
    for track in plan.tracks.iter().skip(1) {
        println!("Track {} ({}):", track.index, track.name);
        for clip in &track.clips {
            println!(
                "  {:>8}..{:<8} clip {} z{}{}",
                clip.start_ms,
                clip.end_ms,
                clip.clip_id,
                clip.z_index,
                if clip.transform.is_some() { " transformed" } else { "" }
            );
        }
    }
    println!();
    println!("Span: {} ms", plan.span_duration_ms());
    println!("Duration: {} ms", plan.duration_ms());
    Ok(())
}
