//! Validate a Cutline project and its edit plan.

use std::path::PathBuf;

use cutline_project_model::LoadedProject;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating project at: {}", path.display());

    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    println!("  Name: {}", project.project.name);
    println!("  Version: {}", project.project.version);
    println!(
        "  Canvas: {}x{} @ {}fps",
        project.project.canvas.width, project.project.canvas.height, project.project.canvas.fps
    );
    println!("  Assets: {}", project.project.assets.len());
    println!("  Clips: {}", project.project.clips.len());

    let mut issues = project.validate_sources();
    match project.edit_plan() {
        Ok(plan) => println!(
            "  Edit plan: {} track(s), {} gap(s), {} ms",
            plan.tracks.len(),
            plan.gaps().len(),
            plan.duration_ms()
        ),
        Err(e) => issues.extend(e.issues.iter().map(ToString::to_string)),
    }

    if issues.is_empty() {
        println!("  Sources: All present");
        println!("\nProject is valid.");
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!(
            "\n{} issue(s) found. Project may not be fully usable.",
            issues.len()
        );
    }

    Ok(())
}
