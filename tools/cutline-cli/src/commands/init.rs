//! Initialize a new Cutline project.

use std::path::PathBuf;

use cutline_project_model::LoadedProject;

pub fn run(name: String, output: PathBuf, width: u32, height: u32, fps: u32) -> anyhow::Result<()> {
    let project_dir = output.join(&name);
    println!("Creating project '{}' at {}", name, project_dir.display());

    let project = LoadedProject::create(&project_dir, &name, width, height, fps)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;

    println!("Project created successfully:");
    println!("  Directory: {}", project.root.display());
    println!("  Canvas: {width}x{height} @ {fps}fps");
    println!("  Tracks: 1 (Main)");
    println!();
    println!("Directory structure:");
    println!("  {name}/");
    println!("  ├── sources/     (imported media)");
    println!("  ├── meta/        (project.json)");
    println!("  └── exports/     (rendered output)");

    Ok(())
}
