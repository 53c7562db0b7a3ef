//! Import a media file and place it on a track.

use std::path::PathBuf;

use cutline_project_model::{Asset, AssetId, LoadedProject, Track, TrackKind};

pub struct MediaArgs {
    pub media: PathBuf,
    pub kind: String,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
}

pub fn run(path: PathBuf, args: MediaArgs, track: usize, at: Option<u64>) -> anyhow::Result<()> {
    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let p = &mut project.project;

    let stem = args
        .media
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let mut id = stem.clone();
    let mut n = 2;
    while p.asset(&AssetId::new(id.as_str())).is_some() {
        id = format!("{stem}-{n}");
        n += 1;
    }

    let asset = match args.kind.as_str() {
        "video" => Asset::video(
            &id,
            &args.media,
            args.duration_ms,
            args.width,
            args.height,
            args.audio,
        ),
        "image" => Asset::image(&id, &args.media, args.width, args.height),
        "audio" => Asset::audio(&id, &args.media, args.duration_ms),
        other => anyhow::bail!("Unknown media kind: {other}. Use: video, audio, image"),
    };
    let track_kind = if asset.is_visual() {
        TrackKind::Video
    } else {
        TrackKind::Audio
    };
    let asset_id = asset.id.clone();
    p.add_asset(asset);

    while p.tracks.len() <= track {
        let index = p.tracks.len();
        p.add_track(Track::new(format!("Track {index}"), track_kind));
    }

    let start_ms = at.unwrap_or_else(|| {
        p.clips_on(track)
            .iter()
            .map(|c| c.end_ms)
            .max()
            .unwrap_or(0)
    });
    let clip_id = p
        .place_clip(&asset_id, track, start_ms)
        .map_err(|e| anyhow::anyhow!("Failed to place clip: {e}"))?;
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    let clip = project
        .project
        .clip(&clip_id)
        .ok_or_else(|| anyhow::anyhow!("placed clip {clip_id} vanished"))?;
    println!("Added asset {asset_id} as clip {clip_id}");
    println!("  Track: {track}");
    println!("  Timeline: {}..{} ms", clip.start_ms, clip.end_ms);
    Ok(())
}
