//! Cutline CLI: command-line interface for timeline projects.
//!
//! Usage:
//!   cutline init <NAME>          Create a new project
//!   cutline add <PATH> <MEDIA>   Import media and place it on a track
//!   cutline validate <PATH>      Validate a project and its edit plan
//!   cutline info <PATH>          Show project information
//!   cutline plan <PATH>          Print the edit plan
//!   cutline preview <PATH>       Render one timeline frame to PNG
//!   cutline export <PATH>        Export a project to a single video file
//!   cutline check                Check the transcoding engine

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cutline",
    about = "Non-linear timeline composer with segment-based export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new empty project
    Init {
        /// Project name
        name: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Canvas width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Canvas height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Canvas frame rate
        #[arg(long, default_value = "30")]
        fps: u32,
    },

    /// Import a media file and place it on a track
    Add {
        /// Path to the project directory
        path: PathBuf,

        /// Media file, relative to the project root or absolute
        media: PathBuf,

        /// Media kind: video|audio|image
        #[arg(long, default_value = "video")]
        kind: String,

        /// Intrinsic duration in milliseconds (video and audio)
        #[arg(long, default_value = "0")]
        duration_ms: u64,

        /// Natural width
        #[arg(long, default_value = "0")]
        width: u32,

        /// Natural height
        #[arg(long, default_value = "0")]
        height: u32,

        /// The media carries an audio stream
        #[arg(long)]
        audio: bool,

        /// Track index to place the clip on
        #[arg(long, default_value = "0")]
        track: usize,

        /// Timeline start in milliseconds; defaults to the end of the track
        #[arg(long)]
        at: Option<u64>,
    },

    /// Validate a project and its edit plan
    Validate {
        /// Path to the project directory
        path: PathBuf,
    },

    /// Show project information
    Info {
        /// Path to the project directory
        path: PathBuf,
    },

    /// Print the edit plan
    Plan {
        /// Path to the project directory
        path: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the timeline at one instant to a PNG file
    Preview {
        /// Path to the project directory
        path: PathBuf,

        /// Timeline position in milliseconds
        #[arg(long, default_value = "0")]
        at: u64,

        /// Output PNG path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a project to video
    Export {
        /// Path to the project directory
        path: PathBuf,

        /// Output directory (defaults to the project's exports/)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output file name
        #[arg(long)]
        filename: Option<String>,

        /// Container: mp4|mov|mkv|webm
        #[arg(long, default_value = "mp4")]
        container: String,

        /// Output width (0 = source resolution)
        #[arg(long, default_value = "0")]
        width: u32,

        /// Output height (0 = source resolution)
        #[arg(long, default_value = "0")]
        height: u32,

        /// Output frame rate (0 = canvas rate)
        #[arg(long, default_value = "0")]
        fps: u32,

        /// Video bitrate in kbps
        #[arg(long, default_value = "8000")]
        video_bitrate: u32,

        /// Audio bitrate in kbps
        #[arg(long, default_value = "192")]
        audio_bitrate: u32,

        /// Keep intermediate segment files
        #[arg(long)]
        keep_segments: bool,
    },

    /// Check the transcoding engine
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cutline_common::config::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    cutline_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Init {
            name,
            output,
            width,
            height,
            fps,
        } => commands::init::run(name, output, width, height, fps),
        Commands::Add {
            path,
            media,
            kind,
            duration_ms,
            width,
            height,
            audio,
            track,
            at,
        } => commands::add::run(
            path,
            commands::add::MediaArgs {
                media,
                kind,
                duration_ms,
                width,
                height,
                audio,
            },
            track,
            at,
        ),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Info { path } => commands::info::run(path),
        Commands::Plan { path, json } => commands::plan::run(path, json),
        Commands::Preview { path, at, output } => {
            commands::preview::run(path, at, output, &config).await
        }
        Commands::Export {
            path,
            output,
            filename,
            container,
            width,
            height,
            fps,
            video_bitrate,
            audio_bitrate,
            keep_segments,
        } => {
            let mut defaults = config.export.clone();
            defaults.keep_segments |= keep_segments;
            commands::export::run(
                path,
                commands::export::ExportArgs {
                    output,
                    filename,
                    container,
                    width,
                    height,
                    fps,
                    video_bitrate,
                    audio_bitrate,
                },
                defaults,
            )
            .await
        }
        Commands::Check => commands::check::run(&config).await,
    }
}
