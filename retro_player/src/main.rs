mod capture;
mod matcher;
mod player;
mod selection;

use anyhow::{Context, Result, bail};
use capture::CaptureSource;
use clap::Parser;
use matcher::OpenCvMatcher;
use player::Player;
use retro_scorer::core_modules::utils::image_helper::image_helper;
use retro_scorer::{FrameSource, Region, RetroConfig, ScoringSession};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "retro_player", version, about = "Traffic sign retroreflectivity scorer")]
struct Args {
    /// Video file to play.
    video: PathBuf,
    /// TOML file overriding the built-in defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Score a single selection on this frame without opening a window.
    #[arg(long, requires = "region")]
    frame: Option<u64>,
    /// Selection in source pixels, as X,Y,W,H.
    #[arg(long, value_parser = parse_region, requires = "frame")]
    region: Option<Region>,
    /// Save the outlined target of a headless selection as PNG.
    #[arg(long, value_name = "PATH", requires = "frame")]
    save_target: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RetroConfig::load(path)?,
        None => RetroConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        video = %args.video.display(),
        blur_kernel = ?(config.scorer.blur_kernel_width, config.scorer.blur_kernel_height),
        tracked_frames = config.tracker.frames,
        method = ?config.tracker.method,
        "starting retro_player"
    );

    match (args.frame, args.region) {
        (Some(frame), Some(region)) => score_headless(&args, &config, frame, region),
        _ => {
            player::print_help();
            let mut player = Player::open(&args.video, &config)?;
            player.run()
        }
    }
}

fn score_headless(args: &Args, config: &RetroConfig, frame: u64, region: Region) -> Result<()> {
    let source = CaptureSource::open(&args.video)
        .with_context(|| format!("failed to open {}", args.video.display()))?;
    if frame >= source.frame_count() {
        bail!(
            "frame {frame} is past the end of {} ({} frames)",
            source.name(),
            source.frame_count()
        );
    }

    let mut session = ScoringSession::with_matcher(source, config, OpenCvMatcher);
    let report = session.score_selection(frame, region)?;
    player::print_report(&report);

    if let Some(path) = &args.save_target {
        image_helper::save(path, &report.instant.outline)
            .with_context(|| format!("failed to save target to {}", path.display()))?;
        info!(path = %path.display(), "saved target outline");
    }
    Ok(())
}

/// Parses `X,Y,W,H` into a region.
fn parse_region(value: &str) -> Result<Region, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid region {value:?}: {e}"))?;
    match parts[..] {
        [left, top, width, height] => Ok(Region::new(left, top, width, height)),
        _ => Err(format!("invalid region {value:?}: expected X,Y,W,H")),
    }
}
