//! Cardlink CLI tools: headless simulation, lens and camera diagnostics, settings.

#![forbid(unsafe_code)]

mod headless;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Quat;

use cardlink_common::ClientSettings;
use cardlink_render::passthrough::camera_request;
use cardlink_render::{pose_math, Collaborators, FrameOutcome, PreviewSize, Session};

use headless::{
    ConstantTracker, HeadlessGpu, LoopbackClient, NullGraphics, ReferenceLens, ReferenceOptics,
};

#[derive(Parser, Debug)]
#[command(name = "cardlink")]
#[command(about = "Cardlink client tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a headless session against a loopback stream
    Simulate {
        #[arg(long, default_value_t = 1920)]
        width: u32,
        #[arg(long, default_value_t = 1080)]
        height: u32,
        /// Number of display refreshes to run
        #[arg(long, default_value_t = 120)]
        frames: u32,
        /// Refresh at which the loopback stream starts
        #[arg(long, default_value_t = 30)]
        stream_at: u32,
        /// Refresh at which the loopback stream stops
        #[arg(long, default_value_t = 90)]
        stop_at: u32,
        /// Settings file (defaults are used when missing)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Print the view config derived from the reference lens profile
    Fov {
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Pick the passthrough camera preview size for a screen
    Camera {
        #[arg(long, default_value_t = 1920)]
        width: u32,
        #[arg(long, default_value_t = 1080)]
        height: u32,
        /// Preview sizes the camera offers, e.g. 1920x1080,1280x960
        #[arg(long, value_delimiter = ',', value_parser = parse_preview_size, required = true)]
        sizes: Vec<PreviewSize>,
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Write default settings
    Settings {
        #[arg(short, long)]
        write: PathBuf,
    },

    /// Show version information
    Version,
}

fn load_settings(path: Option<&PathBuf>) -> Result<ClientSettings> {
    match path {
        Some(path) => ClientSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(ClientSettings::default()),
    }
}

fn parse_preview_size(value: &str) -> std::result::Result<PreviewSize, String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let parse = |side: &str| {
        side.trim()
            .parse::<u32>()
            .map_err(|err| format!("{value:?}: {err}"))
    };
    Ok(PreviewSize::new(parse(width)?, parse(height)?))
}

fn simulate(
    width: u32,
    height: u32,
    frames: u32,
    stream_at: u32,
    stop_at: u32,
    settings: ClientSettings,
) -> Result<()> {
    if stop_at <= stream_at {
        bail!("--stop-at ({stop_at}) must come after --stream-at ({stream_at})");
    }
    let refresh = Duration::from_secs_f64(1.0 / f64::from(settings.refresh_rate_hz));
    let client = Arc::new(LoopbackClient::default());

    let mut session = Session::init(
        Collaborators {
            client: client.clone(),
            tracker: Arc::new(ConstantTracker(Quat::from_rotation_y(0.25))),
            optics: Arc::new(ReferenceOptics::default()),
            graphics: Box::new(NullGraphics),
        },
        width,
        height,
        settings,
    )?;
    session.resume();
    let camera = session.surface_created(Box::new(HeadlessGpu::default()))?;
    println!("camera texture: {}", camera.0);

    let mut last = None;
    for frame in 0..frames {
        if frame == stream_at {
            client.begin_stream();
        }
        if frame == stop_at {
            client.end_stream();
        }
        let outcome = session.render();
        if last != Some(outcome) {
            println!(
                "refresh {frame:>4}: {outcome:?} (tracking samples so far: {})",
                client.tracking_samples()
            );
            last = Some(outcome);
        }
        thread::sleep(refresh);
    }

    let stats = session.orchestrator().stats();
    if matches!(last, Some(FrameOutcome::AwaitingCalibration)) {
        println!("no calibration was ever available");
    }
    println!("refreshes:         {}", stats.refreshes);
    println!("presented:         {}", stats.presented);
    println!("stream frames:     {}", stats.stream_frames);
    println!("frames consumed:   {}", client.frames_consumed());
    println!("view configs sent: {}", client.view_configs_sent());
    println!("tracking samples:  {}", client.tracking_samples());
    println!(
        "tracking runs:     {} started, {} stopped, {} abandoned",
        stats.tracking_starts, stats.tracking_stops, stats.tracking_abandoned
    );

    session.pause();
    session.destroy();
    Ok(())
}

fn main() -> Result<()> {
    cardlink_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Simulate {
            width,
            height,
            frames,
            stream_at,
            stop_at,
            settings,
        } => {
            let settings = load_settings(settings.as_ref())?;
            simulate(width, height, frames, stream_at, stop_at, settings)?;
        }
        Command::Fov { settings } => {
            let settings = load_settings(settings.as_ref())?;
            let views = pose_math::view_config(&ReferenceLens);
            for (name, fov) in ["left", "right"].iter().zip(views.fov) {
                println!(
                    "{name:>5}: left={:.4} right={:.4} up={:.4} down={:.4}",
                    fov.left, fov.right, fov.up, fov.down
                );
            }
            println!("  ipd: {:.4} m", views.ipd());
            println!("floor: {:.2} m", settings.floor_height_m);
        }
        Command::Camera {
            width,
            height,
            sizes,
            settings,
        } => {
            let settings = load_settings(settings.as_ref())?;
            let Some(request) =
                camera_request(&sizes, width, height, settings.passthrough.recording_hint)
            else {
                bail!("the camera offers no preview sizes");
            };
            println!(
                "preview: {}x{} (recording hint {})",
                request.size.width,
                request.size.height,
                if request.recording_hint { "on" } else { "off" }
            );
        }
        Command::Settings { write } => {
            ClientSettings::default()
                .save(&write)
                .with_context(|| format!("writing {}", write.display()))?;
            println!("Wrote default settings to {}", write.display());
        }
        Command::Version => {
            println!("cardlink {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
