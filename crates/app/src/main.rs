//! `meloskia`: play and render Melo'Skia songs from the command line.

mod config;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meloskia_core::{
    AssetLibrary, EngineOptions, MetronomeDivision, MusicalPosition, PlayMode, RenderOptions,
    Score, Session, SessionOptions, TransportUpdate, load_score, render_to_file, save_score,
    session::assets_for, songs, total_duration_in_bars,
};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

/// Ticks of the scheduling loop, about one per display frame.
const TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "meloskia")]
#[command(about = "Melo'Skia song player and renderer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a song on the audio output
    Play {
        /// Song file, or the id or name of a built-in song
        song: String,

        /// `playback` plays every note, `playing` leaves the piano to you
        #[arg(short, long, default_value = "playback")]
        mode: PlayMode,

        /// Tempo in BPM (default: the song's)
        #[arg(short, long)]
        tempo: Option<f64>,

        /// Metronome clicks per bar: 0, 1, 2 or 4
        #[arg(short = 'k', long)]
        metronome: Option<u8>,

        /// Output device name
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Render a song to a WAV file
    Render {
        /// Song file, or the id or name of a built-in song
        song: String,

        /// Output WAV file path
        output: PathBuf,

        #[arg(short, long, default_value = "playback")]
        mode: PlayMode,

        #[arg(short, long)]
        tempo: Option<f64>,

        #[arg(short = 'k', long)]
        metronome: Option<u8>,

        #[arg(short, long)]
        sample_rate: Option<u32>,

        #[arg(short, long)]
        channels: Option<u16>,
    },

    /// List the built-in songs
    Songs,

    /// Write a built-in song to a JSON or MessagePack file
    Export {
        song: String,

        /// `.json`, `.msgpack` or `.mpk`
        output: PathBuf,
    },
}

/// A song and the directory its asset paths are relative to.
fn resolve_song(key: &str, config: &Config) -> anyhow::Result<(Score, Option<PathBuf>)> {
    let path = Path::new(key);
    if path.is_file() {
        let score = load_score(path).with_context(|| format!("failed to load {key}"))?;
        return Ok((score, path.parent().map(Path::to_path_buf)));
    }

    if let Some(score) = songs::find(key) {
        return Ok((score, config.asset_root.clone()));
    }

    if let Some(dir) = &config.songs_dir {
        let candidate = dir.join(key).with_extension("json");
        if candidate.is_file() {
            let score = load_score(&candidate)
                .with_context(|| format!("failed to load {}", candidate.display()))?;
            return Ok((score, Some(dir.clone())));
        }
    }

    anyhow::bail!("no song file or built-in song named '{key}' (see `meloskia songs`)")
}

fn metronome(flag: Option<u8>, config: &Config) -> anyhow::Result<MetronomeDivision> {
    match flag {
        Some(clicks) => Ok(MetronomeDivision::try_from(clicks)?),
        None => config.metronome(),
    }
}

async fn play(
    score: Score,
    asset_root: Option<PathBuf>,
    mode: PlayMode,
    update: TransportUpdate,
    device: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let options = SessionOptions {
        engine: EngineOptions {
            device,
            ..EngineOptions::default()
        },
        scheduler: config.scheduler(),
        asset_root,
    };
    let mut session = Session::new(score, options)?;
    session.apply(update)?;
    session.scheduler_mut().on_key_event(|event| {
        tracing::debug!(pitch = %event.pitch, pressed = event.pressed, at = event.at, "key");
    });

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while session.is_loading() {
        interval.tick().await;
    }
    for failure in session.scheduler().assets().failures() {
        tracing::warn!("{failure}");
    }

    session.start(mode)?;
    let name = session.scheduler().score().name.clone();
    info!(song = %name, %mode, "playing, ctrl-c to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_bar = 0;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = interval.tick() => {
                session.tick();
                session.collect();

                if let Some(position) = session.scheduler().position() {
                    if position.bar != last_bar {
                        last_bar = position.bar;
                        info!(%position, "bar");
                    }
                }
                if session.scheduler().is_finished() {
                    break;
                }
            }
        }
    }

    session.stop();
    // Let release tails and the stop commands play out.
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.collect();

    let stats = session.scheduler().stats();
    info!(
        notes = stats.notes,
        clicks = stats.clicks,
        skipped = stats.skipped_assets,
        failures = stats.failures,
        "stopped"
    );
    Ok(())
}

fn render(
    score: Score,
    asset_root: Option<PathBuf>,
    output: &Path,
    options: RenderOptions,
) -> anyhow::Result<()> {
    let library = AssetLibrary::load(&assets_for(&score), asset_root.as_deref(), options.sample_rate);
    let buffer = render_to_file(score, &library, options, output)?;
    println!(
        "Wrote {} ({:.1}s, peak {:.2})",
        output.display(),
        buffer.duration_secs(),
        buffer.peak()
    );
    Ok(())
}

fn list_songs() {
    println!("{:<28} {:<32} {:>5} {:>6} {:>8}", "ID", "NAME", "BPM", "NOTES", "LENGTH");
    for song in songs::builtin() {
        let bars = total_duration_in_bars(&song);
        println!(
            "{:<28} {:<32} {:>5} {:>6} {:>8}",
            song.id,
            song.name,
            song.base_tempo,
            song.note_count(),
            MusicalPosition::from_beats(bars).to_string()
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Play {
            song,
            mode,
            tempo,
            metronome: clicks,
            device,
        } => {
            let (score, asset_root) = resolve_song(&song, &config)?;
            let update = TransportUpdate {
                tempo,
                metronome: Some(metronome(clicks, &config)?),
            };
            let device = device.or_else(|| config.device.clone());
            play(score, asset_root, mode, update, device, &config).await?;
        }

        Commands::Render {
            song,
            output,
            mode,
            tempo,
            metronome: clicks,
            sample_rate,
            channels,
        } => {
            let (score, asset_root) = resolve_song(&song, &config)?;
            let options = RenderOptions {
                sample_rate: sample_rate.unwrap_or(config.render.sample_rate),
                channels: channels.unwrap_or(config.render.channels),
                mode,
                tempo,
                metronome: metronome(clicks, &config)?,
                scheduler: config.scheduler(),
                ..RenderOptions::default()
            };
            render(score, asset_root, &output, options)?;
        }

        Commands::Songs => list_songs(),

        Commands::Export { song, output } => {
            let (score, _) = resolve_song(&song, &config)?;
            save_score(&output, &score)?;
            println!("Wrote {} to {}", score.name, output.display());
        }
    }

    Ok(())
}
