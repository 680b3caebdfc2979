use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use echobeat::coordinator::resolve_state_file;
use echobeat::decoder::Backend;
use echobeat::log::configure_logger;
use echobeat::reassembly::FragmentOutcome;
use echobeat::state::{FileStore, PlaybackStateMirror};
use echobeat::{
    DriveOutcome, InvalidFragmentPolicy, PlaybackCoordinator, PlayerOptions, RequestOutcome,
    TrackRequest,
};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "echobeat",
    about = "Stream, cache and play EchoBeat tracks from the command line"
)]
enum Opt {
    #[structopt(about = "Stream a track from the server and play it")]
    Play {
        #[structopt(help = "The track to play, either `Song name` or `id:Song name`")]
        track: TrackRequest,
        #[structopt(
            short = "s",
            long = "server",
            env = "ECHOBEAT_SERVER",
            default_value = "ws://localhost:3000/stream",
            help = "WebSocket endpoint of the playback stream"
        )]
        server: String,
        #[structopt(
            long = "cache-dir",
            help = "Directory for the playback cache file. Defaults to the platform cache directory"
        )]
        cache_dir: Option<String>,
        #[structopt(
            long = "state-file",
            help = "Where the now-playing state is kept. Defaults to ~/.echobeat/state.json"
        )]
        state_file: Option<String>,
        #[structopt(
            long = "on-invalid-fragment",
            default_value = "drop",
            help = "What to do with fragments that are not valid base64: drop or abort"
        )]
        on_invalid_fragment: InvalidFragmentPolicy,
        #[structopt(
            short = "b",
            long = "backend",
            default_value = "headless",
            help = "Playback backend: headless, or rodio when built with the rodio feature"
        )]
        backend: Backend,
        #[structopt(long = "no-autoplay", help = "Stream and cache the track without playing it")]
        no_autoplay: bool,
        #[structopt(
            long = "poll-interval",
            default_value = "500",
            help = "How often playback status is polled, in milliseconds"
        )]
        poll_interval: u64,
    },
    #[structopt(about = "Show what the player last reported as playing")]
    Status {
        #[structopt(long = "state-file", help = "Where the now-playing state is kept")]
        state_file: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    configure_logger()?;

    let result = match Opt::from_args() {
        Opt::Play {
            track,
            server,
            cache_dir,
            state_file,
            on_invalid_fragment,
            backend,
            no_autoplay,
            poll_interval,
        } => {
            let options = PlayerOptions::new(
                server,
                cache_dir,
                state_file,
                on_invalid_fragment,
                backend,
                !no_autoplay,
            )?;
            play(track, &options, Duration::from_millis(poll_interval.max(50))).await
        }
        Opt::Status { state_file } => status(state_file).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("{}", console::style(format!("Failed! {:#}", e)).red());
        std::process::exit(1);
    }
    Ok(())
}

#[tracing::instrument(name = "play", skip(options, poll_interval), fields(server = %options.server))]
async fn play(track: TrackRequest, options: &PlayerOptions, poll_interval: Duration) -> Result<()> {
    let mut coordinator = PlaybackCoordinator::from_options(options)?;

    if let RequestOutcome::Reused { .. } = coordinator.request(track.clone()).await? {
        tracing::info!("{} was already loaded", track);
    }

    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {bytes}")
            // Infallible
            .unwrap(),
    );
    pb.set_message(format!("Streaming {}", track));

    let status = loop {
        match coordinator.drive().await {
            Ok(DriveOutcome::Fragment {
                outcome,
                buffered_bytes,
                fragments,
            }) => {
                if outcome == FragmentOutcome::Dropped {
                    pb.println(console::style("Skipped a corrupt fragment").yellow().to_string());
                }
                pb.set_position(buffered_bytes as u64);
                pb.set_message(format!("Streaming {} ({} fragments)", track, fragments));
            }
            Ok(DriveOutcome::Ready(status)) => break status,
            Ok(DriveOutcome::Idle) => break coordinator.status()?,
            Err(e) => {
                pb.finish_with_message(console::style(format!("Failed! {}", track)).red().to_string());
                return Err(e.into());
            }
        }
    };
    pb.finish_with_message(format!("Cached {}", track));

    if !options.autoplay {
        println!("{} is ready at {}", track, coordinator.cache().path().display());
        return Ok(());
    }

    let pb = add_playback_bar(&track, status.duration);
    let mut ticker = tokio::time::interval(poll_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = coordinator.poll_status().await?;
                pb.set_position(status.position.as_millis() as u64);
                if status.finished {
                    pb.finish_with_message(format!("Played {}", track));
                    break;
                }
            }
            _ = &mut ctrl_c => {
                coordinator.stop().await;
                pb.abandon_with_message(format!("Stopped {}", track));
                break;
            }
        }
    }

    Ok(())
}

fn add_playback_bar(track: &TrackRequest, duration: Option<Duration>) -> ProgressBar {
    let pb = match duration {
        Some(duration) => ProgressBar::new(duration.as_millis() as u64),
        None => ProgressBar::new_spinner(),
    };
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {position}/{length}")
        // Infallible
        .unwrap()
        .with_key("position", |state: &ProgressState, w: &mut dyn Write| write_clock(w, state.pos()))
        .with_key("length", |state: &ProgressState, w: &mut dyn Write| match state.len() {
            Some(len) => write_clock(w, len),
            None => { let _ = w.write_str("--:--"); }
        })
        .progress_chars("#>-"));
    pb.set_message(format!("Playing {}", track));
    pb
}

fn write_clock(w: &mut dyn Write, millis: u64) {
    let seconds = millis / 1000;
    let _ = write!(w, "{}:{:02}", seconds / 60, seconds % 60);
}

async fn status(state_file: Option<String>) -> Result<()> {
    let store = Arc::new(FileStore::new(resolve_state_file(state_file)?));
    let record = PlaybackStateMirror::new(store).read().await?;

    match record.last_track_name {
        Some(name) => {
            let id = record
                .last_track_id
                .map(|id| format!(" (#{})", id))
                .unwrap_or_default();
            let state = if record.is_playing { "playing" } else { "paused" };
            println!("{}{} [{}]", name, id, state);
        }
        None => println!("Nothing has been played yet"),
    }
    Ok(())
}
