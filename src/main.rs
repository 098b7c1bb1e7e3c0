/*
Gesture steering daemon.

Reads two-hand landmark frames (one JSON object per line) from a file, stdin
or a spawned hand detector, and holds W/A/S/D/Space on a virtual keyboard:

  both fists        -> W (forward)
  both open palms   -> S (reverse)
  one fist, one palm -> Space (brake)
  left wrist lower  -> A, right wrist lower -> D

Usage:
  steer --detector python3 -- hands.py --camera 0
  steer --landmarks session.ndjson --dry-run

The virtual keyboard needs write access to /dev/uinput, the quit key (Q)
needs read access to /dev/input:
  sg input -c './target/release/steer --detector ...'
*/

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use std::fs::File;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use drive_mimic::controller::{self, ControllerConfig, SteeringSession, StopReason};
use drive_mimic::hid::{KeySink, LogSink, UinputKeyboard};
use drive_mimic::landmarks::{self, DetectorProcess, HandTracker};
use drive_mimic::shutdown::{self, Shutdown};
use drive_mimic::steering::SteeringConfig;

#[derive(Parser, Debug)]
#[command(name = "steer", about = "Drive a game with two-hand gestures")]
struct Args {
    /// NDJSON landmark frames to replay, or `-` for stdin
    #[arg(long, conflicts_with = "detector")]
    landmarks: Option<PathBuf>,

    /// Detector program whose stdout streams landmark frames
    #[arg(long)]
    detector: Option<String>,

    /// Arguments passed to the detector, after `--`
    #[arg(last = true, requires = "detector")]
    detector_args: Vec<String>,

    /// Weight of the newest wrist differential in the moving average
    #[arg(long, default_value_t = 0.5)]
    smoothing: f32,

    /// Smoothed differential needed before steering
    #[arg(long, default_value_t = 0.1)]
    deadzone: f32,

    /// Hands scored below this are ignored
    #[arg(long, default_value_t = 0.7)]
    min_confidence: f32,

    /// Do not flip frames horizontally
    #[arg(long)]
    no_mirror: bool,

    /// Log key transitions instead of creating a virtual keyboard
    #[arg(long)]
    dry_run: bool,
}

type Tracker = Box<dyn HandTracker + Send>;

/// Opens the frame source. A spawned detector is returned alongside so it
/// lives, and is killed, with `main`.
fn open_tracker(args: &Args) -> Result<(Option<DetectorProcess>, Tracker)> {
    if let Some(program) = &args.detector {
        let (process, tracker) = DetectorProcess::spawn(program, &args.detector_args)
            .with_context(|| format!("failed to start detector `{}`", program))?;
        println!("📷 Detector started: {} {}", program, args.detector_args.join(" "));
        let tracker: Tracker = Box::new(tracker);
        return Ok((Some(process), tracker));
    }

    match &args.landmarks {
        Some(path) if path.as_os_str() == "-" => {
            println!("📥 Reading landmarks from stdin");
            let tracker: Tracker = Box::new(landmarks::from_reader(std::io::stdin()));
            Ok((None, tracker))
        }
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open landmark file {}", path.display()))?;
            println!("📄 Replaying landmarks from {}", path.display());
            let tracker: Tracker = Box::new(landmarks::from_reader(file));
            Ok((None, tracker))
        }
        None => bail!("either --landmarks or --detector is required"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    println!("🏎️  Gesture Steering - Rust\n");

    let config = ControllerConfig {
        steering: SteeringConfig {
            smoothing: args.smoothing,
            deadzone: args.deadzone,
        },
        min_detection_confidence: args.min_confidence,
        mirror: !args.no_mirror,
    };

    let sink: Box<dyn KeySink> = if args.dry_run {
        println!("🧪 Dry run: key transitions are only logged");
        Box::new(LogSink)
    } else {
        let keyboard = UinputKeyboard::new().context("cannot create virtual keyboard")?;
        println!("✅ HID ready (/dev/uinput)");
        Box::new(keyboard)
    };

    let (_detector, tracker) = open_tracker(&args)?;

    let (tx_shutdown, rx_shutdown) = unbounded::<Shutdown>();
    if let Err(e) = shutdown::install_interrupt(tx_shutdown.clone()) {
        warn!("cannot install Ctrl-C handler: {}", e);
    }
    if shutdown::spawn_quit_key_watcher(tx_shutdown) {
        println!("⌨️  Press Q to quit");
    }

    println!("✅ Ready\n");
    println!("  ✊✊ → W   🖐🖐 → S   ✊🖐 → Space");
    println!("  left hand lower → A   right hand lower → D\n");

    let mut session = SteeringSession::new(sink, config);
    let summary = controller::run(tracker, &mut session, &rx_shutdown)?;

    match summary.stop {
        StopReason::Shutdown(Shutdown::QuitKey) => println!("\n👋 Quitting..."),
        StopReason::Shutdown(Shutdown::Interrupt) => println!("\n🛑 Interrupted"),
        StopReason::EndOfStream | StopReason::TrackerFailed => {
            println!("\n📭 Landmark stream ended")
        }
    }
    println!("🎞️  {} frames processed", summary.frames);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_arguments_keep_their_spaces() {
        let args = Args::try_parse_from([
            "steer",
            "--detector",
            "python3",
            "--",
            "hands.py",
            "--model dir/with space",
            "--camera",
            "0",
        ])
        .unwrap();
        assert_eq!(args.detector.as_deref(), Some("python3"));
        assert_eq!(
            args.detector_args,
            vec!["hands.py", "--model dir/with space", "--camera", "0"]
        );
    }

    #[test]
    fn detector_arguments_need_a_detector() {
        assert!(Args::try_parse_from(["steer", "--landmarks", "-", "--", "hands.py"]).is_err());
    }
}
