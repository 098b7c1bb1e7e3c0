use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use drive_mimic::log_loader::{load_log, LoadOptions};
use drive_mimic::policy::OnnxPolicy;
use drive_mimic::sequence::build_windows;
use drive_mimic::types::{exact_match_count, Action, DECISION_THRESHOLD};

/// Replays a game log through an exported policy and reports how often the
/// predicted action matches the recorded one.
#[derive(Parser, Debug)]
#[command(name = "replay_log")]
struct Args {
    /// Game log to replay
    #[arg(default_value = "game_log.json")]
    log: PathBuf,

    /// Exported ONNX policy
    #[arg(long, short, default_value = "policy.onnx")]
    model: PathBuf,

    #[arg(long, default_value_t = 20)]
    seq_len: usize,

    /// Windows per ONNX run
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Predictions printed in full
    #[arg(long, default_value_t = 5)]
    show: usize,

    #[arg(long)]
    skip_malformed: bool,
}

fn describe(action: Action) -> String {
    let mut keys = Vec::new();
    if action.up {
        keys.push("up");
    }
    if action.down {
        keys.push("down");
    }
    if action.left {
        keys.push("left");
    }
    if action.right {
        keys.push("right");
    }
    if keys.is_empty() {
        "-".to_string()
    } else {
        keys.join("+")
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
    println!("🎞️  Replaying {} through {}", args.log.display(), args.model.display());

    let log = load_log(
        &args.log,
        &LoadOptions {
            skip_malformed: args.skip_malformed,
        },
    )
    .with_context(|| format!("cannot load {}", args.log.display()))?;
    let pairs = build_windows(&log.states, &log.actions, args.seq_len);
    if pairs.is_empty() {
        bail!(
            "{} records are not enough for windows of {} states",
            log.len(),
            args.seq_len
        );
    }

    let mut policy = OnnxPolicy::new(&args.model)?;
    println!("✅ Model loaded, {} windows\n", pairs.len());

    let mut predictions = Vec::with_capacity(pairs.len() * 4);
    let mut labels = Vec::with_capacity(pairs.len() * 4);
    for chunk in pairs.chunks(args.batch_size.max(1)) {
        let histories: Vec<&[_]> = chunk.iter().map(|p| p.history.as_slice()).collect();
        let probs = policy.predict_batch(&histories)?;
        for (pair, row) in chunk.iter().zip(probs.iter()) {
            predictions.extend_from_slice(row);
            labels.extend_from_slice(&pair.label);
        }
    }

    for (i, (row, pair)) in predictions
        .chunks_exact(4)
        .zip(pairs.iter())
        .take(args.show)
        .enumerate()
    {
        let probs = [row[0], row[1], row[2], row[3]];
        let predicted = Action::from_probabilities(&probs, DECISION_THRESHOLD);
        let expected = Action::from_vector(&pair.label);
        println!(
            "  {:>4}. p=[{:.2} {:.2} {:.2} {:.2}] pred={:<12} real={}",
            i,
            probs[0],
            probs[1],
            probs[2],
            probs[3],
            describe(predicted),
            describe(expected)
        );
    }

    let correct = exact_match_count(&predictions, &labels);
    println!(
        "\n🎯 Exact match: {}/{} ({:.1}%)",
        correct,
        pairs.len(),
        correct as f32 / pairs.len() as f32 * 100.0
    );
    Ok(())
}
