use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use drive_mimic::export::{
    export_graph, save_weights, ArtifactPaths, OnnxOptions, TRAIN_CONFIG_FILE,
};
use drive_mimic::log_loader::{load_log, LoadOptions};
use drive_mimic::model::ModelConfig;
use drive_mimic::sequence::{build_episode_windows, build_windows};
use drive_mimic::trainer::{train, EpochMetrics, TrainConfig};

/// Trains the driving policy on a recorded game log and exports it.
#[derive(Parser, Debug)]
#[command(name = "train_policy")]
struct Args {
    /// NDJSON game log
    #[arg(default_value = "game_log.json")]
    log: PathBuf,

    /// Directory for policy.mpk, policy.trace.json and policy.onnx
    #[arg(long, short, default_value = ".")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// States per input window
    #[arg(long, default_value_t = 20)]
    seq_len: usize,

    #[arg(long, default_value_t = 128)]
    hidden: usize,

    #[arg(long, default_value_t = 64)]
    dense: usize,

    #[arg(long, default_value_t = 0.1)]
    validation_fraction: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Skip lines that are not valid JSON records
    #[arg(long)]
    skip_malformed: bool,

    /// Do not let windows cross `episode` boundaries
    #[arg(long)]
    per_episode: bool,

    /// Only write the weights and the traced graph
    #[arg(long)]
    no_onnx: bool,
}

#[derive(Serialize)]
struct RunRecord<'a> {
    log: &'a PathBuf,
    load: &'a LoadOptions,
    per_episode: bool,
    train: &'a TrainConfig,
    train_pairs: usize,
    val_pairs: usize,
    history: &'a [EpochMetrics],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    println!("🧠 Driving policy training\n");

    let load_options = LoadOptions {
        skip_malformed: args.skip_malformed,
    };
    let log = load_log(&args.log, &load_options)
        .with_context(|| format!("cannot load {}", args.log.display()))?;
    println!(
        "📄 {} records loaded ({} ignored, {} skipped)",
        log.len(),
        log.ignored,
        log.skipped
    );

    let pairs = if args.per_episode {
        build_episode_windows(&log, args.seq_len)
    } else {
        build_windows(&log.states, &log.actions, args.seq_len)
    };
    if pairs.is_empty() {
        bail!(
            "{} records are not enough for windows of {} states",
            log.len(),
            args.seq_len
        );
    }
    println!("🪟 {} windows of {} states\n", pairs.len(), args.seq_len);

    let config = TrainConfig {
        model: ModelConfig {
            hidden_dim: args.hidden,
            dense_dim: args.dense,
            ..ModelConfig::default()
        },
        seq_len: args.seq_len,
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        validation_fraction: args.validation_fraction,
        seed: args.seed,
    };

    let outcome = train(pairs, &config).context("training failed")?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create {}", args.out_dir.display()))?;
    let paths = ArtifactPaths::in_dir(&args.out_dir, "policy");

    save_weights(&outcome.model, &paths.weights)?;
    println!("💾 Weights saved to {}", paths.weights.display());

    let onnx_options = OnnxOptions::default();
    let onnx = (!args.no_onnx).then_some(&onnx_options);
    export_graph(
        &outcome.model,
        args.seq_len,
        &paths,
        onnx,
        &Default::default(),
    )?;
    println!("🧾 Traced graph at {}", paths.trace.display());
    if !args.no_onnx {
        println!("📦 ONNX model at {}", paths.onnx.display());
    }

    let record = RunRecord {
        log: &args.log,
        load: &load_options,
        per_episode: args.per_episode,
        train: &config,
        train_pairs: outcome.train_pairs,
        val_pairs: outcome.val_pairs,
        history: &outcome.history,
    };
    let config_path = args.out_dir.join(TRAIN_CONFIG_FILE);
    fs::write(&config_path, serde_json::to_string_pretty(&record)?)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    if let Some(last) = outcome.history.last() {
        println!(
            "\n✅ Training done: loss={:.4} acc={:.1}%",
            last.train_loss,
            last.train_accuracy * 100.0
        );
    } else {
        println!("\n✅ Training done (0 epochs)");
    }
    Ok(())
}
