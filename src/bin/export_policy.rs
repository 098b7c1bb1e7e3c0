use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use drive_mimic::export::{
    export_graph, load_weights, read_onnx, training_model_config, ArtifactPaths, OnnxOptions,
    TRAIN_CONFIG_FILE,
};
use drive_mimic::model::ModelConfig;
use drive_mimic::onnx::value_info_dims;
use drive_mimic::trainer::InferenceBackend;

/// Re-exports saved policy weights as a traced graph and an ONNX model.
#[derive(Parser, Debug)]
#[command(name = "export_policy")]
struct Args {
    /// Weights written by train_policy
    #[arg(default_value = "policy.mpk")]
    weights: PathBuf,

    #[arg(long, short, default_value = ".")]
    out_dir: PathBuf,

    /// Sequence length of the traced dummy input
    #[arg(long, default_value_t = 20)]
    seq_len: usize,

    /// LSTM width; defaults to the one in train_config.json
    #[arg(long)]
    hidden: Option<usize>,

    /// Dense width; defaults to the one in train_config.json
    #[arg(long)]
    dense: Option<usize>,

    /// Fix batch and sequence axes to the traced shape
    #[arg(long)]
    static_axes: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    println!("📦 Policy export to ONNX\n");

    let mut config = match training_model_config(&args.weights)? {
        Some(recorded) => {
            println!("📄 Model sizes from {}", TRAIN_CONFIG_FILE);
            recorded
        }
        None => {
            println!("⚠️  No {} next to the weights, using defaults", TRAIN_CONFIG_FILE);
            ModelConfig::default()
        }
    };
    if let Some(hidden) = args.hidden {
        config.hidden_dim = hidden;
    }
    if let Some(dense) = args.dense {
        config.dense_dim = dense;
    }
    let device = Default::default();
    let model = load_weights::<InferenceBackend>(&config, &args.weights, &device)
        .with_context(|| format!("cannot load weights from {}", args.weights.display()))?;
    println!(
        "✅ Weights loaded from {} (hidden={}, dense={})",
        args.weights.display(),
        config.hidden_dim,
        config.dense_dim
    );

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create {}", args.out_dir.display()))?;
    let paths = ArtifactPaths::in_dir(&args.out_dir, "policy");

    let options = OnnxOptions {
        dynamic_axes: !args.static_axes,
        ..OnnxOptions::default()
    };
    export_graph(&model, args.seq_len, &paths, Some(&options), &device)?;

    let written = read_onnx(&paths.onnx)?;
    if let Some(graph) = written.graph.as_ref() {
        for info in graph.input.iter().chain(graph.output.iter()) {
            println!("  {} {:?}", info.name, value_info_dims(info));
        }
    }
    println!("\n✅ ONNX model written to {}", paths.onnx.display());
    Ok(())
}
