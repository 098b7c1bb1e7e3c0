use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{histories_to_tensor, ModelConfig, PolicyNet};
use crate::sequence::TrainingPair;
use crate::types::{exact_match_count, ACTION_DIM, SEQ_LEN};

pub type TrainBackend = Autodiff<NdArray>;
pub type InferenceBackend = NdArray;

/// Probabilities are clamped into `[EPS, 1 - EPS]` before taking logs
const EPS: f32 = 1e-7;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("not enough training pairs ({pairs}) to train")]
    NoTrainingData { pairs: usize },

    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("tensor data error: {0}")]
    Tensor(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model: ModelConfig,
    pub seq_len: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Share of pairs held out for validation
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            seq_len: SEQ_LEN,
            epochs: 20,
            batch_size: 64,
            learning_rate: 1e-3,
            validation_fraction: 0.1,
            seed: 42,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.seq_len == 0 {
            return Err(TrainError::InvalidConfig("seq_len must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(TrainError::InvalidConfig(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

pub struct TrainingOutcome {
    pub model: PolicyNet<InferenceBackend>,
    pub history: Vec<EpochMetrics>,
    pub train_pairs: usize,
    pub val_pairs: usize,
}

/// Shuffles the pairs and holds out `ceil(n * fraction)` of them, keeping at
/// least one pair for training whenever there are two or more.
pub fn split_pairs(
    mut pairs: Vec<TrainingPair>,
    fraction: f64,
    rng: &mut StdRng,
) -> (Vec<TrainingPair>, Vec<TrainingPair>) {
    pairs.shuffle(rng);
    let n = pairs.len();
    let mut n_val = (n as f64 * fraction).ceil() as usize;
    if n_val >= n {
        n_val = n.saturating_sub(1);
    }
    let val = pairs.split_off(n - n_val);
    (pairs, val)
}

/// Binary cross-entropy summed over the outputs of each row, averaged over
/// the batch.
pub fn bce_loss<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let p = probs.clamp(EPS, 1.0 - EPS);
    let positive = targets.clone() * p.clone().log();
    let negative = targets.neg().add_scalar(1.0) * p.neg().add_scalar(1.0).log();
    (positive + negative).neg().sum_dim(1).mean()
}

fn batch_tensors<B: Backend>(
    pairs: &[TrainingPair],
    indices: &[usize],
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 2>, Vec<f32>) {
    let histories: Vec<&[_]> = indices.iter().map(|&i| pairs[i].history.as_slice()).collect();
    let mut labels = Vec::with_capacity(indices.len() * ACTION_DIM);
    for &i in indices {
        labels.extend_from_slice(&pairs[i].label);
    }

    let input = histories_to_tensor::<B>(&histories, device);
    let targets = Tensor::from_data(
        TensorData::new(labels.clone(), [indices.len(), ACTION_DIM]),
        device,
    );
    (input, targets, labels)
}

fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>, TrainError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))
}

/// Mean batch loss and exact-match accuracy of `model` over `pairs`.
pub fn evaluate<B: Backend>(
    model: &PolicyNet<B>,
    pairs: &[TrainingPair],
    batch_size: usize,
    device: &B::Device,
) -> Result<(f32, f32), TrainError> {
    if pairs.is_empty() {
        return Ok((0.0, 0.0));
    }

    let indices: Vec<usize> = (0..pairs.len()).collect();
    let mut loss_sum = 0.0f32;
    let mut batches = 0usize;
    let mut correct = 0usize;

    for chunk in indices.chunks(batch_size.max(1)) {
        let (input, targets, labels) = batch_tensors::<B>(pairs, chunk, device);
        let output = model.forward(input);
        let loss: f32 = bce_loss(output.clone(), targets).into_scalar().elem();
        loss_sum += loss;
        batches += 1;
        correct += exact_match_count(&to_vec(output)?, &labels);
    }

    Ok((loss_sum / batches as f32, correct as f32 / pairs.len() as f32))
}

/// Fits a fresh policy network on `pairs`.
///
/// Every epoch runs to completion; there is no early stopping or learning
/// rate schedule.
pub fn train(
    pairs: Vec<TrainingPair>,
    config: &TrainConfig,
) -> Result<TrainingOutcome, TrainError> {
    config.validate()?;
    if pairs.is_empty() {
        return Err(TrainError::NoTrainingData { pairs: 0 });
    }

    let device = NdArrayDevice::default();
    TrainBackend::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let (train_set, val_set) = split_pairs(pairs, config.validation_fraction, &mut rng);
    if train_set.is_empty() {
        return Err(TrainError::NoTrainingData {
            pairs: val_set.len(),
        });
    }
    info!(
        train = train_set.len(),
        validation = val_set.len(),
        "starting training"
    );

    let mut model: PolicyNet<TrainBackend> = config.model.init(&device);
    let mut optim = AdamConfig::new().init();
    let mut history = Vec::with_capacity(config.epochs);
    let mut order: Vec<usize> = (0..train_set.len()).collect();

    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);

        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;
        let mut correct = 0usize;

        for chunk in order.chunks(config.batch_size) {
            let (input, targets, labels) =
                batch_tensors::<TrainBackend>(&train_set, chunk, &device);
            let output = model.forward(input);
            let loss = bce_loss(output.clone(), targets);

            let loss_value: f32 = loss.clone().into_scalar().elem();
            correct += exact_match_count(&to_vec(output)?, &labels);
            loss_sum += loss_value;
            batches += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let train_loss = loss_sum / batches as f32;
        let train_accuracy = correct as f32 / train_set.len() as f32;

        let (val_loss, val_accuracy) = if val_set.is_empty() {
            (None, None)
        } else {
            let valid_model = model.valid();
            let (loss, acc) = evaluate(&valid_model, &val_set, config.batch_size, &device)?;
            (Some(loss), Some(acc))
        };

        let metrics = EpochMetrics {
            epoch,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
        };
        info!(
            "Epoch {}/{} loss={:.4} acc={:.4} val_loss={} val_acc={}",
            epoch,
            config.epochs,
            train_loss,
            train_accuracy,
            fmt_metric(val_loss),
            fmt_metric(val_accuracy),
        );
        history.push(metrics);
    }

    debug!(epochs = history.len(), "training finished");
    Ok(TrainingOutcome {
        model: model.valid(),
        history,
        train_pairs: train_set.len(),
        val_pairs: val_set.len(),
    })
}

fn fmt_metric(value: Option<f32>) -> String {
    value
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "n/a".to_string())
}
