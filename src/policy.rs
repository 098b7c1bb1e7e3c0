use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::sequence::flatten_window;
use crate::types::{Action, StateVector, ACTION_DIM, DECISION_THRESHOLD, STATE_DIM};

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("history must hold at least one state")]
    EmptyHistory,

    #[error("histories in a batch must share one length (expected {expected}, got {actual})")]
    RaggedBatch { expected: usize, actual: usize },

    #[error("unexpected output shape {shape:?}")]
    OutputShape { shape: Vec<i64> },

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },
}

/// Exported policy running on ONNX Runtime.
pub struct OnnxPolicy {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxPolicy {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?.commit_from_file(model_path)?;

        let input_name = session
            .inputs
            .get(0)
            .map(|input| input.name.clone())
            .ok_or(PolicyError::MissingIo { kind: "input" })?;

        let output_name = session
            .outputs
            .iter()
            .find(|output| {
                matches!(
                    output.output_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Float32,
                        ..
                    }
                )
            })
            .or_else(|| session.outputs.get(0))
            .map(|output| output.name.clone())
            .ok_or(PolicyError::MissingIo { kind: "output" })?;

        info!(
            model = %model_path.display(),
            input = %input_name,
            output = %output_name,
            "policy loaded"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Probabilities of the next action after one history of any length.
    pub fn predict(&mut self, history: &[StateVector]) -> Result<[f32; ACTION_DIM], PolicyError> {
        let mut out = self.predict_batch(&[history])?;
        Ok(out.remove(0))
    }

    /// Thresholded next action.
    pub fn predict_action(&mut self, history: &[StateVector]) -> Result<Action, PolicyError> {
        let probs = self.predict(history)?;
        Ok(Action::from_probabilities(&probs, DECISION_THRESHOLD))
    }

    /// One probability row per history; all histories must have equal length.
    pub fn predict_batch(
        &mut self,
        histories: &[&[StateVector]],
    ) -> Result<Vec<[f32; ACTION_DIM]>, PolicyError> {
        let seq_len = histories.first().map(|h| h.len()).unwrap_or(0);
        if seq_len == 0 {
            return Err(PolicyError::EmptyHistory);
        }

        let mut data = Vec::with_capacity(histories.len() * seq_len * STATE_DIM);
        for history in histories {
            if history.len() != seq_len {
                return Err(PolicyError::RaggedBatch {
                    expected: seq_len,
                    actual: history.len(),
                });
            }
            data.extend(flatten_window(history));
        }

        let shape_vec = vec![histories.len(), seq_len, STATE_DIM];
        let input_value = ort::value::Value::from_array((shape_vec, data))?;

        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => &input_value,
        ])?;

        let (shape, probs) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 2
            || dims[0] as usize != histories.len()
            || dims[1] as usize != ACTION_DIM
        {
            return Err(PolicyError::OutputShape { shape: dims });
        }

        Ok(probs
            .chunks_exact(ACTION_DIM)
            .map(|row| [row[0], row[1], row[2], row[3]])
            .collect())
    }
}
