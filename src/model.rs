use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

use crate::types::{StateVector, ACTION_DIM, STATE_DIM};

/// Layer sizes of the policy network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub state_dim: usize,
    pub action_dim: usize,
    /// LSTM hidden width
    pub hidden_dim: usize,
    /// Width of the intermediate dense layer
    pub dense_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            state_dim: STATE_DIM,
            action_dim: ACTION_DIM,
            hidden_dim: 128,
            dense_dim: 64,
        }
    }
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PolicyNet<B> {
        PolicyNet {
            lstm: LstmConfig::new(self.state_dim, self.hidden_dim, true).init(device),
            fc1: LinearConfig::new(self.hidden_dim, self.dense_dim).init(device),
            fc2: LinearConfig::new(self.dense_dim, self.action_dim).init(device),
            activation: Relu::new(),
        }
    }
}

/// LSTM encoder → last time step → dense → ReLU → dense → sigmoid.
///
/// Outputs are four independent probabilities (up, down, left, right).
#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    pub lstm: Lstm<B>,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> PolicyNet<B> {
    /// `input` is `[batch, seq_len, state_dim]` with `seq_len >= 1`; returns
    /// `[batch, action_dim]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, seq_len, _] = input.dims();
        let (output, _state) = self.lstm.forward(input, None);
        let hidden = output.dims()[2];

        let last = output
            .slice([0..batch, seq_len - 1..seq_len, 0..hidden])
            .reshape([batch, hidden]);
        let x = self.activation.forward(self.fc1.forward(last));
        sigmoid(self.fc2.forward(x))
    }

    pub fn state_dim(&self) -> usize {
        self.lstm.input_gate.input_transform.weight.val().dims()[0]
    }

    pub fn hidden_dim(&self) -> usize {
        self.lstm.d_hidden
    }

    pub fn action_dim(&self) -> usize {
        self.fc2.weight.val().dims()[1]
    }
}

/// Packs equal-length histories into a `[batch, seq_len, STATE_DIM]` tensor.
pub fn histories_to_tensor<B: Backend>(
    histories: &[&[StateVector]],
    device: &B::Device,
) -> Tensor<B, 3> {
    let batch = histories.len();
    let seq_len = histories.first().map(|h| h.len()).unwrap_or(0);
    let mut flat = Vec::with_capacity(batch * seq_len * STATE_DIM);
    for history in histories {
        debug_assert_eq!(history.len(), seq_len);
        for state in history.iter() {
            flat.extend_from_slice(state);
        }
    }
    Tensor::from_data(TensorData::new(flat, [batch, seq_len, STATE_DIM]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn small() -> ModelConfig {
        ModelConfig {
            hidden_dim: 8,
            dense_dim: 6,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn forward_shape_follows_batch_for_any_length() {
        let device = Default::default();
        let model = small().init::<B>(&device);

        for (batch, seq_len) in [(1, 1), (3, 7), (2, 20)] {
            let input = Tensor::<B, 3>::zeros([batch, seq_len, STATE_DIM], &device);
            let output = model.forward(input);
            assert_eq!(output.dims(), [batch, ACTION_DIM]);
        }
    }

    #[test]
    fn outputs_are_probabilities() {
        let device = Default::default();
        let model = small().init::<B>(&device);
        let input = Tensor::<B, 3>::random(
            [4, 5, STATE_DIM],
            burn::tensor::Distribution::Uniform(-10.0, 10.0),
            &device,
        );
        let values = model.forward(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn dims_are_read_back_from_weights() {
        let device = Default::default();
        let model = small().init::<B>(&device);
        assert_eq!(model.state_dim(), STATE_DIM);
        assert_eq!(model.hidden_dim(), 8);
        assert_eq!(model.action_dim(), ACTION_DIM);
    }

    #[test]
    fn histories_pack_row_major() {
        let device = Default::default();
        let a = [[1.0, 2.0, 3.0, 4.0, 5.0], [6.0, 7.0, 8.0, 9.0, 10.0]];
        let b = [[0.0; 5], [-1.0; 5]];
        let tensor = histories_to_tensor::<B>(&[&a[..], &b[..]], &device);
        assert_eq!(tensor.dims(), [2, 2, STATE_DIM]);
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values[5], 6.0);
        assert_eq!(values[15], -1.0);
    }
}
