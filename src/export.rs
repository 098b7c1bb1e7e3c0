use std::fs;
use std::path::{Path, PathBuf};

use burn::nn::Linear;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Distribution;
use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{ModelConfig, PolicyNet};
use crate::onnx::{
    self, AttributeProto, Dim, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
};

pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "output";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("weights record error for {path:?}: {message}")]
    Record { path: PathBuf, message: String },

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("traced graph is missing initializer {0}")]
    MissingInitializer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ONNX decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Run record written by `train_policy` next to the artifacts.
pub const TRAIN_CONFIG_FILE: &str = "train_config.json";

/// Writes a weights snapshot. The recorder stores it with an `.mpk` extension.
pub fn save_weights<B: Backend>(
    model: &PolicyNet<B>,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let path = path.as_ref().to_path_buf();
    model
        .clone()
        .save_file(path.clone(), &recorder())
        .map_err(|e| ExportError::Record {
            path,
            message: format!("{e:?}"),
        })
}

/// Rebuilds the architecture described by `config` and loads a snapshot into it.
///
/// The recorder does not check tensor shapes, so a snapshot saved with other
/// layer sizes is rejected here as a `ShapeMismatch`.
pub fn load_weights<B: Backend>(
    config: &ModelConfig,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<PolicyNet<B>, ExportError> {
    let path = path.as_ref().to_path_buf();
    let model = config
        .init::<B>(device)
        .load_file(path.clone(), &recorder(), device)
        .map_err(|e| ExportError::Record {
            path,
            message: format!("{e:?}"),
        })?;
    check_layer_dims(config, &model)?;
    Ok(model)
}

fn check_layer_dims<B: Backend>(
    config: &ModelConfig,
    model: &PolicyNet<B>,
) -> Result<(), ExportError> {
    let gate = &model.lstm.input_gate;
    let layers: [(&'static str, [usize; 2], [usize; 2]); 4] = [
        (
            "lstm input weights",
            [config.state_dim, config.hidden_dim],
            gate.input_transform.weight.val().dims(),
        ),
        (
            "lstm hidden weights",
            [config.hidden_dim, config.hidden_dim],
            gate.hidden_transform.weight.val().dims(),
        ),
        (
            "fc1 weights",
            [config.hidden_dim, config.dense_dim],
            model.fc1.weight.val().dims(),
        ),
        (
            "fc2 weights",
            [config.dense_dim, config.action_dim],
            model.fc2.weight.val().dims(),
        ),
    ];
    for (what, expected, actual) in layers {
        if expected != actual {
            return Err(ExportError::ShapeMismatch {
                what,
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
    }
    Ok(())
}

/// Model sizes recorded in the `train_config.json` beside `weights`, if any.
pub fn training_model_config(
    weights: impl AsRef<Path>,
) -> Result<Option<ModelConfig>, ExportError> {
    let dir = weights.as_ref().parent().unwrap_or_else(|| Path::new("."));
    let path = dir.join(TRAIN_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let record: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
    match record.get("train").and_then(|train| train.get("model")) {
        Some(model) => Ok(Some(serde_json::from_value(model.clone())?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpAttribute {
    Int { name: String, value: i64 },
    Ints { name: String, values: Vec<i64> },
    Float { name: String, value: f32 },
    Str { name: String, value: String },
}

impl OpAttribute {
    fn to_proto(&self) -> AttributeProto {
        match self {
            OpAttribute::Int { name, value } => AttributeProto::int(name, *value),
            OpAttribute::Ints { name, values } => AttributeProto::ints(name, values.clone()),
            OpAttribute::Float { name, value } => AttributeProto::float(name, *value),
            OpAttribute::Str { name, value } => AttributeProto::string(name, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracedOp {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<OpAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorValues {
    Float(Vec<f32>),
    Int64(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub dims: Vec<usize>,
    pub values: TensorValues,
}

impl NamedTensor {
    fn to_proto(&self) -> TensorProto {
        let dims = self.dims.iter().map(|&d| d as i64).collect();
        match &self.values {
            TensorValues::Float(values) => TensorProto {
                dims,
                data_type: onnx::data_type::FLOAT,
                float_data: values.clone(),
                name: self.name.clone(),
                ..Default::default()
            },
            TensorValues::Int64(values) => TensorProto {
                dims,
                data_type: onnx::data_type::INT64,
                int64_data: values.clone(),
                name: self.name.clone(),
                ..Default::default()
            },
        }
    }
}

/// Input and output observed while tracing, kept for parity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceExample {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
}

/// Computation graph recorded from one concrete forward pass.
///
/// Shapes are the static shapes of the dummy input; [`to_onnx`] can turn
/// batch and sequence length into symbolic axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracedGraph {
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub state_dim: usize,
    pub hidden_dim: usize,
    pub action_dim: usize,
    pub ops: Vec<TracedOp>,
    pub initializers: Vec<NamedTensor>,
    pub example: Option<TraceExample>,
}

impl TracedGraph {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn initializer(&self, name: &str) -> Option<&NamedTensor> {
        self.initializers.iter().find(|t| t.name == name)
    }
}

fn tensor_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, ExportError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ExportError::Tensor(format!("{e:?}")))
}

/// Row-major `[rows, cols]` → `[cols, rows]`.
fn transpose(values: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; values.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = values[r * cols + c];
        }
    }
    out
}

/// Weight of a linear layer as stored (`[d_input, d_output]`) and its bias
/// (zeros when the layer has none).
fn linear_parts<B: Backend>(
    linear: &Linear<B>,
) -> Result<(usize, usize, Vec<f32>, Vec<f32>), ExportError> {
    let weight = linear.weight.val();
    let [d_in, d_out] = weight.dims();
    let weight = tensor_values(weight)?;
    let bias = match &linear.bias {
        Some(bias) => tensor_values(bias.val())?,
        None => vec![0.0; d_out],
    };
    Ok((d_in, d_out, weight, bias))
}

fn float_tensor(name: &str, dims: Vec<usize>, values: Vec<f32>) -> NamedTensor {
    NamedTensor {
        name: name.to_string(),
        dims,
        values: TensorValues::Float(values),
    }
}

fn op(
    name: &str,
    op_type: &str,
    inputs: &[&str],
    outputs: &[&str],
    attributes: Vec<OpAttribute>,
) -> TracedOp {
    TracedOp {
        name: name.to_string(),
        op_type: op_type.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        attributes,
    }
}

/// Packs the LSTM gate controllers into ONNX `W`, `R` and `B`.
///
/// ONNX orders gates input, output, forget, cell and stores every matrix as
/// `[hidden, fan_in]`; burn keeps `[fan_in, hidden]` per gate.
fn lstm_initializers<B: Backend>(model: &PolicyNet<B>) -> Result<Vec<NamedTensor>, ExportError> {
    let lstm = &model.lstm;
    let gates = [
        &lstm.input_gate,
        &lstm.output_gate,
        &lstm.forget_gate,
        &lstm.cell_gate,
    ];
    let hidden = lstm.d_hidden;

    let mut w = Vec::new();
    let mut r = Vec::new();
    let mut wb = Vec::new();
    let mut rb = Vec::new();
    let mut input_dim = 0;

    for gate in gates {
        let (d_in, d_h, weight, bias) = linear_parts(&gate.input_transform)?;
        input_dim = d_in;
        w.extend(transpose(&weight, d_in, d_h));
        wb.extend(bias);

        let (h_in, h_out, weight, bias) = linear_parts(&gate.hidden_transform)?;
        r.extend(transpose(&weight, h_in, h_out));
        rb.extend(bias);
    }
    wb.extend(rb);

    Ok(vec![
        float_tensor("lstm.W", vec![1, 4 * hidden, input_dim], w),
        float_tensor("lstm.R", vec![1, 4 * hidden, hidden], r),
        float_tensor("lstm.B", vec![1, 8 * hidden], wb),
    ])
}

/// Runs `model` once on a random input of `dummy_shape` (batch, seq_len,
/// state_dim) and records the graph and weights.
///
/// The dummy's feature width must match the model, and the model must map it
/// to `(batch, action_dim)`.
pub fn trace<B: Backend>(
    model: &PolicyNet<B>,
    dummy_shape: [usize; 3],
    device: &B::Device,
) -> Result<TracedGraph, ExportError> {
    let [batch, seq_len, features] = dummy_shape;
    let state_dim = model.state_dim();
    let action_dim = model.action_dim();
    let hidden_dim = model.hidden_dim();

    if features != state_dim || batch == 0 || seq_len == 0 {
        return Err(ExportError::ShapeMismatch {
            what: "dummy input",
            expected: vec![batch.max(1), seq_len.max(1), state_dim],
            actual: dummy_shape.to_vec(),
        });
    }

    let dummy = Tensor::<B, 3>::random(dummy_shape, Distribution::Normal(0.0, 1.0), device);
    let output = model.forward(dummy.clone());
    let output_shape = output.dims().to_vec();
    if output_shape != [batch, action_dim] {
        return Err(ExportError::ShapeMismatch {
            what: "traced output",
            expected: vec![batch, action_dim],
            actual: output_shape,
        });
    }

    let (fc1_in, fc1_out, fc1_w, fc1_b) = linear_parts(&model.fc1)?;
    let (fc2_in, fc2_out, fc2_w, fc2_b) = linear_parts(&model.fc2)?;

    let mut initializers = lstm_initializers(model)?;
    initializers.push(NamedTensor {
        name: "squeeze_axes".to_string(),
        dims: vec![1],
        values: TensorValues::Int64(vec![0]),
    });
    // Gemm takes B as [K, N], which is burn's layout already
    initializers.push(float_tensor("fc1.weight", vec![fc1_in, fc1_out], fc1_w));
    initializers.push(float_tensor("fc1.bias", vec![fc1_out], fc1_b));
    initializers.push(float_tensor("fc2.weight", vec![fc2_in, fc2_out], fc2_w));
    initializers.push(float_tensor("fc2.bias", vec![fc2_out], fc2_b));

    let gemm_attrs = || {
        vec![
            OpAttribute::Float {
                name: "alpha".into(),
                value: 1.0,
            },
            OpAttribute::Float {
                name: "beta".into(),
                value: 1.0,
            },
        ]
    };

    let ops = vec![
        op(
            "to_time_major",
            "Transpose",
            &[INPUT_NAME],
            &["input_tm"],
            vec![OpAttribute::Ints {
                name: "perm".into(),
                values: vec![1, 0, 2],
            }],
        ),
        op(
            "lstm",
            "LSTM",
            &["input_tm", "lstm.W", "lstm.R", "lstm.B"],
            &["lstm_y", "lstm_h"],
            vec![
                OpAttribute::Int {
                    name: "hidden_size".into(),
                    value: hidden_dim as i64,
                },
                OpAttribute::Str {
                    name: "direction".into(),
                    value: "forward".into(),
                },
            ],
        ),
        op("last_step", "Squeeze", &["lstm_h", "squeeze_axes"], &["last_hidden"], vec![]),
        op(
            "fc1",
            "Gemm",
            &["last_hidden", "fc1.weight", "fc1.bias"],
            &["fc1_out"],
            gemm_attrs(),
        ),
        op("relu", "Relu", &["fc1_out"], &["relu_out"], vec![]),
        op(
            "fc2",
            "Gemm",
            &["relu_out", "fc2.weight", "fc2.bias"],
            &["logits"],
            gemm_attrs(),
        ),
        op("sigmoid", "Sigmoid", &["logits"], &[OUTPUT_NAME], vec![]),
    ];

    let example = TraceExample {
        input: tensor_values(dummy)?,
        output: tensor_values(output)?,
    };

    debug!(ops = ops.len(), initializers = initializers.len(), "model traced");
    Ok(TracedGraph {
        input_shape: dummy_shape.to_vec(),
        output_shape: vec![batch, action_dim],
        state_dim,
        hidden_dim,
        action_dim,
        ops,
        initializers,
        example: Some(example),
    })
}

#[derive(Debug, Clone)]
pub struct OnnxOptions {
    /// Replace batch and sequence length with symbolic axes
    pub dynamic_axes: bool,
    pub batch_axis: String,
    pub seq_axis: String,
    pub opset_version: i64,
    pub producer_name: String,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self {
            dynamic_axes: true,
            batch_axis: "batch_size".to_string(),
            seq_axis: "seq_len".to_string(),
            opset_version: onnx::OPSET_VERSION,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Converts a traced graph into an ONNX model.
pub fn to_onnx(graph: &TracedGraph, options: &OnnxOptions) -> Result<ModelProto, ExportError> {
    for op in &graph.ops {
        for input in &op.inputs {
            let produced = input == INPUT_NAME
                || graph.ops.iter().any(|o| o.outputs.contains(input))
                || graph.initializer(input).is_some();
            if !produced {
                return Err(ExportError::MissingInitializer(input.clone()));
            }
        }
    }

    let fixed = |d: usize| Dim::Fixed(d as i64);
    let (input_dims, output_dims) = if options.dynamic_axes {
        (
            vec![
                Dim::Named(options.batch_axis.clone()),
                Dim::Named(options.seq_axis.clone()),
                fixed(graph.state_dim),
            ],
            vec![Dim::Named(options.batch_axis.clone()), fixed(graph.action_dim)],
        )
    } else {
        (
            graph.input_shape.iter().copied().map(fixed).collect(),
            graph.output_shape.iter().copied().map(fixed).collect(),
        )
    };

    let nodes = graph
        .ops
        .iter()
        .map(|op| NodeProto {
            input: op.inputs.clone(),
            output: op.outputs.clone(),
            name: op.name.clone(),
            op_type: op.op_type.clone(),
            attribute: op.attributes.iter().map(OpAttribute::to_proto).collect(),
            domain: String::new(),
        })
        .collect();

    Ok(ModelProto {
        ir_version: onnx::IR_VERSION,
        producer_name: options.producer_name.clone(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        model_version: 1,
        graph: Some(GraphProto {
            node: nodes,
            name: "policy".to_string(),
            initializer: graph.initializers.iter().map(NamedTensor::to_proto).collect(),
            input: vec![onnx::float_value_info(INPUT_NAME, input_dims)],
            output: vec![onnx::float_value_info(OUTPUT_NAME, output_dims)],
            ..Default::default()
        }),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: options.opset_version,
        }],
        ..Default::default()
    })
}

pub fn write_onnx(model: &ModelProto, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let path = path.as_ref();
    fs::write(path, model.encode_to_vec())?;
    info!(path = %path.display(), "ONNX model written");
    Ok(())
}

pub fn read_onnx(path: impl AsRef<Path>) -> Result<ModelProto, ExportError> {
    let bytes = fs::read(path)?;
    Ok(ModelProto::decode(bytes.as_slice())?)
}

/// Paths of the three artifacts produced for one model.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub weights: PathBuf,
    pub trace: PathBuf,
    pub onnx: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            weights: dir.join(format!("{stem}.mpk")),
            trace: dir.join(format!("{stem}.trace.json")),
            onnx: dir.join(format!("{stem}.onnx")),
        }
    }
}

/// Traces `model` with a `(1, seq_len, state_dim)` dummy and writes the
/// traced graph and, when `onnx` is set, the ONNX file.
pub fn export_graph<B: Backend>(
    model: &PolicyNet<B>,
    seq_len: usize,
    paths: &ArtifactPaths,
    onnx: Option<&OnnxOptions>,
    device: &B::Device,
) -> Result<TracedGraph, ExportError> {
    let graph = trace(model, [1, seq_len, model.state_dim()], device)?;
    graph.save_json(&paths.trace)?;
    info!(path = %paths.trace.display(), "traced graph written");

    if let Some(options) = onnx {
        write_onnx(&to_onnx(&graph, options)?, &paths.onnx)?;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::value_info_dims;
    use burn::backend::NdArray;

    type B = NdArray;

    fn small_model() -> (ModelConfig, PolicyNet<B>) {
        let config = ModelConfig {
            hidden_dim: 6,
            dense_dim: 5,
            ..ModelConfig::default()
        };
        let model = config.init::<B>(&Default::default());
        (config, model)
    }

    #[test]
    fn transpose_swaps_axes() {
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(transpose(&m, 2, 3), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn trace_rejects_wrong_feature_width() {
        let (_, model) = small_model();
        let err = trace(&model, [1, 20, 4], &Default::default()).unwrap_err();
        assert!(matches!(err, ExportError::ShapeMismatch { .. }));
        let err = trace(&model, [1, 0, 5], &Default::default()).unwrap_err();
        assert!(matches!(err, ExportError::ShapeMismatch { .. }));
    }

    #[test]
    fn trace_records_lstm_layout() {
        let (_, model) = small_model();
        let graph = trace(&model, [1, 20, 5], &Default::default()).unwrap();
        assert_eq!(graph.input_shape, vec![1, 20, 5]);
        assert_eq!(graph.output_shape, vec![1, 4]);
        assert_eq!(graph.initializer("lstm.W").unwrap().dims, vec![1, 24, 5]);
        assert_eq!(graph.initializer("lstm.R").unwrap().dims, vec![1, 24, 6]);
        assert_eq!(graph.initializer("lstm.B").unwrap().dims, vec![1, 48]);
        assert_eq!(graph.initializer("fc2.weight").unwrap().dims, vec![5, 4]);

        let example = graph.example.as_ref().unwrap();
        assert_eq!(example.input.len(), 100);
        assert_eq!(example.output.len(), 4);
    }

    #[test]
    fn onnx_graph_has_named_dynamic_axes() {
        let (_, model) = small_model();
        let graph = trace(&model, [1, 20, 5], &Default::default()).unwrap();
        let proto = to_onnx(&graph, &OnnxOptions::default()).unwrap();
        let g = proto.graph.as_ref().unwrap();

        assert_eq!(g.input[0].name, "input");
        assert_eq!(g.output[0].name, "output");
        assert_eq!(
            value_info_dims(&g.input[0]),
            vec![
                Dim::Named("batch_size".into()),
                Dim::Named("seq_len".into()),
                Dim::Fixed(5)
            ]
        );
        assert_eq!(
            value_info_dims(&g.output[0]),
            vec![Dim::Named("batch_size".into()), Dim::Fixed(4)]
        );
        assert_eq!(proto.opset_import[0].version, 17);
    }

    #[test]
    fn static_export_keeps_traced_shapes() {
        let (_, model) = small_model();
        let graph = trace(&model, [2, 7, 5], &Default::default()).unwrap();
        let options = OnnxOptions {
            dynamic_axes: false,
            ..OnnxOptions::default()
        };
        let proto = to_onnx(&graph, &options).unwrap();
        let g = proto.graph.unwrap();
        assert_eq!(
            value_info_dims(&g.input[0]),
            vec![Dim::Fixed(2), Dim::Fixed(7), Dim::Fixed(5)]
        );
    }

    #[test]
    fn dangling_op_input_is_reported() {
        let (_, model) = small_model();
        let mut graph = trace(&model, [1, 3, 5], &Default::default()).unwrap();
        graph.initializers.retain(|t| t.name != "fc1.bias");
        let err = to_onnx(&graph, &OnnxOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::MissingInitializer(name) if name == "fc1.bias"));
    }

    #[test]
    fn reloading_with_other_sizes_is_a_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model) = small_model();
        let path = dir.path().join("policy.mpk");
        save_weights(&model, &path).unwrap();

        let wider = ModelConfig {
            hidden_dim: 12,
            dense_dim: 5,
            ..ModelConfig::default()
        };
        let err = load_weights::<B>(&wider, &path, &Default::default()).unwrap_err();
        assert!(matches!(
            err,
            ExportError::ShapeMismatch { what: "lstm input weights", .. }
        ));

        let denser = ModelConfig {
            hidden_dim: 6,
            dense_dim: 9,
            ..ModelConfig::default()
        };
        let err = load_weights::<B>(&denser, &path, &Default::default()).unwrap_err();
        assert!(matches!(err, ExportError::ShapeMismatch { what: "fc1 weights", .. }));
    }

    #[test]
    fn model_sizes_come_from_the_training_record() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("policy.mpk");
        assert_eq!(training_model_config(&weights).unwrap(), None);

        let (config, _) = small_model();
        let record = serde_json::json!({ "train": { "model": config, "epochs": 3 } });
        fs::write(dir.path().join(TRAIN_CONFIG_FILE), record.to_string()).unwrap();
        assert_eq!(training_model_config(&weights).unwrap(), Some(config));
    }

    #[test]
    fn artifacts_survive_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (config, model) = small_model();
        let paths = ArtifactPaths::in_dir(dir.path(), "policy");
        let device = Default::default();

        save_weights(&model, &paths.weights).unwrap();
        let restored: PolicyNet<B> = load_weights(&config, &paths.weights, &device).unwrap();

        let graph =
            export_graph(&model, 20, &paths, Some(&OnnxOptions::default()), &device).unwrap();
        let again = trace(&restored, [1, 20, 5], &device).unwrap();
        assert_eq!(graph.initializers, again.initializers);

        let loaded = TracedGraph::load_json(&paths.trace).unwrap();
        assert_eq!(loaded.ops, graph.ops);
        assert_eq!(loaded.input_shape, graph.input_shape);
        let (TensorValues::Float(a), TensorValues::Float(b)) = (
            &loaded.initializer("lstm.W").unwrap().values,
            &graph.initializer("lstm.W").unwrap().values,
        ) else {
            panic!("lstm.W should hold floats");
        };
        assert!(a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6));
        let proto = read_onnx(&paths.onnx).unwrap();
        assert_eq!(proto.graph.unwrap().node.len(), 7);
    }
}
