pub mod controller;
pub mod export;
pub mod hand_pose;
pub mod hid;
pub mod landmarks;
pub mod log_loader;
pub mod model;
pub mod onnx;
pub mod policy;
pub mod sequence;
pub mod shutdown;
pub mod steering;
pub mod trainer;
pub mod types;
