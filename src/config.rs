use lite_graph::{ExportOptions, WeightPrecision};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Keras HDF5 file of the trained activity classifier.
pub const DEFAULT_INPUT: &str = "UCI HAR Dataset/model.h5";
pub const DEFAULT_OUTPUT: &str = "model.tflite";

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// TensorFlow Lite flatbuffer.
    #[default]
    Tflite,
    /// ONNX protobuf.
    Onnx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Tflite => "tflite",
            OutputFormat::Onnx => "onnx",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub weight_precision: WeightPrecision,
    /// Run the converted model against the source model before writing it.
    pub verify: bool,
    /// Largest accepted absolute difference; defaults by weight precision.
    pub tolerance: Option<f32>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output: PathBuf::from(DEFAULT_OUTPUT),
            format: OutputFormat::default(),
            weight_precision: WeightPrecision::default(),
            verify: false,
            tolerance: None,
        }
    }
}

impl ConvertConfig {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance.unwrap_or(match self.weight_precision {
            WeightPrecision::F32 => 1e-4,
            WeightPrecision::F16 => 1e-2,
        })
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            weight_precision: self.weight_precision,
            description: format!("tflite-forge {}", env!("CARGO_PKG_VERSION")),
        }
    }
}
