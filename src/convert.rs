use crate::config::{ConvertConfig, OutputFormat};
use crate::persist::persist;
use crate::verify::{VerifyError, verify_conversion};
use lite_graph::{ExportOptions, WeightPrecision};
use std::path::PathBuf;
use tflite_forge_import::{KerasModel, LayerSummary, TranslateOptions};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to load model from {}", path.display())]
    ModelLoadError {
        path: PathBuf,
        source: tflite_forge_import::Error,
    },
    #[error("Conversion failed: {0}")]
    ConversionError(anyhow::Error),
    #[error("Verification failed")]
    VerificationError(#[from] VerifyError),
    #[error("Failed to write {}", path.display())]
    IoWriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Serialized model bytes, ready to be written.
pub struct ConvertedModel {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub operators: usize,
    pub layers: Vec<LayerSummary>,
}

#[derive(Clone, Debug)]
pub struct ConversionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub weight_precision: WeightPrecision,
    pub bytes: usize,
    pub operators: usize,
    /// Set when the conversion was verified against the source model.
    pub max_abs_diff: Option<f32>,
    pub layers: Vec<LayerSummary>,
}

pub fn load(config: &ConvertConfig) -> Result<KerasModel, ConvertError> {
    tflite_forge_import::load_model(&config.input).map_err(|x| ConvertError::ModelLoadError {
        path: config.input.clone(),
        source: x,
    })
}

pub fn convert(
    model: &KerasModel,
    format: OutputFormat,
    options: &ExportOptions,
) -> Result<ConvertedModel, ConvertError> {
    let translated = tflite_forge_import::translate(model, &TranslateOptions::default())
        .map_err(|x| ConvertError::ConversionError(anyhow::Error::from(x)))?;
    let operators = translated
        .graph
        .num_operators()
        .map_err(|x| ConvertError::ConversionError(anyhow::Error::from(x)))?;
    let bytes = match format {
        OutputFormat::Tflite => lite_graph::tflite::build_tflite(&translated.graph, options),
        OutputFormat::Onnx => lite_graph::onnx::build_onnx_bytes(&translated.graph, options),
    }
    .map_err(|x| ConvertError::ConversionError(anyhow::Error::from(x)))?;
    tracing::debug!(
        "Serialized {} as {} ({} operators, {} bytes)",
        model.name(),
        format,
        operators,
        bytes.len()
    );
    Ok(ConvertedModel {
        bytes,
        format,
        operators,
        layers: translated.layers,
    })
}

/// Loads the source model, converts it, optionally checks the result against the source,
/// and writes it. Nothing is written unless every earlier step succeeded.
pub fn run(config: &ConvertConfig) -> Result<ConversionReport, ConvertError> {
    if config.output.extension().and_then(|x| x.to_str()) != Some(config.format.extension()) {
        tracing::warn!(
            "{} does not end in .{}",
            config.output.display(),
            config.format.extension()
        );
    }
    tracing::info!("Loading {}", config.input.display());
    let model = load(config)?;

    tracing::info!(
        "Converting {} to {} with {} weights",
        model.name(),
        config.format,
        config.weight_precision
    );
    let converted = convert(&model, config.format, &config.export_options())?;

    let max_abs_diff = if config.verify {
        match converted.format {
            OutputFormat::Tflite => {
                let report = verify_conversion(&model, &converted.bytes, config.tolerance())?;
                tracing::info!(
                    "Verified {} cases, max abs diff {:e}",
                    report.cases,
                    report.max_abs_diff
                );
                Some(report.max_abs_diff)
            }
            OutputFormat::Onnx => {
                tracing::warn!("Verification is only available for tflite output, skipping");
                None
            }
        }
    } else {
        None
    };

    tracing::info!("Writing {}", config.output.display());
    persist(&config.output, &converted.bytes).map_err(|x| ConvertError::IoWriteError {
        path: config.output.clone(),
        source: x,
    })?;

    Ok(ConversionReport {
        input: config.input.clone(),
        output: config.output.clone(),
        format: converted.format,
        weight_precision: config.weight_precision,
        bytes: converted.bytes.len(),
        operators: converted.operators,
        max_abs_diff,
        layers: converted.layers,
    })
}
