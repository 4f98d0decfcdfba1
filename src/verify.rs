use crate::model::{ModelError, TfliteModel};
use crate::reference::{ReferenceError, evaluate_keras};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tflite_forge_import::KerasModel;

pub const SEED: u64 = 0x5eed;
pub const RANDOM_CASES: usize = 3;
pub const BATCH_SIZE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Cannot run converted model: {0}")]
    Model(#[from] ModelError),
    #[error("Cannot evaluate source model: {0}")]
    Reference(#[from] ReferenceError),
    #[error("Converted model has {actual} outputs, source has {expected}")]
    OutputCount { expected: usize, actual: usize },
    #[error("Output {name} has shape {actual:?}, source has {expected:?}")]
    OutputShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Outputs differ by up to {max_abs_diff:e} (tolerance {tolerance:e})")]
    Mismatch { max_abs_diff: f32, tolerance: f32 },
}

#[derive(Clone, Debug)]
pub struct VerificationReport {
    pub max_abs_diff: f32,
    pub cases: usize,
}

/// Zeros, then seeded uniform samples in `[-1, 1)`, shaped like each input with the
/// batch dimension set to [`BATCH_SIZE`].
fn test_inputs(model: &TfliteModel) -> Vec<Vec<ArrayD<f32>>> {
    let shapes: Vec<Vec<usize>> = model
        .inputs()
        .iter()
        .map(|info| {
            info.shape
                .iter()
                .zip(&info.signature)
                .map(|(dim, signature)| if *signature < 0 { BATCH_SIZE } else { *dim })
                .collect()
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut cases = vec![shapes.iter().map(|x| ArrayD::zeros(IxDyn(x))).collect()];
    for _ in 0..RANDOM_CASES {
        cases.push(
            shapes
                .iter()
                .map(|x| ArrayD::from_shape_simple_fn(IxDyn(x), || rng.gen_range(-1.0f32..1.0)))
                .collect(),
        );
    }
    cases
}

/// Runs the serialized model and the source model on the same inputs and compares every
/// output element.
pub fn verify_conversion(
    source: &KerasModel,
    bytes: &[u8],
    tolerance: f32,
) -> Result<VerificationReport, VerifyError> {
    let converted = TfliteModel::from_bytes(bytes)?;
    let output_names: Vec<String> = converted.outputs().iter().map(|x| x.name.clone()).collect();
    let cases = test_inputs(&converted);
    let mut max_abs_diff = 0.0f32;
    for inputs in &cases {
        let actual = converted.run(inputs)?;
        let expected = evaluate_keras(source, inputs)?;
        if actual.len() != expected.len() {
            return Err(VerifyError::OutputCount {
                expected: expected.len(),
                actual: actual.len(),
            });
        }
        for ((name, actual), expected) in output_names.iter().zip(&actual).zip(&expected) {
            if actual.shape() != expected.shape() {
                return Err(VerifyError::OutputShape {
                    name: name.clone(),
                    expected: expected.shape().to_vec(),
                    actual: actual.shape().to_vec(),
                });
            }
            for (a, b) in actual.iter().zip(expected.iter()) {
                let diff = (a - b).abs();
                // NaN compares false against the running max
                if diff.is_nan() {
                    max_abs_diff = f32::INFINITY;
                } else {
                    max_abs_diff = max_abs_diff.max(diff);
                }
            }
        }
    }
    tracing::debug!(
        "Compared {} cases, max abs diff {:e}",
        cases.len(),
        max_abs_diff
    );
    if max_abs_diff > tolerance {
        return Err(VerifyError::Mismatch {
            max_abs_diff,
            tolerance,
        });
    }
    Ok(VerificationReport {
        max_abs_diff,
        cases: cases.len(),
    })
}
