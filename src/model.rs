//! Reads a TensorFlow Lite flatbuffer back and runs it on float inputs.
//!
//! Only the operator set the converter emits is understood. Anything else is reported as
//! [`ModelError::UnsupportedOperator`] rather than guessed at.

use crate::kernels::{self, KernelError};
use flatbuffers::{ForwardsUOffset, Vector};
use lite_graph::node::{FusedActivation, Padding, PoolKind, UnaryKind, Window2D};
use lite_graph::tensor::{DType, Shape, TensorData};
use lite_graph::tflite::schema::{self, ActivationFunctionType, BuiltinOperator, TensorType};
use lite_graph::tflite::{MIN_RUNTIME_VERSION_KEY, SIGNATURE_KEY};
use ndarray::{ArrayD, IxDyn};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Buffer does not carry the {} file identifier", schema::FILE_IDENTIFIER)]
    MissingIdentifier,
    #[error("Invalid flatbuffer: {0}")]
    InvalidFlatbuffer(#[from] flatbuffers::InvalidFlatbuffer),
    #[error("Unsupported schema version {0}")]
    UnsupportedVersion(u32),
    #[error("Model has no subgraph")]
    MissingSubgraph,
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("Unsupported tensor type {0:?}")]
    UnsupportedTensorType(TensorType),
    #[error("Malformed model: {0}")]
    Malformed(String),
    #[error("Expected {expected} inputs, got {actual}")]
    MissingInput { expected: usize, actual: usize },
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Graph(#[from] lite_graph::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Same rank as `shape`; `-1` marks a dimension that may vary between runs.
    pub signature: Vec<i64>,
}

impl TensorInfo {
    fn accepts(&self, dims: &[usize]) -> bool {
        dims.len() == self.signature.len()
            && dims
                .iter()
                .zip(&self.signature)
                .all(|(actual, expected)| *expected < 0 || *expected as usize == *actual)
    }
}

#[derive(Clone, Debug)]
enum Operation {
    FullyConnected {
        input: usize,
        weights: usize,
        bias: Option<usize>,
        activation: FusedActivation,
    },
    Conv2D {
        input: usize,
        filter: usize,
        bias: Option<usize>,
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
        activation: FusedActivation,
        depthwise: bool,
    },
    Pool2D {
        input: usize,
        kind: PoolKind,
        window: Window2D,
    },
    Mean {
        input: usize,
        axes: Vec<i64>,
        keep_dims: bool,
    },
    Reshape {
        input: usize,
        shape: Vec<i64>,
    },
    Add {
        a: usize,
        b: usize,
        activation: FusedActivation,
    },
    Mul {
        a: usize,
        b: usize,
        activation: FusedActivation,
    },
    Concatenation {
        inputs: Vec<usize>,
        axis: i64,
        activation: FusedActivation,
    },
    Unary {
        input: usize,
        kind: UnaryKind,
    },
    Softmax {
        input: usize,
        beta: f32,
    },
    Dequantize {
        input: usize,
    },
}

#[derive(Clone, Debug)]
struct Step {
    name: &'static str,
    operation: Operation,
    output: usize,
}

/// A decoded model. Constants are widened to `f32` up front.
pub struct TfliteModel {
    tensors: Vec<TensorInfo>,
    constants: Vec<Option<ArrayD<f32>>>,
    int_constants: Vec<Option<Vec<i64>>>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    steps: Vec<Step>,
    description: Option<String>,
    min_runtime_version: Option<String>,
    signature_keys: Vec<String>,
}

fn fused(x: ActivationFunctionType) -> Result<FusedActivation, ModelError> {
    match x {
        ActivationFunctionType::NONE => Ok(FusedActivation::None),
        ActivationFunctionType::RELU => Ok(FusedActivation::Relu),
        ActivationFunctionType::RELU6 => Ok(FusedActivation::Relu6),
        ActivationFunctionType::TANH => Ok(FusedActivation::Tanh),
        other => Err(ModelError::UnsupportedOperator(format!(
            "fused activation {}",
            other.variant_name().unwrap_or("unknown")
        ))),
    }
}

fn padding(x: schema::Padding) -> Result<Padding, ModelError> {
    match x {
        schema::Padding::SAME => Ok(Padding::Same),
        schema::Padding::VALID => Ok(Padding::Valid),
        other => Err(ModelError::Malformed(format!("padding {:?}", other))),
    }
}

fn dtype(x: TensorType) -> Result<DType, ModelError> {
    match x {
        TensorType::FLOAT32 => Ok(DType::F32),
        TensorType::FLOAT16 => Ok(DType::F16),
        TensorType::INT32 => Ok(DType::I32),
        TensorType::INT64 => Ok(DType::I64),
        other => Err(ModelError::UnsupportedTensorType(other)),
    }
}

fn buffer_bytes<'a>(
    buffers: Option<Vector<'a, ForwardsUOffset<schema::Buffer<'a>>>>,
    index: u32,
) -> Option<&'a [u8]> {
    let buffers = buffers?;
    if index as usize >= buffers.len() {
        return None;
    }
    buffers.get(index as usize).data().map(|x| x.bytes())
}

fn positive(value: i32, what: &str) -> Result<usize, ModelError> {
    if value < 1 {
        return Err(ModelError::Malformed(format!("{} is {}", what, value)));
    }
    Ok(value as usize)
}

impl TfliteModel {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        if !schema::model_buffer_has_identifier(bytes) {
            return Err(ModelError::MissingIdentifier);
        }
        let model = schema::root_as_model(bytes)?;
        if model.version() != schema::SCHEMA_VERSION {
            return Err(ModelError::UnsupportedVersion(model.version()));
        }
        let subgraphs = model.subgraphs().ok_or(ModelError::MissingSubgraph)?;
        if subgraphs.is_empty() {
            return Err(ModelError::MissingSubgraph);
        }
        let subgraph = subgraphs.get(0);
        let buffers = model.buffers();
        let buffer_data = |index: u32| buffer_bytes(buffers, index);

        let mut tensors = vec![];
        let mut constants = vec![];
        let mut int_constants = vec![];
        for (index, tensor) in subgraph.tensors().into_iter().flatten().enumerate() {
            let data_type = dtype(tensor.type_())?;
            let shape: Vec<usize> = tensor
                .shape()
                .map(|x| x.iter().map(|d| d.max(0) as usize).collect())
                .unwrap_or_default();
            let signature: Vec<i64> = match tensor.shape_signature() {
                Some(x) => x.iter().map(|d| d as i64).collect(),
                None => shape.iter().map(|d| *d as i64).collect(),
            };
            if signature.len() != shape.len() {
                return Err(ModelError::Malformed(format!(
                    "tensor {} has a signature of rank {} for shape {:?}",
                    index,
                    signature.len(),
                    shape
                )));
            }
            let name = tensor.name().unwrap_or_default().to_string();
            let (constant, int_constant) = match buffer_data(tensor.buffer()) {
                Some(data) if tensor.buffer() != 0 => {
                    let data = TensorData::from_raw_encoding(
                        data_type,
                        data,
                        Shape::from(shape.as_slice()),
                    )?;
                    if data_type.is_float() {
                        let values = data.to_f32_vec()?;
                        (Some(ArrayD::from_shape_vec(IxDyn(&shape), values)?), None)
                    } else {
                        (None, Some(data.to_int_vec()?))
                    }
                }
                _ => (None, None),
            };
            constants.push(constant);
            int_constants.push(int_constant);
            tensors.push(TensorInfo {
                name,
                dtype: data_type,
                shape,
                signature,
            });
        }

        let tensor_index = |x: i32| -> Result<usize, ModelError> {
            if x < 0 || x as usize >= tensors.len() {
                return Err(ModelError::Malformed(format!("tensor index {}", x)));
            }
            Ok(x as usize)
        };
        let inputs = subgraph
            .inputs()
            .iter()
            .flatten()
            .map(tensor_index)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = subgraph
            .outputs()
            .iter()
            .flatten()
            .map(tensor_index)
            .collect::<Result<Vec<_>, _>>()?;

        let codes = model
            .operator_codes()
            .ok_or(ModelError::Malformed("no operator codes".to_string()))?;
        let mut steps = vec![];
        for op in subgraph.operators().into_iter().flatten() {
            if op.opcode_index() as usize >= codes.len() {
                return Err(ModelError::Malformed(format!(
                    "opcode index {}",
                    op.opcode_index()
                )));
            }
            let code = codes.get(op.opcode_index() as usize).builtin_code();
            let name = code.variant_name().ok_or(ModelError::UnsupportedOperator(format!(
                "builtin code {}",
                code.0
            )))?;
            let op_inputs: Vec<i32> = op.inputs().into_iter().flatten().collect();
            let op_outputs: Vec<i32> = op.outputs().into_iter().flatten().collect();
            let [output] = op_outputs.as_slice() else {
                return Err(ModelError::Malformed(format!(
                    "{} has {} outputs",
                    name,
                    op_outputs.len()
                )));
            };
            let output = tensor_index(*output)?;
            let input = |position: usize| -> Result<usize, ModelError> {
                let index = op_inputs.get(position).copied().ok_or_else(|| {
                    ModelError::Malformed(format!("{} is missing input {}", name, position))
                })?;
                tensor_index(index)
            };
            let optional = |position: usize| -> Result<Option<usize>, ModelError> {
                match op_inputs.get(position) {
                    None | Some(-1) => Ok(None),
                    Some(x) => tensor_index(*x).map(Some),
                }
            };
            let int_input = |position: usize| -> Result<Vec<i64>, ModelError> {
                let index = input(position)?;
                int_constants[index].clone().ok_or_else(|| {
                    ModelError::Malformed(format!("{} expects constant input {}", name, position))
                })
            };
            let missing_options = || ModelError::Malformed(format!("{} has no options", name));

            let operation = match code {
                BuiltinOperator::FULLY_CONNECTED => {
                    let options = op
                        .builtin_options_as_fully_connected_options()
                        .ok_or_else(missing_options)?;
                    Operation::FullyConnected {
                        input: input(0)?,
                        weights: input(1)?,
                        bias: optional(2)?,
                        activation: fused(options.fused_activation_function())?,
                    }
                }
                BuiltinOperator::CONV_2D => {
                    let options = op
                        .builtin_options_as_conv_2_doptions()
                        .ok_or_else(missing_options)?;
                    Operation::Conv2D {
                        input: input(0)?,
                        filter: input(1)?,
                        bias: optional(2)?,
                        stride: (
                            positive(options.stride_h(), "stride")?,
                            positive(options.stride_w(), "stride")?,
                        ),
                        dilation: (
                            positive(options.dilation_h_factor(), "dilation")?,
                            positive(options.dilation_w_factor(), "dilation")?,
                        ),
                        padding: padding(options.padding())?,
                        activation: fused(options.fused_activation_function())?,
                        depthwise: false,
                    }
                }
                BuiltinOperator::DEPTHWISE_CONV_2D => {
                    let options = op
                        .builtin_options_as_depthwise_conv_2_doptions()
                        .ok_or_else(missing_options)?;
                    Operation::Conv2D {
                        input: input(0)?,
                        filter: input(1)?,
                        bias: optional(2)?,
                        stride: (
                            positive(options.stride_h(), "stride")?,
                            positive(options.stride_w(), "stride")?,
                        ),
                        dilation: (
                            positive(options.dilation_h_factor(), "dilation")?,
                            positive(options.dilation_w_factor(), "dilation")?,
                        ),
                        padding: padding(options.padding())?,
                        activation: fused(options.fused_activation_function())?,
                        depthwise: true,
                    }
                }
                BuiltinOperator::MAX_POOL_2D | BuiltinOperator::AVERAGE_POOL_2D => {
                    let options = op
                        .builtin_options_as_pool_2_doptions()
                        .ok_or_else(missing_options)?;
                    if fused(options.fused_activation_function())? != FusedActivation::None {
                        return Err(ModelError::UnsupportedOperator(format!(
                            "{} with a fused activation",
                            name
                        )));
                    }
                    Operation::Pool2D {
                        input: input(0)?,
                        kind: if code == BuiltinOperator::MAX_POOL_2D {
                            PoolKind::Max
                        } else {
                            PoolKind::Average
                        },
                        window: Window2D {
                            kernel: (
                                positive(options.filter_height(), "filter height")?,
                                positive(options.filter_width(), "filter width")?,
                            ),
                            stride: (
                                positive(options.stride_h(), "stride")?,
                                positive(options.stride_w(), "stride")?,
                            ),
                            dilation: (1, 1),
                            padding: padding(options.padding())?,
                        },
                    }
                }
                BuiltinOperator::MEAN => Operation::Mean {
                    input: input(0)?,
                    axes: int_input(1)?,
                    keep_dims: op
                        .builtin_options_as_reducer_options()
                        .map(|x| x.keep_dims())
                        .unwrap_or(false),
                },
                BuiltinOperator::RESHAPE => {
                    let shape = match optional(1)? {
                        Some(_) => int_input(1)?,
                        None => op
                            .builtin_options_as_reshape_options()
                            .and_then(|x| x.new_shape())
                            .ok_or_else(missing_options)?
                            .iter()
                            .map(|x| x as i64)
                            .collect(),
                    };
                    Operation::Reshape {
                        input: input(0)?,
                        shape,
                    }
                }
                BuiltinOperator::ADD => Operation::Add {
                    a: input(0)?,
                    b: input(1)?,
                    activation: match op.builtin_options_as_add_options() {
                        Some(x) => fused(x.fused_activation_function())?,
                        None => FusedActivation::None,
                    },
                },
                BuiltinOperator::MUL => Operation::Mul {
                    a: input(0)?,
                    b: input(1)?,
                    activation: match op.builtin_options_as_mul_options() {
                        Some(x) => fused(x.fused_activation_function())?,
                        None => FusedActivation::None,
                    },
                },
                BuiltinOperator::CONCATENATION => {
                    let options = op
                        .builtin_options_as_concatenation_options()
                        .ok_or_else(missing_options)?;
                    Operation::Concatenation {
                        inputs: (0..op_inputs.len()).map(input).collect::<Result<_, _>>()?,
                        axis: options.axis() as i64,
                        activation: fused(options.fused_activation_function())?,
                    }
                }
                BuiltinOperator::SOFTMAX => Operation::Softmax {
                    input: input(0)?,
                    beta: op
                        .builtin_options_as_softmax_options()
                        .map(|x| x.beta())
                        .unwrap_or(1.0),
                },
                BuiltinOperator::DEQUANTIZE => Operation::Dequantize { input: input(0)? },
                BuiltinOperator::RELU
                | BuiltinOperator::RELU6
                | BuiltinOperator::LOGISTIC
                | BuiltinOperator::TANH
                | BuiltinOperator::ELU
                | BuiltinOperator::HARD_SWISH => Operation::Unary {
                    input: input(0)?,
                    kind: match code {
                        BuiltinOperator::RELU => UnaryKind::Relu,
                        BuiltinOperator::RELU6 => UnaryKind::Relu6,
                        BuiltinOperator::LOGISTIC => UnaryKind::Logistic,
                        BuiltinOperator::TANH => UnaryKind::Tanh,
                        BuiltinOperator::ELU => UnaryKind::Elu,
                        _ => UnaryKind::HardSwish,
                    },
                },
                _ => return Err(ModelError::UnsupportedOperator(name.to_string())),
            };
            steps.push(Step {
                name,
                operation,
                output,
            });
        }

        let mut min_runtime_version = None;
        for metadata in model.metadata().into_iter().flatten() {
            if metadata.name() == Some(MIN_RUNTIME_VERSION_KEY) {
                min_runtime_version = buffer_data(metadata.buffer()).map(|x| {
                    String::from_utf8_lossy(x)
                        .trim_end_matches('\0')
                        .to_string()
                });
            }
        }
        let signature_keys = model
            .signature_defs()
            .iter()
            .flatten()
            .filter_map(|x| x.signature_key().map(str::to_string))
            .collect();

        log::debug!(
            "Decoded model with {} tensors and {} operators",
            tensors.len(),
            steps.len()
        );
        Ok(Self {
            tensors,
            constants,
            int_constants,
            inputs,
            outputs,
            steps,
            description: model.description().map(str::to_string),
            min_runtime_version,
            signature_keys,
        })
    }

    pub fn inputs(&self) -> Vec<&TensorInfo> {
        self.inputs.iter().map(|x| &self.tensors[*x]).collect()
    }

    pub fn outputs(&self) -> Vec<&TensorInfo> {
        self.outputs.iter().map(|x| &self.tensors[*x]).collect()
    }

    /// Builtin operator names in execution order.
    pub fn operator_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|x| x.name).collect()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn min_runtime_version(&self) -> Option<&str> {
        self.min_runtime_version.as_deref()
    }

    pub fn signature_keys(&self) -> &[String] {
        &self.signature_keys
    }

    pub fn has_default_signature(&self) -> bool {
        self.signature_keys.iter().any(|x| x == SIGNATURE_KEY)
    }

    /// Number of integer constants, i.e. shape and axis operands.
    pub fn num_int_constants(&self) -> usize {
        self.int_constants.iter().flatten().count()
    }

    pub fn run(&self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, ModelError> {
        if inputs.len() != self.inputs.len() {
            return Err(ModelError::MissingInput {
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        let mut values: Vec<Option<ArrayD<f32>>> = self.constants.clone();
        for (index, value) in self.inputs.iter().zip(inputs) {
            let info = &self.tensors[*index];
            if !info.accepts(value.shape()) {
                return Err(ModelError::Malformed(format!(
                    "input {} expects {:?}, got {:?}",
                    info.name,
                    info.signature,
                    value.shape()
                )));
            }
            values[*index] = Some(value.clone());
        }

        for step in &self.steps {
            let result = self.execute(step, &values)?;
            log::trace!("{} -> {:?}", step.name, result.shape());
            values[step.output] = Some(result);
        }

        self.outputs
            .iter()
            .map(|x| {
                values[*x].clone().ok_or_else(|| {
                    ModelError::Malformed(format!("output {} is never written", self.tensors[*x].name))
                })
            })
            .collect()
    }

    fn execute(&self, step: &Step, values: &[Option<ArrayD<f32>>]) -> Result<ArrayD<f32>, ModelError> {
        let get = |index: usize| -> Result<&ArrayD<f32>, ModelError> {
            values[index].as_ref().ok_or_else(|| {
                ModelError::Malformed(format!(
                    "{} reads {} before it is written",
                    step.name, self.tensors[index].name
                ))
            })
        };
        let get_optional = |index: Option<usize>| index.map(get).transpose();

        Ok(match &step.operation {
            Operation::FullyConnected {
                input,
                weights,
                bias,
                activation,
            } => {
                let input = get(*input)?;
                let weights = get(*weights)?;
                let features = weights.shape().get(1).copied().unwrap_or(0);
                // Leading dimensions fold into the batch
                let flat = if input.ndim() == 2 {
                    input.clone()
                } else {
                    kernels::reshape(input, &[-1, features as i64])?
                };
                let out = kernels::fully_connected(&flat, weights, get_optional(*bias)?)?;
                kernels::apply_activation(out, *activation)
            }
            Operation::Conv2D {
                input,
                filter,
                bias,
                stride,
                dilation,
                padding,
                activation,
                depthwise,
            } => {
                let conv = if *depthwise {
                    kernels::depthwise_conv2d
                } else {
                    kernels::conv2d
                };
                let out = conv(
                    get(*input)?,
                    get(*filter)?,
                    get_optional(*bias)?,
                    *stride,
                    *dilation,
                    *padding,
                )?;
                kernels::apply_activation(out, *activation)
            }
            Operation::Pool2D {
                input,
                kind,
                window,
            } => kernels::pool2d(get(*input)?, *kind, window)?,
            Operation::Mean {
                input,
                axes,
                keep_dims,
            } => {
                let input = get(*input)?;
                let axes = axes
                    .iter()
                    .map(|x| kernels::normalize_axis(*x as isize, input.ndim()))
                    .collect::<Result<Vec<_>, _>>()?;
                kernels::mean(input, &axes, *keep_dims)?
            }
            Operation::Reshape { input, shape } => kernels::reshape(get(*input)?, shape)?,
            Operation::Add { a, b, activation } => kernels::apply_activation(
                kernels::binary(get(*a)?, get(*b)?, |x, y| x + y)?,
                *activation,
            ),
            Operation::Mul { a, b, activation } => kernels::apply_activation(
                kernels::binary(get(*a)?, get(*b)?, |x, y| x * y)?,
                *activation,
            ),
            Operation::Concatenation {
                inputs,
                axis,
                activation,
            } => {
                let inputs = inputs.iter().map(|x| get(*x)).collect::<Result<Vec<_>, _>>()?;
                let rank = inputs.first().map(|x| x.ndim()).unwrap_or(0);
                let axis = kernels::normalize_axis(*axis as isize, rank)?;
                kernels::apply_activation(kernels::concatenate(&inputs, axis)?, *activation)
            }
            Operation::Unary { input, kind } => {
                let input = get(*input)?;
                match kind {
                    UnaryKind::Relu => kernels::map(input, kernels::relu),
                    UnaryKind::Relu6 => kernels::map(input, kernels::relu6),
                    UnaryKind::Logistic => kernels::map(input, kernels::logistic),
                    UnaryKind::Tanh => kernels::map(input, f32::tanh),
                    UnaryKind::Elu => kernels::map(input, kernels::elu),
                    UnaryKind::HardSwish => kernels::map(input, kernels::hard_swish),
                }
            }
            Operation::Softmax { input, beta } => kernels::softmax(get(*input)?, *beta),
            // Half constants were widened when the model was decoded
            Operation::Dequantize { input } => get(*input)?.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lite_graph::node::FusedActivation;
    use lite_graph::operators::{FullyConnected, Mean, Reshape, Softmax};
    use lite_graph::tensor::{ConstantTensor, Dimension, InputTensor, Tensor};
    use lite_graph::tflite::build_tflite;
    use lite_graph::{ExportOptions, Graph, WeightPrecision};
    use ndarray::Axis;
    use std::sync::Arc;

    fn graph() -> Graph {
        let x = InputTensor::new(
            "x".to_string(),
            DType::F32,
            Shape::new(vec![
                Dimension::dynamic(1, "batch"),
                Arc::new(Dimension::from(2)),
                Arc::new(Dimension::from(2)),
            ]),
        );
        let flat = Reshape::new(Some("flatten".to_string()), x.clone(), vec![-1, 4]).unwrap();
        let weights = ConstantTensor::new(
            Some("dense/kernel".to_string()),
            TensorData::from_f32(
                vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.1, 0.2, 0.3, 0.4],
                &[3, 4],
            )
            .unwrap(),
        );
        let bias = ConstantTensor::new(
            Some("dense/bias".to_string()),
            TensorData::from_f32(vec![0.0, -1.0, 0.5], &[3]).unwrap(),
        );
        let fc = FullyConnected::new(
            Some("dense".to_string()),
            flat,
            weights,
            Some(bias),
            FusedActivation::Relu,
        )
        .unwrap();
        let probs = Softmax::new(Some("probs".to_string()), fc.clone()).unwrap();
        let pooled = Mean::new(Some("pooled".to_string()), x.clone(), &[1], false).unwrap();
        Graph::new(
            "main".to_string(),
            vec![x],
            vec![
                ("probs".to_string(), probs as Arc<dyn Tensor>),
                ("pooled".to_string(), pooled as Arc<dyn Tensor>),
            ],
        )
    }

    fn input(batch: usize) -> ArrayD<f32> {
        ArrayD::from_shape_vec(
            IxDyn(&[batch, 2, 2]),
            (0..batch * 4).map(|x| x as f32 * 0.5).collect(),
        )
        .unwrap()
    }

    #[test]
    fn decodes_metadata_and_layout() {
        let bytes = build_tflite(&graph(), &ExportOptions::default()).unwrap();
        let model = TfliteModel::from_bytes(&bytes).unwrap();
        assert_eq!(
            model.operator_names(),
            vec!["RESHAPE", "FULLY_CONNECTED", "SOFTMAX", "MEAN"]
        );
        assert_eq!(model.min_runtime_version(), Some("1.5.0"));
        assert!(model.has_default_signature());
        assert_eq!(model.num_int_constants(), 2);
        let inputs = model.inputs();
        assert_eq!(inputs[0].name, "x");
        assert_eq!(inputs[0].shape, vec![1, 2, 2]);
        assert_eq!(inputs[0].signature, vec![-1, 2, 2]);
        let outputs: Vec<&str> = model.outputs().iter().map(|x| x.name.as_str()).collect();
        assert_eq!(outputs, vec!["probs", "pooled"]);
    }

    #[test]
    fn runs_with_any_batch_size() {
        let bytes = build_tflite(&graph(), &ExportOptions::default()).unwrap();
        let model = TfliteModel::from_bytes(&bytes).unwrap();
        let outputs = model.run(&[input(3)]).unwrap();
        assert_eq!(outputs[0].shape(), &[3, 3]);
        assert_eq!(outputs[1].shape(), &[3, 2]);
        for row in outputs[0].rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        // First sample: x = [0, .5, 1, 1.5], dense = relu([0, .5, 1.5])
        let expected = [1.0f32, 0.5f32.exp(), 1.5f32.exp()];
        let total: f32 = expected.iter().sum();
        for (actual, expected) in outputs[0].index_axis(Axis(0), 0).iter().zip(expected) {
            assert!((actual - expected / total).abs() < 1e-5);
        }
        assert_eq!(outputs[1][[0, 0]], 0.5);
        assert_eq!(outputs[1][[0, 1]], 1.0);
    }

    #[test]
    fn rejects_wrong_input_shape() {
        let bytes = build_tflite(&graph(), &ExportOptions::default()).unwrap();
        let model = TfliteModel::from_bytes(&bytes).unwrap();
        let wrong = ArrayD::<f32>::zeros(IxDyn(&[1, 4]));
        assert!(matches!(model.run(&[wrong]), Err(ModelError::Malformed(_))));
        assert!(matches!(
            model.run(&[]),
            Err(ModelError::MissingInput { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn half_precision_runs_close_to_full() {
        let full = build_tflite(&graph(), &ExportOptions::default()).unwrap();
        let half = build_tflite(
            &graph(),
            &ExportOptions {
                weight_precision: WeightPrecision::F16,
                ..Default::default()
            },
        )
        .unwrap();
        let half_model = TfliteModel::from_bytes(&half).unwrap();
        assert_eq!(&half_model.operator_names()[..2], &["DEQUANTIZE", "DEQUANTIZE"]);
        assert_eq!(half_model.min_runtime_version(), Some("1.13.1"));
        let a = TfliteModel::from_bytes(&full).unwrap().run(&[input(2)]).unwrap();
        let b = half_model.run(&[input(2)]).unwrap();
        for (x, y) in a[0].iter().zip(b[0].iter()) {
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            TfliteModel::from_bytes(b"not a model at all"),
            Err(ModelError::MissingIdentifier)
        ));
        let mut bytes = build_tflite(&graph(), &ExportOptions::default()).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(TfliteModel::from_bytes(&bytes).is_err());
    }
}
