pub mod schema;

use crate::node::{BinaryKind, FusedActivation, OpType, Padding, PoolKind, UnaryKind};
use crate::tensor::{DType, Shape, Tensor, TensorData};
use crate::{Error, ExportOptions, Graph, WeightPrecision, claim_name};
use flatbuffers::{FlatBufferBuilder, UnionWIPOffset, WIPOffset};
use schema::{
    ActivationFunctionType, ActivationOptions, Buffer, BuiltinOperator, BuiltinOptions,
    ConcatenationOptions, Conv2DOptions, DepthwiseConv2DOptions, FullyConnectedOptions, Metadata,
    Model, ModelArgs, Operator, OperatorArgs, OperatorCode, Pool2DOptions, ReducerOptions,
    ReshapeOptions, SignatureDef, SoftmaxOptions, SubGraph, SubGraphArgs, TensorArgs, TensorMap,
    TensorType,
};
use std::collections::{HashMap, HashSet};

pub const SIGNATURE_KEY: &str = "serving_default";
pub const MIN_RUNTIME_VERSION_KEY: &str = "min_runtime_version";

fn tensor_type(dtype: DType) -> TensorType {
    match dtype {
        DType::F32 => TensorType::FLOAT32,
        DType::F16 => TensorType::FLOAT16,
        DType::I32 => TensorType::INT32,
        DType::I64 => TensorType::INT64,
    }
}

fn activation_type(activation: FusedActivation) -> ActivationFunctionType {
    match activation {
        FusedActivation::None => ActivationFunctionType::NONE,
        FusedActivation::Relu => ActivationFunctionType::RELU,
        FusedActivation::Relu6 => ActivationFunctionType::RELU6,
        FusedActivation::Tanh => ActivationFunctionType::TANH,
    }
}

fn padding_type(padding: Padding) -> schema::Padding {
    match padding {
        Padding::Same => schema::Padding::SAME,
        Padding::Valid => schema::Padding::VALID,
    }
}

/// Shape as stored in the file, plus a signature with `-1` for dimensions that may vary.
fn shape_and_signature(shape: &Shape) -> Result<(Vec<i32>, Option<Vec<i32>>), Error> {
    let mut dims = vec![];
    let mut signature = vec![];
    for dim in &shape.dims {
        let value = dim.value.unwrap_or(1);
        dims.push(i32::try_from(value).map_err(|_| Error::UnresolvedDimensionError)?);
        signature.push(if dim.is_dynamic() { -1 } else { value as i32 });
    }
    let signature = if shape.has_dynamic_dims() {
        Some(signature)
    } else {
        None
    };
    Ok((dims, signature))
}

struct TensorEntry {
    name: String,
    dtype: TensorType,
    shape: Vec<i32>,
    shape_signature: Option<Vec<i32>>,
    buffer: u32,
}

enum OptionsEntry {
    None,
    Conv2D {
        padding: schema::Padding,
        stride: (i32, i32),
        dilation: (i32, i32),
        activation: ActivationFunctionType,
    },
    DepthwiseConv2D {
        padding: schema::Padding,
        stride: (i32, i32),
        dilation: (i32, i32),
        depth_multiplier: i32,
        activation: ActivationFunctionType,
    },
    Pool2D {
        padding: schema::Padding,
        stride: (i32, i32),
        filter: (i32, i32),
    },
    FullyConnected(ActivationFunctionType),
    Softmax(f32),
    Concatenation(i32),
    Add(ActivationFunctionType),
    Mul(ActivationFunctionType),
    Reshape(Vec<i32>),
    Reducer(bool),
}

struct OperatorEntry {
    opcode_index: u32,
    inputs: Vec<i32>,
    outputs: Vec<i32>,
    options: OptionsEntry,
}

/// Plain-data image of the flatbuffer, filled in graph order and serialized in one pass.
struct ModelContents {
    opcodes: Vec<(BuiltinOperator, i32)>,
    tensors: Vec<TensorEntry>,
    buffers: Vec<Vec<u8>>,
    operators: Vec<OperatorEntry>,
    taken_names: HashSet<String>,
}

impl ModelContents {
    fn new(taken_names: HashSet<String>) -> Self {
        Self {
            opcodes: vec![],
            tensors: vec![],
            // Buffer 0 is the empty sentinel shared by all non-constant tensors
            buffers: vec![vec![]],
            operators: vec![],
            taken_names,
        }
    }

    fn opcode_index(&mut self, code: BuiltinOperator, version: i32) -> u32 {
        if let Some(index) = self.opcodes.iter().position(|x| *x == (code, version)) {
            return index as u32;
        }
        self.opcodes.push((code, version));
        (self.opcodes.len() - 1) as u32
    }

    fn add_buffer(&mut self, data: Vec<u8>) -> u32 {
        self.buffers.push(data);
        (self.buffers.len() - 1) as u32
    }

    fn add_tensor(
        &mut self,
        name: String,
        dtype: DType,
        shape: &Shape,
        buffer: u32,
    ) -> Result<i32, Error> {
        let (shape, shape_signature) = shape_and_signature(shape)?;
        self.tensors.push(TensorEntry {
            name,
            dtype: tensor_type(dtype),
            shape,
            shape_signature,
            buffer,
        });
        Ok((self.tensors.len() - 1) as i32)
    }

    fn add_constant(&mut self, base_name: &str, data: &TensorData) -> Result<i32, Error> {
        let name = claim_name(&mut self.taken_names, base_name);
        let buffer = self.add_buffer(data.to_raw_encoding());
        self.add_tensor(name, data.dtype(), data.shape(), buffer)
    }

    fn add_operator(
        &mut self,
        code: BuiltinOperator,
        version: i32,
        inputs: Vec<i32>,
        outputs: Vec<i32>,
        options: OptionsEntry,
    ) {
        let opcode_index = self.opcode_index(code, version);
        self.operators.push(OperatorEntry {
            opcode_index,
            inputs,
            outputs,
            options,
        });
    }

    fn uses(&self, code: BuiltinOperator) -> bool {
        self.opcodes.iter().any(|(x, _)| *x == code)
    }
}

/// Oldest runtime release that implements every operator version in the model.
fn min_runtime_version(contents: &ModelContents) -> &'static str {
    if contents.uses(BuiltinOperator::HARD_SWISH) {
        "1.15.0"
    } else if contents.uses(BuiltinOperator::ELU) {
        "1.14.0"
    } else if contents.uses(BuiltinOperator::DEQUANTIZE) {
        "1.13.1"
    } else {
        "1.5.0"
    }
}

fn optional_input<'a>(
    indices: &HashMap<&'a dyn Tensor, i32>,
    inputs: &[&'a dyn Tensor],
    position: usize,
) -> i32 {
    inputs
        .get(position)
        .and_then(|x| indices.get(x).copied())
        .unwrap_or(-1)
}

/// Serializes `graph` as a TensorFlow Lite flatbuffer.
///
/// Operators appear in graph execution order. With [`WeightPrecision::F16`] every float32
/// constant is stored as float16 and widened by a `DEQUANTIZE` operator at the start of
/// the subgraph. The same graph and options always produce the same bytes.
pub fn build_tflite(graph: &Graph, options: &ExportOptions) -> Result<Vec<u8>, Error> {
    let walk = graph.walk()?;
    let mut contents = ModelContents::new(walk.names.values().cloned().collect());
    let mut indices: HashMap<&dyn Tensor, i32> = HashMap::new();

    for &tensor in &walk.tensors {
        let name = walk.names[&tensor].clone();
        if tensor.is_constant() {
            let data = tensor
                .resolve_data()?
                .ok_or(Error::CannotResolveDataError(name.clone()))?;
            if data.dtype() == DType::F32 && options.weight_precision == WeightPrecision::F16 {
                let half = data.cast_f16()?;
                let half_index = contents.add_constant(&format!("{}_fp16", name), &half)?;
                let index = contents.add_tensor(name, DType::F32, data.shape(), 0)?;
                contents.add_operator(
                    BuiltinOperator::DEQUANTIZE,
                    3,
                    vec![half_index],
                    vec![index],
                    OptionsEntry::None,
                );
                indices.insert(tensor, index);
            } else {
                let buffer = contents.add_buffer(data.to_raw_encoding());
                let index = contents.add_tensor(name, data.dtype(), data.shape(), buffer)?;
                indices.insert(tensor, index);
            }
        } else {
            let index = contents.add_tensor(name, tensor.dtype(), tensor.shape(), 0)?;
            indices.insert(tensor, index);
        }
    }

    for &node in &walk.nodes {
        let inputs = node.get_input_tensors();
        let outputs: Vec<i32> = node
            .get_output_tensors()
            .iter()
            .map(|x| indices[x])
            .collect();
        let output_name = node
            .get_output_tensors()
            .first()
            .map(|x| walk.names[x].clone())
            .unwrap_or_default();
        let first = optional_input(&indices, &inputs, 0);
        match node.get_op_type() {
            OpType::FullyConnected { activation } => contents.add_operator(
                BuiltinOperator::FULLY_CONNECTED,
                1,
                vec![
                    first,
                    optional_input(&indices, &inputs, 1),
                    optional_input(&indices, &inputs, 2),
                ],
                outputs,
                OptionsEntry::FullyConnected(activation_type(activation)),
            ),
            OpType::Conv2D { window, activation } => {
                let version = if window.dilation != (1, 1) { 2 } else { 1 };
                contents.add_operator(
                    BuiltinOperator::CONV_2D,
                    version,
                    vec![
                        first,
                        optional_input(&indices, &inputs, 1),
                        optional_input(&indices, &inputs, 2),
                    ],
                    outputs,
                    OptionsEntry::Conv2D {
                        padding: padding_type(window.padding),
                        stride: (window.stride.1 as i32, window.stride.0 as i32),
                        dilation: (window.dilation.1 as i32, window.dilation.0 as i32),
                        activation: activation_type(activation),
                    },
                )
            }
            OpType::DepthwiseConv2D {
                window,
                depth_multiplier,
                activation,
            } => {
                let version = if window.dilation != (1, 1) { 2 } else { 1 };
                contents.add_operator(
                    BuiltinOperator::DEPTHWISE_CONV_2D,
                    version,
                    vec![
                        first,
                        optional_input(&indices, &inputs, 1),
                        optional_input(&indices, &inputs, 2),
                    ],
                    outputs,
                    OptionsEntry::DepthwiseConv2D {
                        padding: padding_type(window.padding),
                        stride: (window.stride.1 as i32, window.stride.0 as i32),
                        dilation: (window.dilation.1 as i32, window.dilation.0 as i32),
                        depth_multiplier: depth_multiplier as i32,
                        activation: activation_type(activation),
                    },
                )
            }
            OpType::Pool2D { kind, window } => contents.add_operator(
                match kind {
                    PoolKind::Max => BuiltinOperator::MAX_POOL_2D,
                    PoolKind::Average => BuiltinOperator::AVERAGE_POOL_2D,
                },
                1,
                vec![first],
                outputs,
                OptionsEntry::Pool2D {
                    padding: padding_type(window.padding),
                    stride: (window.stride.1 as i32, window.stride.0 as i32),
                    filter: (window.kernel.1 as i32, window.kernel.0 as i32),
                },
            ),
            OpType::Mean { axes, keep_dims } => {
                let axes: Vec<i32> = axes.iter().map(|x| *x as i32).collect();
                let len = axes.len();
                let axes_index = contents.add_constant(
                    &format!("{}/axes", output_name),
                    &TensorData::from_i32(axes, &[len])?,
                )?;
                contents.add_operator(
                    BuiltinOperator::MEAN,
                    1,
                    vec![first, axes_index],
                    outputs,
                    OptionsEntry::Reducer(keep_dims),
                )
            }
            OpType::Reshape { new_shape } => {
                let new_shape: Vec<i32> = new_shape.iter().map(|x| *x as i32).collect();
                let len = new_shape.len();
                let shape_index = contents.add_constant(
                    &format!("{}/shape", output_name),
                    &TensorData::from_i32(new_shape.clone(), &[len])?,
                )?;
                contents.add_operator(
                    BuiltinOperator::RESHAPE,
                    1,
                    vec![first, shape_index],
                    outputs,
                    OptionsEntry::Reshape(new_shape),
                )
            }
            OpType::Binary { kind, activation } => {
                let activation = activation_type(activation);
                let (code, options) = match kind {
                    BinaryKind::Add => (BuiltinOperator::ADD, OptionsEntry::Add(activation)),
                    BinaryKind::Mul => (BuiltinOperator::MUL, OptionsEntry::Mul(activation)),
                };
                contents.add_operator(
                    code,
                    1,
                    vec![first, optional_input(&indices, &inputs, 1)],
                    outputs,
                    options,
                )
            }
            OpType::Concatenation { axis } => {
                let inputs = inputs.iter().map(|x| indices[x]).collect();
                contents.add_operator(
                    BuiltinOperator::CONCATENATION,
                    1,
                    inputs,
                    outputs,
                    OptionsEntry::Concatenation(axis as i32),
                )
            }
            OpType::Unary(kind) => {
                let code = match kind {
                    UnaryKind::Relu => BuiltinOperator::RELU,
                    UnaryKind::Relu6 => BuiltinOperator::RELU6,
                    UnaryKind::Logistic => BuiltinOperator::LOGISTIC,
                    UnaryKind::Tanh => BuiltinOperator::TANH,
                    UnaryKind::Elu => BuiltinOperator::ELU,
                    UnaryKind::HardSwish => BuiltinOperator::HARD_SWISH,
                };
                contents.add_operator(code, 1, vec![first], outputs, OptionsEntry::None)
            }
            OpType::Softmax { beta } => contents.add_operator(
                BuiltinOperator::SOFTMAX,
                1,
                vec![first],
                outputs,
                OptionsEntry::Softmax(beta),
            ),
            OpType::Dequantize => contents.add_operator(
                BuiltinOperator::DEQUANTIZE,
                3,
                vec![first],
                outputs,
                OptionsEntry::None,
            ),
        }
    }

    let inputs: Vec<(String, i32)> = graph
        .inputs
        .iter()
        .map(|x| {
            let tensor: &dyn Tensor = x.as_ref();
            (walk.names[&tensor].clone(), indices[&tensor])
        })
        .collect();
    let outputs: Vec<(String, i32)> = graph
        .outputs
        .iter()
        .map(|(name, x)| {
            let tensor: &dyn Tensor = x.as_ref();
            (name.clone(), indices[&tensor])
        })
        .collect();

    log::debug!(
        "Serializing {} tensors, {} operators, {} buffers",
        contents.tensors.len(),
        contents.operators.len(),
        contents.buffers.len()
    );
    Ok(serialize(&graph.name, &options.description, &contents, &inputs, &outputs))
}

fn serialize_options<'a>(
    fbb: &mut FlatBufferBuilder<'a>,
    options: &OptionsEntry,
) -> (BuiltinOptions, Option<WIPOffset<UnionWIPOffset>>) {
    match options {
        OptionsEntry::None => (BuiltinOptions::NONE, None),
        OptionsEntry::Conv2D {
            padding,
            stride,
            dilation,
            activation,
        } => (
            BuiltinOptions::Conv2DOptions,
            Some(
                Conv2DOptions::create(
                    fbb,
                    *padding,
                    stride.0,
                    stride.1,
                    *activation,
                    dilation.0,
                    dilation.1,
                )
                .as_union_value(),
            ),
        ),
        OptionsEntry::DepthwiseConv2D {
            padding,
            stride,
            dilation,
            depth_multiplier,
            activation,
        } => (
            BuiltinOptions::DepthwiseConv2DOptions,
            Some(
                DepthwiseConv2DOptions::create(
                    fbb,
                    *padding,
                    stride.0,
                    stride.1,
                    *depth_multiplier,
                    *activation,
                    dilation.0,
                    dilation.1,
                )
                .as_union_value(),
            ),
        ),
        OptionsEntry::Pool2D {
            padding,
            stride,
            filter,
        } => (
            BuiltinOptions::Pool2DOptions,
            Some(
                Pool2DOptions::create(fbb, *padding, stride.0, stride.1, filter.0, filter.1)
                    .as_union_value(),
            ),
        ),
        OptionsEntry::FullyConnected(activation) => (
            BuiltinOptions::FullyConnectedOptions,
            Some(FullyConnectedOptions::create(fbb, *activation).as_union_value()),
        ),
        OptionsEntry::Softmax(beta) => (
            BuiltinOptions::SoftmaxOptions,
            Some(SoftmaxOptions::create(fbb, *beta).as_union_value()),
        ),
        OptionsEntry::Concatenation(axis) => (
            BuiltinOptions::ConcatenationOptions,
            Some(ConcatenationOptions::create(fbb, *axis).as_union_value()),
        ),
        OptionsEntry::Add(activation) => (
            BuiltinOptions::AddOptions,
            Some(ActivationOptions::create(fbb, *activation).as_union_value()),
        ),
        OptionsEntry::Mul(activation) => (
            BuiltinOptions::MulOptions,
            Some(ActivationOptions::create(fbb, *activation).as_union_value()),
        ),
        OptionsEntry::Reshape(new_shape) => {
            let new_shape = fbb.create_vector(new_shape);
            (
                BuiltinOptions::ReshapeOptions,
                Some(ReshapeOptions::create(fbb, new_shape).as_union_value()),
            )
        }
        OptionsEntry::Reducer(keep_dims) => (
            BuiltinOptions::ReducerOptions,
            Some(ReducerOptions::create(fbb, *keep_dims).as_union_value()),
        ),
    }
}

fn serialize(
    graph_name: &str,
    description: &str,
    contents: &ModelContents,
    inputs: &[(String, i32)],
    outputs: &[(String, i32)],
) -> Vec<u8> {
    let payload: usize = contents.buffers.iter().map(|x| x.len()).sum();
    let mut fbb = FlatBufferBuilder::with_capacity(payload + 4096);

    let mut opcodes = vec![];
    for (code, version) in &contents.opcodes {
        opcodes.push(OperatorCode::create(&mut fbb, *code, *version));
    }
    let opcodes = fbb.create_vector(&opcodes);

    let mut tensors = vec![];
    for entry in &contents.tensors {
        let name = fbb.create_string(&entry.name);
        let shape = fbb.create_vector(&entry.shape);
        let shape_signature = entry
            .shape_signature
            .as_ref()
            .map(|x| fbb.create_vector(x));
        tensors.push(schema::Tensor::create(
            &mut fbb,
            &TensorArgs {
                shape: Some(shape),
                type_: entry.dtype,
                buffer: entry.buffer,
                name: Some(name),
                shape_signature,
            },
        ));
    }
    let tensors = fbb.create_vector(&tensors);

    let mut operators = vec![];
    for entry in &contents.operators {
        let op_inputs = fbb.create_vector(&entry.inputs);
        let op_outputs = fbb.create_vector(&entry.outputs);
        let (builtin_options_type, builtin_options) = serialize_options(&mut fbb, &entry.options);
        operators.push(Operator::create(
            &mut fbb,
            &OperatorArgs {
                opcode_index: entry.opcode_index,
                inputs: Some(op_inputs),
                outputs: Some(op_outputs),
                builtin_options_type,
                builtin_options,
            },
        ));
    }
    let operators = fbb.create_vector(&operators);

    let input_indices: Vec<i32> = inputs.iter().map(|x| x.1).collect();
    let output_indices: Vec<i32> = outputs.iter().map(|x| x.1).collect();
    let subgraph_inputs = fbb.create_vector(&input_indices);
    let subgraph_outputs = fbb.create_vector(&output_indices);
    let subgraph_name = fbb.create_string(graph_name);
    let subgraph = SubGraph::create(
        &mut fbb,
        &SubGraphArgs {
            tensors: Some(tensors),
            inputs: Some(subgraph_inputs),
            outputs: Some(subgraph_outputs),
            operators: Some(operators),
            name: Some(subgraph_name),
        },
    );
    let subgraphs = fbb.create_vector(&[subgraph]);

    // The runtime version string lives in its own buffer, padded to 16 bytes
    let mut version_bytes = min_runtime_version(contents).as_bytes().to_vec();
    version_bytes.resize(16, 0);
    let version_buffer = contents.buffers.len() as u32;

    let mut buffers = vec![];
    for data in contents.buffers.iter().chain(std::iter::once(&version_bytes)) {
        let data = if data.is_empty() {
            None
        } else {
            Some(fbb.create_vector(data))
        };
        buffers.push(Buffer::create(&mut fbb, data));
    }
    let buffers = fbb.create_vector(&buffers);

    let metadata_name = fbb.create_string(MIN_RUNTIME_VERSION_KEY);
    let metadata = Metadata::create(&mut fbb, metadata_name, version_buffer);
    let metadata = fbb.create_vector(&[metadata]);

    let mut signature_inputs = vec![];
    for (name, index) in inputs {
        let name = fbb.create_string(name);
        signature_inputs.push(TensorMap::create(&mut fbb, name, *index as u32));
    }
    let signature_inputs = fbb.create_vector(&signature_inputs);
    let mut signature_outputs = vec![];
    for (name, index) in outputs {
        let name = fbb.create_string(name);
        signature_outputs.push(TensorMap::create(&mut fbb, name, *index as u32));
    }
    let signature_outputs = fbb.create_vector(&signature_outputs);
    let signature_key = fbb.create_string(SIGNATURE_KEY);
    let signature =
        SignatureDef::create(&mut fbb, signature_inputs, signature_outputs, signature_key, 0);
    let signature_defs = fbb.create_vector(&[signature]);

    let description = fbb.create_string(description);
    let model = Model::create(
        &mut fbb,
        &ModelArgs {
            version: schema::SCHEMA_VERSION,
            operator_codes: Some(opcodes),
            subgraphs: Some(subgraphs),
            description: Some(description),
            buffers: Some(buffers),
            metadata: Some(metadata),
            signature_defs: Some(signature_defs),
        },
    );
    fbb.finish(model, Some(schema::FILE_IDENTIFIER));
    fbb.finished_data().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{FullyConnected, Reshape, Softmax};
    use crate::tensor::{ConstantTensor, Dimension, InputTensor};
    use std::sync::Arc;

    fn dense_graph() -> Graph {
        let x = InputTensor::new(
            "input".to_string(),
            DType::F32,
            Shape::new(vec![
                Dimension::dynamic(1, "batch"),
                Arc::new(Dimension::from(2)),
                Arc::new(Dimension::from(3)),
            ]),
        );
        let flat = Reshape::new(Some("flatten".to_string()), x.clone(), vec![-1, 6]).unwrap();
        let weights = ConstantTensor::new(
            Some("dense/kernel".to_string()),
            TensorData::from_f32((0..24).map(|x| x as f32 * 0.1).collect(), &[4, 6]).unwrap(),
        );
        let bias = ConstantTensor::new(
            Some("dense/bias".to_string()),
            TensorData::from_f32(vec![0.5; 4], &[4]).unwrap(),
        );
        let fc = FullyConnected::new(
            Some("dense".to_string()),
            flat,
            weights,
            Some(bias),
            FusedActivation::Relu,
        )
        .unwrap();
        let out = Softmax::new(Some("softmax".to_string()), fc).unwrap();
        Graph::new(
            "main".to_string(),
            vec![x],
            vec![("output_0".to_string(), out as Arc<dyn Tensor>)],
        )
    }

    fn opcode_names(model: &Model) -> Vec<&'static str> {
        let codes = model.operator_codes().unwrap();
        let subgraph = model.subgraphs().unwrap().get(0);
        subgraph
            .operators()
            .unwrap()
            .iter()
            .map(|op| {
                codes
                    .get(op.opcode_index() as usize)
                    .builtin_code()
                    .variant_name()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn writes_verifiable_model() {
        let bytes = build_tflite(&dense_graph(), &ExportOptions::default()).unwrap();
        assert!(schema::model_buffer_has_identifier(&bytes));
        let model = schema::root_as_model(&bytes).unwrap();
        assert_eq!(model.version(), 3);
        assert_eq!(opcode_names(&model), vec!["RESHAPE", "FULLY_CONNECTED", "SOFTMAX"]);

        let subgraph = model.subgraphs().unwrap().get(0);
        let tensors = subgraph.tensors().unwrap();
        let input = tensors.get(subgraph.inputs().unwrap().get(0) as usize);
        assert_eq!(input.name(), Some("input"));
        assert_eq!(input.shape().unwrap().iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(
            input.shape_signature().unwrap().iter().collect::<Vec<_>>(),
            vec![-1, 2, 3]
        );
        assert_eq!(input.buffer(), 0);
        let output = tensors.get(subgraph.outputs().unwrap().get(0) as usize);
        assert_eq!(output.name(), Some("output_0"));

        let buffers = model.buffers().unwrap();
        assert!(buffers.get(0).data().is_none());

        let fc = subgraph.operators().unwrap().get(1);
        let options = fc.builtin_options_as_fully_connected_options().unwrap();
        assert_eq!(options.fused_activation_function(), ActivationFunctionType::RELU);
        let weights = tensors.get(fc.inputs().unwrap().get(1) as usize);
        assert_eq!(weights.type_(), TensorType::FLOAT32);
        assert_eq!(buffers.get(weights.buffer() as usize).data().unwrap().len(), 24 * 4);

        let signature = model.signature_defs().unwrap().get(0);
        assert_eq!(signature.signature_key(), Some(SIGNATURE_KEY));
        assert_eq!(signature.outputs().unwrap().get(0).name(), Some("output_0"));

        let metadata = model.metadata().unwrap().get(0);
        assert_eq!(metadata.name(), Some(MIN_RUNTIME_VERSION_KEY));
        let version = buffers.get(metadata.buffer() as usize).data().unwrap();
        assert!(version.bytes().starts_with(b"1.5.0"));
    }

    #[test]
    fn reshape_carries_shape_tensor_and_options() {
        let bytes = build_tflite(&dense_graph(), &ExportOptions::default()).unwrap();
        let model = schema::root_as_model(&bytes).unwrap();
        let subgraph = model.subgraphs().unwrap().get(0);
        let reshape = subgraph.operators().unwrap().get(0);
        let options = reshape.builtin_options_as_reshape_options().unwrap();
        assert_eq!(options.new_shape().unwrap().iter().collect::<Vec<_>>(), vec![-1, 6]);
        let shape_tensor = subgraph
            .tensors()
            .unwrap()
            .get(reshape.inputs().unwrap().get(1) as usize);
        assert_eq!(shape_tensor.type_(), TensorType::INT32);
        assert_eq!(shape_tensor.name(), Some("flatten/shape"));
    }

    #[test]
    fn half_precision_adds_leading_dequantize() {
        let options = ExportOptions {
            weight_precision: WeightPrecision::F16,
            ..Default::default()
        };
        let bytes = build_tflite(&dense_graph(), &options).unwrap();
        let model = schema::root_as_model(&bytes).unwrap();
        assert_eq!(
            opcode_names(&model),
            vec!["DEQUANTIZE", "DEQUANTIZE", "RESHAPE", "FULLY_CONNECTED", "SOFTMAX"]
        );
        let subgraph = model.subgraphs().unwrap().get(0);
        let tensors = subgraph.tensors().unwrap();
        let dequantize = subgraph.operators().unwrap().get(0);
        let source = tensors.get(dequantize.inputs().unwrap().get(0) as usize);
        assert_eq!(source.type_(), TensorType::FLOAT16);
        assert_eq!(source.name(), Some("dense/kernel_fp16"));
        let data = model.buffers().unwrap().get(source.buffer() as usize).data().unwrap();
        assert_eq!(data.len(), 24 * 2);
        let widened = tensors.get(dequantize.outputs().unwrap().get(0) as usize);
        assert_eq!(widened.type_(), TensorType::FLOAT32);
        assert_eq!(widened.buffer(), 0);
        assert_eq!(model.operator_codes().unwrap().get(0).version(), 3);
    }

    #[test]
    fn output_is_deterministic() {
        let a = build_tflite(&dense_graph(), &ExportOptions::default()).unwrap();
        let b = build_tflite(&dense_graph(), &ExportOptions::default()).unwrap();
        assert_eq!(a, b);
    }
}
