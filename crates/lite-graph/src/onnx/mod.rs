pub mod proto;

use crate::node::{
    BinaryKind, FusedActivation, OpType, Padding, PoolKind, UnaryKind, Window2D,
};
use crate::tensor::{DType, Shape, Tensor, TensorData};
use crate::{Error, ExportOptions, Graph, WeightPrecision, claim_name};
use prost::Message;
use proto::attribute_proto::AttributeType;
use proto::tensor_proto::DataType;
use proto::tensor_shape_proto::{Dimension, dimension};
use proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto, type_proto,
};
use std::collections::HashSet;

pub const IR_VERSION: i64 = 8;
pub const OPSET_VERSION: i64 = 14;

const NHWC_TO_NCHW: [i64; 4] = [0, 3, 1, 2];
const NCHW_TO_NHWC: [i64; 4] = [0, 2, 3, 1];

impl From<DType> for DataType {
    fn from(dtype: DType) -> Self {
        match dtype {
            DType::F32 => DataType::Float,
            DType::F16 => DataType::Float16,
            DType::I32 => DataType::Int32,
            DType::I64 => DataType::Int64,
        }
    }
}

fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: value,
        r#type: AttributeType::Int as i32,
        ..Default::default()
    }
}

fn attr_ints(name: &str, values: Vec<i64>) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        ints: values,
        r#type: AttributeType::Ints as i32,
        ..Default::default()
    }
}

fn attr_float(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        f: value,
        r#type: AttributeType::Float as i32,
        ..Default::default()
    }
}

fn tensor_proto(name: String, data: &TensorData) -> TensorProto {
    TensorProto {
        dims: data.dims().iter().map(|x| *x as i64).collect(),
        data_type: DataType::from(data.dtype()) as i32,
        name,
        raw_data: data.to_raw_encoding(),
        ..Default::default()
    }
}

fn value_info(name: String, dtype: DType, shape: &Shape) -> ValueInfoProto {
    let dim = shape
        .dims
        .iter()
        .map(|dim| Dimension {
            value: Some(match (&dim.name, dim.value) {
                (Some(name), _) => dimension::Value::DimParam(name.clone()),
                (None, Some(value)) => dimension::Value::DimValue(value as i64),
                (None, None) => dimension::Value::DimParam("?".to_string()),
            }),
            ..Default::default()
        })
        .collect();
    ValueInfoProto {
        name,
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::from(dtype) as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            denotation: "TENSOR".to_string(),
        }),
        ..Default::default()
    }
}

/// ONNX `pads` (`[top, left, bottom, right]`) reproducing TensorFlow's padding for an NHWC input.
fn explicit_pads(window: &Window2D, input: &Shape) -> Result<Vec<i64>, Error> {
    if window.padding == Padding::Valid {
        return Ok(vec![0; 4]);
    }
    let mut before = vec![];
    let mut after = vec![];
    for (axis, kernel, stride, dilation) in [
        (1, window.kernel.0, window.stride.0, window.dilation.0),
        (2, window.kernel.1, window.stride.1, window.dilation.1),
    ] {
        let size = input[axis].resolve()?;
        let (out, pad_before) = window.padding.output_size(size, kernel, stride, dilation);
        let total = ((out - 1) * stride + (kernel - 1) * dilation + 1).saturating_sub(size);
        before.push(pad_before as i64);
        after.push((total - pad_before) as i64);
    }
    before.extend(after);
    Ok(before)
}

fn window_attributes(window: &Window2D, input: &Shape) -> Result<Vec<AttributeProto>, Error> {
    Ok(vec![
        attr_ints(
            "kernel_shape",
            vec![window.kernel.0 as i64, window.kernel.1 as i64],
        ),
        attr_ints(
            "strides",
            vec![window.stride.0 as i64, window.stride.1 as i64],
        ),
        attr_ints("pads", explicit_pads(window, input)?),
    ])
}

struct OnnxWriter {
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    taken: HashSet<String>,
    clip_bounds: Option<(String, String)>,
}

impl OnnxWriter {
    fn fresh(&mut self, base: &str) -> String {
        claim_name(&mut self.taken, base)
    }

    fn add_node(
        &mut self,
        op_type: &str,
        inputs: Vec<String>,
        output: &str,
        attribute: Vec<AttributeProto>,
    ) {
        let name = self.fresh(&format!("{}/{}", output, op_type));
        self.nodes.push(NodeProto {
            input: inputs,
            output: vec![output.to_string()],
            name,
            op_type: op_type.to_string(),
            attribute,
            ..Default::default()
        });
    }

    fn add_initializer(&mut self, base: &str, data: &TensorData) -> String {
        let name = self.fresh(base);
        self.initializers.push(tensor_proto(name.clone(), data));
        name
    }

    fn transpose(&mut self, input: &str, perm: &[i64], base: &str) -> String {
        let output = self.fresh(base);
        self.add_node(
            "Transpose",
            vec![input.to_string()],
            &output,
            vec![attr_ints("perm", perm.to_vec())],
        );
        output
    }

    fn relu6(&mut self, input: &str, output: &str) -> Result<(), Error> {
        let (min, max) = match &self.clip_bounds {
            Some(bounds) => bounds.clone(),
            None => {
                let min = self.add_initializer("relu6/min", &TensorData::from_f32(vec![0.0], &[])?);
                let max = self.add_initializer("relu6/max", &TensorData::from_f32(vec![6.0], &[])?);
                self.clip_bounds = Some((min.clone(), max.clone()));
                (min, max)
            }
        };
        self.add_node("Clip", vec![input.to_string(), min, max], output, vec![]);
        Ok(())
    }

    /// Name the main operator should write to, so a separate activation node can produce `output`.
    fn pre_activation(&mut self, activation: FusedActivation, output: &str) -> String {
        match activation {
            FusedActivation::None => output.to_string(),
            _ => self.fresh(&format!("{}/linear", output)),
        }
    }

    fn activation(
        &mut self,
        activation: FusedActivation,
        input: &str,
        output: &str,
    ) -> Result<(), Error> {
        match activation {
            FusedActivation::None => {}
            FusedActivation::Relu => self.add_node("Relu", vec![input.to_string()], output, vec![]),
            FusedActivation::Relu6 => self.relu6(input, output)?,
            FusedActivation::Tanh => self.add_node("Tanh", vec![input.to_string()], output, vec![]),
        }
        Ok(())
    }

    /// Runs an NCHW operator on an NHWC tensor by transposing around it.
    fn channels_first(
        &mut self,
        op_type: &str,
        input: &str,
        extra_inputs: Vec<String>,
        attribute: Vec<AttributeProto>,
        output: &str,
    ) {
        let nchw_input = self.transpose(input, &NHWC_TO_NCHW, &format!("{}/nchw_in", output));
        let nchw_output = self.fresh(&format!("{}/nchw_out", output));
        let mut inputs = vec![nchw_input];
        inputs.extend(extra_inputs);
        self.add_node(op_type, inputs, &nchw_output, attribute);
        self.add_node(
            "Transpose",
            vec![nchw_output],
            output,
            vec![attr_ints("perm", NCHW_TO_NHWC.to_vec())],
        );
    }
}

/// Lowers `graph` to an ONNX model. Convolutions and pooling run channels-first behind
/// Transpose nodes; fused activations become separate nodes.
pub fn build_onnx(graph: &Graph, options: &ExportOptions) -> Result<ModelProto, Error> {
    let walk = graph.walk()?;
    let mut writer = OnnxWriter {
        nodes: vec![],
        initializers: vec![],
        taken: walk.names.values().cloned().collect(),
        clip_bounds: None,
    };

    let mut value_infos = vec![];
    for &tensor in &walk.tensors {
        let name = walk.names[&tensor].clone();
        if tensor.is_constant() {
            let data = tensor
                .resolve_data()?
                .ok_or(Error::CannotResolveDataError(name.clone()))?;
            if data.dtype() == DType::F32 && options.weight_precision == WeightPrecision::F16 {
                let half = writer.add_initializer(&format!("{}_fp16", name), &data.cast_f16()?);
                writer.add_node(
                    "Cast",
                    vec![half],
                    &name,
                    vec![attr_int("to", DataType::Float as i64)],
                );
            } else {
                writer.initializers.push(tensor_proto(name, &data));
            }
        } else if !tensor.is_input() && tensor.as_node().is_some() {
            value_infos.push(value_info(name, tensor.dtype(), tensor.shape()));
        }
    }

    for &node in &walk.nodes {
        let inputs = node.get_input_tensors();
        let input_names: Vec<String> = inputs.iter().map(|x| walk.names[x].clone()).collect();
        let output = node
            .get_output_tensors()
            .first()
            .map(|x| walk.names[x].clone())
            .ok_or(Error::InvalidInputError("operator without output".to_string()))?;
        let first = input_names
            .first()
            .cloned()
            .ok_or(Error::InvalidInputError(format!("{} has no inputs", output)))?;

        match node.get_op_type() {
            OpType::FullyConnected { activation } => {
                let target = writer.pre_activation(activation, &output);
                writer.add_node(
                    "Gemm",
                    input_names.clone(),
                    &target,
                    vec![attr_int("transB", 1)],
                );
                writer.activation(activation, &target, &output)?;
            }
            OpType::Conv2D { window, activation } => {
                let filter = writer.transpose(
                    &input_names[1],
                    &NHWC_TO_NCHW,
                    &format!("{}/oihw", input_names[1]),
                );
                let mut extra = vec![filter];
                extra.extend(input_names.get(2).cloned());
                let mut attribute = window_attributes(&window, inputs[0].shape())?;
                attribute.push(attr_ints(
                    "dilations",
                    vec![window.dilation.0 as i64, window.dilation.1 as i64],
                ));
                attribute.push(attr_int("group", 1));
                let target = writer.pre_activation(activation, &output);
                writer.channels_first("Conv", &first, extra, attribute, &target);
                writer.activation(activation, &target, &output)?;
            }
            OpType::DepthwiseConv2D {
                window, activation, ..
            } => {
                // [1, kh, kw, C*M] -> [C*M, 1, kh, kw]
                let filter = writer.transpose(
                    &input_names[1],
                    &[3, 0, 1, 2],
                    &format!("{}/oihw", input_names[1]),
                );
                let mut extra = vec![filter];
                extra.extend(input_names.get(2).cloned());
                let channels = inputs[0].shape()[3].resolve()?;
                let mut attribute = window_attributes(&window, inputs[0].shape())?;
                attribute.push(attr_ints(
                    "dilations",
                    vec![window.dilation.0 as i64, window.dilation.1 as i64],
                ));
                attribute.push(attr_int("group", channels as i64));
                let target = writer.pre_activation(activation, &output);
                writer.channels_first("Conv", &first, extra, attribute, &target);
                writer.activation(activation, &target, &output)?;
            }
            OpType::Pool2D { kind, window } => {
                let mut attribute = window_attributes(&window, inputs[0].shape())?;
                let op_type = match kind {
                    PoolKind::Max => "MaxPool",
                    PoolKind::Average => {
                        attribute.push(attr_int("count_include_pad", 0));
                        "AveragePool"
                    }
                };
                writer.channels_first(op_type, &first, vec![], attribute, &output);
            }
            OpType::Mean { axes, keep_dims } => writer.add_node(
                "ReduceMean",
                vec![first],
                &output,
                vec![attr_ints("axes", axes), attr_int("keepdims", keep_dims as i64)],
            ),
            OpType::Reshape { new_shape } => {
                let len = new_shape.len();
                let shape = writer.add_initializer(
                    &format!("{}/shape", output),
                    &TensorData::new(new_shape.into(), Shape::from(vec![len]))?,
                );
                writer.add_node("Reshape", vec![first, shape], &output, vec![]);
            }
            OpType::Binary { kind, activation } => {
                let op_type = match kind {
                    BinaryKind::Add => "Add",
                    BinaryKind::Mul => "Mul",
                };
                let target = writer.pre_activation(activation, &output);
                writer.add_node(op_type, input_names.clone(), &target, vec![]);
                writer.activation(activation, &target, &output)?;
            }
            OpType::Concatenation { axis } => writer.add_node(
                "Concat",
                input_names.clone(),
                &output,
                vec![attr_int("axis", axis)],
            ),
            OpType::Unary(kind) => match kind {
                UnaryKind::Relu => writer.add_node("Relu", vec![first], &output, vec![]),
                UnaryKind::Relu6 => writer.relu6(&first, &output)?,
                UnaryKind::Logistic => writer.add_node("Sigmoid", vec![first], &output, vec![]),
                UnaryKind::Tanh => writer.add_node("Tanh", vec![first], &output, vec![]),
                UnaryKind::Elu => {
                    writer.add_node("Elu", vec![first], &output, vec![attr_float("alpha", 1.0)])
                }
                UnaryKind::HardSwish => {
                    writer.add_node("HardSwish", vec![first], &output, vec![])
                }
            },
            OpType::Softmax { beta } => {
                let logits = if beta == 1.0 {
                    first
                } else {
                    let scale = writer.add_initializer(
                        &format!("{}/beta", output),
                        &TensorData::from_f32(vec![beta], &[])?,
                    );
                    let scaled = writer.fresh(&format!("{}/scaled", output));
                    writer.add_node("Mul", vec![first, scale], &scaled, vec![]);
                    scaled
                };
                writer.add_node("Softmax", vec![logits], &output, vec![attr_int("axis", -1)])
            }
            OpType::Dequantize => writer.add_node(
                "Cast",
                vec![first],
                &output,
                vec![attr_int("to", DataType::Float as i64)],
            ),
        }
    }

    let input = graph
        .inputs
        .iter()
        .map(|x| {
            let tensor: &dyn Tensor = x.as_ref();
            value_info(walk.names[&tensor].clone(), tensor.dtype(), tensor.shape())
        })
        .collect();
    let output: Vec<ValueInfoProto> = graph
        .outputs
        .iter()
        .map(|(_, x)| {
            let tensor: &dyn Tensor = x.as_ref();
            value_info(walk.names[&tensor].clone(), tensor.dtype(), tensor.shape())
        })
        .collect();
    let output_names: HashSet<&str> = output.iter().map(|x| x.name.as_str()).collect();
    let value_info = value_infos
        .into_iter()
        .filter(|x| !output_names.contains(x.name.as_str()))
        .collect();

    log::debug!(
        "Lowered {} operators to {} ONNX nodes",
        walk.nodes.len(),
        writer.nodes.len()
    );
    Ok(ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
        producer_name: "lite-graph".to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        doc_string: options.description.clone(),
        graph: Some(GraphProto {
            name: graph.name.clone(),
            node: writer.nodes,
            initializer: writer.initializers,
            input,
            output,
            value_info,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn build_onnx_bytes(graph: &Graph, options: &ExportOptions) -> Result<Vec<u8>, Error> {
    Ok(build_onnx(graph, options)?.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Conv2D, FullyConnected, Pool2D};
    use crate::tensor::{ConstantTensor, InputTensor};
    use std::sync::Arc;

    fn conv_graph() -> Graph {
        let x = InputTensor::new(
            "image".to_string(),
            DType::F32,
            Shape::new(vec![
                crate::tensor::Dimension::dynamic(1, "batch"),
                Arc::new(crate::tensor::Dimension::from(5)),
                Arc::new(crate::tensor::Dimension::from(5)),
                Arc::new(crate::tensor::Dimension::from(2)),
            ]),
        );
        let filter = ConstantTensor::new(
            Some("conv/kernel".to_string()),
            TensorData::from_f32(vec![0.1; 4 * 3 * 3 * 2], &[4, 3, 3, 2]).unwrap(),
        );
        let conv = Conv2D::new(
            Some("conv".to_string()),
            x.clone(),
            filter,
            None,
            (2, 2),
            (1, 1),
            Padding::Same,
            FusedActivation::Relu6,
        )
        .unwrap();
        let pool = Pool2D::new(
            Some("pool".to_string()),
            PoolKind::Average,
            conv,
            (2, 2),
            (1, 1),
            Padding::Valid,
        )
        .unwrap();
        Graph::new(
            "main".to_string(),
            vec![x],
            vec![("features".to_string(), pool as Arc<dyn Tensor>)],
        )
    }

    fn op_types(model: &ModelProto) -> Vec<String> {
        let graph = model.graph.as_ref().unwrap();
        graph.node.iter().map(|x| x.op_type.clone()).collect()
    }

    #[test]
    fn conv_runs_behind_transposes() {
        let model = build_onnx(&conv_graph(), &ExportOptions::default()).unwrap();
        assert_eq!(
            op_types(&model),
            vec![
                "Transpose",
                "Transpose",
                "Conv",
                "Transpose",
                "Clip",
                "Transpose",
                "AveragePool",
                "Transpose"
            ]
        );
        let graph = model.graph.as_ref().unwrap();
        let conv = graph.node.iter().find(|x| x.op_type == "Conv").unwrap();
        let pads = conv.attribute.iter().find(|x| x.name == "pads").unwrap();
        // 5 wide, kernel 3, stride 2: one pixel on each side
        assert_eq!(pads.ints, vec![1, 1, 1, 1]);
        assert_eq!(graph.input[0].name, "image");
        assert_eq!(graph.output[0].name, "features");
        assert_eq!(model.opset_import[0].version, OPSET_VERSION);
    }

    #[test]
    fn encoded_model_decodes() {
        let bytes = build_onnx_bytes(&conv_graph(), &ExportOptions::default()).unwrap();
        let decoded = ModelProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.ir_version, IR_VERSION);
        let graph = decoded.graph.unwrap();
        assert_eq!(graph.initializer.len(), 3);
        let kernel = graph
            .initializer
            .iter()
            .find(|x| x.name == "conv/kernel")
            .unwrap();
        assert_eq!(kernel.dims, vec![4, 3, 3, 2]);
        assert_eq!(kernel.raw_data.len(), 72 * 4);
    }

    #[test]
    fn half_weights_are_cast_back() {
        let x = InputTensor::new("x".to_string(), DType::F32, Shape::from(vec![1usize, 3]));
        let weights = ConstantTensor::new(
            Some("dense/kernel".to_string()),
            TensorData::from_f32(vec![1.0; 6], &[2, 3]).unwrap(),
        );
        let fc = FullyConnected::new(None, x.clone(), weights, None, FusedActivation::None)
            .unwrap();
        let graph = Graph::new("g".to_string(), vec![x], vec![("y".to_string(), fc as Arc<dyn Tensor>)]);
        let options = ExportOptions {
            weight_precision: WeightPrecision::F16,
            ..Default::default()
        };
        let model = build_onnx(&graph, &options).unwrap();
        assert_eq!(op_types(&model), vec!["Cast", "Gemm"]);
        let graph = model.graph.unwrap();
        assert_eq!(graph.initializer[0].name, "dense/kernel_fp16");
        assert_eq!(graph.initializer[0].data_type, DataType::Float16 as i32);
        assert_eq!(graph.node[0].output, vec!["dense/kernel".to_string()]);
    }
}
