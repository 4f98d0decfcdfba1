use crate::layers::{Activation, LayerConfig};
use crate::topology::Layer;
use crate::{Error, KerasModel};
use lite_graph::Graph;
use lite_graph::node::{BinaryKind, FusedActivation, UnaryKind};
use lite_graph::operators::{
    Binary, Concatenation, Conv2D, DepthwiseConv2D, FullyConnected, Mean, Pool2D, Reshape,
    Softmax, Unary,
};
use lite_graph::tensor::{
    ConstantTensor, DType, Dimension, InputTensor, Shape, Tensor, TensorData,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct TranslateOptions {
    /// Fold relu/relu6/tanh into the preceding operator instead of emitting a separate one.
    pub fuse_activations: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            fuse_activations: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LayerSummary {
    pub name: String,
    pub class_name: String,
    pub output_shape: String,
    pub params: usize,
}

pub struct TranslatedGraph {
    pub graph: Graph,
    pub layers: Vec<LayerSummary>,
}

/// Walks the whole topology and reports every construct that has no lowering.
pub fn preflight(model: &KerasModel) -> Result<(), Error> {
    let mut issues = vec![];
    if model.topology.inputs.is_empty() {
        issues.push("model has no input layer".to_string());
    }
    for layer in &model.topology.layers {
        if layer.inbound_node_count > 1 {
            issues.push(format!(
                "{} ({}): layers called more than once are not supported",
                layer.name, layer.class_name
            ));
        }
        match LayerConfig::parse(layer) {
            Ok(LayerConfig::Input { batch_input_shape }) => {
                if batch_input_shape.iter().skip(1).any(Option::is_none) {
                    issues.push(format!(
                        "{} (InputLayer): only the batch dimension may be unknown, got {:?}",
                        layer.name, batch_input_shape
                    ));
                }
                if let Some(dtype) = layer.config.get("dtype").and_then(|x| x.as_str()) {
                    if dtype != "float32" {
                        issues.push(format!(
                            "{} (InputLayer): input dtype {} is not supported",
                            layer.name, dtype
                        ));
                    }
                }
            }
            Ok(_) => {}
            Err(x) => issues.extend(x),
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::UnsupportedModelError(issues))
    }
}

fn constant(name: String, data: TensorData) -> Arc<dyn Tensor> {
    ConstantTensor::new(Some(name), data)
}

fn single_input(layer: &Layer, inputs: &[Arc<dyn Tensor>]) -> Result<Arc<dyn Tensor>, Error> {
    match inputs {
        [x] => Ok(x.clone()),
        _ => Err(Error::ModelBuildError(anyhow::anyhow!(
            "{} expects one input, got {}",
            layer.name,
            inputs.len()
        ))),
    }
}

struct GraphBuilder<'a> {
    model: &'a KerasModel,
    options: &'a TranslateOptions,
    params: usize,
}

impl GraphBuilder<'_> {
    fn weight(&mut self, layer: &Layer, weight: &str) -> Result<TensorData, Error> {
        let tensor = self.model.weight(&layer.name, weight)?;
        let data = tensor.resolve_data()?.ok_or_else(|| {
            lite_graph::Error::CannotResolveDataError(format!("{}/{}", layer.name, weight))
        })?;
        self.params += data.len();
        Ok(data.cast_f32()?)
    }

    fn optional_weight(
        &mut self,
        layer: &Layer,
        weight: &str,
        present: bool,
    ) -> Result<Option<TensorData>, Error> {
        if present {
            Ok(Some(self.weight(layer, weight)?))
        } else {
            Ok(None)
        }
    }

    /// Splits an activation into the part fused into the producing operator and the
    /// part that still needs its own operator.
    fn split_activation(&self, activation: Activation) -> (FusedActivation, Activation) {
        match activation.fused() {
            Some(fused) if self.options.fuse_activations => (fused, Activation::Linear),
            _ => (FusedActivation::None, activation),
        }
    }

    fn producer_name(layer: &Layer, remaining: Activation) -> Option<String> {
        if remaining == Activation::Linear {
            Some(layer.name.clone())
        } else {
            Some(format!("{}/pre_activation", layer.name))
        }
    }

    fn activate(
        &self,
        layer: &Layer,
        x: Arc<dyn Tensor>,
        activation: Activation,
    ) -> Result<Arc<dyn Tensor>, Error> {
        let name = Some(layer.name.clone());
        let unary = |kind| -> Result<Arc<dyn Tensor>, Error> {
            Ok(Unary::new(name.clone(), kind, x.clone())?)
        };
        match activation {
            Activation::Linear => Ok(x.clone()),
            Activation::Relu => unary(UnaryKind::Relu),
            Activation::Relu6 => unary(UnaryKind::Relu6),
            Activation::Sigmoid => unary(UnaryKind::Logistic),
            Activation::Tanh => unary(UnaryKind::Tanh),
            Activation::Elu => unary(UnaryKind::Elu),
            Activation::HardSwish => unary(UnaryKind::HardSwish),
            Activation::Softmax => Ok(Softmax::new(name.clone(), x.clone())?),
            Activation::Swish => {
                let sigmoid = Unary::new(
                    Some(format!("{}/sigmoid", layer.name)),
                    UnaryKind::Logistic,
                    x.clone(),
                )?;
                Ok(Binary::mul(name.clone(), x.clone(), sigmoid)?)
            }
        }
    }

    fn lower(
        &mut self,
        layer: &Layer,
        config: &LayerConfig,
        inputs: &[Arc<dyn Tensor>],
    ) -> Result<Arc<dyn Tensor>, Error> {
        let name = Some(layer.name.clone());
        match config {
            LayerConfig::Input { .. } => Err(Error::ModelBuildError(anyhow::anyhow!(
                "{} is an input layer",
                layer.name
            ))),
            LayerConfig::Identity => single_input(layer, inputs),
            LayerConfig::Activation(activation) => {
                self.activate(layer, single_input(layer, inputs)?, *activation)
            }
            LayerConfig::Softmax { axis } => {
                let x = single_input(layer, inputs)?;
                if x.shape().normalize_axis(*axis) + 1 != x.rank() {
                    return Err(Error::UnsupportedModelError(vec![format!(
                        "{} (Softmax): only the last axis is supported, got {}",
                        layer.name, axis
                    )]));
                }
                Ok(Softmax::new(name, x)?)
            }
            LayerConfig::Dense {
                use_bias,
                activation,
                ..
            } => {
                let x = single_input(layer, inputs)?;
                if x.rank() != 2 {
                    return Err(Error::UnsupportedModelError(vec![format!(
                        "{} (Dense): input {} must be rank 2",
                        layer.name,
                        x.shape()
                    )]));
                }
                // Keras stores [in, out]
                let kernel = self.weight(layer, "kernel")?.permute(&[1, 0])?;
                let bias = self
                    .optional_weight(layer, "bias", *use_bias)?
                    .map(|x| constant(format!("{}/bias", layer.name), x));
                let (fused, remaining) = self.split_activation(*activation);
                let fc = FullyConnected::new(
                    Self::producer_name(layer, remaining),
                    x,
                    constant(format!("{}/kernel", layer.name), kernel),
                    bias,
                    fused,
                )?;
                self.activate(layer, fc, remaining)
            }
            LayerConfig::Conv2D {
                strides,
                dilation_rate,
                padding,
                use_bias,
                activation,
                ..
            } => {
                let x = single_input(layer, inputs)?;
                // HWIO to OHWI
                let kernel = self.weight(layer, "kernel")?.permute(&[3, 0, 1, 2])?;
                let bias = self
                    .optional_weight(layer, "bias", *use_bias)?
                    .map(|x| constant(format!("{}/bias", layer.name), x));
                let (fused, remaining) = self.split_activation(*activation);
                let conv = Conv2D::new(
                    Self::producer_name(layer, remaining),
                    x,
                    constant(format!("{}/kernel", layer.name), kernel),
                    bias,
                    *strides,
                    *dilation_rate,
                    *padding,
                    fused,
                )?;
                self.activate(layer, conv, remaining)
            }
            LayerConfig::DepthwiseConv2D {
                strides,
                dilation_rate,
                padding,
                use_bias,
                activation,
                ..
            } => {
                let x = single_input(layer, inputs)?;
                let kernel = self.weight(layer, "depthwise_kernel")?;
                let dims = kernel.dims();
                let [kh, kw, channels, multiplier] = dims.as_slice() else {
                    return Err(Error::ModelBuildError(anyhow::anyhow!(
                        "{}/depthwise_kernel has rank {}",
                        layer.name,
                        dims.len()
                    )));
                };
                // [kh, kw, C, M] is already laid out as [1, kh, kw, C * M]
                let kernel =
                    kernel.reshape(Shape::from(vec![1, *kh, *kw, channels * multiplier]))?;
                let bias = self
                    .optional_weight(layer, "bias", *use_bias)?
                    .map(|x| constant(format!("{}/bias", layer.name), x));
                let (fused, remaining) = self.split_activation(*activation);
                let conv = DepthwiseConv2D::new(
                    Self::producer_name(layer, remaining),
                    x,
                    constant(format!("{}/depthwise_kernel", layer.name), kernel),
                    bias,
                    *strides,
                    *dilation_rate,
                    *padding,
                    fused,
                )?;
                self.activate(layer, conv, remaining)
            }
            LayerConfig::Pool2D {
                kind,
                pool_size,
                strides,
                padding,
            } => Ok(Pool2D::new(
                name,
                *kind,
                single_input(layer, inputs)?,
                *pool_size,
                *strides,
                *padding,
            )?),
            LayerConfig::GlobalAveragePooling {
                spatial_axes,
                keep_dims,
            } => {
                let x = single_input(layer, inputs)?;
                if x.rank() != spatial_axes + 2 {
                    return Err(Error::UnsupportedModelError(vec![format!(
                        "{} ({}): input {} has the wrong rank",
                        layer.name,
                        layer.class_name,
                        x.shape()
                    )]));
                }
                let axes: Vec<isize> = (1..=*spatial_axes as isize).collect();
                Ok(Mean::new(name, x, &axes, *keep_dims)?)
            }
            LayerConfig::Flatten => {
                let x = single_input(layer, inputs)?;
                let features: usize = x.shape().resolve()?.iter().skip(1).product();
                Ok(Reshape::new(name, x, vec![-1, features as i64])?)
            }
            LayerConfig::Reshape { target_shape } => {
                let x = single_input(layer, inputs)?;
                let features: usize = x.shape().resolve()?.iter().skip(1).product();
                let known: i64 = target_shape.iter().filter(|x| **x > 0).product();
                let mut new_shape = vec![-1];
                for dim in target_shape {
                    if *dim == -1 && known > 0 {
                        new_shape.push(features as i64 / known);
                    } else {
                        new_shape.push(*dim);
                    }
                }
                Ok(Reshape::new(name, x, new_shape)?)
            }
            LayerConfig::BatchNormalization {
                axis,
                epsilon,
                center,
                scale,
            } => {
                let x = single_input(layer, inputs)?;
                if x.shape().normalize_axis(*axis) + 1 != x.rank() {
                    return Err(Error::UnsupportedModelError(vec![format!(
                        "{} (BatchNormalization): only the last axis is supported, got {}",
                        layer.name, axis
                    )]));
                }
                let mean = self.weight(layer, "moving_mean")?.to_f32_vec()?;
                let variance = self.weight(layer, "moving_variance")?.to_f32_vec()?;
                let gamma = self
                    .optional_weight(layer, "gamma", *scale)?
                    .map(|x| x.to_f32_vec())
                    .transpose()?
                    .unwrap_or_else(|| vec![1.0; mean.len()]);
                let beta = self
                    .optional_weight(layer, "beta", *center)?
                    .map(|x| x.to_f32_vec())
                    .transpose()?
                    .unwrap_or_else(|| vec![0.0; mean.len()]);
                if variance.len() != mean.len()
                    || gamma.len() != mean.len()
                    || beta.len() != mean.len()
                {
                    return Err(Error::ModelBuildError(anyhow::anyhow!(
                        "{} has batch-norm statistics of different lengths",
                        layer.name
                    )));
                }
                let multiplier: Vec<f32> = gamma
                    .iter()
                    .zip(&variance)
                    .map(|(g, v)| g / (v + epsilon).sqrt())
                    .collect();
                let offset: Vec<f32> = beta
                    .iter()
                    .zip(&mean)
                    .zip(&multiplier)
                    .map(|((b, m), s)| b - m * s)
                    .collect();
                let channels = mean.len();
                let scaled = Binary::mul(
                    Some(format!("{}/mul", layer.name)),
                    x,
                    constant(
                        format!("{}/scale", layer.name),
                        TensorData::from_f32(multiplier, &[channels])?,
                    ),
                )?;
                Ok(Binary::add(
                    name,
                    scaled,
                    constant(
                        format!("{}/offset", layer.name),
                        TensorData::from_f32(offset, &[channels])?,
                    ),
                )?)
            }
            LayerConfig::Add | LayerConfig::Multiply => {
                let kind = if *config == LayerConfig::Add {
                    BinaryKind::Add
                } else {
                    BinaryKind::Mul
                };
                let [first, rest @ ..] = inputs else {
                    return Err(Error::ModelBuildError(anyhow::anyhow!(
                        "{} has no inputs",
                        layer.name
                    )));
                };
                if rest.is_empty() {
                    return Err(Error::ModelBuildError(anyhow::anyhow!(
                        "{} needs at least two inputs",
                        layer.name
                    )));
                }
                let mut acc = first.clone();
                for (i, next) in rest.iter().enumerate() {
                    let op_name = if i + 1 == rest.len() {
                        layer.name.clone()
                    } else {
                        format!("{}/{}_{}", layer.name, kind.to_string().to_lowercase(), i)
                    };
                    acc = Binary::new(
                        Some(op_name),
                        kind,
                        acc,
                        next.clone(),
                        FusedActivation::None,
                    )?;
                }
                Ok(acc)
            }
            LayerConfig::Concatenate { axis } => {
                Ok(Concatenation::new(name, inputs.to_vec(), *axis)?)
            }
        }
    }
}

fn input_tensor(layer: &Layer, batch_input_shape: &[Option<usize>]) -> Result<Arc<InputTensor>, Error> {
    let mut dims = vec![Dimension::dynamic(1, "batch")];
    for dim in batch_input_shape.iter().skip(1) {
        let dim = dim.ok_or_else(|| {
            Error::UnsupportedModelError(vec![format!(
                "{} (InputLayer): only the batch dimension may be unknown",
                layer.name
            )])
        })?;
        dims.push(Arc::new(Dimension::from(dim)));
    }
    Ok(InputTensor::new(
        layer.name.clone(),
        DType::F32,
        Shape::new(dims),
    ))
}

/// Builds the inference graph for a Keras model. Every layer's last operator carries
/// the layer name; graph outputs are named after the model's output layers.
pub fn translate(model: &KerasModel, options: &TranslateOptions) -> Result<TranslatedGraph, Error> {
    preflight(model)?;
    let mut builder = GraphBuilder {
        model,
        options,
        params: 0,
    };
    let mut tensors: HashMap<&str, Arc<dyn Tensor>> = HashMap::new();
    let mut inputs: HashMap<&str, Arc<InputTensor>> = HashMap::new();
    let mut layers = vec![];

    for layer in &model.topology.layers {
        let config = LayerConfig::parse(layer).map_err(Error::UnsupportedModelError)?;
        builder.params = 0;
        let output: Arc<dyn Tensor> = if let LayerConfig::Input { batch_input_shape } = &config {
            let input = input_tensor(layer, batch_input_shape)?;
            inputs.insert(&layer.name, input.clone());
            input
        } else {
            let mut inbound = vec![];
            for name in &layer.inbound {
                let tensor = tensors.get(name.as_str()).ok_or_else(|| {
                    Error::ModelBuildError(anyhow::anyhow!(
                        "{} consumes {} before it is defined",
                        layer.name,
                        name
                    ))
                })?;
                inbound.push(tensor.clone());
            }
            builder.lower(layer, &config, &inbound)?
        };
        log::debug!(
            "{} ({}) -> {}",
            layer.name,
            layer.class_name,
            output.shape()
        );
        layers.push(LayerSummary {
            name: layer.name.clone(),
            class_name: layer.class_name.clone(),
            output_shape: output.shape().to_string(),
            params: builder.params,
        });
        tensors.insert(&layer.name, output);
    }

    let mut graph_inputs = vec![];
    for name in &model.topology.inputs {
        let input = inputs.get(name.as_str()).ok_or_else(|| {
            Error::ModelBuildError(anyhow::anyhow!("{} is not an input layer", name))
        })?;
        graph_inputs.push(input.clone());
    }
    let mut graph_outputs = vec![];
    for name in &model.topology.outputs {
        let tensor = tensors
            .get(name.as_str())
            .ok_or_else(|| Error::ModelBuildError(anyhow::anyhow!("no output layer {}", name)))?;
        graph_outputs.push((name.clone(), tensor.clone()));
    }

    Ok(TranslatedGraph {
        graph: Graph::new("main".to_string(), graph_inputs, graph_outputs),
        layers,
    })
}
