//! Direct evaluation of a Keras model from its layer configs and stored weights, in the
//! layouts Keras itself uses. The converted model is checked against this.

use crate::kernels::{self, KernelError};
use ndarray::{ArrayD, Axis, Ix1, Ix2, Ix4, IxDyn};
use std::collections::HashMap;
use tflite_forge_import::{Activation, KerasModel, Layer, LayerConfig};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error(transparent)]
    Import(#[from] tflite_forge_import::Error),
    #[error(transparent)]
    Graph(#[from] lite_graph::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error("{0}: {1}")]
    Unsupported(String, String),
    #[error("Expected {expected} inputs, got {actual}")]
    MissingInput { expected: usize, actual: usize },
}

fn weight(model: &KerasModel, layer: &Layer, name: &str) -> Result<ArrayD<f32>, ReferenceError> {
    let tensor = model.weight(&layer.name, name)?;
    let data = tensor.resolve_data()?.ok_or_else(|| {
        lite_graph::Error::CannotResolveDataError(format!("{}/{}", layer.name, name))
    })?;
    Ok(ArrayD::from_shape_vec(IxDyn(&data.dims()), data.to_f32_vec()?)?)
}

fn optional_weight(
    model: &KerasModel,
    layer: &Layer,
    name: &str,
    present: bool,
) -> Result<Option<ArrayD<f32>>, ReferenceError> {
    present.then(|| weight(model, layer, name)).transpose()
}

fn softmax_axis(x: &ArrayD<f32>, axis: usize) -> ArrayD<f32> {
    let mut out = x.clone();
    for mut lane in out.lanes_mut(Axis(axis)) {
        let max = lane.fold(f32::NEG_INFINITY, |a, b| a.max(*b));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    out
}

fn activate(x: ArrayD<f32>, activation: Activation) -> ArrayD<f32> {
    match activation {
        Activation::Linear => x,
        Activation::Relu => x.mapv_into(kernels::relu),
        Activation::Relu6 => x.mapv_into(kernels::relu6),
        Activation::Sigmoid => x.mapv_into(kernels::logistic),
        Activation::Tanh => x.mapv_into(f32::tanh),
        Activation::Elu => x.mapv_into(kernels::elu),
        Activation::HardSwish => x.mapv_into(kernels::hard_swish),
        Activation::Swish => x.mapv_into(kernels::swish),
        Activation::Softmax => {
            let last = x.ndim().saturating_sub(1);
            softmax_axis(&x, last)
        }
    }
}

fn single<'a>(layer: &Layer, inputs: &[&'a ArrayD<f32>]) -> Result<&'a ArrayD<f32>, ReferenceError> {
    match inputs {
        [x] => Ok(x),
        _ => Err(ReferenceError::Unsupported(
            layer.name.clone(),
            format!("expects one input, got {}", inputs.len()),
        )),
    }
}

fn evaluate_layer(
    model: &KerasModel,
    layer: &Layer,
    config: &LayerConfig,
    inputs: &[&ArrayD<f32>],
) -> Result<ArrayD<f32>, ReferenceError> {
    Ok(match config {
        LayerConfig::Input { .. } => {
            return Err(ReferenceError::Unsupported(
                layer.name.clone(),
                "input layers are fed, not evaluated".to_string(),
            ));
        }
        LayerConfig::Identity => single(layer, inputs)?.clone(),
        LayerConfig::Activation(activation) => activate(single(layer, inputs)?.clone(), *activation),
        LayerConfig::Dense {
            use_bias,
            activation,
            ..
        } => {
            let x = single(layer, inputs)?.view().into_dimensionality::<Ix2>()?;
            let kernel = weight(model, layer, "kernel")?.into_dimensionality::<Ix2>()?;
            let mut out = x.dot(&kernel);
            if let Some(bias) = optional_weight(model, layer, "bias", *use_bias)? {
                out += &bias.into_dimensionality::<Ix1>()?;
            }
            activate(out.into_dyn(), *activation)
        }
        LayerConfig::Conv2D {
            strides,
            dilation_rate,
            padding,
            use_bias,
            activation,
            ..
        } => {
            // Keras kernels are [kh, kw, in, out]
            let kernel = weight(model, layer, "kernel")?.into_dimensionality::<Ix4>()?;
            let kernel = kernel.permuted_axes([3, 0, 1, 2]);
            let kernel = kernel.as_standard_layout().into_owned().into_dyn();
            let bias = optional_weight(model, layer, "bias", *use_bias)?;
            let out = kernels::conv2d(
                single(layer, inputs)?,
                &kernel,
                bias.as_ref(),
                *strides,
                *dilation_rate,
                *padding,
            )?;
            activate(out, *activation)
        }
        LayerConfig::DepthwiseConv2D {
            strides,
            dilation_rate,
            padding,
            use_bias,
            activation,
            ..
        } => {
            let kernel = weight(model, layer, "depthwise_kernel")?;
            let &[kh, kw, channels, multiplier] = kernel.shape() else {
                return Err(ReferenceError::Unsupported(
                    layer.name.clone(),
                    format!("depthwise kernel of shape {:?}", kernel.shape()),
                ));
            };
            let kernel = kernel.into_shape_with_order(IxDyn(&[1, kh, kw, channels * multiplier]))?;
            let bias = optional_weight(model, layer, "bias", *use_bias)?;
            let out = kernels::depthwise_conv2d(
                single(layer, inputs)?,
                &kernel,
                bias.as_ref(),
                *strides,
                *dilation_rate,
                *padding,
            )?;
            activate(out, *activation)
        }
        LayerConfig::Pool2D {
            kind,
            pool_size,
            strides,
            padding,
        } => kernels::pool2d(
            single(layer, inputs)?,
            *kind,
            &lite_graph::node::Window2D {
                kernel: *pool_size,
                stride: *strides,
                dilation: (1, 1),
                padding: *padding,
            },
        )?,
        LayerConfig::GlobalAveragePooling {
            spatial_axes,
            keep_dims,
        } => {
            let axes: Vec<usize> = (1..=*spatial_axes).collect();
            kernels::mean(single(layer, inputs)?, &axes, *keep_dims)?
        }
        LayerConfig::Flatten => {
            let x = single(layer, inputs)?;
            let batch = x.shape().first().copied().unwrap_or(1);
            let features = x.len() / batch.max(1);
            kernels::reshape(x, &[batch as i64, features as i64])?
        }
        LayerConfig::Reshape { target_shape } => {
            let x = single(layer, inputs)?;
            let batch = x.shape().first().copied().unwrap_or(1) as i64;
            let mut shape = vec![batch];
            shape.extend(target_shape);
            kernels::reshape(x, &shape)?
        }
        LayerConfig::BatchNormalization {
            axis,
            epsilon,
            center,
            scale,
        } => {
            let x = single(layer, inputs)?;
            let axis = kernels::normalize_axis(*axis, x.ndim())?;
            let channels = x.shape()[axis];
            let statistic = |name: &str, present: bool, default: f32| -> Result<Vec<f32>, ReferenceError> {
                let values = match optional_weight(model, layer, name, present)? {
                    Some(x) => x.iter().copied().collect::<Vec<f32>>(),
                    None => vec![default; channels],
                };
                if values.len() != channels {
                    return Err(ReferenceError::Unsupported(
                        layer.name.clone(),
                        format!("{} has {} values for {} channels", name, values.len(), channels),
                    ));
                }
                Ok(values)
            };
            let mean = statistic("moving_mean", true, 0.0)?;
            let variance = statistic("moving_variance", true, 1.0)?;
            let gamma = statistic("gamma", *scale, 1.0)?;
            let beta = statistic("beta", *center, 0.0)?;
            let mut out = x.clone();
            for (c, mut slice) in out.axis_iter_mut(Axis(axis)).enumerate() {
                let (m, v, g, b) = (mean[c], variance[c], gamma[c], beta[c]);
                slice.mapv_inplace(|x| (x - m) / (v + epsilon).sqrt() * g + b);
            }
            out
        }
        LayerConfig::Add | LayerConfig::Multiply => {
            let [first, rest @ ..] = inputs else {
                return Err(ReferenceError::Unsupported(
                    layer.name.clone(),
                    "no inputs".to_string(),
                ));
            };
            let mut acc = (*first).clone();
            for next in rest {
                acc = if *config == LayerConfig::Add {
                    kernels::binary(&acc, next, |a, b| a + b)?
                } else {
                    kernels::binary(&acc, next, |a, b| a * b)?
                };
            }
            acc
        }
        LayerConfig::Concatenate { axis } => {
            let rank = inputs.first().map(|x| x.ndim()).unwrap_or(0);
            kernels::concatenate(inputs, kernels::normalize_axis(*axis, rank)?)?
        }
        LayerConfig::Softmax { axis } => {
            let x = single(layer, inputs)?;
            softmax_axis(x, kernels::normalize_axis(*axis, x.ndim())?)
        }
    })
}

/// Runs `model` on `inputs`, given in the order of the model's input layers. Outputs
/// follow the order of the model's output layers.
pub fn evaluate_keras(
    model: &KerasModel,
    inputs: &[ArrayD<f32>],
) -> Result<Vec<ArrayD<f32>>, ReferenceError> {
    let topology = &model.topology;
    if inputs.len() != topology.inputs.len() {
        return Err(ReferenceError::MissingInput {
            expected: topology.inputs.len(),
            actual: inputs.len(),
        });
    }
    let mut values: HashMap<&str, ArrayD<f32>> = HashMap::new();
    for (name, value) in topology.inputs.iter().zip(inputs) {
        values.insert(name.as_str(), value.clone());
    }

    for layer in &topology.layers {
        let config = LayerConfig::parse(layer)
            .map_err(|x| ReferenceError::Unsupported(layer.name.clone(), x.join("; ")))?;
        if matches!(config, LayerConfig::Input { .. }) {
            if !values.contains_key(layer.name.as_str()) {
                return Err(ReferenceError::Unsupported(
                    layer.name.clone(),
                    "input layer is not a model input".to_string(),
                ));
            }
            continue;
        }
        let mut inbound = vec![];
        for name in &layer.inbound {
            inbound.push(values.get(name.as_str()).ok_or_else(|| {
                ReferenceError::Unsupported(
                    layer.name.clone(),
                    format!("consumes {} before it is defined", name),
                )
            })?);
        }
        let output = evaluate_layer(model, layer, &config, &inbound)?;
        log::trace!("{} -> {:?}", layer.name, output.shape());
        values.insert(layer.name.as_str(), output);
    }

    topology
        .outputs
        .iter()
        .map(|name| {
            values.get(name.as_str()).cloned().ok_or_else(|| {
                ReferenceError::Unsupported(name.clone(), "output is never computed".to_string())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lite_graph::tensor::TensorData;
    use lite_graph::weights::MemoryWeightManager;
    use ndarray::array;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tflite_forge_import::{ModelFormat, Topology};

    fn model(layers: serde_json::Value, weights: Vec<(&str, Vec<f32>, Vec<usize>)>) -> KerasModel {
        let topology = Topology::parse(&json!({
            "class_name": "Sequential",
            "config": {"name": "seq", "layers": layers}
        }))
        .unwrap();
        let mut tensors = BTreeMap::new();
        for (name, values, dims) in weights {
            tensors.insert(name.to_string(), TensorData::from_f32(values, &dims).unwrap());
        }
        KerasModel::new(
            ModelFormat::TfjsLayers,
            topology,
            Box::new(MemoryWeightManager::new(tensors)),
        )
    }

    #[test]
    fn dense_uses_in_out_kernel() {
        let model = model(
            json!([{"class_name": "Dense", "config": {
                "name": "dense", "units": 2, "activation": "relu", "batch_input_shape": [null, 3]
            }}]),
            vec![
                ("dense/kernel", vec![1.0, -1.0, 2.0, 0.0, 0.0, 1.0], vec![3, 2]),
                ("dense/bias", vec![0.5, 0.0], vec![2]),
            ],
        );
        let out = evaluate_keras(&model, &[array![[1.0f32, 1.0, 1.0]].into_dyn()]).unwrap();
        // [1 + 2 + 0 + .5, -1 + 0 + 1] = [3.5, 0]
        assert_eq!(out[0], array![[3.5f32, 0.0]].into_dyn());
    }

    #[test]
    fn batch_norm_uses_moving_statistics() {
        let model = model(
            json!([{"class_name": "BatchNormalization", "config": {
                "name": "bn", "epsilon": 0.0, "batch_input_shape": [null, 2]
            }}]),
            vec![
                ("bn/gamma", vec![2.0, 1.0], vec![2]),
                ("bn/beta", vec![0.0, 1.0], vec![2]),
                ("bn/moving_mean", vec![1.0, 0.0], vec![2]),
                ("bn/moving_variance", vec![4.0, 1.0], vec![2]),
            ],
        );
        let out = evaluate_keras(&model, &[array![[3.0f32, 2.0]].into_dyn()]).unwrap();
        assert_eq!(out[0], array![[2.0f32, 3.0]].into_dyn());
    }

    #[test]
    fn conv_kernel_is_hwio() {
        let model = model(
            json!([{"class_name": "Conv2D", "config": {
                "name": "conv", "filters": 2, "kernel_size": [1, 1], "use_bias": false,
                "batch_input_shape": [null, 1, 1, 2]
            }}]),
            // [1, 1, in=2, out=2]: out0 = in0, out1 = in0 + in1
            vec![("conv/kernel", vec![1.0, 1.0, 0.0, 1.0], vec![1, 1, 2, 2])],
        );
        let input = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 2]), vec![2.0, 5.0]).unwrap();
        let out = evaluate_keras(&model, &[input]).unwrap();
        assert_eq!(out[0].iter().copied().collect::<Vec<_>>(), vec![2.0, 7.0]);
    }

    #[test]
    fn wrong_input_count_is_reported() {
        let model = model(
            json!([{"class_name": "Flatten", "config": {"name": "flat", "batch_input_shape": [null, 2, 2]}}]),
            vec![],
        );
        assert!(matches!(
            evaluate_keras(&model, &[]),
            Err(ReferenceError::MissingInput { expected: 1, actual: 0 })
        ));
        let input = ArrayD::zeros(IxDyn(&[3, 2, 2]));
        assert_eq!(evaluate_keras(&model, &[input]).unwrap()[0].shape(), &[3, 4]);
    }
}
