use crate::topology::Layer;
use lite_graph::node::{FusedActivation, Padding, PoolKind};
use serde_json::Value;

/// Keras activation functions that have an inference lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Relu6,
    Sigmoid,
    Tanh,
    Softmax,
    Elu,
    #[strum(to_string = "hard_swish", serialize = "hard_silu")]
    HardSwish,
    #[strum(to_string = "swish", serialize = "silu")]
    Swish,
}

impl Activation {
    /// The activation as a fused operator option, when the target supports fusing it.
    pub fn fused(&self) -> Option<FusedActivation> {
        match self {
            Activation::Linear => Some(FusedActivation::None),
            Activation::Relu => Some(FusedActivation::Relu),
            Activation::Relu6 => Some(FusedActivation::Relu6),
            Activation::Tanh => Some(FusedActivation::Tanh),
            _ => None,
        }
    }
}

/// Typed view of the layer options that matter for inference.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerConfig {
    Input {
        batch_input_shape: Vec<Option<usize>>,
    },
    Dense {
        units: usize,
        use_bias: bool,
        activation: Activation,
    },
    Activation(Activation),
    /// Inference-time no-ops such as dropout and noise layers.
    Identity,
    Flatten,
    Reshape {
        target_shape: Vec<i64>,
    },
    BatchNormalization {
        axis: isize,
        epsilon: f32,
        center: bool,
        scale: bool,
    },
    Conv2D {
        filters: usize,
        kernel_size: (usize, usize),
        strides: (usize, usize),
        dilation_rate: (usize, usize),
        padding: Padding,
        use_bias: bool,
        activation: Activation,
    },
    DepthwiseConv2D {
        kernel_size: (usize, usize),
        strides: (usize, usize),
        dilation_rate: (usize, usize),
        padding: Padding,
        depth_multiplier: usize,
        use_bias: bool,
        activation: Activation,
    },
    Pool2D {
        kind: PoolKind,
        pool_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    },
    GlobalAveragePooling {
        spatial_axes: usize,
        keep_dims: bool,
    },
    Add,
    Multiply,
    Concatenate {
        axis: isize,
    },
    Softmax {
        axis: isize,
    },
}

struct ConfigReader<'a> {
    layer: &'a Layer,
    issues: Vec<String>,
}

impl<'a> ConfigReader<'a> {
    fn new(layer: &'a Layer) -> Self {
        Self {
            layer,
            issues: vec![],
        }
    }

    fn issue(&mut self, message: String) {
        self.issues
            .push(format!("{} ({}): {}", self.layer.name, self.layer.class_name, message));
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.layer.config.get(key).filter(|x| !x.is_null())
    }

    fn usize(&mut self, key: &str, default: Option<usize>) -> usize {
        match self.get(key) {
            Some(x) => match x.as_u64() {
                Some(x) => x as usize,
                None => {
                    self.issue(format!("{} must be a non-negative integer, got {}", key, x));
                    0
                }
            },
            None => default.unwrap_or_else(|| {
                self.issue(format!("missing {}", key));
                0
            }),
        }
    }

    fn isize(&mut self, key: &str, default: isize) -> isize {
        match self.get(key) {
            None => default,
            Some(Value::Array(items)) if items.len() == 1 => match items[0].as_i64() {
                Some(x) => x as isize,
                None => {
                    self.issue(format!("{} must be an integer", key));
                    default
                }
            },
            Some(x) => match x.as_i64() {
                Some(x) => x as isize,
                None => {
                    self.issue(format!("{} must be a single integer, got {}", key, x));
                    default
                }
            },
        }
    }

    fn f32(&mut self, key: &str, default: f32) -> f32 {
        match self.get(key) {
            None => default,
            Some(x) => match x.as_f64() {
                Some(x) => x as f32,
                None => {
                    self.issue(format!("{} must be a number, got {}", key, x));
                    default
                }
            },
        }
    }

    fn bool(&mut self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(x) => x.as_bool().unwrap_or_else(|| {
                self.issue(format!("{} must be a boolean", key));
                default
            }),
        }
    }

    /// Accepts `n` or `[h, w]`.
    fn pair(&mut self, key: &str, default: Option<(usize, usize)>) -> (usize, usize) {
        let value = match self.get(key) {
            None => {
                return default.unwrap_or_else(|| {
                    self.issue(format!("missing {}", key));
                    (1, 1)
                });
            }
            Some(x) => x,
        };
        let parsed = match value {
            Value::Array(items) => match items.as_slice() {
                [h, w] => h.as_u64().zip(w.as_u64()),
                _ => None,
            },
            x => x.as_u64().map(|x| (x, x)),
        };
        match parsed {
            Some((h, w)) if h > 0 && w > 0 => (h as usize, w as usize),
            _ => {
                self.issue(format!("{} must be a positive integer pair, got {}", key, value));
                (1, 1)
            }
        }
    }

    fn padding(&mut self) -> Padding {
        match self.get("padding").and_then(Value::as_str).unwrap_or("valid") {
            "valid" => Padding::Valid,
            "same" => Padding::Same,
            other => {
                self.issue(format!("padding \"{}\" is not supported", other));
                Padding::Valid
            }
        }
    }

    fn channels_last(&mut self) {
        if let Some(format) = self.get("data_format").and_then(Value::as_str) {
            if format != "channels_last" {
                self.issue(format!("data_format \"{}\" is not supported", format));
            }
        }
    }

    fn activation(&mut self, key: &str) -> Activation {
        let name = match self.get(key) {
            None => return Activation::Linear,
            Some(Value::String(x)) => x.clone(),
            // Keras 3 may serialize activations as registered objects
            Some(Value::Object(map)) => match map.get("config").and_then(|x| x.get("name")) {
                Some(Value::String(x)) => x.clone(),
                _ => map
                    .get("class_name")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string(),
            },
            Some(x) => x.to_string(),
        };
        name.parse().unwrap_or_else(|_| {
            self.issue(format!("activation \"{}\" is not supported", name));
            Activation::Linear
        })
    }

    fn finish(self, config: LayerConfig) -> Result<LayerConfig, Vec<String>> {
        if self.issues.is_empty() {
            Ok(config)
        } else {
            Err(self.issues)
        }
    }
}

impl LayerConfig {
    /// Parses a layer's options, collecting every unsupported class or option.
    pub fn parse(layer: &Layer) -> Result<Self, Vec<String>> {
        let mut reader = ConfigReader::new(layer);
        let config = match layer.class_name.as_str() {
            "InputLayer" => match layer.batch_input_shape() {
                Some(shape) => LayerConfig::Input {
                    batch_input_shape: shape,
                },
                None => {
                    reader.issue("missing batch_input_shape".to_string());
                    LayerConfig::Identity
                }
            },
            "Dense" => LayerConfig::Dense {
                units: reader.usize("units", None),
                use_bias: reader.bool("use_bias", true),
                activation: reader.activation("activation"),
            },
            "Activation" => LayerConfig::Activation(reader.activation("activation")),
            "ReLU" => {
                let max_value = reader.get("max_value").and_then(Value::as_f64);
                if reader.f32("negative_slope", 0.0) != 0.0 {
                    reader.issue("negative_slope is not supported".to_string());
                }
                if reader.f32("threshold", 0.0) != 0.0 {
                    reader.issue("threshold is not supported".to_string());
                }
                match max_value {
                    None => LayerConfig::Activation(Activation::Relu),
                    Some(x) if x == 6.0 => LayerConfig::Activation(Activation::Relu6),
                    Some(x) => {
                        reader.issue(format!("max_value {} is not supported", x));
                        LayerConfig::Identity
                    }
                }
            }
            "ELU" => {
                let alpha = reader.f32("alpha", 1.0);
                if alpha != 1.0 {
                    reader.issue(format!("alpha {} is not supported", alpha));
                }
                LayerConfig::Activation(Activation::Elu)
            }
            "Softmax" => LayerConfig::Softmax {
                axis: reader.isize("axis", -1),
            },
            "Dropout" | "SpatialDropout1D" | "SpatialDropout2D" | "GaussianNoise"
            | "GaussianDropout" | "AlphaDropout" | "ActivityRegularization" => {
                LayerConfig::Identity
            }
            "Flatten" => {
                reader.channels_last();
                LayerConfig::Flatten
            }
            "Reshape" => {
                let target_shape = reader
                    .get("target_shape")
                    .and_then(Value::as_array)
                    .and_then(|x| x.iter().map(Value::as_i64).collect::<Option<Vec<_>>>());
                match target_shape {
                    Some(target_shape) => LayerConfig::Reshape { target_shape },
                    None => {
                        reader.issue("target_shape must be a list of integers".to_string());
                        LayerConfig::Identity
                    }
                }
            }
            "BatchNormalization" => {
                if reader.get("renorm").and_then(Value::as_bool) == Some(true) {
                    reader.issue("renorm is not supported".to_string());
                }
                LayerConfig::BatchNormalization {
                    axis: reader.isize("axis", -1),
                    epsilon: reader.f32("epsilon", 1e-3),
                    center: reader.bool("center", true),
                    scale: reader.bool("scale", true),
                }
            }
            "Conv2D" => {
                reader.channels_last();
                if reader.usize("groups", Some(1)) != 1 {
                    reader.issue("grouped convolution is not supported".to_string());
                }
                let padding = reader.padding();
                LayerConfig::Conv2D {
                    filters: reader.usize("filters", None),
                    kernel_size: reader.pair("kernel_size", None),
                    strides: reader.pair("strides", Some((1, 1))),
                    dilation_rate: reader.pair("dilation_rate", Some((1, 1))),
                    padding,
                    use_bias: reader.bool("use_bias", true),
                    activation: reader.activation("activation"),
                }
            }
            "DepthwiseConv2D" => {
                reader.channels_last();
                let padding = reader.padding();
                LayerConfig::DepthwiseConv2D {
                    kernel_size: reader.pair("kernel_size", None),
                    strides: reader.pair("strides", Some((1, 1))),
                    dilation_rate: reader.pair("dilation_rate", Some((1, 1))),
                    padding,
                    depth_multiplier: reader.usize("depth_multiplier", Some(1)),
                    use_bias: reader.bool("use_bias", true),
                    activation: reader.activation("activation"),
                }
            }
            "MaxPooling2D" | "MaxPool2D" | "AveragePooling2D" | "AvgPool2D" => {
                reader.channels_last();
                let kind = if layer.class_name.starts_with("Max") {
                    PoolKind::Max
                } else {
                    PoolKind::Average
                };
                let pool_size = reader.pair("pool_size", Some((2, 2)));
                LayerConfig::Pool2D {
                    kind,
                    pool_size,
                    strides: reader.pair("strides", Some(pool_size)),
                    padding: reader.padding(),
                }
            }
            "GlobalAveragePooling1D" | "GlobalAveragePooling2D" => {
                reader.channels_last();
                LayerConfig::GlobalAveragePooling {
                    spatial_axes: if layer.class_name.ends_with("1D") { 1 } else { 2 },
                    keep_dims: reader.bool("keepdims", false),
                }
            }
            "Add" => LayerConfig::Add,
            "Multiply" => LayerConfig::Multiply,
            "Concatenate" => LayerConfig::Concatenate {
                axis: reader.isize("axis", -1),
            },
            other => {
                reader.issue(format!("layer class {} is not supported", other));
                LayerConfig::Identity
            }
        };
        reader.finish(config)
    }

    /// Weight names this layer reads, with the dimensions its config pins down.
    pub fn expected_weights(&self) -> Vec<(&'static str, Vec<Option<usize>>)> {
        match self {
            LayerConfig::Dense {
                units, use_bias, ..
            } => {
                let mut out = vec![("kernel", vec![None, Some(*units)])];
                if *use_bias {
                    out.push(("bias", vec![Some(*units)]));
                }
                out
            }
            LayerConfig::Conv2D {
                filters,
                kernel_size,
                use_bias,
                ..
            } => {
                let mut out = vec![(
                    "kernel",
                    vec![
                        Some(kernel_size.0),
                        Some(kernel_size.1),
                        None,
                        Some(*filters),
                    ],
                )];
                if *use_bias {
                    out.push(("bias", vec![Some(*filters)]));
                }
                out
            }
            LayerConfig::DepthwiseConv2D {
                kernel_size,
                depth_multiplier,
                use_bias,
                ..
            } => {
                let mut out = vec![(
                    "depthwise_kernel",
                    vec![
                        Some(kernel_size.0),
                        Some(kernel_size.1),
                        None,
                        Some(*depth_multiplier),
                    ],
                )];
                if *use_bias {
                    out.push(("bias", vec![None]));
                }
                out
            }
            LayerConfig::BatchNormalization { center, scale, .. } => {
                let mut out = vec![];
                if *scale {
                    out.push(("gamma", vec![None]));
                }
                if *center {
                    out.push(("beta", vec![None]));
                }
                out.push(("moving_mean", vec![None]));
                out.push(("moving_variance", vec![None]));
                out
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(class_name: &str, config: Value) -> Layer {
        Layer {
            class_name: class_name.to_string(),
            name: "layer".to_string(),
            config,
            inbound: vec![],
            inbound_node_count: 1,
        }
    }

    #[test]
    fn dense_defaults() {
        let config = LayerConfig::parse(&layer("Dense", json!({"units": 8}))).unwrap();
        assert_eq!(
            config,
            LayerConfig::Dense {
                units: 8,
                use_bias: true,
                activation: Activation::Linear
            }
        );
        assert_eq!(
            config.expected_weights(),
            vec![("kernel", vec![None, Some(8)]), ("bias", vec![Some(8)])]
        );
    }

    #[test]
    fn activation_aliases() {
        assert_eq!("silu".parse::<Activation>().unwrap(), Activation::Swish);
        assert_eq!("hard_silu".parse::<Activation>().unwrap(), Activation::HardSwish);
        assert_eq!("relu6".parse::<Activation>().unwrap(), Activation::Relu6);
        assert!("gelu".parse::<Activation>().is_err());
        assert_eq!(Activation::Relu6.fused(), Some(FusedActivation::Relu6));
        assert_eq!(Activation::Sigmoid.fused(), None);
    }

    #[test]
    fn conv_kernel_size_accepts_scalar() {
        let config = LayerConfig::parse(&layer(
            "Conv2D",
            json!({"filters": 4, "kernel_size": 3, "strides": [2, 1], "padding": "same",
                   "data_format": "channels_last", "activation": "relu"}),
        ))
        .unwrap();
        match config {
            LayerConfig::Conv2D {
                kernel_size,
                strides,
                padding,
                activation,
                ..
            } => {
                assert_eq!(kernel_size, (3, 3));
                assert_eq!(strides, (2, 1));
                assert_eq!(padding, Padding::Same);
                assert_eq!(activation, Activation::Relu);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pool_strides_default_to_pool_size() {
        let config = LayerConfig::parse(&layer(
            "MaxPooling2D",
            json!({"pool_size": [3, 3], "strides": null}),
        ))
        .unwrap();
        assert_eq!(
            config,
            LayerConfig::Pool2D {
                kind: PoolKind::Max,
                pool_size: (3, 3),
                strides: (3, 3),
                padding: Padding::Valid
            }
        );
    }

    #[test]
    fn issues_are_collected() {
        let issues = LayerConfig::parse(&layer(
            "Conv2D",
            json!({"filters": 4, "kernel_size": 3, "padding": "causal",
                   "data_format": "channels_first", "activation": "gelu"}),
        ))
        .unwrap_err();
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|x| x.starts_with("layer (Conv2D)")));
    }

    #[test]
    fn relu_layer_variants() {
        assert_eq!(
            LayerConfig::parse(&layer("ReLU", json!({"max_value": 6.0}))).unwrap(),
            LayerConfig::Activation(Activation::Relu6)
        );
        assert!(LayerConfig::parse(&layer("ReLU", json!({"max_value": 3.0}))).is_err());
        assert!(LayerConfig::parse(&layer("ReLU", json!({"negative_slope": 0.1}))).is_err());
        assert!(LayerConfig::parse(&layer("LSTM", json!({"units": 4}))).is_err());
    }
}
