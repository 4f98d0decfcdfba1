use crate::Error;
use serde_json::{Map, Value};

/// One Keras layer as it appears in a serialized model config.
#[derive(Clone, Debug)]
pub struct Layer {
    pub class_name: String,
    pub name: String,
    pub config: Value,
    /// Names of the layers feeding this one, in call order.
    pub inbound: Vec<String>,
    /// How many times the layer is called in the model; shared layers have more than one.
    pub inbound_node_count: usize,
}

impl Layer {
    /// `[batch, ...]` for input layers, `None` marking unknown dimensions.
    pub fn batch_input_shape(&self) -> Option<Vec<Option<usize>>> {
        ["batch_input_shape", "batch_shape"]
            .iter()
            .find_map(|key| self.config.get(*key))
            .and_then(parse_shape)
    }
}

/// Layer graph of a Sequential or Functional model, layers in execution order.
#[derive(Clone, Debug)]
pub struct Topology {
    pub name: String,
    pub class_name: String,
    pub layers: Vec<Layer>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Topology {
    /// Parses `model.to_json()` output, or a tfjs `modelTopology` that wraps it in
    /// `model_config`.
    pub fn parse(value: &Value) -> Result<Self, Error> {
        let value = value.get("model_config").unwrap_or(value);
        let class_name = value
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or(Error::MissingConfigEntryError("class_name".to_string()))?;
        let config = value
            .get("config")
            .ok_or(Error::MissingConfigEntryError("config".to_string()))?;
        match class_name {
            "Sequential" => parse_sequential(config),
            "Functional" | "Model" => parse_functional(class_name, config),
            other => Err(Error::UnknownModelType(other.to_string())),
        }
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|x| x.name == name)
    }
}

fn parse_shape(value: &Value) -> Option<Vec<Option<usize>>> {
    value
        .as_array()?
        .iter()
        .map(|x| match x {
            Value::Null => Some(None),
            x => x.as_u64().map(|x| Some(x as usize)),
        })
        .collect()
}

fn layer_name(entry: &Value, config: &Value) -> Option<String> {
    config
        .get("name")
        .or_else(|| entry.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn layer_parts(entry: &Value) -> Result<(String, String, Value), Error> {
    let class_name = entry
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or(Error::MissingConfigEntryError("layers[].class_name".to_string()))?
        .to_string();
    let config = entry
        .get("config")
        .cloned()
        .unwrap_or(Value::Object(Map::new()));
    let name = layer_name(entry, &config)
        .ok_or(Error::MissingConfigEntryError(format!("{} name", class_name)))?;
    Ok((class_name, name, config))
}

fn parse_sequential(config: &Value) -> Result<Topology, Error> {
    // Keras 1.x/2.0 stored the layer list directly
    let (name, entries) = match config {
        Value::Array(entries) => ("sequential".to_string(), entries.clone()),
        config => (
            config
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("sequential")
                .to_string(),
            config
                .get("layers")
                .and_then(Value::as_array)
                .ok_or(Error::MissingConfigEntryError("layers".to_string()))?
                .clone(),
        ),
    };

    // Keras 2.4+ records the model input shape next to the layer list
    let build_input_shape = config
        .get("build_input_shape")
        .or_else(|| config.get("build_config").and_then(|x| x.get("input_shape")))
        .cloned();

    let mut layers: Vec<Layer> = vec![];
    for entry in &entries {
        let (class_name, name, config) = layer_parts(entry)?;
        if layers.is_empty() && class_name != "InputLayer" {
            let shape = ["batch_input_shape", "batch_shape"]
                .iter()
                .find_map(|key| config.get(*key))
                .cloned()
                .or_else(|| build_input_shape.clone())
                .ok_or(Error::MissingConfigEntryError(format!(
                    "{} batch_input_shape",
                    name
                )))?;
            let input_name = format!("{}_input", name);
            let mut input_config = Map::new();
            input_config.insert("name".to_string(), Value::String(input_name.clone()));
            input_config.insert("batch_input_shape".to_string(), shape);
            layers.push(Layer {
                class_name: "InputLayer".to_string(),
                name: input_name,
                config: Value::Object(input_config),
                inbound: vec![],
                inbound_node_count: 0,
            });
        }
        let inbound = layers.last().map(|x| vec![x.name.clone()]).unwrap_or_default();
        let inbound_node_count = usize::from(!inbound.is_empty());
        layers.push(Layer {
            class_name,
            name,
            config,
            inbound,
            inbound_node_count,
        });
    }
    let Some(last) = layers.last() else {
        return Err(Error::MissingConfigEntryError("layers".to_string()));
    };
    let outputs = vec![last.name.clone()];
    let inputs = vec![layers[0].name.clone()];
    Ok(Topology {
        name,
        class_name: "Sequential".to_string(),
        layers,
        inputs,
        outputs,
    })
}

/// Collects `(layer, node, tensor)` references from Keras 2 nested lists and Keras 3
/// `keras_history` entries, in order of appearance.
fn collect_refs(value: &Value, out: &mut Vec<(String, usize)>) {
    match value {
        Value::Array(items) => {
            if let [Value::String(name), node, ..] = items.as_slice() {
                if let Some(node) = node.as_u64() {
                    out.push((name.clone(), node as usize));
                    return;
                }
            }
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(history) = map.get("keras_history") {
                collect_refs(history, out);
                return;
            }
            if let Some(config) = map.get("config") {
                if map.get("class_name").and_then(Value::as_str) == Some("__keras_tensor__") {
                    collect_refs(config, out);
                    return;
                }
            }
            for key in ["args", "kwargs"] {
                if let Some(x) = map.get(key) {
                    collect_refs(x, out);
                }
            }
        }
        _ => {}
    }
}

fn parse_functional(class_name: &str, config: &Value) -> Result<Topology, Error> {
    let name = config
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("model")
        .to_string();
    let entries = config
        .get("layers")
        .and_then(Value::as_array)
        .ok_or(Error::MissingConfigEntryError("layers".to_string()))?;

    let mut layers = vec![];
    for entry in entries {
        let (layer_class, layer_name, layer_config) = layer_parts(entry)?;
        let nodes = entry
            .get("inbound_nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut refs = vec![];
        if let Some(first) = nodes.first() {
            collect_refs(first, &mut refs);
        }
        layers.push(Layer {
            class_name: layer_class,
            name: layer_name,
            config: layer_config,
            inbound: refs.into_iter().map(|(name, _)| name).collect(),
            inbound_node_count: nodes.len(),
        });
    }

    let endpoints = |key: &str| -> Result<Vec<String>, Error> {
        let mut refs = vec![];
        collect_refs(
            config
                .get(key)
                .ok_or(Error::MissingConfigEntryError(key.to_string()))?,
            &mut refs,
        );
        Ok(refs.into_iter().map(|(name, _)| name).collect())
    };
    let inputs = endpoints("input_layers")?;
    let outputs = endpoints("output_layers")?;
    if outputs.is_empty() {
        return Err(Error::MissingConfigEntryError("output_layers".to_string()));
    }
    for name in inputs.iter().chain(&outputs) {
        if !layers.iter().any(|x: &Layer| &x.name == name) {
            return Err(Error::MissingConfigEntryError(format!("layer {}", name)));
        }
    }
    Ok(Topology {
        name,
        class_name: class_name.to_string(),
        layers,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequential_synthesizes_input_layer() {
        let topology = Topology::parse(&json!({
            "class_name": "Sequential",
            "config": {
                "name": "har",
                "layers": [
                    {"class_name": "Dense", "config": {"name": "dense", "units": 4, "batch_input_shape": [null, 561]}},
                    {"class_name": "Dense", "config": {"name": "dense_1", "units": 6}}
                ]
            }
        }))
        .unwrap();
        assert_eq!(topology.name, "har");
        assert_eq!(topology.layers.len(), 3);
        assert_eq!(topology.layers[0].class_name, "InputLayer");
        assert_eq!(topology.layers[0].name, "dense_input");
        assert_eq!(
            topology.layers[0].batch_input_shape(),
            Some(vec![None, Some(561)])
        );
        assert_eq!(topology.layers[2].inbound, vec!["dense".to_string()]);
        assert_eq!(topology.inputs, vec!["dense_input".to_string()]);
        assert_eq!(topology.outputs, vec!["dense_1".to_string()]);
    }

    #[test]
    fn sequential_accepts_bare_list_and_model_config_wrapper() {
        let topology = Topology::parse(&json!({
            "model_config": {
                "class_name": "Sequential",
                "config": [
                    {"class_name": "InputLayer", "config": {"name": "in", "batch_input_shape": [null, 3]}},
                    {"class_name": "Dense", "config": {"name": "out", "units": 1}}
                ]
            },
            "training_config": {}
        }))
        .unwrap();
        assert_eq!(topology.layers.len(), 2);
        assert_eq!(topology.layers[1].inbound, vec!["in".to_string()]);
    }

    #[test]
    fn functional_keras2_inbound_nodes() {
        let topology = Topology::parse(&json!({
            "class_name": "Functional",
            "config": {
                "name": "model",
                "layers": [
                    {"class_name": "InputLayer", "name": "a", "config": {"name": "a", "batch_input_shape": [null, 2]}, "inbound_nodes": []},
                    {"class_name": "Dense", "name": "b", "config": {"name": "b", "units": 2}, "inbound_nodes": [[["a", 0, 0, {}]]]},
                    {"class_name": "Add", "name": "c", "config": {"name": "c"}, "inbound_nodes": [[["a", 0, 0, {}], ["b", 0, 0, {}]]]}
                ],
                "input_layers": [["a", 0, 0]],
                "output_layers": [["c", 0, 0]]
            }
        }))
        .unwrap();
        assert_eq!(
            topology.layer("c").unwrap().inbound,
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(topology.inputs, vec!["a".to_string()]);
        assert_eq!(topology.outputs, vec!["c".to_string()]);
    }

    #[test]
    fn functional_keras3_keras_history() {
        let tensor = |name: &str| {
            json!({"class_name": "__keras_tensor__", "config": {"shape": [null, 2], "dtype": "float32", "keras_history": [name, 0, 0]}})
        };
        let topology = Topology::parse(&json!({
            "module": "keras",
            "class_name": "Functional",
            "config": {
                "name": "functional",
                "layers": [
                    {"class_name": "InputLayer", "name": "x", "config": {"name": "x", "batch_shape": [null, 2]}, "inbound_nodes": []},
                    {"class_name": "Dense", "name": "y", "config": {"name": "y", "units": 2}, "inbound_nodes": [{"args": [tensor("x")], "kwargs": {}}]},
                    {"class_name": "Concatenate", "name": "z", "config": {"name": "z", "axis": -1}, "inbound_nodes": [{"args": [[tensor("x"), tensor("y")]], "kwargs": {}}]}
                ],
                "input_layers": ["x", 0, 0],
                "output_layers": ["z", 0, 0]
            }
        }))
        .unwrap();
        assert_eq!(
            topology.layer("z").unwrap().inbound,
            vec!["x".to_string(), "y".to_string()]
        );
        assert_eq!(
            topology.layer("x").unwrap().batch_input_shape(),
            Some(vec![None, Some(2)])
        );
        assert_eq!(topology.inputs, vec!["x".to_string()]);
    }

    #[test]
    fn unknown_model_class_is_rejected() {
        let result = Topology::parse(&json!({"class_name": "Subclassed", "config": {}}));
        assert!(matches!(result, Err(Error::UnknownModelType(x)) if x == "Subclassed"));
    }
}
