use lite_graph::tensor::Tensor;
use lite_graph::weights::WeightManager;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod h5;
pub mod keras;
pub mod layers;
pub mod tfjs;
pub mod topology;
pub mod translate;

pub use layers::{Activation, LayerConfig};
pub use topology::{Layer, Topology};
pub use translate::{LayerSummary, TranslateOptions, TranslatedGraph, preflight, translate};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot identify model: {}", .0.display())]
    CannotIdentifyModel(PathBuf),
    #[error("Model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("Unsupported model container {}: {}", .0.display(), .1)]
    UnsupportedContainerError(PathBuf, String),
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),
    #[error("Missing config entry: {0}")]
    MissingConfigEntryError(String),
    #[error("Config file read error: {0}")]
    ConfigFileReadError(#[from] std::io::Error),
    #[error("Config file parse error: {0}")]
    ConfigFileParseError(#[from] serde_json::Error),
    #[error("Model load error: {0}")]
    ModelLoadError(anyhow::Error),
    #[error("Model build error: {0}")]
    ModelBuildError(anyhow::Error),
    #[error("Unsupported model: {}", .0.join("; "))]
    UnsupportedModelError(Vec<String>),
}

impl From<lite_graph::Error> for Error {
    fn from(x: lite_graph::Error) -> Self {
        Error::ModelBuildError(anyhow::Error::from(x))
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum_macros::Display,
)]
pub enum ModelFormat {
    /// TensorFlow.js Layers format: `model.json` plus binary weight shards.
    TfjsLayers,
    /// A directory holding Keras' `config.json` and `*.safetensors` weights.
    KerasSafetensors,
    /// A Keras HDF5 file from `model.save("model.h5")`.
    KerasHdf5,
}

/// A trained Keras model: its topology and the weights its layers reference.
pub struct KerasModel {
    pub format: ModelFormat,
    pub topology: Topology,
    weights: Box<dyn WeightManager>,
}

impl KerasModel {
    pub fn new(format: ModelFormat, topology: Topology, weights: Box<dyn WeightManager>) -> Self {
        Self {
            format,
            topology,
            weights,
        }
    }

    pub fn name(&self) -> &str {
        &self.topology.name
    }

    pub fn weight_names(&self) -> Vec<String> {
        self.weights.get_tensor_names()
    }

    /// Looks up `<layer>/<weight>`, also accepting names nested under a model scope
    /// (`<model>/<layer>/<weight>`) and names carrying a TensorFlow `:0` suffix.
    pub fn weight(&self, layer: &str, weight: &str) -> Result<Arc<dyn Tensor>, Error> {
        let name = format!("{}/{}", layer, weight);
        if let Ok(tensor) = self.weights.get_tensor(&name) {
            return Ok(tensor);
        }
        let suffix = format!("/{}", name);
        let names = self.weights.get_tensor_names();
        let exact: Vec<String> = names
            .iter()
            .filter(|x| strip_output_index(x) == name)
            .cloned()
            .collect();
        let candidates = if exact.is_empty() {
            names
                .into_iter()
                .filter(|x| strip_output_index(x).ends_with(&suffix))
                .collect()
        } else {
            exact
        };
        match candidates.as_slice() {
            [only] => self
                .weights
                .get_tensor(only)
                .map_err(|x| Error::ModelLoadError(anyhow::Error::from(x))),
            [] => Err(Error::ModelLoadError(anyhow::anyhow!(
                "missing weight {}",
                name
            ))),
            _ => Err(Error::ModelLoadError(anyhow::anyhow!(
                "weight {} is ambiguous: {}",
                name,
                candidates.join(", ")
            ))),
        }
    }

    pub fn has_weight(&self, layer: &str, weight: &str) -> bool {
        self.weight(layer, weight).is_ok()
    }

    /// Checks that every parseable layer finds the weights its config asks for, with
    /// the dimensions the config implies.
    pub fn validate_weights(&self) -> Result<(), Error> {
        let mut problems = vec![];
        for layer in &self.topology.layers {
            let Ok(config) = LayerConfig::parse(layer) else {
                // Reported by the pre-flight check during conversion
                continue;
            };
            for (weight, expected) in config.expected_weights() {
                match self.weight(&layer.name, weight) {
                    Ok(tensor) => {
                        let dims: Vec<Option<usize>> =
                            tensor.shape().dims.iter().map(|x| x.value).collect();
                        let matches = dims.len() == expected.len()
                            && dims
                                .iter()
                                .zip(&expected)
                                .all(|(a, b)| b.is_none() || a == b);
                        if !matches {
                            problems.push(format!(
                                "{}/{} has shape {}, expected {:?}",
                                layer.name,
                                weight,
                                tensor.shape(),
                                expected
                            ));
                        }
                    }
                    Err(_) => problems.push(format!("missing weight {}/{}", layer.name, weight)),
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::ModelLoadError(anyhow::anyhow!(problems.join("; "))))
        }
    }
}

pub(crate) fn strip_output_index(name: &str) -> &str {
    name.strip_suffix(":0").unwrap_or(name)
}

const KERAS_ARCHIVE_HINT: &str = ".keras archives are not readable here; save the model with \
`model.save(\"model.h5\")` or export it with `tensorflowjs_converter` and pass its model.json";

pub fn identify_model_format(model_path: &Path) -> Result<ModelFormat, Error> {
    if !model_path.exists() {
        return Err(Error::ModelNotFound(model_path.to_path_buf()));
    }
    if model_path.is_dir() {
        return if model_path.join("config.json").exists() {
            Ok(ModelFormat::KerasSafetensors)
        } else {
            Err(Error::CannotIdentifyModel(model_path.to_path_buf()))
        };
    }
    let Some(ext) = model_path.extension() else {
        return Err(Error::CannotIdentifyModel(model_path.to_path_buf()));
    };
    if ext == "h5" || ext == "hdf5" {
        Ok(ModelFormat::KerasHdf5)
    } else if ext == "keras" {
        Err(Error::UnsupportedContainerError(
            model_path.to_path_buf(),
            KERAS_ARCHIVE_HINT.to_string(),
        ))
    } else if ext == "json" {
        let file = File::open(model_path)?;
        let json: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))?;
        if json.get("modelTopology").is_some() {
            Ok(ModelFormat::TfjsLayers)
        } else {
            Err(Error::CannotIdentifyModel(model_path.to_path_buf()))
        }
    } else {
        Err(Error::CannotIdentifyModel(model_path.to_path_buf()))
    }
}

pub fn load_model(model_path: &Path) -> Result<KerasModel, Error> {
    let format = identify_model_format(model_path)?;
    log::info!("Loading {} model from {}", format, model_path.display());
    let model = match format {
        ModelFormat::TfjsLayers => tfjs::load_tfjs_model(model_path)?,
        ModelFormat::KerasSafetensors => keras::load_safetensors_model(model_path)?,
        ModelFormat::KerasHdf5 => h5::load_hdf5_model(model_path)?,
    };
    model.validate_weights()?;
    log::debug!(
        "Loaded model {} with {} layers and {} weights",
        model.name(),
        model.topology.layers.len(),
        model.weight_names().len()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = identify_model_format(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::ModelNotFound(_))));
    }

    #[test]
    fn hdf5_extensions_are_identified() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["model.h5", "model.hdf5"] {
            let path = dir.path().join(name);
            File::create(&path).unwrap().write_all(b"\x89HDF\r\n").unwrap();
            assert_eq!(identify_model_format(&path).unwrap(), ModelFormat::KerasHdf5);
        }
    }

    #[test]
    fn keras_archive_is_rejected_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.keras");
        File::create(&path).unwrap().write_all(b"PK\x03\x04").unwrap();
        match identify_model_format(&path) {
            Err(Error::UnsupportedContainerError(_, hint)) => {
                assert!(hint.contains("model.h5"))
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn json_without_topology_is_unidentified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        File::create(&path).unwrap().write_all(b"{\"format\": 1}").unwrap();
        assert!(matches!(
            identify_model_format(&path),
            Err(Error::CannotIdentifyModel(_))
        ));
    }

    fn dense_model(weights: &[(&str, Vec<usize>)]) -> KerasModel {
        let topology = Topology::parse(&serde_json::json!({
            "class_name": "Sequential",
            "config": {"name": "m", "layers": [
                {"class_name": "Dense", "config": {"name": "dense", "units": 2, "batch_input_shape": [null, 3]}}
            ]}
        }))
        .unwrap();
        let mut tensors = std::collections::BTreeMap::new();
        for (name, dims) in weights {
            let n = dims.iter().product();
            tensors.insert(
                name.to_string(),
                lite_graph::tensor::TensorData::from_f32(vec![0.0; n], dims).unwrap(),
            );
        }
        KerasModel::new(
            ModelFormat::TfjsLayers,
            topology,
            Box::new(lite_graph::weights::MemoryWeightManager::new(tensors)),
        )
    }

    #[test]
    fn weight_lookup_accepts_scoped_names() {
        let model = dense_model(&[
            ("m/dense/kernel:0", vec![3, 2]),
            ("m/dense/bias:0", vec![2]),
        ]);
        assert!(model.has_weight("dense", "kernel"));
        assert!(model.has_weight("dense", "bias"));
        assert!(!model.has_weight("dense", "gamma"));
        model.validate_weights().unwrap();
    }

    #[test]
    fn misshaped_weights_fail_validation() {
        let model = dense_model(&[("dense/kernel", vec![3, 5]), ("dense/bias", vec![2])]);
        assert!(matches!(
            model.validate_weights(),
            Err(Error::ModelLoadError(_))
        ));
        let model = dense_model(&[("dense/kernel", vec![3, 2])]);
        assert!(model.validate_weights().is_err());
    }

    #[test]
    fn directory_needs_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            identify_model_format(dir.path()),
            Err(Error::CannotIdentifyModel(_))
        ));
        File::create(dir.path().join("config.json")).unwrap();
        assert_eq!(
            identify_model_format(dir.path()).unwrap(),
            ModelFormat::KerasSafetensors
        );
    }
}
