use crate::topology::Topology;
use crate::{Error, KerasModel, ModelFormat};
use lite_graph::weights::SafetensorsWeightManager;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Loads a directory holding `config.json` (the output of `model.to_json()`) and one or
/// more `*.safetensors` files whose tensors are keyed `<layer>/<weight>`.
pub fn load_safetensors_model(model_path: &Path) -> Result<KerasModel, Error> {
    let config = std::fs::read_to_string(model_path.join("config.json"))?;
    let config: serde_json::Value = serde_json::from_str(&config)?;
    let topology = Topology::parse(&config)?;

    let mut safetensors_paths = vec![];
    for entry in std::fs::read_dir(model_path)? {
        let path = entry?.path();
        if path.extension().is_some_and(|x| x == "safetensors") {
            safetensors_paths.push(path);
        }
    }
    safetensors_paths.sort();
    if safetensors_paths.is_empty() {
        return Err(Error::ModelLoadError(anyhow::anyhow!(
            "no .safetensors files in {}",
            model_path.display()
        )));
    }

    let mut safetensors_mmaps = vec![];
    for path in &safetensors_paths {
        log::debug!("Mapping {}", path.display());
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        safetensors_mmaps.push(Arc::new(mmap));
    }
    let weight_manager = SafetensorsWeightManager::new(safetensors_mmaps)
        .map_err(|x| Error::ModelLoadError(anyhow::Error::from(x)))?;

    Ok(KerasModel::new(
        ModelFormat::KerasSafetensors,
        topology,
        Box::new(weight_manager),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn loads_config_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"class_name": "Sequential", "config": {"name": "tiny", "layers": [
                {"class_name": "InputLayer", "config": {"name": "x", "batch_shape": [null, 2]}},
                {"class_name": "Dense", "config": {"name": "d", "units": 1}}]}}"#,
        )
        .unwrap();
        let kernel: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|x| x.to_le_bytes()).collect();
        let bias: Vec<u8> = 1.0f32.to_le_bytes().to_vec();
        let mut data = HashMap::new();
        data.insert(
            "d/kernel".to_string(),
            safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![2, 1], &kernel)
                .unwrap(),
        );
        data.insert(
            "d/bias".to_string(),
            safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![1], &bias)
                .unwrap(),
        );
        safetensors::serialize_to_file(&data, &None, &dir.path().join("model.safetensors"))
            .unwrap();

        let model = crate::load_model(dir.path()).unwrap();
        assert_eq!(model.format, ModelFormat::KerasSafetensors);
        assert_eq!(model.name(), "tiny");
        assert!(model.has_weight("d", "kernel"));
        assert!(model.has_weight("d", "bias"));
    }

    #[test]
    fn directory_without_weights_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"class_name": "Sequential", "config": {"layers": [
                {"class_name": "InputLayer", "config": {"name": "x", "batch_shape": [null, 2]}}]}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_safetensors_model(dir.path()),
            Err(Error::ModelLoadError(_))
        ));
    }
}
