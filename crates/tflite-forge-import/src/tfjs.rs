//! TensorFlow.js Layers format: a `model.json` holding the Keras topology and a weights
//! manifest, plus the binary shard files the manifest points at.

use crate::topology::Topology;
use crate::{Error, KerasModel, ModelFormat, strip_output_index};
use lite_graph::tensor::{Shape, TensorData, TensorDataValue};
use lite_graph::weights::MemoryWeightManager;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TfjsModelJson {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub generated_by: Option<String>,
    #[serde(default)]
    pub converted_by: Option<String>,
    pub model_topology: serde_json::Value,
    #[serde(default)]
    pub weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(default)]
    pub quantization: Option<Quantization>,
}

#[derive(Debug, Deserialize)]
pub struct Quantization {
    pub dtype: String,
    #[serde(default)]
    pub scale: Option<f32>,
    #[serde(default)]
    pub min: Option<f32>,
}

impl WeightEntry {
    fn stored_dtype(&self) -> &str {
        self.quantization
            .as_ref()
            .map(|x| x.dtype.as_str())
            .unwrap_or(&self.dtype)
    }

    fn byte_len(&self) -> Result<usize, Error> {
        let element_size = match self.stored_dtype() {
            "float32" | "int32" => 4,
            "float16" | "uint16" => 2,
            "uint8" | "bool" => 1,
            other => {
                return Err(Error::ModelLoadError(anyhow::anyhow!(
                    "weight {} has unsupported dtype {}",
                    self.name,
                    other
                )));
            }
        };
        Ok(self.shape.iter().product::<usize>() * element_size)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TensorData, Error> {
        let affine = |x: f32| -> Result<f32, Error> {
            let quantization = self.quantization.as_ref();
            match (
                quantization.and_then(|q| q.scale),
                quantization.and_then(|q| q.min),
            ) {
                (Some(scale), Some(min)) => Ok(x * scale + min),
                _ => Err(Error::ModelLoadError(anyhow::anyhow!(
                    "weight {} is quantized without scale/min",
                    self.name
                ))),
            }
        };
        let value = match self.stored_dtype() {
            "float32" => TensorDataValue::F32(
                bytes
                    .chunks_exact(4)
                    .map(|x| f32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                    .collect(),
            ),
            "int32" => TensorDataValue::I32(
                bytes
                    .chunks_exact(4)
                    .map(|x| i32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                    .collect(),
            ),
            "float16" => TensorDataValue::F32(
                bytes
                    .chunks_exact(2)
                    .map(|x| half::f16::from_le_bytes([x[0], x[1]]).to_f32())
                    .collect(),
            ),
            "uint8" => TensorDataValue::F32(
                bytes
                    .iter()
                    .map(|x| affine(*x as f32))
                    .collect::<Result<_, _>>()?,
            ),
            "uint16" => TensorDataValue::F32(
                bytes
                    .chunks_exact(2)
                    .map(|x| affine(u16::from_le_bytes([x[0], x[1]]) as f32))
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(Error::ModelLoadError(anyhow::anyhow!(
                    "weight {} has unsupported dtype {}",
                    self.name,
                    other
                )));
            }
        };
        TensorData::new(value, Shape::from(self.shape.clone()))
            .map_err(|x| Error::ModelLoadError(anyhow::Error::from(x)))
    }
}

/// Reads every shard of a weight group, in manifest order, into one buffer.
fn read_group(base_dir: &Path, group: &WeightGroup) -> Result<Vec<u8>, Error> {
    let mut out = vec![];
    for path in &group.paths {
        let shard_path = base_dir.join(path);
        let bytes = std::fs::read(&shard_path).map_err(|x| {
            Error::ModelLoadError(anyhow::anyhow!(
                "cannot read weight shard {}: {}",
                shard_path.display(),
                x
            ))
        })?;
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

pub fn decode_weights(
    base_dir: &Path,
    manifest: &[WeightGroup],
) -> Result<BTreeMap<String, TensorData>, Error> {
    let mut tensors = BTreeMap::new();
    for group in manifest {
        let data = read_group(base_dir, group)?;
        let mut offset = 0;
        for entry in &group.weights {
            let len = entry.byte_len()?;
            let bytes = data.get(offset..offset + len).ok_or_else(|| {
                Error::ModelLoadError(anyhow::anyhow!(
                    "weight shards end before {} ({} bytes at offset {}, {} available)",
                    entry.name,
                    len,
                    offset,
                    data.len()
                ))
            })?;
            offset += len;
            let name = strip_output_index(&entry.name).to_string();
            log::trace!("Decoded weight {} {:?}", name, entry.shape);
            tensors.insert(name, entry.decode(bytes)?);
        }
        if offset != data.len() {
            log::warn!(
                "Weight shards {:?} carry {} trailing bytes",
                group.paths,
                data.len() - offset
            );
        }
    }
    Ok(tensors)
}

pub fn load_tfjs_model(model_path: &Path) -> Result<KerasModel, Error> {
    let file = File::open(model_path)?;
    let model_json: TfjsModelJson = serde_json::from_reader(BufReader::new(file))?;
    if let Some(format) = &model_json.format {
        if format != "layers-model" {
            return Err(Error::UnknownModelType(format.clone()));
        }
    }
    log::debug!(
        "tfjs model generated by {} converted by {}",
        model_json.generated_by.as_deref().unwrap_or("?"),
        model_json.converted_by.as_deref().unwrap_or("?")
    );
    let topology = Topology::parse(&model_json.model_topology)?;
    let base_dir = model_path.parent().unwrap_or(Path::new("."));
    let tensors = decode_weights(base_dir, &model_json.weights_manifest)?;
    Ok(KerasModel::new(
        ModelFormat::TfjsLayers,
        topology,
        Box::new(MemoryWeightManager::new(tensors)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, shape: Vec<usize>, quantization: Option<Quantization>) -> WeightEntry {
        WeightEntry {
            name: name.to_string(),
            shape,
            dtype: "float32".to_string(),
            quantization,
        }
    }

    #[test]
    fn weights_span_shards() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .flat_map(|x| x.to_le_bytes())
            .collect();
        std::fs::write(dir.path().join("group1-shard1of2.bin"), &values[..10]).unwrap();
        std::fs::write(dir.path().join("group1-shard2of2.bin"), &values[10..]).unwrap();
        let manifest = vec![WeightGroup {
            paths: vec![
                "group1-shard1of2.bin".to_string(),
                "group1-shard2of2.bin".to_string(),
            ],
            weights: vec![
                entry("dense/kernel:0", vec![2, 2], None),
                entry("dense/bias", vec![1], None),
            ],
        }];
        let tensors = decode_weights(dir.path(), &manifest).unwrap();
        assert_eq!(
            tensors["dense/kernel"].to_f32_vec().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(tensors["dense/bias"].to_f32_vec().unwrap(), vec![5.0]);
    }

    #[test]
    fn uint8_weights_are_dequantized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("w.bin"), [0u8, 2, 255]).unwrap();
        let manifest = vec![WeightGroup {
            paths: vec!["w.bin".to_string()],
            weights: vec![entry(
                "d/kernel",
                vec![3],
                Some(Quantization {
                    dtype: "uint8".to_string(),
                    scale: Some(0.5),
                    min: Some(-1.0),
                }),
            )],
        }];
        let tensors = decode_weights(dir.path(), &manifest).unwrap();
        assert_eq!(
            tensors["d/kernel"].to_f32_vec().unwrap(),
            vec![-1.0, 0.0, 126.5]
        );
    }

    #[test]
    fn float16_weights_are_widened() {
        let dir = tempfile::tempdir().unwrap();
        let bytes: Vec<u8> = [0.5f32, -2.0]
            .iter()
            .flat_map(|x| half::f16::from_f32(*x).to_le_bytes())
            .collect();
        std::fs::write(dir.path().join("w.bin"), bytes).unwrap();
        let manifest = vec![WeightGroup {
            paths: vec!["w.bin".to_string()],
            weights: vec![entry(
                "d/bias",
                vec![2],
                Some(Quantization {
                    dtype: "float16".to_string(),
                    scale: None,
                    min: None,
                }),
            )],
        }];
        let tensors = decode_weights(dir.path(), &manifest).unwrap();
        assert_eq!(tensors["d/bias"].to_f32_vec().unwrap(), vec![0.5, -2.0]);
    }

    #[test]
    fn short_shards_are_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("w.bin"), [0u8; 6]).unwrap();
        let manifest = vec![WeightGroup {
            paths: vec!["w.bin".to_string()],
            weights: vec![entry("d/kernel", vec![2], None)],
        }];
        assert!(matches!(
            decode_weights(dir.path(), &manifest),
            Err(Error::ModelLoadError(_))
        ));
    }
}
