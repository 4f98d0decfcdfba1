#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic weights. Variances stay positive so batch-norm is well defined.
pub fn weight_values(name: &str, dims: &[usize], rng: &mut StdRng) -> Vec<f32> {
    let n = dims.iter().product();
    (0..n)
        .map(|_| {
            if name.ends_with("moving_variance") {
                rng.gen_range(0.5f32..1.5)
            } else {
                rng.gen_range(-0.5f32..0.5)
            }
        })
        .collect()
}

fn sequential(name: &str, layers: Value) -> Value {
    json!({
        "class_name": "Sequential",
        "config": {"name": name, "layers": layers},
        "keras_version": "2.15.0",
        "backend": "tensorflow"
    })
}

/// Writes `model.json` and a single weight shard into `dir`, the way `tensorflowjs_converter`
/// lays out a Layers model.
pub fn write_tfjs_model(dir: &Path, topology: Value, weights: &[(&str, Vec<usize>)]) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(7);
    let mut shard = vec![];
    let mut manifest = vec![];
    for (name, dims) in weights {
        for value in weight_values(name, dims, &mut rng) {
            shard.extend_from_slice(&value.to_le_bytes());
        }
        manifest.push(json!({"name": name, "shape": dims, "dtype": "float32"}));
    }
    std::fs::write(dir.join("group1-shard1of1.bin"), shard).unwrap();
    let model_json = json!({
        "format": "layers-model",
        "generatedBy": "keras v2.15.0",
        "convertedBy": "TensorFlow.js Converter v4.17.0",
        "modelTopology": topology,
        "weightsManifest": [{"paths": ["group1-shard1of1.bin"], "weights": manifest}]
    });
    let path = dir.join("model.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&model_json).unwrap()).unwrap();
    path
}

/// Writes `config.json` and `model.safetensors` into `dir`.
pub fn write_safetensors_model(dir: &Path, topology: Value, weights: &[(&str, Vec<usize>)]) {
    let mut rng = StdRng::seed_from_u64(7);
    std::fs::write(
        dir.join("config.json"),
        serde_json::to_vec(&topology).unwrap(),
    )
    .unwrap();
    let mut data: Vec<(String, Vec<usize>, Vec<u8>)> = vec![];
    for (name, dims) in weights {
        let bytes = weight_values(name, dims, &mut rng)
            .iter()
            .flat_map(|x| x.to_le_bytes())
            .collect();
        data.push((name.to_string(), dims.clone(), bytes));
    }
    let views: HashMap<String, safetensors::tensor::TensorView> = data
        .iter()
        .map(|(name, dims, bytes)| {
            (
                name.clone(),
                safetensors::tensor::TensorView::new(safetensors::Dtype::F32, dims.clone(), bytes)
                    .unwrap(),
            )
        })
        .collect();
    safetensors::serialize_to_file(&views, &None, &dir.join("model.safetensors")).unwrap();
}

fn child_group(group: &hdf5::Group, name: &str) -> hdf5::Group {
    if group.link_exists(name) {
        group.group(name)
    } else {
        group.create_group(name)
    }
    .unwrap()
}

/// Writes a Keras HDF5 file the way `model.save("model.h5")` lays it out. Weight values
/// match `write_tfjs_model` for the same fixture.
pub fn write_keras_hdf5(path: &Path, topology: Value, weights: &[(&str, Vec<usize>)]) {
    let mut rng = StdRng::seed_from_u64(7);
    let file = hdf5::File::create(path).unwrap();
    let config: hdf5::types::VarLenUnicode = topology.to_string().parse().unwrap();
    file.new_attr::<hdf5::types::VarLenUnicode>()
        .shape(())
        .create("model_config")
        .unwrap()
        .write_scalar(&config)
        .unwrap();
    let root = file.create_group("model_weights").unwrap();
    for (name, dims) in weights {
        let values = weight_values(name, dims, &mut rng);
        let (scope, weight) = name.rsplit_once('/').unwrap();
        let layer = scope.split('/').next().unwrap();
        // model_weights/<layer>/<layer>/<weight>:0
        let mut group = child_group(&root, layer);
        for part in scope.split('/') {
            group = child_group(&group, part);
        }
        group
            .new_dataset::<f32>()
            .shape(dims.clone())
            .create(format!("{}:0", weight).as_str())
            .unwrap()
            .write_raw(values.as_slice())
            .unwrap();
    }
}

/// Dense activity classifier in the shape of the UCI HAR model, scaled down.
pub fn har_classifier() -> (Value, Vec<(&'static str, Vec<usize>)>) {
    let topology = sequential(
        "har_classifier",
        json!([
            {"class_name": "Dense", "config": {
                "name": "dense", "units": 16, "activation": "relu", "use_bias": true,
                "batch_input_shape": [null, 12], "dtype": "float32"}},
            {"class_name": "Dropout", "config": {"name": "dropout", "rate": 0.2}},
            {"class_name": "Dense", "config": {
                "name": "dense_1", "units": 8, "activation": "relu", "use_bias": true}},
            {"class_name": "Dense", "config": {
                "name": "dense_2", "units": 6, "activation": "softmax", "use_bias": true}}
        ]),
    );
    let weights = vec![
        ("dense/kernel", vec![12, 16]),
        ("dense/bias", vec![16]),
        ("dense_1/kernel", vec![16, 8]),
        ("dense_1/bias", vec![8]),
        ("dense_2/kernel", vec![8, 6]),
        ("dense_2/bias", vec![6]),
    ];
    (topology, weights)
}

pub fn conv_classifier() -> (Value, Vec<(&'static str, Vec<usize>)>) {
    let topology = sequential(
        "conv_classifier",
        json!([
            {"class_name": "Conv2D", "config": {
                "name": "conv", "filters": 4, "kernel_size": [3, 3], "strides": [1, 1],
                "padding": "same", "activation": "relu", "use_bias": true,
                "data_format": "channels_last", "batch_input_shape": [null, 8, 8, 3]}},
            {"class_name": "BatchNormalization", "config": {
                "name": "bn", "axis": -1, "epsilon": 0.001, "center": true, "scale": true}},
            {"class_name": "DepthwiseConv2D", "config": {
                "name": "dw", "kernel_size": [3, 3], "strides": [1, 1], "padding": "valid",
                "depth_multiplier": 2, "activation": "relu6", "use_bias": true}},
            {"class_name": "MaxPooling2D", "config": {
                "name": "pool", "pool_size": [2, 2], "strides": [2, 2], "padding": "valid"}},
            {"class_name": "GlobalAveragePooling2D", "config": {"name": "gap"}},
            {"class_name": "Dense", "config": {
                "name": "logits", "units": 3, "activation": "softmax", "use_bias": true}}
        ]),
    );
    let weights = vec![
        ("conv/kernel", vec![3, 3, 3, 4]),
        ("conv/bias", vec![4]),
        ("bn/gamma", vec![4]),
        ("bn/beta", vec![4]),
        ("bn/moving_mean", vec![4]),
        ("bn/moving_variance", vec![4]),
        ("dw/depthwise_kernel", vec![3, 3, 4, 2]),
        ("dw/bias", vec![8]),
        ("logits/kernel", vec![8, 3]),
        ("logits/bias", vec![3]),
    ];
    (topology, weights)
}

/// A classifier with recurrent layers, which have no lowering.
pub fn recurrent_classifier() -> (Value, Vec<(&'static str, Vec<usize>)>) {
    let topology = sequential(
        "recurrent_classifier",
        json!([
            {"class_name": "LSTM", "config": {
                "name": "lstm", "units": 4, "batch_input_shape": [null, 5, 3]}},
            {"class_name": "GRU", "config": {"name": "gru", "units": 4}},
            {"class_name": "Dense", "config": {"name": "dense", "units": 2}}
        ]),
    );
    let weights = vec![("dense/kernel", vec![4, 2]), ("dense/bias", vec![2])];
    (topology, weights)
}
