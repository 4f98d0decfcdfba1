mod common;

use lite_graph::WeightPrecision;
use lite_graph::onnx::proto::ModelProto;
use ndarray::{ArrayD, IxDyn};
use prost::Message;
use tflite_forge::reference::evaluate_keras;
use tflite_forge::{ConvertConfig, ConvertError, OutputFormat, TfliteModel};

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|x| x.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn converts_har_classifier() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let output = dir.path().join("model.tflite");

    let report = tflite_forge::run(&ConvertConfig::new(&input, &output)).unwrap();
    let bytes = std::fs::read(&output).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(report.bytes, bytes.len());
    assert_eq!(report.operators, 4);
    assert_eq!(report.max_abs_diff, None);

    let model = TfliteModel::from_bytes(&bytes).unwrap();
    assert_eq!(
        model.operator_names(),
        vec!["FULLY_CONNECTED", "FULLY_CONNECTED", "FULLY_CONNECTED", "SOFTMAX"]
    );
    assert_eq!(model.inputs()[0].name, "dense_input");
    assert_eq!(model.inputs()[0].signature, vec![-1, 12]);
    assert_eq!(model.outputs()[0].name, "dense_2");
    assert!(model.has_default_signature());
    assert!(
        model
            .description()
            .is_some_and(|x| x.starts_with("tflite-forge"))
    );

    let names: Vec<&str> = report.layers.iter().map(|x| x.name.as_str()).collect();
    assert_eq!(names, vec!["dense_input", "dense", "dropout", "dense_1", "dense_2"]);
    assert_eq!(report.layers[1].params, 12 * 16 + 16);
    assert_eq!(report.layers[4].output_shape, "[batch, 6]");
}

#[test]
fn converted_predictions_match_source() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let output = dir.path().join("model.tflite");
    tflite_forge::run(&ConvertConfig::new(&input, &output)).unwrap();

    let source = tflite_forge_import::load_model(&input).unwrap();
    let converted = TfliteModel::from_bytes(&std::fs::read(&output).unwrap()).unwrap();
    // All-zeros input, as the mobile app's smoke test uses
    let zeros = ArrayD::<f32>::zeros(IxDyn(&[1, 12]));
    let ramp = ArrayD::from_shape_vec(
        IxDyn(&[2, 12]),
        (0..24).map(|x| x as f32 / 12.0 - 1.0).collect(),
    )
    .unwrap();
    for input in [zeros, ramp] {
        let expected = evaluate_keras(&source, &[input.clone()]).unwrap();
        let actual = converted.run(&[input]).unwrap();
        assert_eq!(expected[0].shape(), actual[0].shape());
        for (a, b) in expected[0].iter().zip(actual[0].iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}

#[test]
fn verification_passes_for_both_precisions() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);

    let mut config = ConvertConfig::new(&input, dir.path().join("f32.tflite"));
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert!(report.max_abs_diff.unwrap() <= 1e-4);

    config.output = dir.path().join("f16.tflite");
    config.weight_precision = WeightPrecision::F16;
    let report = tflite_forge::run(&config).unwrap();
    assert_eq!(report.weight_precision, WeightPrecision::F16);
    assert!(report.max_abs_diff.unwrap() <= 1e-2);
    let model = TfliteModel::from_bytes(&std::fs::read(&config.output).unwrap()).unwrap();
    assert_eq!(model.operator_names().iter().filter(|x| **x == "DEQUANTIZE").count(), 6);
}

#[test]
fn failed_verification_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let mut config = ConvertConfig::new(&input, dir.path().join("model.tflite"));
    config.verify = true;
    config.weight_precision = WeightPrecision::F16;
    // Half weights cannot meet a zero tolerance
    config.tolerance = Some(0.0);
    let result = tflite_forge::run(&config);
    assert!(matches!(result, Err(ConvertError::VerificationError(_))));
    assert!(!config.output.exists());
}

#[test]
fn conv_model_matches_source() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::conv_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let mut config = ConvertConfig::new(&input, dir.path().join("conv.tflite"));
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert!(report.max_abs_diff.unwrap() <= 1e-4);

    let model = TfliteModel::from_bytes(&std::fs::read(&config.output).unwrap()).unwrap();
    assert_eq!(
        model.operator_names(),
        vec![
            "CONV_2D",
            "MUL",
            "ADD",
            "DEPTHWISE_CONV_2D",
            "MAX_POOL_2D",
            "MEAN",
            "FULLY_CONNECTED",
            "SOFTMAX"
        ]
    );
    assert_eq!(model.inputs()[0].signature, vec![-1, 8, 8, 3]);
    let shapes: Vec<&str> = report
        .layers
        .iter()
        .map(|x| x.output_shape.as_str())
        .collect();
    assert_eq!(
        shapes,
        vec![
            "[batch, 8, 8, 3]",
            "[batch, 8, 8, 4]",
            "[batch, 8, 8, 4]",
            "[batch, 6, 6, 8]",
            "[batch, 3, 3, 8]",
            "[batch, 8]",
            "[batch, 3]"
        ]
    );
}

#[test]
fn missing_input_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("model.tflite");
    let config = ConvertConfig::new(dir.path().join("missing/model.json"), &output);
    match tflite_forge::run(&config) {
        Err(ConvertError::ModelLoadError { path, .. }) => {
            assert_eq!(path, dir.path().join("missing/model.json"))
        }
        other => panic!("expected a load error, got {:?}", other.map(|_| ())),
    }
    assert!(!output.exists());
}

#[test]
fn converts_keras_hdf5_model() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = dir.path().join("model.h5");
    common::write_keras_hdf5(&input, topology, &weights);
    let mut config = ConvertConfig::new(&input, dir.path().join("model.tflite"));
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert_eq!(report.operators, 4);
    assert!(report.max_abs_diff.unwrap() <= 1e-4);

    // The same model and weights in tfjs form convert to the same bytes
    let tfjs_dir = dir.path().join("tfjs");
    std::fs::create_dir(&tfjs_dir).unwrap();
    let (topology, weights) = common::har_classifier();
    let tfjs = common::write_tfjs_model(&tfjs_dir, topology, &weights);
    let other = dir.path().join("from_tfjs.tflite");
    tflite_forge::run(&ConvertConfig::new(&tfjs, &other)).unwrap();
    assert_eq!(
        std::fs::read(&config.output).unwrap(),
        std::fs::read(&other).unwrap()
    );
}

#[test]
fn conv_hdf5_model_matches_source() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::conv_classifier();
    let input = dir.path().join("conv.h5");
    common::write_keras_hdf5(&input, topology, &weights);
    let mut config = ConvertConfig::new(&input, dir.path().join("conv.tflite"));
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert!(report.max_abs_diff.unwrap() <= 1e-4);
}

#[test]
fn corrupt_hdf5_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("model.h5");
    std::fs::write(&input, b"\x89HDF\r\n\x1a\n").unwrap();
    let output = dir.path().join("out.tflite");
    let result = tflite_forge::run(&ConvertConfig::new(&input, &output));
    assert!(matches!(result, Err(ConvertError::ModelLoadError { .. })));
    assert!(!output.exists());
}

#[test]
fn keras_archive_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("model.keras");
    std::fs::write(&input, b"PK\x03\x04").unwrap();
    let result = tflite_forge::run(&ConvertConfig::new(&input, dir.path().join("out.tflite")));
    let err = result.unwrap_err();
    assert!(matches!(err, ConvertError::ModelLoadError { .. }));
    let message = format!("{:#}", anyhow::Error::from(err));
    assert!(message.contains("model.h5"), "{}", message);
}

#[test]
fn missing_output_directory_is_a_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let before = dir_entries(dir.path());
    let output = dir.path().join("no_such_dir").join("model.tflite");
    let result = tflite_forge::run(&ConvertConfig::new(&input, &output));
    assert!(matches!(result, Err(ConvertError::IoWriteError { .. })));
    assert!(!output.exists());
    assert_eq!(dir_entries(dir.path()), before);
}

#[cfg(unix)]
#[test]
fn read_only_output_directory_is_a_write_error() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let out_dir = dir.path().join("read_only");
    std::fs::create_dir(&out_dir).unwrap();
    std::fs::set_permissions(&out_dir, std::fs::Permissions::from_mode(0o555)).unwrap();
    let check = out_dir.join("check");
    if std::fs::write(&check, b"").is_ok() {
        // Permission bits are not enforced for this user
        std::fs::remove_file(&check).unwrap();
        return;
    }

    let output = out_dir.join("model.tflite");
    let result = tflite_forge::run(&ConvertConfig::new(&input, &output));
    let entries = dir_entries(&out_dir);
    std::fs::set_permissions(&out_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    match result {
        Err(ConvertError::IoWriteError { path, .. }) => assert_eq!(path, output),
        other => panic!("expected a write error, got {:?}", other.map(|_| ())),
    }
    assert!(entries.is_empty(), "{:?}", entries);
}

#[test]
fn unsupported_layers_are_reported_together() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::recurrent_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let output = dir.path().join("model.tflite");
    std::fs::write(&output, b"previous").unwrap();

    let err = tflite_forge::run(&ConvertConfig::new(&input, &output)).unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, ConvertError::ConversionError(_)));
    assert!(message.contains("lstm (LSTM)"), "{}", message);
    assert!(message.contains("gru (GRU)"), "{}", message);
    // The earlier output survives a failed conversion
    assert_eq!(std::fs::read(&output).unwrap(), b"previous");
}

#[test]
fn conversion_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::conv_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let output = dir.path().join("model.tflite");
    let config = ConvertConfig::new(&input, &output);
    tflite_forge::run(&config).unwrap();
    let first = std::fs::read(&output).unwrap();
    tflite_forge::run(&config).unwrap();
    let second = std::fs::read(&output).unwrap();
    assert_eq!(first, second);

    let other = dir.path().join("again.tflite");
    tflite_forge::run(&ConvertConfig::new(&input, &other)).unwrap();
    assert_eq!(first, std::fs::read(&other).unwrap());
}

#[test]
fn onnx_output_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let (topology, weights) = common::har_classifier();
    let input = common::write_tfjs_model(dir.path(), topology, &weights);
    let mut config = ConvertConfig::new(&input, dir.path().join("model.onnx"));
    config.format = OutputFormat::Onnx;
    // Verification only covers tflite, so this is skipped rather than failing
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert_eq!(report.format, OutputFormat::Onnx);
    assert_eq!(report.max_abs_diff, None);

    let model = ModelProto::decode(std::fs::read(&config.output).unwrap().as_slice()).unwrap();
    let graph = model.graph.unwrap();
    assert_eq!(graph.input[0].name, "dense_input");
    assert_eq!(graph.output[0].name, "dense_2");
    assert!(!graph.node.is_empty());
}

#[test]
fn converts_safetensors_directory() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("keras_model");
    std::fs::create_dir(&model_dir).unwrap();
    let (topology, weights) = common::har_classifier();
    common::write_safetensors_model(&model_dir, topology, &weights);

    let mut config = ConvertConfig::new(&model_dir, dir.path().join("model.tflite"));
    config.verify = true;
    let report = tflite_forge::run(&config).unwrap();
    assert_eq!(report.operators, 4);
    assert!(report.max_abs_diff.unwrap() <= 1e-4);
}
