//! Keras HDF5 files, as written by `model.save("model.h5")`. The topology is the JSON
//! `model_config` attribute on the root group; weights live under
//! `model_weights/<layer>/<layer>/<weight>:0`.

use crate::topology::Topology;
use crate::{Error, KerasModel, ModelFormat, strip_output_index};
use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use lite_graph::tensor::TensorData;
use lite_graph::weights::MemoryWeightManager;
use std::collections::BTreeMap;
use std::path::Path;

const WEIGHTS_GROUP: &str = "model_weights";
/// Upper bound for fixed-length string attributes. Keras 2 stores the config as bytes.
const MAX_ATTR_LEN: usize = 1 << 18;

fn h5_error(x: hdf5::Error) -> Error {
    Error::ModelLoadError(anyhow::anyhow!("HDF5: {}", x))
}

/// Reads a scalar string attribute in any of the encodings h5py writes.
fn read_string_attr(location: &hdf5::Group, name: &str) -> Result<String, Error> {
    let attr = location.attr(name).map_err(h5_error)?;
    let descriptor = attr
        .dtype()
        .and_then(|x| x.to_descriptor())
        .map_err(h5_error)?;
    let value = match descriptor {
        TypeDescriptor::VarLenUnicode => attr
            .read_scalar::<VarLenUnicode>()
            .map_err(h5_error)?
            .as_str()
            .to_string(),
        TypeDescriptor::VarLenAscii => attr
            .read_scalar::<VarLenAscii>()
            .map_err(h5_error)?
            .as_str()
            .to_string(),
        TypeDescriptor::FixedAscii(len) if len <= MAX_ATTR_LEN => attr
            .read_raw::<FixedAscii<MAX_ATTR_LEN>>()
            .map_err(h5_error)?
            .first()
            .map(|x| x.as_str().to_string())
            .unwrap_or_default(),
        TypeDescriptor::FixedUnicode(len) if len <= MAX_ATTR_LEN => attr
            .read_raw::<FixedUnicode<MAX_ATTR_LEN>>()
            .map_err(h5_error)?
            .first()
            .map(|x| x.as_str().to_string())
            .unwrap_or_default(),
        other => {
            return Err(Error::ModelLoadError(anyhow::anyhow!(
                "attribute {} has type {:?}, expected a string",
                name,
                other
            )));
        }
    };
    Ok(value)
}

/// Collects every dataset below `group`. Names drop the leading layer group, which
/// leaves Keras' own `<layer>/<weight>` scope.
fn collect_weights(
    group: &hdf5::Group,
    root: &str,
    tensors: &mut BTreeMap<String, TensorData>,
) -> Result<(), Error> {
    for dataset in group.datasets().map_err(h5_error)? {
        let path = dataset.name();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .trim_start_matches('/');
        let Some((_, weight)) = relative.split_once('/') else {
            log::debug!("Skipping {} outside a layer group", path);
            continue;
        };
        let dims = dataset.shape();
        let values = dataset.read_raw::<f32>().map_err(h5_error)?;
        let data = TensorData::from_f32(values, &dims)
            .map_err(|x| Error::ModelLoadError(anyhow::Error::from(x)))?;
        let name = strip_output_index(weight).to_string();
        log::trace!("Read weight {} {:?}", name, dims);
        if tensors.insert(name.clone(), data).is_some() {
            log::warn!("Weight {} appears twice in the file, keeping the last", name);
        }
    }
    for child in group.groups().map_err(h5_error)? {
        collect_weights(&child, root, tensors)?;
    }
    Ok(())
}

pub fn load_hdf5_model(model_path: &Path) -> Result<KerasModel, Error> {
    let file = hdf5::File::open(model_path).map_err(h5_error)?;
    let attrs = file.attr_names().map_err(h5_error)?;
    if !attrs.iter().any(|x| x == "model_config") {
        return Err(Error::ModelLoadError(anyhow::anyhow!(
            "{} has no model_config attribute; it holds weights only",
            model_path.display()
        )));
    }
    if attrs.iter().any(|x| x == "keras_version") {
        log::debug!(
            "Saved by Keras {}",
            read_string_attr(&file, "keras_version")?
        );
    }
    let config = read_string_attr(&file, "model_config")?;
    let config: serde_json::Value = serde_json::from_str(&config)?;
    let topology = Topology::parse(&config)?;

    let weights = if file.link_exists(WEIGHTS_GROUP) {
        file.group(WEIGHTS_GROUP)
    } else {
        file.group("/")
    }
    .map_err(h5_error)?;
    let mut tensors = BTreeMap::new();
    collect_weights(&weights, &weights.name(), &mut tensors)?;

    Ok(KerasModel::new(
        ModelFormat::KerasHdf5,
        topology,
        Box::new(MemoryWeightManager::new(tensors)),
    ))
}
