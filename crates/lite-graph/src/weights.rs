use crate::Error;
use crate::tensor::{ConstantTensor, DType, Shape, Tensor, TensorData};
use memmap2::Mmap;
use safetensors::SafeTensors;
use safetensors::tensor::{Metadata, TensorInfo};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named access to a model's trained parameters. Names use Keras' `layer/weight` form.
pub trait WeightManager {
    fn prefix(&self, name: &str) -> Self
    where
        Self: Sized;
    fn get_tensor(&self, name: &str) -> Result<Arc<dyn Tensor>, Error>;
    fn get_prefix_tail(&self) -> Option<&str>;
    fn get_prefix(&self) -> Option<&str>;
    fn get_tensor_names(&self) -> Vec<String>;
    fn print_weight_list(&self) {
        for name in self.get_tensor_names() {
            println!("{}", name);
        }
    }
}

fn join_prefix(prefix: &Option<String>, name: &str) -> String {
    if let Some(prefix) = prefix {
        format!("{}/{}", prefix, name)
    } else {
        name.to_string()
    }
}

/// Weights that are already decoded in memory, e.g. from tfjs shards.
#[derive(Clone)]
pub struct MemoryWeightManager {
    prefix_tail: Option<String>,
    prefix: Option<String>,
    tensors: Arc<BTreeMap<String, TensorData>>,
}

impl MemoryWeightManager {
    pub fn new(tensors: BTreeMap<String, TensorData>) -> Self {
        Self {
            prefix_tail: None,
            prefix: None,
            tensors: Arc::new(tensors),
        }
    }
}

impl WeightManager for MemoryWeightManager {
    fn prefix(&self, name: &str) -> Self {
        Self {
            prefix_tail: Some(name.to_string()),
            prefix: Some(join_prefix(&self.prefix, name)),
            tensors: self.tensors.clone(),
        }
    }

    fn get_tensor(&self, name: &str) -> Result<Arc<dyn Tensor>, Error> {
        let full_name = join_prefix(&self.prefix, name);
        let data = self
            .tensors
            .get(&full_name)
            .ok_or(Error::NoSuchTensorError(full_name.clone()))?;
        Ok(ConstantTensor::new(Some(full_name), data.clone()))
    }

    fn get_prefix_tail(&self) -> Option<&str> {
        self.prefix_tail.as_deref()
    }

    fn get_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn get_tensor_names(&self) -> Vec<String> {
        self.tensors.keys().cloned().collect()
    }
}

pub struct SafetensorsWeightManagerInner {
    safetensors_files: Vec<Arc<Mmap>>,
    safetensors_metadata: Vec<(usize, Metadata)>,
}

impl SafetensorsWeightManagerInner {
    pub fn new(safetensors_files: Vec<Arc<Mmap>>) -> Result<Self, Error> {
        let safetensors_metadata = {
            let mut out = vec![];
            for safetensors_mmap in &safetensors_files {
                let metadata = SafeTensors::read_metadata(safetensors_mmap)?;
                out.push(metadata);
            }
            out
        };
        Ok(Self {
            safetensors_files,
            safetensors_metadata,
        })
    }

    pub fn get_tensor_info(&self, name: &str) -> Option<(usize, TensorInfo)> {
        for (i, metadata) in self.safetensors_metadata.iter().enumerate() {
            if let Some(tensor_info) = metadata.1.info(name) {
                return Some((i, tensor_info.clone()));
            }
        }
        None
    }

    fn get_tensor_names(&self) -> Vec<String> {
        let mut out = vec![];
        for metadata in &self.safetensors_metadata {
            out.extend(metadata.1.tensors().keys().cloned());
        }
        out.sort();
        out
    }

    fn load(&self, file_index: usize, name: &str) -> Result<TensorData, Error> {
        let st = SafeTensors::deserialize(&self.safetensors_files[file_index])?;
        TensorData::from_safetensors_view(st.tensor(name)?)
    }
}

pub struct SafetensorsWeightManager {
    prefix_tail: Option<String>,
    prefix: Option<String>,
    inner: Arc<SafetensorsWeightManagerInner>,
}

impl SafetensorsWeightManager {
    pub fn new(safetensors_files: Vec<Arc<Mmap>>) -> Result<Self, Error> {
        Ok(Self {
            prefix_tail: None,
            prefix: None,
            inner: Arc::new(SafetensorsWeightManagerInner::new(safetensors_files)?),
        })
    }
}

impl WeightManager for SafetensorsWeightManager {
    fn prefix(&self, name: &str) -> Self {
        Self {
            prefix_tail: Some(name.to_string()),
            prefix: Some(join_prefix(&self.prefix, name)),
            inner: self.inner.clone(),
        }
    }

    fn get_tensor(&self, name: &str) -> Result<Arc<dyn Tensor>, Error> {
        let full_name = join_prefix(&self.prefix, name);
        Ok(Arc::new(SafetensorsTensor::new(self.inner.clone(), full_name)?))
    }

    fn get_prefix_tail(&self) -> Option<&str> {
        self.prefix_tail.as_deref()
    }

    fn get_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn get_tensor_names(&self) -> Vec<String> {
        self.inner.get_tensor_names()
    }
}

/// A safetensors entry, read from the memory map only when its data is needed.
pub struct SafetensorsTensor {
    name: String,
    inner: Arc<SafetensorsWeightManagerInner>,
    file_index: usize,
    data_type: DType,
    shape: Shape,
}

impl SafetensorsTensor {
    pub fn new(inner: Arc<SafetensorsWeightManagerInner>, name: String) -> Result<Self, Error> {
        let (file_index, tensor_info) = inner
            .get_tensor_info(&name)
            .ok_or(Error::NoSuchTensorError(name.to_string()))?;
        let data_type = DType::from_safetensors(tensor_info.dtype)?;
        let shape = Shape::from(tensor_info.shape.clone());
        Ok(Self {
            name,
            inner,
            file_index,
            data_type,
            shape,
        })
    }
}

impl Tensor for SafetensorsTensor {
    fn dtype(&self) -> DType {
        self.data_type
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn get_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn is_constant(&self) -> bool {
        true
    }

    fn resolve_data(&self) -> Result<Option<TensorData>, Error> {
        Ok(Some(self.inner.load(self.file_index, &self.name)?))
    }
}
