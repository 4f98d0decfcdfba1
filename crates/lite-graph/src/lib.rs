pub mod node;
pub mod onnx;
pub mod operators;
pub mod tensor;
pub mod tflite;
pub mod weights;

use node::Node;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tensor::{DType, InputTensor, Tensor};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Shape mismatch: {0} vs {1}")]
    InputShapeError(String, String),
    #[error("DType mismatch: {0} vs {1}")]
    DTypeMismatchError(DType, DType),
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
    #[error("Invalid dtype: {0}")]
    InvalidDTypeError(DType),
    #[error("Unsupported dtype: {0}")]
    UnsupportedDTypeError(String),
    #[error("No such tensor: {0}")]
    NoSuchTensorError(String),
    #[error("Unresolved dimension")]
    UnresolvedDimensionError,
    #[error("Tensor {0} is consumed but not declared as a graph input")]
    UndeclaredInputError(String),
    #[error("Tensor {0} has no constant data")]
    CannotResolveDataError(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    SafeTensorError(#[from] safetensors::SafeTensorError),
    #[error("Invalid flatbuffer: {0}")]
    FlatbufferError(#[from] flatbuffers::InvalidFlatbuffer),
}

/// Storage precision for float constants in the serialized model.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WeightPrecision {
    #[default]
    F32,
    F16,
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub weight_precision: WeightPrecision,
    pub description: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            weight_precision: WeightPrecision::F32,
            description: format!("lite-graph {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A complete inference graph: declared inputs and named outputs.
pub struct Graph {
    pub name: String,
    pub inputs: Vec<Arc<InputTensor>>,
    pub outputs: Vec<(String, Arc<dyn Tensor>)>,
}

impl Graph {
    pub fn new(
        name: String,
        inputs: Vec<Arc<InputTensor>>,
        outputs: Vec<(String, Arc<dyn Tensor>)>,
    ) -> Self {
        Self {
            name,
            inputs,
            outputs,
        }
    }

    pub fn num_operators(&self) -> Result<usize, Error> {
        Ok(self.walk()?.nodes.len())
    }

    /// Operators in execution order and tensors in first-use order, with unique names.
    /// Traversal only follows `Vec`s, so the result is the same on every run.
    pub(crate) fn walk(&self) -> Result<GraphWalk<'_>, Error> {
        let mut visited = HashSet::new();
        let mut nodes = vec![];
        for (_, output) in &self.outputs {
            visit_node(output.as_ref(), &mut visited, &mut nodes);
        }

        let mut seen: HashSet<&dyn Tensor> = HashSet::new();
        let mut tensors = vec![];
        for input in &self.inputs {
            let tensor: &dyn Tensor = input.as_ref();
            if seen.insert(tensor) {
                tensors.push(tensor);
            }
        }
        for &node in &nodes {
            for tensor in node
                .get_input_tensors()
                .into_iter()
                .chain(node.get_output_tensors())
            {
                if tensor.is_input() && !seen.contains(&tensor) {
                    return Err(Error::UndeclaredInputError(
                        tensor.get_name().unwrap_or("?").to_string(),
                    ));
                }
                if seen.insert(tensor) {
                    tensors.push(tensor);
                }
            }
        }
        for (_, output) in &self.outputs {
            let tensor = output.as_ref();
            if seen.insert(tensor) {
                tensors.push(tensor);
            }
        }

        let mut names = HashMap::new();
        let mut taken = HashSet::new();
        for input in &self.inputs {
            let tensor: &dyn Tensor = input.as_ref();
            let name = claim_name(&mut taken, tensor.get_name().unwrap_or("input"));
            names.insert(tensor, name);
        }
        for (name, output) in &self.outputs {
            let tensor = output.as_ref();
            if !names.contains_key(&tensor) {
                let name = claim_name(&mut taken, name);
                names.insert(tensor, name);
            }
        }
        for (i, &tensor) in tensors.iter().enumerate() {
            if !names.contains_key(&tensor) {
                let base = match tensor.get_name() {
                    Some(name) => name.to_string(),
                    None => format!("tensor_{}", i),
                };
                let name = claim_name(&mut taken, &base);
                names.insert(tensor, name);
            }
        }

        Ok(GraphWalk {
            nodes,
            tensors,
            names,
        })
    }
}

pub(crate) struct GraphWalk<'a> {
    pub nodes: Vec<&'a dyn Node>,
    pub tensors: Vec<&'a dyn Tensor>,
    pub names: HashMap<&'a dyn Tensor, String>,
}

fn visit_node<'a>(
    tensor: &'a dyn Tensor,
    visited: &mut HashSet<&'a dyn Node>,
    nodes: &mut Vec<&'a dyn Node>,
) {
    if let Some(node) = tensor.as_node() {
        if visited.insert(node) {
            for input in node.get_input_tensors() {
                visit_node(input, visited, nodes);
            }
            nodes.push(node);
        }
    }
}

fn claim_name(taken: &mut HashSet<String>, base: &str) -> String {
    let mut name = base.to_string();
    let mut suffix = 1;
    while taken.contains(&name) {
        name = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    taken.insert(name.clone());
    name
}
