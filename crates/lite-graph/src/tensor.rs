use crate::Error;
use crate::node::{Node, SingleOutputNode};
use core::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Dimension {
    pub value: Option<usize>,
    pub name: Option<String>,
}

impl Dimension {
    pub fn new(value: Option<usize>, name: Option<String>) -> Arc<Self> {
        Arc::new(Dimension { value, name })
    }

    /// A dimension that is fixed to `value` in the serialized shape but may vary at runtime.
    pub fn dynamic(value: usize, name: &str) -> Arc<Self> {
        Self::new(Some(value), Some(name.to_string()))
    }

    pub fn resolve(&self) -> Result<usize, Error> {
        self.value.ok_or(Error::UnresolvedDimensionError)
    }

    pub fn is_dynamic(&self) -> bool {
        self.name.is_some() || self.value.is_none()
    }

    fn is_static_one(&self) -> bool {
        self.value == Some(1) && self.name.is_none()
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Self {
            value: Some(value),
            name: None,
        }
    }
}

impl PartialEq for &Dimension {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(*self, *other)
            || if let (Some(a), Some(b)) = (self.value, other.value) {
                a == b
            } else {
                false
            }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}", name)
        } else if let Some(value) = self.value {
            write!(f, "{}", value)
        } else {
            write!(f, "?")
        }
    }
}

#[derive(Clone, Debug)]
pub struct Shape {
    pub dims: Vec<Arc<Dimension>>,
}

impl Shape {
    pub fn new(dims: Vec<Arc<Dimension>>) -> Self {
        Self { dims }
    }

    pub fn resolve(&self) -> Result<Vec<usize>, Error> {
        let mut res = vec![];
        for dim in &self.dims {
            res.push(dim.resolve()?);
        }
        Ok(res)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, index: isize) -> &Arc<Dimension> {
        &self.dims[self.normalize_axis(index)]
    }

    pub fn normalize_axis(&self, axis: isize) -> usize {
        if axis < 0 {
            (self.rank() as isize + axis) as usize
        } else {
            axis as usize
        }
    }

    pub fn num_elements(&self) -> Result<usize, Error> {
        let mut v = 1;
        for dim in &self.dims {
            v *= dim.resolve()?;
        }
        Ok(v)
    }

    pub fn has_dynamic_dims(&self) -> bool {
        self.dims.iter().any(|x| x.is_dynamic())
    }

    /// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape, Error> {
        let rank = self.rank().max(other.rank());
        let mut dims = Vec::with_capacity(rank);
        for i in 0..rank {
            let a = (i + self.rank()).checked_sub(rank).map(|x| &self.dims[x]);
            let b = (i + other.rank()).checked_sub(rank).map(|x| &other.dims[x]);
            let dim = match (a, b) {
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (Some(a), Some(b)) => {
                    if b.is_static_one() {
                        a.clone()
                    } else if a.is_static_one() {
                        b.clone()
                    } else if a.as_ref() == b.as_ref() {
                        a.clone()
                    } else {
                        return Err(Error::InputShapeError(self.to_string(), other.to_string()));
                    }
                }
                (None, None) => unreachable!(),
            };
            dims.push(dim);
        }
        Ok(Shape { dims })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.dims
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.dims.len() == other.dims.len()
            && self
                .dims
                .iter()
                .zip(other.dims.iter())
                .all(|(a, b)| a.as_ref() == b.as_ref())
    }
}

impl core::ops::Index<usize> for Shape {
    type Output = Arc<Dimension>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

impl<T: Clone> From<&[T]> for Shape
where
    Dimension: From<T>,
{
    fn from(value: &[T]) -> Self {
        Shape {
            dims: value
                .iter()
                .map(|x| Arc::new(Dimension::from(x.clone())))
                .collect(),
        }
    }
}

impl<T> From<Vec<T>> for Shape
where
    Dimension: From<T>,
{
    fn from(value: Vec<T>) -> Self {
        Shape {
            dims: value
                .into_iter()
                .map(|x| Arc::new(Dimension::from(x)))
                .collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I32,
    I64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }

    /// Weight dtypes are widened to the nearest dtype the graph carries.
    pub fn from_safetensors(dtype: safetensors::Dtype) -> Result<Self, Error> {
        match dtype {
            safetensors::Dtype::F32 | safetensors::Dtype::BF16 | safetensors::Dtype::F64 => {
                Ok(DType::F32)
            }
            safetensors::Dtype::F16 => Ok(DType::F16),
            safetensors::Dtype::I32 => Ok(DType::I32),
            safetensors::Dtype::I64 => Ok(DType::I64),
            other => Err(Error::UnsupportedDTypeError(format!("{:?}", other))),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub trait Tensor {
    fn dtype(&self) -> DType;
    fn shape(&self) -> &Shape;
    fn rank(&self) -> usize {
        self.shape().rank()
    }

    fn get_name(&self) -> Option<&str> {
        None
    }

    /// The operator producing this tensor, if any.
    fn as_node(&self) -> Option<&dyn Node> {
        None
    }

    fn is_input(&self) -> bool {
        false
    }

    fn is_constant(&self) -> bool {
        false
    }

    fn resolve_data(&self) -> Result<Option<TensorData>, Error> {
        Ok(None)
    }
}

impl PartialEq for &dyn Tensor {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(*self, *other)
    }
}

impl Eq for &dyn Tensor {}

impl Hash for &dyn Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let a: *const _ = *self;
        let address: *const u8 = a.cast();
        state.write_usize(address.addr());
    }
}

impl<T: SingleOutputNode> Tensor for T {
    fn dtype(&self) -> DType {
        self.get_output_dtype()
    }

    fn shape(&self) -> &Shape {
        self.get_output_shape()
    }

    fn get_name(&self) -> Option<&str> {
        <Self as Node>::get_name(self)
    }

    fn as_node(&self) -> Option<&dyn Node> {
        Some(self)
    }
}

pub struct InputTensor {
    name: String,
    data_type: DType,
    shape: Shape,
}

impl InputTensor {
    pub fn new(name: String, data_type: DType, shape: Shape) -> Arc<Self> {
        Arc::new(Self {
            name,
            data_type,
            shape,
        })
    }
}

impl Tensor for InputTensor {
    fn dtype(&self) -> DType {
        self.data_type
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn get_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn is_input(&self) -> bool {
        true
    }
}

pub struct ConstantTensor {
    name: Option<String>,
    data: TensorData,
}

impl ConstantTensor {
    pub fn new(name: Option<String>, data: TensorData) -> Arc<Self> {
        Arc::new(Self { name, data })
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }
}

impl Tensor for ConstantTensor {
    fn dtype(&self) -> DType {
        self.data.dtype()
    }

    fn shape(&self) -> &Shape {
        self.data.shape()
    }

    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn is_constant(&self) -> bool {
        true
    }

    fn resolve_data(&self) -> Result<Option<TensorData>, Error> {
        Ok(Some(self.data.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorDataValue {
    F32(Vec<f32>),
    F16(Vec<half::f16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl TensorDataValue {
    pub fn len(&self) -> usize {
        match self {
            TensorDataValue::F32(v) => v.len(),
            TensorDataValue::F16(v) => v.len(),
            TensorDataValue::I32(v) => v.len(),
            TensorDataValue::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorDataValue::F32(_) => DType::F32,
            TensorDataValue::F16(_) => DType::F16,
            TensorDataValue::I32(_) => DType::I32,
            TensorDataValue::I64(_) => DType::I64,
        }
    }

    pub fn get_raw_encoding(&self) -> Vec<u8> {
        match self {
            TensorDataValue::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorDataValue::F16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorDataValue::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorDataValue::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    pub fn from_raw_encoding(dtype: DType, data: &[u8]) -> Result<Self, Error> {
        if data.len() % dtype.size() != 0 {
            return Err(Error::InvalidInputError(format!(
                "{} bytes is not a whole number of {} elements",
                data.len(),
                dtype
            )));
        }
        Ok(match dtype {
            DType::F32 => TensorDataValue::F32(
                data.chunks_exact(4)
                    .map(|x| f32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                    .collect(),
            ),
            DType::F16 => TensorDataValue::F16(
                data.chunks_exact(2)
                    .map(|x| half::f16::from_le_bytes([x[0], x[1]]))
                    .collect(),
            ),
            DType::I32 => TensorDataValue::I32(
                data.chunks_exact(4)
                    .map(|x| i32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                    .collect(),
            ),
            DType::I64 => TensorDataValue::I64(
                data.chunks_exact(8)
                    .map(|x| i64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]]))
                    .collect(),
            ),
        })
    }

    fn permute(&self, dims: &[usize], perm: &[usize]) -> Self {
        match self {
            TensorDataValue::F32(v) => TensorDataValue::F32(permute_values(v, dims, perm)),
            TensorDataValue::F16(v) => TensorDataValue::F16(permute_values(v, dims, perm)),
            TensorDataValue::I32(v) => TensorDataValue::I32(permute_values(v, dims, perm)),
            TensorDataValue::I64(v) => TensorDataValue::I64(permute_values(v, dims, perm)),
        }
    }
}

impl From<Vec<f32>> for TensorDataValue {
    fn from(value: Vec<f32>) -> Self {
        TensorDataValue::F32(value)
    }
}

impl From<Vec<half::f16>> for TensorDataValue {
    fn from(value: Vec<half::f16>) -> Self {
        TensorDataValue::F16(value)
    }
}

impl From<Vec<i32>> for TensorDataValue {
    fn from(value: Vec<i32>) -> Self {
        TensorDataValue::I32(value)
    }
}

impl From<Vec<i64>> for TensorDataValue {
    fn from(value: Vec<i64>) -> Self {
        TensorDataValue::I64(value)
    }
}

fn strides_for(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Reorder row-major `values` of shape `dims` so that output axis `i` is input axis `perm[i]`.
fn permute_values<T: Copy>(values: &[T], dims: &[usize], perm: &[usize]) -> Vec<T> {
    let in_strides = strides_for(dims);
    let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; out_dims.len()];
    for _ in 0..values.len() {
        let offset: usize = index
            .iter()
            .zip(perm)
            .map(|(&i, &p)| i * in_strides[p])
            .sum();
        out.push(values[offset]);
        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            if index[axis] < out_dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct TensorData {
    value: TensorDataValue,
    shape: Shape,
}

impl TensorData {
    pub fn new(value: TensorDataValue, shape: Shape) -> Result<Self, Error> {
        let num_elements = shape.num_elements()?;
        if num_elements != value.len() {
            return Err(Error::InvalidInputError(format!(
                "{} values do not fill shape {}",
                value.len(),
                shape
            )));
        }
        Ok(Self { value, shape })
    }

    pub fn from_f32(values: Vec<f32>, dims: &[usize]) -> Result<Self, Error> {
        Self::new(TensorDataValue::F32(values), Shape::from(dims))
    }

    pub fn from_i32(values: Vec<i32>, dims: &[usize]) -> Result<Self, Error> {
        Self::new(TensorDataValue::I32(values), Shape::from(dims))
    }

    pub fn fill<T>(shape: Shape, value: T) -> Result<Self, Error>
    where
        T: Copy,
        TensorDataValue: From<Vec<T>>,
    {
        let num_elements = shape.num_elements()?;
        Self::new(TensorDataValue::from(vec![value; num_elements]), shape)
    }

    pub fn dtype(&self) -> DType {
        self.value.dtype()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn value(&self) -> &TensorDataValue {
        &self.value
    }

    pub fn dims(&self) -> Vec<usize> {
        // Constant data never carries unresolved dimensions
        self.shape.dims.iter().map(|x| x.value.unwrap_or(0)).collect()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>, Error> {
        match &self.value {
            TensorDataValue::F32(x) => Ok(x.clone()),
            TensorDataValue::F16(x) => Ok(x.iter().map(|x| x.to_f32()).collect()),
            _ => Err(Error::InvalidDTypeError(self.dtype())),
        }
    }

    pub fn to_int_vec(&self) -> Result<Vec<i64>, Error> {
        match &self.value {
            TensorDataValue::I32(x) => Ok(x.iter().map(|x| *x as i64).collect()),
            TensorDataValue::I64(x) => Ok(x.clone()),
            _ => Err(Error::InvalidDTypeError(self.dtype())),
        }
    }

    pub fn to_raw_encoding(&self) -> Vec<u8> {
        self.value.get_raw_encoding()
    }

    pub fn from_raw_encoding(dtype: DType, data: &[u8], shape: Shape) -> Result<Self, Error> {
        Self::new(TensorDataValue::from_raw_encoding(dtype, data)?, shape)
    }

    pub fn reshape(&self, shape: Shape) -> Result<Self, Error> {
        Self::new(self.value.clone(), shape)
    }

    pub fn permute(&self, perm: &[usize]) -> Result<Self, Error> {
        let dims = self.shape.resolve()?;
        if perm.len() != dims.len() || (0..dims.len()).any(|x| !perm.contains(&x)) {
            return Err(Error::InvalidInputError(format!(
                "{:?} is not a permutation of rank {}",
                perm,
                dims.len()
            )));
        }
        let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
        Self::new(self.value.permute(&dims, perm), Shape::from(out_dims))
    }

    pub fn cast_f16(&self) -> Result<Self, Error> {
        let value = match &self.value {
            TensorDataValue::F32(x) => {
                TensorDataValue::F16(x.iter().map(|x| half::f16::from_f32(*x)).collect())
            }
            TensorDataValue::F16(_) => self.value.clone(),
            _ => return Err(Error::InvalidDTypeError(self.dtype())),
        };
        Self::new(value, self.shape.clone())
    }

    pub fn cast_f32(&self) -> Result<Self, Error> {
        Self::new(TensorDataValue::F32(self.to_f32_vec()?), self.shape.clone())
    }

    pub fn from_safetensors_view(tensor: safetensors::tensor::TensorView) -> Result<Self, Error> {
        let shape = Shape::from(tensor.shape());
        let data = tensor.data();
        let value = match tensor.dtype() {
            safetensors::Dtype::BF16 => TensorDataValue::F32(
                data.chunks_exact(2)
                    .map(|x| half::bf16::from_le_bytes([x[0], x[1]]).to_f32())
                    .collect(),
            ),
            safetensors::Dtype::F64 => TensorDataValue::F32(
                data.chunks_exact(8)
                    .map(|x| {
                        f64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]]) as f32
                    })
                    .collect(),
            ),
            dtype => TensorDataValue::from_raw_encoding(DType::from_safetensors(dtype)?, data)?,
        };
        Self::new(value, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_keeps_dynamic_batch() {
        let a = Shape::new(vec![Dimension::dynamic(1, "batch"), Arc::new(Dimension::from(8))]);
        let b = Shape::from(vec![8usize]);
        let out = a.broadcast(&b).unwrap();
        assert_eq!(out.rank(), 2);
        assert!(out.dims[0].is_dynamic());
        assert_eq!(out.dims[1].value, Some(8));

        let c = Shape::from(vec![1usize, 8]);
        let out = a.broadcast(&c).unwrap();
        assert!(out.dims[0].is_dynamic());
    }

    #[test]
    fn broadcast_rejects_mismatch() {
        let a = Shape::from(vec![2usize, 3]);
        let b = Shape::from(vec![4usize]);
        assert!(a.broadcast(&b).is_err());
    }

    #[test]
    fn permute_transposes_matrix() {
        let data = TensorData::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let transposed = data.permute(&[1, 0]).unwrap();
        assert_eq!(transposed.dims(), vec![3, 2]);
        assert_eq!(
            transposed.to_f32_vec().unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
    }

    #[test]
    fn permute_hwio_to_ohwi() {
        // [H=1, W=2, I=2, O=3]
        let values: Vec<f32> = (0..12).map(|x| x as f32).collect();
        let data = TensorData::from_f32(values, &[1, 2, 2, 3]).unwrap();
        let ohwi = data.permute(&[3, 0, 1, 2]).unwrap();
        assert_eq!(ohwi.dims(), vec![3, 1, 2, 2]);
        let v = ohwi.to_f32_vec().unwrap();
        // element [o=1, h=0, w=1, i=0] came from [h=0, w=1, i=0, o=1] = 6 + 0 + 1
        assert_eq!(v[1 * 4 + 1 * 2], 7.0);
    }

    #[test]
    fn data_length_must_match_shape() {
        assert!(TensorData::from_f32(vec![1.0, 2.0], &[3]).is_err());
    }

    #[test]
    fn raw_encoding_is_little_endian() {
        let data = TensorData::from_i32(vec![1, -2], &[2]).unwrap();
        let raw = data.to_raw_encoding();
        assert_eq!(raw, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        let back = TensorData::from_raw_encoding(DType::I32, &raw, Shape::from(vec![2usize])).unwrap();
        assert_eq!(back.to_int_vec().unwrap(), vec![1, -2]);
    }
}
