use crate::Error;
use crate::node::{
    BinaryKind, FusedActivation, Node, OpType, Padding, PoolKind, SingleOutputNode, UnaryKind,
    Window2D,
};
use crate::tensor::{DType, Dimension, Shape, Tensor};
use std::sync::Arc;

fn validate_float_dtype(tensor: &dyn Tensor) -> Result<(), Error> {
    if tensor.dtype() != DType::F32 {
        Err(Error::InvalidDTypeError(tensor.dtype()))?;
    }
    Ok(())
}

fn validate_same_dtype(a: &dyn Tensor, b: &dyn Tensor) -> Result<(), Error> {
    if a.dtype() != b.dtype() {
        Err(Error::DTypeMismatchError(a.dtype(), b.dtype()))?;
    }
    Ok(())
}

fn validate_rank(tensor: &dyn Tensor, rank: usize) -> Result<(), Error> {
    if tensor.rank() != rank {
        return Err(Error::InvalidInputError(format!(
            "expected a rank {} tensor, got {}",
            rank,
            tensor.shape()
        )));
    }
    Ok(())
}

fn validate_bias(bias: &Option<Arc<dyn Tensor>>, channels: usize) -> Result<(), Error> {
    if let Some(bias) = bias {
        validate_float_dtype(bias.as_ref())?;
        if bias.shape().resolve()? != vec![channels] {
            return Err(Error::InputShapeError(
                bias.shape().to_string(),
                format!("[{}]", channels),
            ));
        }
    }
    Ok(())
}

fn spatial_output_dims(input: &Shape, window: &Window2D) -> Result<(usize, usize), Error> {
    let (out_h, _) = window.padding.output_size(
        input[1].resolve()?,
        window.kernel.0,
        window.stride.0,
        window.dilation.0,
    );
    let (out_w, _) = window.padding.output_size(
        input[2].resolve()?,
        window.kernel.1,
        window.stride.1,
        window.dilation.1,
    );
    if out_h == 0 || out_w == 0 {
        return Err(Error::InvalidInputError(format!(
            "window {:?} does not fit input {}",
            window.kernel, input
        )));
    }
    Ok((out_h, out_w))
}

/// `output = input · weightsᵀ + bias`, weights laid out `[out, in]`.
pub struct FullyConnected {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    weights: Arc<dyn Tensor>,
    bias: Option<Arc<dyn Tensor>>,
    activation: FusedActivation,
    output_shape: Shape,
}

impl FullyConnected {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        weights: Arc<dyn Tensor>,
        bias: Option<Arc<dyn Tensor>>,
        activation: FusedActivation,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        validate_same_dtype(input.as_ref(), weights.as_ref())?;
        validate_rank(input.as_ref(), 2)?;
        validate_rank(weights.as_ref(), 2)?;
        let units = weights.shape()[0].resolve()?;
        if input.shape()[1].as_ref() != weights.shape()[1].as_ref() {
            return Err(Error::InputShapeError(
                input.shape().to_string(),
                weights.shape().to_string(),
            ));
        }
        validate_bias(&bias, units)?;
        let output_shape = Shape::new(vec![
            input.shape()[0].clone(),
            Arc::new(Dimension::from(units)),
        ]);
        Ok(Arc::new(Self {
            name,
            input,
            weights,
            bias,
            activation,
            output_shape,
        }))
    }
}

impl Node for FullyConnected {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        let mut inputs = vec![self.input.as_ref(), self.weights.as_ref()];
        if let Some(bias) = &self.bias {
            inputs.push(bias.as_ref());
        }
        inputs
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::FullyConnected {
            activation: self.activation,
        }
    }
}

impl SingleOutputNode for FullyConnected {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// NHWC convolution with an `[out, kh, kw, in]` filter.
pub struct Conv2D {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    filter: Arc<dyn Tensor>,
    bias: Option<Arc<dyn Tensor>>,
    window: Window2D,
    activation: FusedActivation,
    output_shape: Shape,
}

impl Conv2D {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        filter: Arc<dyn Tensor>,
        bias: Option<Arc<dyn Tensor>>,
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
        activation: FusedActivation,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        validate_same_dtype(input.as_ref(), filter.as_ref())?;
        validate_rank(input.as_ref(), 4)?;
        validate_rank(filter.as_ref(), 4)?;
        let filter_dims = filter.shape().resolve()?;
        if input.shape()[3].resolve()? != filter_dims[3] {
            return Err(Error::InputShapeError(
                input.shape().to_string(),
                filter.shape().to_string(),
            ));
        }
        validate_bias(&bias, filter_dims[0])?;
        let window = Window2D {
            kernel: (filter_dims[1], filter_dims[2]),
            stride,
            dilation,
            padding,
        };
        let (out_h, out_w) = spatial_output_dims(input.shape(), &window)?;
        let output_shape = Shape::new(vec![
            input.shape()[0].clone(),
            Arc::new(Dimension::from(out_h)),
            Arc::new(Dimension::from(out_w)),
            Arc::new(Dimension::from(filter_dims[0])),
        ]);
        Ok(Arc::new(Self {
            name,
            input,
            filter,
            bias,
            window,
            activation,
            output_shape,
        }))
    }
}

impl Node for Conv2D {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        let mut inputs = vec![self.input.as_ref(), self.filter.as_ref()];
        if let Some(bias) = &self.bias {
            inputs.push(bias.as_ref());
        }
        inputs
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Conv2D {
            window: self.window,
            activation: self.activation,
        }
    }
}

impl SingleOutputNode for Conv2D {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// NHWC depthwise convolution with a `[1, kh, kw, in * multiplier]` filter.
pub struct DepthwiseConv2D {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    filter: Arc<dyn Tensor>,
    bias: Option<Arc<dyn Tensor>>,
    window: Window2D,
    depth_multiplier: usize,
    activation: FusedActivation,
    output_shape: Shape,
}

impl DepthwiseConv2D {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        filter: Arc<dyn Tensor>,
        bias: Option<Arc<dyn Tensor>>,
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
        activation: FusedActivation,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        validate_same_dtype(input.as_ref(), filter.as_ref())?;
        validate_rank(input.as_ref(), 4)?;
        validate_rank(filter.as_ref(), 4)?;
        let filter_dims = filter.shape().resolve()?;
        let channels = input.shape()[3].resolve()?;
        if filter_dims[0] != 1 || channels == 0 || filter_dims[3] % channels != 0 {
            return Err(Error::InputShapeError(
                input.shape().to_string(),
                filter.shape().to_string(),
            ));
        }
        validate_bias(&bias, filter_dims[3])?;
        let window = Window2D {
            kernel: (filter_dims[1], filter_dims[2]),
            stride,
            dilation,
            padding,
        };
        let (out_h, out_w) = spatial_output_dims(input.shape(), &window)?;
        let output_shape = Shape::new(vec![
            input.shape()[0].clone(),
            Arc::new(Dimension::from(out_h)),
            Arc::new(Dimension::from(out_w)),
            Arc::new(Dimension::from(filter_dims[3])),
        ]);
        Ok(Arc::new(Self {
            name,
            input,
            filter,
            bias,
            window,
            depth_multiplier: filter_dims[3] / channels,
            activation,
            output_shape,
        }))
    }
}

impl Node for DepthwiseConv2D {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        let mut inputs = vec![self.input.as_ref(), self.filter.as_ref()];
        if let Some(bias) = &self.bias {
            inputs.push(bias.as_ref());
        }
        inputs
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::DepthwiseConv2D {
            window: self.window,
            depth_multiplier: self.depth_multiplier,
            activation: self.activation,
        }
    }
}

impl SingleOutputNode for DepthwiseConv2D {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

pub struct Pool2D {
    name: Option<String>,
    kind: PoolKind,
    input: Arc<dyn Tensor>,
    window: Window2D,
    output_shape: Shape,
}

impl Pool2D {
    pub fn new(
        name: Option<String>,
        kind: PoolKind,
        input: Arc<dyn Tensor>,
        pool_size: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        validate_rank(input.as_ref(), 4)?;
        let window = Window2D {
            kernel: pool_size,
            stride,
            dilation: (1, 1),
            padding,
        };
        let (out_h, out_w) = spatial_output_dims(input.shape(), &window)?;
        let output_shape = Shape::new(vec![
            input.shape()[0].clone(),
            Arc::new(Dimension::from(out_h)),
            Arc::new(Dimension::from(out_w)),
            input.shape()[3].clone(),
        ]);
        Ok(Arc::new(Self {
            name,
            kind,
            input,
            window,
            output_shape,
        }))
    }
}

impl Node for Pool2D {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Pool2D {
            kind: self.kind,
            window: self.window,
        }
    }
}

impl SingleOutputNode for Pool2D {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

pub struct Mean {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    axes: Vec<i64>,
    keep_dims: bool,
    output_shape: Shape,
}

impl Mean {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        axes: &[isize],
        keep_dims: bool,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        let rank = input.rank();
        let mut normalized = vec![];
        for &axis in axes {
            if axis >= rank as isize || axis < -(rank as isize) {
                return Err(Error::InvalidInputError(format!(
                    "axis {} out of range for {}",
                    axis,
                    input.shape()
                )));
            }
            let axis = input.shape().normalize_axis(axis);
            if !normalized.contains(&(axis as i64)) {
                normalized.push(axis as i64);
            }
        }
        normalized.sort();
        let mut dims = vec![];
        for (i, dim) in input.shape().dims.iter().enumerate() {
            if normalized.contains(&(i as i64)) {
                if keep_dims {
                    dims.push(Arc::new(Dimension::from(1)));
                }
            } else {
                dims.push(dim.clone());
            }
        }
        Ok(Arc::new(Self {
            name,
            input,
            axes: normalized,
            keep_dims,
            output_shape: Shape::new(dims),
        }))
    }
}

impl Node for Mean {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Mean {
            axes: self.axes.clone(),
            keep_dims: self.keep_dims,
        }
    }
}

impl SingleOutputNode for Mean {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// Reshape to `new_shape`; a single `-1` entry is inferred. A leading `-1` keeps a dynamic
/// batch dimension dynamic.
pub struct Reshape {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    new_shape: Vec<i64>,
    output_shape: Shape,
}

impl Reshape {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        new_shape: Vec<i64>,
    ) -> Result<Arc<Self>, Error> {
        let total = input.shape().num_elements()?;
        let inferred: Vec<usize> = new_shape
            .iter()
            .enumerate()
            .filter(|(_, x)| **x == -1)
            .map(|(i, _)| i)
            .collect();
        if inferred.len() > 1 || new_shape.iter().any(|x| *x < -1 || *x == 0) {
            return Err(Error::InvalidInputError(format!(
                "invalid reshape target {:?}",
                new_shape
            )));
        }
        let known: usize = new_shape
            .iter()
            .filter(|x| **x > 0)
            .map(|x| *x as usize)
            .product();
        let mut dims = vec![];
        for (i, value) in new_shape.iter().enumerate() {
            if *value == -1 {
                if known == 0 || total % known != 0 {
                    return Err(Error::InputShapeError(
                        input.shape().to_string(),
                        format!("{:?}", new_shape),
                    ));
                }
                let size = total / known;
                if i == 0 && input.rank() > 0 && input.shape()[0].is_dynamic() {
                    dims.push(input.shape()[0].clone());
                } else {
                    dims.push(Arc::new(Dimension::from(size)));
                }
            } else {
                dims.push(Arc::new(Dimension::from(*value as usize)));
            }
        }
        let output_shape = Shape::new(dims);
        if output_shape.num_elements()? != total {
            return Err(Error::InputShapeError(
                input.shape().to_string(),
                output_shape.to_string(),
            ));
        }
        Ok(Arc::new(Self {
            name,
            input,
            new_shape,
            output_shape,
        }))
    }
}

impl Node for Reshape {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Reshape {
            new_shape: self.new_shape.clone(),
        }
    }
}

impl SingleOutputNode for Reshape {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// Broadcasting elementwise binary operator.
pub struct Binary {
    name: Option<String>,
    kind: BinaryKind,
    a: Arc<dyn Tensor>,
    b: Arc<dyn Tensor>,
    activation: FusedActivation,
    output_shape: Shape,
}

impl Binary {
    pub fn new(
        name: Option<String>,
        kind: BinaryKind,
        a: Arc<dyn Tensor>,
        b: Arc<dyn Tensor>,
        activation: FusedActivation,
    ) -> Result<Arc<Self>, Error> {
        validate_same_dtype(a.as_ref(), b.as_ref())?;
        let output_shape = a.shape().broadcast(b.shape())?;
        Ok(Arc::new(Self {
            name,
            kind,
            a,
            b,
            activation,
            output_shape,
        }))
    }

    pub fn add(
        name: Option<String>,
        a: Arc<dyn Tensor>,
        b: Arc<dyn Tensor>,
    ) -> Result<Arc<Self>, Error> {
        Self::new(name, BinaryKind::Add, a, b, FusedActivation::None)
    }

    pub fn mul(
        name: Option<String>,
        a: Arc<dyn Tensor>,
        b: Arc<dyn Tensor>,
    ) -> Result<Arc<Self>, Error> {
        Self::new(name, BinaryKind::Mul, a, b, FusedActivation::None)
    }
}

impl Node for Binary {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.a.as_ref(), self.b.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Binary {
            kind: self.kind,
            activation: self.activation,
        }
    }
}

impl SingleOutputNode for Binary {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.a.dtype()
    }
}

pub struct Concatenation {
    name: Option<String>,
    inputs: Vec<Arc<dyn Tensor>>,
    axis: usize,
    output_shape: Shape,
}

impl Concatenation {
    pub fn new(
        name: Option<String>,
        inputs: Vec<Arc<dyn Tensor>>,
        axis: isize,
    ) -> Result<Arc<Self>, Error> {
        let first = inputs
            .first()
            .ok_or(Error::InvalidInputError("nothing to concatenate".to_string()))?
            .clone();
        let rank = first.rank();
        if axis >= rank as isize || axis < -(rank as isize) {
            return Err(Error::InvalidInputError(format!(
                "axis {} out of range for {}",
                axis,
                first.shape()
            )));
        }
        let axis = first.shape().normalize_axis(axis);
        let mut total = 0;
        for input in &inputs {
            validate_same_dtype(first.as_ref(), input.as_ref())?;
            validate_rank(input.as_ref(), rank)?;
            for i in 0..rank {
                if i != axis && first.shape()[i].as_ref() != input.shape()[i].as_ref() {
                    return Err(Error::InputShapeError(
                        first.shape().to_string(),
                        input.shape().to_string(),
                    ));
                }
            }
            total += input.shape()[axis].resolve()?;
        }
        let mut dims = first.shape().dims.clone();
        dims[axis] = Arc::new(Dimension::from(total));
        Ok(Arc::new(Self {
            name,
            inputs,
            axis,
            output_shape: Shape::new(dims),
        }))
    }
}

impl Node for Concatenation {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        self.inputs.iter().map(|x| x.as_ref()).collect()
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Concatenation {
            axis: self.axis as i64,
        }
    }
}

impl SingleOutputNode for Concatenation {
    fn get_output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn get_output_dtype(&self) -> DType {
        self.inputs[0].dtype()
    }
}

pub struct Unary {
    name: Option<String>,
    kind: UnaryKind,
    input: Arc<dyn Tensor>,
}

impl Unary {
    pub fn new(
        name: Option<String>,
        kind: UnaryKind,
        input: Arc<dyn Tensor>,
    ) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        Ok(Arc::new(Self { name, kind, input }))
    }
}

impl Node for Unary {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Unary(self.kind)
    }
}

impl SingleOutputNode for Unary {
    fn get_output_shape(&self) -> &Shape {
        self.input.shape()
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// Softmax over the last axis.
pub struct Softmax {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    beta: f32,
}

impl Softmax {
    pub fn new(name: Option<String>, input: Arc<dyn Tensor>) -> Result<Arc<Self>, Error> {
        validate_float_dtype(input.as_ref())?;
        if input.rank() == 0 {
            return Err(Error::InvalidInputError(
                "softmax needs at least one axis".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            name,
            input,
            beta: 1.0,
        }))
    }
}

impl Node for Softmax {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Softmax { beta: self.beta }
    }
}

impl SingleOutputNode for Softmax {
    fn get_output_shape(&self) -> &Shape {
        self.input.shape()
    }

    fn get_output_dtype(&self) -> DType {
        self.input.dtype()
    }
}

/// Widens a float16 tensor to float32.
pub struct Dequantize {
    name: Option<String>,
    input: Arc<dyn Tensor>,
}

impl Dequantize {
    pub fn new(name: Option<String>, input: Arc<dyn Tensor>) -> Result<Arc<Self>, Error> {
        if input.dtype() != DType::F16 {
            Err(Error::InvalidDTypeError(input.dtype()))?;
        }
        Ok(Arc::new(Self { name, input }))
    }
}

impl Node for Dequantize {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_output_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_op_type(&self) -> OpType {
        OpType::Dequantize
    }
}

impl SingleOutputNode for Dequantize {
    fn get_output_shape(&self) -> &Shape {
        self.input.shape()
    }

    fn get_output_dtype(&self) -> DType {
        DType::F32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{ConstantTensor, InputTensor, TensorData};

    fn batch_input(features: &[usize]) -> Arc<dyn Tensor> {
        let mut dims = vec![Dimension::dynamic(1, "batch")];
        dims.extend(features.iter().map(|x| Arc::new(Dimension::from(*x))));
        InputTensor::new("input".to_string(), DType::F32, Shape::new(dims))
    }

    fn constant(dims: &[usize]) -> Arc<dyn Tensor> {
        let n = dims.iter().product();
        ConstantTensor::new(None, TensorData::from_f32(vec![0.5; n], dims).unwrap())
    }

    #[test]
    fn fully_connected_infers_units() {
        let fc = FullyConnected::new(
            None,
            batch_input(&[6]),
            constant(&[4, 6]),
            Some(constant(&[4])),
            FusedActivation::Relu,
        )
        .unwrap();
        assert_eq!(fc.shape().rank(), 2);
        assert!(fc.shape()[0].is_dynamic());
        assert_eq!(fc.shape()[1].value, Some(4));
    }

    #[test]
    fn fully_connected_rejects_wrong_fan_in() {
        let result = FullyConnected::new(
            None,
            batch_input(&[5]),
            constant(&[4, 6]),
            None,
            FusedActivation::None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn conv_same_padding_keeps_spatial_size() {
        let conv = Conv2D::new(
            None,
            batch_input(&[8, 8, 3]),
            constant(&[16, 3, 3, 3]),
            Some(constant(&[16])),
            (1, 1),
            (1, 1),
            Padding::Same,
            FusedActivation::None,
        )
        .unwrap();
        let dims: Vec<_> = conv.shape().dims.iter().map(|x| x.value).collect();
        assert_eq!(dims, vec![Some(1), Some(8), Some(8), Some(16)]);
    }

    #[test]
    fn depthwise_multiplier_from_filter() {
        let conv = DepthwiseConv2D::new(
            None,
            batch_input(&[6, 6, 4]),
            constant(&[1, 3, 3, 8]),
            None,
            (2, 2),
            (1, 1),
            Padding::Valid,
            FusedActivation::Relu6,
        )
        .unwrap();
        match conv.get_op_type() {
            OpType::DepthwiseConv2D {
                depth_multiplier, ..
            } => assert_eq!(depth_multiplier, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(conv.shape()[1].value, Some(2));
        assert_eq!(conv.shape()[3].value, Some(8));
    }

    #[test]
    fn reshape_keeps_dynamic_batch() {
        let flat = Reshape::new(None, batch_input(&[4, 4, 2]), vec![-1, 32]).unwrap();
        assert!(flat.shape()[0].is_dynamic());
        assert_eq!(flat.shape()[1].value, Some(32));
        assert!(Reshape::new(None, batch_input(&[4, 4, 2]), vec![-1, 5]).is_err());
        assert!(Reshape::new(None, batch_input(&[4]), vec![-1, -1]).is_err());
    }

    #[test]
    fn mean_drops_reduced_axes() {
        let mean = Mean::new(None, batch_input(&[5, 5, 7]), &[1, 2], false).unwrap();
        assert_eq!(mean.shape().rank(), 2);
        assert_eq!(mean.shape()[1].value, Some(7));
        let kept = Mean::new(None, batch_input(&[5, 5, 7]), &[-3, -2], true).unwrap();
        assert_eq!(kept.shape().rank(), 4);
        assert_eq!(kept.get_op_type(), OpType::Mean { axes: vec![1, 2], keep_dims: true });
    }

    #[test]
    fn concatenation_sums_axis() {
        let concat =
            Concatenation::new(None, vec![batch_input(&[3]), batch_input(&[5])], -1).unwrap();
        assert_eq!(concat.shape()[1].value, Some(8));
    }

    #[test]
    fn dequantize_requires_half_input() {
        assert!(Dequantize::new(None, constant(&[2])).is_err());
        let half = ConstantTensor::new(
            None,
            TensorData::from_f32(vec![1.0, 2.0], &[2]).unwrap().cast_f16().unwrap(),
        );
        let dq = Dequantize::new(None, half).unwrap();
        assert_eq!(dq.dtype(), DType::F32);
    }
}
