use crate::tensor::Tensor;
use crate::tensor::{DType, Shape};
use std::hash::{Hash, Hasher};

/// Activation folded into the operator that precedes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum_macros::Display)]
pub enum FusedActivation {
    #[default]
    None,
    Relu,
    Relu6,
    Tanh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    /// Output size and leading pad for one spatial axis, following TensorFlow's rules.
    pub fn output_size(
        &self,
        input: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
    ) -> (usize, usize) {
        let effective_kernel = (kernel - 1) * dilation + 1;
        match self {
            Padding::Same => {
                let output = input.div_ceil(stride);
                let needed = ((output - 1) * stride + effective_kernel).saturating_sub(input);
                (output, needed / 2)
            }
            Padding::Valid => {
                let output = if input >= effective_kernel {
                    (input - effective_kernel) / stride + 1
                } else {
                    0
                };
                (output, 0)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window2D {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub dilation: (usize, usize),
    pub padding: Padding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum UnaryKind {
    Relu,
    Relu6,
    Logistic,
    Tanh,
    Elu,
    HardSwish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum BinaryKind {
    Add,
    Mul,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum PoolKind {
    Max,
    Average,
}

/// Format-independent description of what an operator computes.
#[derive(Clone, Debug, PartialEq)]
pub enum OpType {
    FullyConnected {
        activation: FusedActivation,
    },
    Conv2D {
        window: Window2D,
        activation: FusedActivation,
    },
    DepthwiseConv2D {
        window: Window2D,
        depth_multiplier: usize,
        activation: FusedActivation,
    },
    Pool2D {
        kind: PoolKind,
        window: Window2D,
    },
    Mean {
        axes: Vec<i64>,
        keep_dims: bool,
    },
    Reshape {
        new_shape: Vec<i64>,
    },
    Binary {
        kind: BinaryKind,
        activation: FusedActivation,
    },
    Concatenation {
        axis: i64,
    },
    Unary(UnaryKind),
    Softmax {
        beta: f32,
    },
    Dequantize,
}

pub trait Node {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor>;

    fn get_output_tensors(&self) -> Vec<&dyn Tensor>;

    fn get_name(&self) -> Option<&str> {
        None
    }

    fn get_op_type(&self) -> OpType;
}

impl PartialEq for &dyn Node {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(*self, *other)
    }
}

impl Eq for &dyn Node {}

impl Hash for &dyn Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let a: *const _ = *self;
        let address: *const u8 = a.cast();
        state.write_usize(address.addr());
    }
}

pub(crate) trait SingleOutputNode: Node {
    fn get_output_shape(&self) -> &Shape;

    fn get_output_dtype(&self) -> DType;
}

#[cfg(test)]
mod tests {
    use super::Padding;

    #[test]
    fn same_padding_matches_tensorflow() {
        // 5 wide, kernel 3, stride 2: out 3, total pad 2, pad before 1
        assert_eq!(Padding::Same.output_size(5, 3, 2, 1), (3, 1));
        // 4 wide, kernel 3, stride 2: out 2, total pad 1, pad before 0
        assert_eq!(Padding::Same.output_size(4, 3, 2, 1), (2, 0));
    }

    #[test]
    fn valid_padding_shrinks_output() {
        assert_eq!(Padding::Valid.output_size(5, 3, 1, 1), (3, 0));
        assert_eq!(Padding::Valid.output_size(5, 3, 1, 2), (1, 0));
        assert_eq!(Padding::Valid.output_size(2, 3, 1, 1), (0, 0));
    }
}
