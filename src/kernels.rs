//! NHWC float kernels on `ndarray`, shared by the TFLite interpreter and the Keras
//! reference evaluator.

use lite_graph::node::{FusedActivation, PoolKind, Window2D};
use ndarray::{Array4, ArrayD, ArrayView4, Axis, Ix2, Ix4, IxDyn, ShapeError, Zip};

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    ShapeError(#[from] ShapeError),
    #[error("shape mismatch: {0}")]
    IncompatibleShapes(String),
    #[error("broadcast error: {0:?} vs {1:?}")]
    BroadcastError(Vec<usize>, Vec<usize>),
    #[error("axis {0} out of range for rank {1}")]
    AxisOutOfRange(isize, usize),
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

pub fn relu6(x: f32) -> f32 {
    x.clamp(0.0, 6.0)
}

pub fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn elu(x: f32) -> f32 {
    if x > 0.0 { x } else { x.exp_m1() }
}

pub fn hard_swish(x: f32) -> f32 {
    x * relu6(x + 3.0) / 6.0
}

pub fn swish(x: f32) -> f32 {
    x * logistic(x)
}

pub fn map(x: &ArrayD<f32>, f: impl Fn(f32) -> f32) -> ArrayD<f32> {
    x.mapv(f)
}

pub fn apply_activation(x: ArrayD<f32>, activation: FusedActivation) -> ArrayD<f32> {
    match activation {
        FusedActivation::None => x,
        FusedActivation::Relu => x.mapv_into(relu),
        FusedActivation::Relu6 => x.mapv_into(relu6),
        FusedActivation::Tanh => x.mapv_into(f32::tanh),
    }
}

pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize, KernelError> {
    let normalized = if axis < 0 { axis + rank as isize } else { axis };
    if normalized < 0 || normalized >= rank as isize {
        return Err(KernelError::AxisOutOfRange(axis, rank));
    }
    Ok(normalized as usize)
}

/// `input · weightsᵀ + bias` for `[batch, in]` inputs and `[out, in]` weights.
pub fn fully_connected(
    input: &ArrayD<f32>,
    weights: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
) -> Result<ArrayD<f32>, KernelError> {
    let input = input.view().into_dimensionality::<Ix2>()?;
    let weights = weights.view().into_dimensionality::<Ix2>()?;
    if input.ncols() != weights.ncols() {
        return Err(KernelError::IncompatibleShapes(format!(
            "input {:?} vs weights {:?}",
            input.shape(),
            weights.shape()
        )));
    }
    let mut out = input.dot(&weights.t());
    if let Some(bias) = bias {
        let bias = bias_vector(bias, weights.nrows())?;
        for mut row in out.rows_mut() {
            row.iter_mut().zip(&bias).for_each(|(x, b)| *x += b);
        }
    }
    Ok(out.into_dyn())
}

fn bias_vector(bias: &ArrayD<f32>, channels: usize) -> Result<Vec<f32>, KernelError> {
    if bias.len() != channels {
        return Err(KernelError::IncompatibleShapes(format!(
            "bias of {} values for {} channels",
            bias.len(),
            channels
        )));
    }
    Ok(bias.iter().copied().collect())
}

struct SpatialPlan {
    out_h: usize,
    out_w: usize,
    pad_top: usize,
    pad_left: usize,
}

fn plan(input: &ArrayView4<f32>, window: &Window2D) -> Result<SpatialPlan, KernelError> {
    let (_, h, w, _) = input.dim();
    let (out_h, pad_top) = window
        .padding
        .output_size(h, window.kernel.0, window.stride.0, window.dilation.0);
    let (out_w, pad_left) = window
        .padding
        .output_size(w, window.kernel.1, window.stride.1, window.dilation.1);
    if out_h == 0 || out_w == 0 {
        return Err(KernelError::IncompatibleShapes(format!(
            "window {:?} does not fit input {:?}",
            window.kernel,
            input.shape()
        )));
    }
    Ok(SpatialPlan {
        out_h,
        out_w,
        pad_top,
        pad_left,
    })
}

/// Input coordinate for an output position and kernel tap, or `None` inside the padding.
fn source_index(out: usize, tap: usize, stride: usize, dilation: usize, pad: usize, size: usize) -> Option<usize> {
    (out * stride + tap * dilation)
        .checked_sub(pad)
        .filter(|x| *x < size)
}

/// NHWC convolution with an `[out, kh, kw, in]` filter.
pub fn conv2d(
    input: &ArrayD<f32>,
    filter: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: lite_graph::node::Padding,
) -> Result<ArrayD<f32>, KernelError> {
    let input = input.view().into_dimensionality::<Ix4>()?;
    let filter = filter.view().into_dimensionality::<Ix4>()?;
    let (batch, h, w, channels) = input.dim();
    let (out_c, kh, kw, in_c) = filter.dim();
    if in_c != channels {
        return Err(KernelError::IncompatibleShapes(format!(
            "input {:?} vs filter {:?}",
            input.shape(),
            filter.shape()
        )));
    }
    let window = Window2D {
        kernel: (kh, kw),
        stride,
        dilation,
        padding,
    };
    let plan = plan(&input, &window)?;
    let bias = match bias {
        Some(x) => bias_vector(x, out_c)?,
        None => vec![0.0; out_c],
    };
    let mut out = Array4::<f32>::zeros((batch, plan.out_h, plan.out_w, out_c));
    for b in 0..batch {
        for oy in 0..plan.out_h {
            for ox in 0..plan.out_w {
                for oc in 0..out_c {
                    let mut acc = bias[oc];
                    for ky in 0..kh {
                        let Some(iy) = source_index(oy, ky, stride.0, dilation.0, plan.pad_top, h)
                        else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) =
                                source_index(ox, kx, stride.1, dilation.1, plan.pad_left, w)
                            else {
                                continue;
                            };
                            for ic in 0..channels {
                                acc += input[[b, iy, ix, ic]] * filter[[oc, ky, kx, ic]];
                            }
                        }
                    }
                    out[[b, oy, ox, oc]] = acc;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

/// NHWC depthwise convolution; output channel `c * multiplier + m` reads input channel `c`.
pub fn depthwise_conv2d(
    input: &ArrayD<f32>,
    filter: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: lite_graph::node::Padding,
) -> Result<ArrayD<f32>, KernelError> {
    let input = input.view().into_dimensionality::<Ix4>()?;
    let filter = filter.view().into_dimensionality::<Ix4>()?;
    let (batch, h, w, channels) = input.dim();
    let (one, kh, kw, out_c) = filter.dim();
    if one != 1 || channels == 0 || out_c % channels != 0 {
        return Err(KernelError::IncompatibleShapes(format!(
            "input {:?} vs depthwise filter {:?}",
            input.shape(),
            filter.shape()
        )));
    }
    let multiplier = out_c / channels;
    let window = Window2D {
        kernel: (kh, kw),
        stride,
        dilation,
        padding,
    };
    let plan = plan(&input, &window)?;
    let bias = match bias {
        Some(x) => bias_vector(x, out_c)?,
        None => vec![0.0; out_c],
    };
    let mut out = Array4::<f32>::zeros((batch, plan.out_h, plan.out_w, out_c));
    for b in 0..batch {
        for oy in 0..plan.out_h {
            for ox in 0..plan.out_w {
                for oc in 0..out_c {
                    let ic = oc / multiplier;
                    let mut acc = bias[oc];
                    for ky in 0..kh {
                        let Some(iy) = source_index(oy, ky, stride.0, dilation.0, plan.pad_top, h)
                        else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) =
                                source_index(ox, kx, stride.1, dilation.1, plan.pad_left, w)
                            else {
                                continue;
                            };
                            acc += input[[b, iy, ix, ic]] * filter[[0, ky, kx, oc]];
                        }
                    }
                    out[[b, oy, ox, oc]] = acc;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

/// Max or average pooling. Averages only count taps inside the input.
pub fn pool2d(input: &ArrayD<f32>, kind: PoolKind, window: &Window2D) -> Result<ArrayD<f32>, KernelError> {
    let input = input.view().into_dimensionality::<Ix4>()?;
    let (batch, h, w, channels) = input.dim();
    let plan = plan(&input, window)?;
    let mut out = Array4::<f32>::zeros((batch, plan.out_h, plan.out_w, channels));
    for b in 0..batch {
        for oy in 0..plan.out_h {
            for ox in 0..plan.out_w {
                for c in 0..channels {
                    let mut max = f32::NEG_INFINITY;
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for ky in 0..window.kernel.0 {
                        let Some(iy) = source_index(oy, ky, window.stride.0, 1, plan.pad_top, h)
                        else {
                            continue;
                        };
                        for kx in 0..window.kernel.1 {
                            let Some(ix) =
                                source_index(ox, kx, window.stride.1, 1, plan.pad_left, w)
                            else {
                                continue;
                            };
                            let value = input[[b, iy, ix, c]];
                            max = max.max(value);
                            sum += value;
                            count += 1;
                        }
                    }
                    out[[b, oy, ox, c]] = match kind {
                        PoolKind::Max => max,
                        PoolKind::Average => sum / count.max(1) as f32,
                    };
                }
            }
        }
    }
    Ok(out.into_dyn())
}

pub fn mean(input: &ArrayD<f32>, axes: &[usize], keep_dims: bool) -> Result<ArrayD<f32>, KernelError> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    axes.dedup();
    let mut out = input.clone();
    for &axis in axes.iter().rev() {
        if axis >= out.ndim() {
            return Err(KernelError::AxisOutOfRange(axis as isize, out.ndim()));
        }
        let reduced = out.mean_axis(Axis(axis)).ok_or_else(|| {
            KernelError::IncompatibleShapes(format!("mean over empty axis {}", axis))
        })?;
        out = if keep_dims {
            reduced.insert_axis(Axis(axis))
        } else {
            reduced
        };
    }
    Ok(out)
}

/// Softmax over the last axis.
pub fn softmax(input: &ArrayD<f32>, beta: f32) -> ArrayD<f32> {
    let mut out = input.clone();
    if out.ndim() == 0 {
        return out.mapv_into(|_| 1.0);
    }
    let last = Axis(out.ndim() - 1);
    for mut lane in out.lanes_mut(last) {
        let max = lane.fold(f32::NEG_INFINITY, |a, b| a.max(*b));
        lane.mapv_inplace(|x| ((x - max) * beta).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|x| x / sum);
    }
    out
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, KernelError> {
    let rank = a.len().max(b.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let x = (i + a.len()).checked_sub(rank).map(|x| a[x]).unwrap_or(1);
        let y = (i + b.len()).checked_sub(rank).map(|x| b[x]).unwrap_or(1);
        out.push(match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(KernelError::BroadcastError(a.to_vec(), b.to_vec())),
        });
    }
    Ok(out)
}

/// Elementwise `f(a, b)` with numpy broadcasting.
pub fn binary(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>, KernelError> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let a = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| KernelError::BroadcastError(a.shape().to_vec(), shape.clone()))?;
    let b = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| KernelError::BroadcastError(b.shape().to_vec(), shape.clone()))?;
    Ok(Zip::from(&a).and(&b).map_collect(|x, y| f(*x, *y)))
}

pub fn concatenate(inputs: &[&ArrayD<f32>], axis: usize) -> Result<ArrayD<f32>, KernelError> {
    let views: Vec<_> = inputs.iter().map(|x| x.view()).collect();
    Ok(ndarray::concatenate(Axis(axis), &views)?)
}

/// Row-major reshape; one `-1` entry is inferred.
pub fn reshape(input: &ArrayD<f32>, shape: &[i64]) -> Result<ArrayD<f32>, KernelError> {
    let known: i64 = shape.iter().filter(|x| **x > 0).product();
    let mut dims = vec![];
    for &dim in shape {
        if dim == -1 {
            if known == 0 || input.len() as i64 % known != 0 {
                return Err(KernelError::IncompatibleShapes(format!(
                    "cannot reshape {:?} into {:?}",
                    input.shape(),
                    shape
                )));
            }
            dims.push((input.len() as i64 / known) as usize);
        } else if dim > 0 {
            dims.push(dim as usize);
        } else {
            return Err(KernelError::IncompatibleShapes(format!(
                "invalid reshape target {:?}",
                shape
            )));
        }
    }
    Ok(ArrayD::from_shape_vec(
        IxDyn(&dims),
        input.iter().copied().collect(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lite_graph::node::Padding;
    use ndarray::{ArrayD, IxDyn, array};

    fn arr(dims: &[usize], values: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(dims), values).unwrap()
    }

    #[test]
    fn fully_connected_uses_out_in_layout() {
        let input = array![[1.0f32, 2.0]].into_dyn();
        let weights = array![[1.0f32, 0.0], [0.5, 0.5], [0.0, -1.0]].into_dyn();
        let bias = arr(&[3], vec![0.0, 1.0, 0.0]);
        let out = fully_connected(&input, &weights, Some(&bias)).unwrap();
        assert_eq!(out, array![[1.0f32, 2.5, -2.0]].into_dyn());
    }

    #[test]
    fn conv_same_padding_sums_neighbourhood() {
        let input = arr(&[1, 3, 3, 1], vec![1.0; 9]);
        let filter = arr(&[1, 3, 3, 1], vec![1.0; 9]);
        let out = conv2d(&input, &filter, None, (1, 1), (1, 1), Padding::Same).unwrap();
        assert_eq!(out.shape(), &[1, 3, 3, 1]);
        let values: Vec<f32> = out.iter().copied().collect();
        assert_eq!(values, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    fn ramp(h: usize, w: usize) -> ArrayD<f32> {
        arr(&[1, h, w, 1], (1..=h * w).map(|x| x as f32).collect())
    }

    #[test]
    fn conv_stride_two_same_pads_after() {
        // 4x4 input, 3x3 kernel, stride 2: one row/column of padding, all at the end
        let mut filter = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 3, 1]));
        filter[[0, 1, 1, 0]] = 1.0;
        filter[[1, 0, 0, 0]] = 1.0;
        let bias = arr(&[2], vec![0.5, -1.0]);
        let out = conv2d(&ramp(4, 4), &filter, Some(&bias), (2, 2), (1, 1), Padding::Same).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2, 2]);
        let values: Vec<f32> = out.iter().copied().collect();
        assert_eq!(values, vec![6.5, 0.0, 8.5, 2.0, 14.5, 8.0, 16.5, 10.0]);

        let ones = arr(&[1, 3, 3, 1], vec![1.0; 9]);
        let out = conv2d(&ramp(4, 4), &ones, None, (2, 2), (1, 1), Padding::Same).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![54.0, 45.0, 72.0, 54.0]);
    }

    #[test]
    fn depthwise_stride_two_same_pads_both_sides() {
        // 5x5 input, 3x3 kernel, stride 2: one row/column of padding on each side
        let mut values = vec![];
        for x in 1..=25 {
            values.push(x as f32);
            values.push(100.0);
        }
        let input = arr(&[1, 5, 5, 2], values);
        let mut filter = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 3, 2]));
        for ky in 0..3 {
            for kx in 0..3 {
                filter[[0, ky, kx, 1]] = 1.0;
            }
        }
        filter[[0, 1, 1, 0]] = 1.0;
        let out =
            depthwise_conv2d(&input, &filter, None, (2, 2), (1, 1), Padding::Same).unwrap();
        assert_eq!(out.shape(), &[1, 3, 3, 2]);
        let centre: Vec<f32> = out.iter().step_by(2).copied().collect();
        assert_eq!(centre, vec![1.0, 3.0, 5.0, 11.0, 13.0, 15.0, 21.0, 23.0, 25.0]);
        let taps: Vec<f32> = out.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(
            taps,
            vec![400.0, 600.0, 400.0, 600.0, 900.0, 600.0, 400.0, 600.0, 400.0]
        );
    }

    #[test]
    fn pool_stride_two_same() {
        let window = Window2D {
            kernel: (3, 3),
            stride: (2, 2),
            dilation: (1, 1),
            padding: Padding::Same,
        };
        let out = pool2d(&ramp(4, 4), PoolKind::Average, &window).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2, 1]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![6.0, 7.5, 12.0, 13.5]);
        let negated = ramp(4, 4).mapv(|x| -x);
        let out = pool2d(&negated, PoolKind::Max, &window).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![-1.0, -3.0, -9.0, -11.0]);
    }

    #[test]
    fn depthwise_keeps_channels_apart() {
        let input = arr(&[1, 1, 1, 2], vec![2.0, 3.0]);
        // multiplier 2: channels [c0*m0, c0*m1, c1*m0, c1*m1]
        let filter = arr(&[1, 1, 1, 4], vec![1.0, 10.0, 100.0, 1000.0]);
        let out = depthwise_conv2d(&input, &filter, None, (1, 1), (1, 1), Padding::Valid).unwrap();
        let values: Vec<f32> = out.iter().copied().collect();
        assert_eq!(values, vec![2.0, 20.0, 300.0, 3000.0]);
    }

    #[test]
    fn average_pool_ignores_padding() {
        let input = arr(&[1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
        let window = Window2D {
            kernel: (2, 2),
            stride: (2, 2),
            dilation: (1, 1),
            padding: Padding::Same,
        };
        let out = pool2d(&input, PoolKind::Average, &window).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![2.5]);
        let input = arr(&[1, 3, 3, 1], (1..=9).map(|x| x as f32).collect());
        let out = pool2d(&input, PoolKind::Average, &window).unwrap();
        // Bottom right window only covers the corner
        assert_eq!(out.shape(), &[1, 2, 2, 1]);
        assert_eq!(out[[0, 1, 1, 0]], 9.0);
        let out = pool2d(&input, PoolKind::Max, &window).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 5.0);
    }

    #[test]
    fn mean_and_softmax() {
        let input = arr(&[1, 2, 2, 2], vec![1.0, 10.0, 3.0, 20.0, 5.0, 30.0, 7.0, 40.0]);
        let out = mean(&input, &[1, 2], false).unwrap();
        assert_eq!(out, arr(&[1, 2], vec![4.0, 25.0]));
        let out = mean(&input, &[2, 1], true).unwrap();
        assert_eq!(out.shape(), &[1, 1, 1, 2]);

        let probs = softmax(&arr(&[1, 3], vec![1.0, 1.0, 1.0]), 1.0);
        for x in probs.iter() {
            assert!((x - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn binary_broadcasts_and_rejects_mismatch() {
        let a = arr(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = arr(&[2], vec![10.0, 20.0]);
        let out = binary(&a, &b, |x, y| x + y).unwrap();
        assert_eq!(out, arr(&[2, 2], vec![11.0, 22.0, 13.0, 24.0]));
        let c = arr(&[3], vec![0.0; 3]);
        assert!(binary(&a, &c, |x, y| x * y).is_err());
    }

    #[test]
    fn reshape_infers_one_dimension() {
        let input = arr(&[1, 2, 3], (0..6).map(|x| x as f32).collect());
        let out = reshape(&input, &[-1, 6]).unwrap();
        assert_eq!(out.shape(), &[1, 6]);
        assert!(reshape(&input, &[-1, 4]).is_err());
    }

    #[test]
    fn activations() {
        assert_eq!(relu6(7.0), 6.0);
        assert_eq!(hard_swish(-4.0), 0.0);
        assert_eq!(hard_swish(4.0), 4.0);
        assert!((elu(-1.0) - (-0.63212055)).abs() < 1e-6);
        assert!((swish(0.0)).abs() < 1e-7);
        let x = arr(&[2], vec![-1.0, 7.0]);
        assert_eq!(
            apply_activation(x, FusedActivation::Relu6),
            arr(&[2], vec![0.0, 6.0])
        );
    }
}
