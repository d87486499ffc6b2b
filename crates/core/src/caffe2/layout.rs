use ndarray::{ArrayView2, ArrayView4, ErrorKind, ShapeError};

use super::{
    attr::{bytes_to_string, decode_argument},
    proto::NetDef,
    ModelLoadError,
};
use crate::tensor::{map_tensor_data, TensorData};

/// Memory order of the 4-D tensors of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// `(N, C, H, W)`.
    ChannelFirst,
    /// `(N, H, W, C)`.
    #[default]
    ChannelLast,
}

impl Layout {
    pub fn is_channel_first(&self) -> bool {
        matches!(self, Self::ChannelFirst)
    }
}

/// Scans the operator arguments of `net` for `order = "NCHW"`. The first
/// match decides; a net with no such argument is channel-last.
pub fn detect_layout(net: &NetDef) -> Result<Layout, ModelLoadError> {
    for op in &net.op {
        for arg in op.arg.iter().filter(|a| a.name.as_deref() == Some("order")) {
            let value = decode_argument(arg)?;
            if bytes_to_string(&value).as_deref() == Some("NCHW") {
                return Ok(Layout::ChannelFirst);
            }
        }
    }
    Ok(Layout::ChannelLast)
}

/// `(N, C, H, W)` -> `(N, H, W, C)`.
pub fn permute_dims<T: Copy>([n, c, h, w]: [T; 4]) -> [T; 4] {
    [n, h, w, c]
}

/// Relays out a `(N, C, H, W)` buffer as `(N, H, W, C)`:
/// `out[n*H*W*C + h*W*C + w*C + c] = data[n*C*H*W + c*H*W + h*W + w]`.
pub fn nchw_to_nhwc<T: Clone>(data: &[T], dims: [usize; 4]) -> Result<Vec<T>, ShapeError> {
    check_len(data, dims.iter().product())?;
    let view = ArrayView4::from_shape(dims, data)?;
    Ok(view.permuted_axes([0, 2, 3, 1]).iter().cloned().collect())
}

/// Inverse of [`nchw_to_nhwc`]; `dims` is `(N, H, W, C)`.
pub fn nhwc_to_nchw<T: Clone>(data: &[T], dims: [usize; 4]) -> Result<Vec<T>, ShapeError> {
    check_len(data, dims.iter().product())?;
    let view = ArrayView4::from_shape(dims, data)?;
    Ok(view.permuted_axes([0, 3, 1, 2]).iter().cloned().collect())
}

/// Repacks a depthwise filter from `(N, H, W, 1)` to `(1, H, W, N)`:
/// `out[h*W*N + w*N + n] = data[n*H*W + h*W + w]`.
pub fn depthwise_filter_to_1hwn<T: Clone>(
    data: &[T],
    [n, h, w]: [usize; 3],
) -> Result<Vec<T>, ShapeError> {
    check_len(data, n * h * w)?;
    let view = ArrayView2::from_shape((n, h * w), data)?;
    Ok(view.t().iter().cloned().collect())
}

/// `from_shape` accepts a longer slice than the shape needs; the buffers here
/// must match exactly.
fn check_len<T>(data: &[T], len: usize) -> Result<(), ShapeError> {
    if data.len() == len {
        Ok(())
    } else {
        Err(ShapeError::from_kind(ErrorKind::IncompatibleShape))
    }
}

pub fn tensor_nchw_to_nhwc(data: &TensorData, dims: [usize; 4]) -> Result<TensorData, ShapeError> {
    Ok(map_tensor_data!(data, v => nchw_to_nhwc(v, dims)?))
}

pub fn tensor_depthwise_filter_to_1hwn(
    data: &TensorData,
    dims: [usize; 3],
) -> Result<TensorData, ShapeError> {
    Ok(map_tensor_data!(data, v => depthwise_filter_to_1hwn(v, dims)?))
}
