use super::BuildError;
use crate::{caffe2::FlatOperator, operation::FuseCode};

/// Output extent of a sliding window:
/// `floor((input - kernel + pad_begin + pad_end) / stride) + 1`.
/// `None` when the window does not fit or the stride is not positive.
pub fn conv_output_size(
    input: u32,
    kernel: i32,
    pad_begin: i32,
    pad_end: i32,
    stride: i32,
) -> Option<u32> {
    if stride <= 0 || kernel <= 0 {
        return None;
    }
    let span = input as i64 - kernel as i64 + pad_begin as i64 + pad_end as i64;
    if span < 0 {
        return None;
    }
    u32::try_from(span / stride as i64 + 1).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct Pads {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

/// Kernel, stride and padding of a convolution or pooling window. Pairs are
/// `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Window {
    pub kernel: [i32; 2],
    pub stride: [i32; 2],
    pub pads: Pads,
}

impl Window {
    /// Reads `kernels`/`kernel`, `strides`/`stride` and `pads`/`pad`. A
    /// missing kernel falls back to `default_kernel` if given.
    pub fn from_op(op: &FlatOperator, default_kernel: Option<[i32; 2]>) -> Result<Self, BuildError> {
        let kernel = match pair(op, "kernels", "kernel")? {
            Some(kernel) => kernel,
            None => default_kernel.ok_or_else(|| BuildError::MissingArgument {
                op: op.name.clone(),
                name: "kernels",
            })?,
        };
        let stride = pair(op, "strides", "stride")?.unwrap_or([1, 1]);
        let pads = pads(op)?;

        if let Some(&k) = kernel.iter().find(|&&k| k <= 0) {
            return Err(invalid(op, "kernels", format!("{k} is not positive")));
        }
        if let Some(&s) = stride.iter().find(|&&s| s <= 0) {
            return Err(invalid(op, "strides", format!("{s} is not positive")));
        }

        Ok(Self {
            kernel,
            stride,
            pads,
        })
    }

    /// `[N, outH, outW, channels]` for an `[N, H, W, _]` input.
    pub fn output_dims(
        &self,
        op: &FlatOperator,
        [n, h, w, _]: [u32; 4],
        channels: u32,
    ) -> Result<Vec<u32>, BuildError> {
        let [kh, kw] = self.kernel;
        let [sh, sw] = self.stride;
        let Pads {
            top,
            left,
            bottom,
            right,
        } = self.pads;
        let out_h = conv_output_size(h, kh, top, bottom, sh);
        let out_w = conv_output_size(w, kw, left, right, sw);
        match (out_h, out_w) {
            (Some(out_h), Some(out_w)) if out_h > 0 && out_w > 0 => Ok(vec![n, out_h, out_w, channels]),
            _ => Err(BuildError::InvalidOutputShape {
                op: op.name.clone(),
            }),
        }
    }
}

/// An `[h, w]` pair from `name` (two ints) or `scalar_name` (one int, used
/// for both).
fn pair(
    op: &FlatOperator,
    name: &'static str,
    scalar_name: &'static str,
) -> Result<Option<[i32; 2]>, BuildError> {
    if let Some(value) = op.arg(name) {
        return match value.ints() {
            Some(&[h, w]) => Ok(Some([h, w])),
            _ => Err(invalid(op, name, format!("expected 2 ints, got {value}"))),
        };
    }
    match op.arg(scalar_name) {
        Some(value) => match value.scalar_i32() {
            Some(x) => Ok(Some([x, x])),
            None => Err(invalid(op, scalar_name, format!("expected an int, got {value}"))),
        },
        None => Ok(None),
    }
}

/// `pads` is `[top, left, bottom, right]`.
fn pads(op: &FlatOperator) -> Result<Pads, BuildError> {
    let [top, left, bottom, right] = if let Some(value) = op.arg("pads") {
        match value.ints() {
            Some(&[t, l, b, r]) => [t, l, b, r],
            _ => return Err(invalid(op, "pads", format!("expected 4 ints, got {value}"))),
        }
    } else if let Some(value) = op.arg("pad") {
        let p = value
            .scalar_i32()
            .ok_or_else(|| invalid(op, "pad", format!("expected an int, got {value}")))?;
        [p; 4]
    } else {
        [0; 4]
    };
    if let Some(&p) = [top, left, bottom, right].iter().find(|&&p| p < 0) {
        return Err(invalid(op, "pads", format!("{p} is negative")));
    }
    Ok(Pads {
        top,
        left,
        bottom,
        right,
    })
}

/// `bound_max`/`bound_min` decide when both are present; otherwise the bounds
/// count as `(0, 0)`, which is `None`.
pub(super) fn fuse_code(op: &FlatOperator) -> Result<FuseCode, BuildError> {
    match (optional_f32(op, "bound_max")?, optional_f32(op, "bound_min")?) {
        (Some(max), Some(min)) => Ok(FuseCode::from_bounds(max, min)),
        _ => Ok(FuseCode::from_bounds(0.0, 0.0)),
    }
}

/// `Y_scale`/`Y_zero_point` of the operator, each falling back to the
/// given default.
pub(super) fn output_quant(
    op: &FlatOperator,
    default_scale: f32,
    default_zero_point: i32,
) -> Result<(f32, i32), BuildError> {
    Ok((
        optional_f32(op, "Y_scale")?.unwrap_or(default_scale),
        optional_i32(op, "Y_zero_point")?.unwrap_or(default_zero_point),
    ))
}

pub(super) fn optional_f32(op: &FlatOperator, name: &'static str) -> Result<Option<f32>, BuildError> {
    op.arg(name)
        .map(|value| {
            value
                .scalar_f32()
                .ok_or_else(|| invalid(op, name, format!("expected a number, got {value}")))
        })
        .transpose()
}

pub(super) fn optional_i32(op: &FlatOperator, name: &'static str) -> Result<Option<i32>, BuildError> {
    op.arg(name)
        .map(|value| {
            value
                .scalar_i32()
                .ok_or_else(|| invalid(op, name, format!("expected an int, got {value}")))
        })
        .transpose()
}

pub(super) fn required_f32(op: &FlatOperator, name: &'static str) -> Result<f32, BuildError> {
    optional_f32(op, name)?.ok_or_else(|| missing(op, name))
}

pub(super) fn required_i32(op: &FlatOperator, name: &'static str) -> Result<i32, BuildError> {
    optional_i32(op, name)?.ok_or_else(|| missing(op, name))
}

fn missing(op: &FlatOperator, name: &'static str) -> BuildError {
    BuildError::MissingArgument {
        op: op.name.clone(),
        name,
    }
}

fn invalid(op: &FlatOperator, name: &'static str, reason: String) -> BuildError {
    BuildError::InvalidArgument {
        op: op.name.clone(),
        name,
        reason,
    }
}
