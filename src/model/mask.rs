//! Boolean masking over fixed-width tensors

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, TensorData};

use crate::{BrainError, Result};

/// Value written into illegal action slots
pub const MASK_FILL: f32 = -1e9;

/// Replace every position where `mask` is false with `fill`.
///
/// True positions are returned unchanged. The mask must have exactly the
/// tensor's shape.
pub fn apply_masks<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    mask: Tensor<B, D, Bool>,
    fill: f32,
) -> Result<Tensor<B, D>> {
    let (dims, mask_dims) = (tensor.dims(), mask.dims());
    if dims != mask_dims {
        return Err(BrainError::shape("apply_masks", dims, mask_dims));
    }
    Ok(tensor.mask_fill(mask.bool_not(), fill))
}

/// Build a `[rows, width]` mask tensor from host rows
pub fn mask_from_rows<B: Backend>(
    rows: &[Vec<bool>],
    width: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2, Bool>> {
    let mut bits = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            return Err(BrainError::shape("mask row", width, row.len()));
        }
        bits.extend_from_slice(row);
    }
    Ok(Tensor::from_data(
        TensorData::new(bits, [rows.len(), width]),
        device,
    ))
}

/// Number of true entries per row, read back to the host
pub fn legal_counts<B: Backend>(mask: Tensor<B, 2, Bool>) -> Vec<i64> {
    mask.int().sum_dim(1).into_data().iter::<i64>().collect()
}
