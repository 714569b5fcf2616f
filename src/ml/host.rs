// Reading tensors back to the host for the parts of CTC that run on
// plain data (label bookkeeping, decoding).

use burn::prelude::*;

use crate::domain::error::{CtcError, Result};

pub(crate) fn int_vec<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| CtcError::TensorData(format!("{e:?}")))
}

pub(crate) fn int_rows<B: Backend>(tensor: Tensor<B, 2, Int>) -> Result<Vec<Vec<i64>>> {
    let [rows, cols] = tensor.dims();
    let flat = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| CtcError::TensorData(format!("{e:?}")))?;
    if cols == 0 {
        return Ok(vec![Vec::new(); rows]);
    }
    Ok(flat.chunks(cols).map(<[i64]>::to_vec).collect())
}

/// `[batch, time, classes]` → nested host vectors.
pub(crate) fn float_cube<B: Backend>(tensor: Tensor<B, 3>) -> Result<Vec<Vec<Vec<f32>>>> {
    let [batch, time, classes] = tensor.dims();
    let flat = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CtcError::TensorData(format!("{e:?}")))?;
    Ok((0..batch)
        .map(|b| {
            (0..time)
                .map(|t| {
                    let start = (b * time + t) * classes;
                    flat[start..start + classes].to_vec()
                })
                .collect()
        })
        .collect())
}

pub(crate) fn float_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CtcError::TensorData(format!("{e:?}")))
}
