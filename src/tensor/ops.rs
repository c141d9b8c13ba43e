//! Per-sample buffer helpers shared by the operator library

use crate::error::{GradError, GradResult};
use super::core::Tensor;

/// Multiply every element by `factor` into a new buffer
pub fn scaled(values: &[f32], factor: f32) -> Vec<f32> {
    values.iter().map(|v| v * factor).collect()
}

/// Concatenate per-sample rows of several buffers sharing a batch count.
///
/// `parts` holds `(buffer, width)` pairs; sample `b` of the result is the
/// concatenation of sample `b` of every part, in order.
pub fn concat_samples(parts: &[(&[f32], usize)], batch_count: usize) -> Vec<f32> {
    let total_width: usize = parts.iter().map(|(_, w)| w).sum();
    let mut out = Vec::with_capacity(total_width * batch_count);
    for b in 0..batch_count {
        for (buffer, width) in parts {
            out.extend_from_slice(&buffer[b * width..(b + 1) * width]);
        }
    }
    out
}

/// Inverse of [`concat_samples`]
pub fn split_samples(buffer: &[f32], widths: &[usize], batch_count: usize) -> GradResult<Vec<Vec<f32>>> {
    let total_width: usize = widths.iter().sum();
    if buffer.len() != total_width * batch_count {
        return Err(GradError::shape_error(
            &format!("{} elements", total_width * batch_count),
            &format!("{}", buffer.len()),
            Some("Split widths must add up to the per-sample width"),
        ));
    }
    let mut parts: Vec<Vec<f32>> = widths.iter().map(|w| Vec::with_capacity(w * batch_count)).collect();
    for b in 0..batch_count {
        let mut offset = b * total_width;
        for (part, &width) in parts.iter_mut().zip(widths) {
            part.extend_from_slice(&buffer[offset..offset + width]);
            offset += width;
        }
    }
    Ok(parts)
}

/// Sum `batch_count` consecutive rows of `width` elements into one row
pub fn sum_samples(buffer: &[f32], width: usize) -> Vec<f32> {
    let mut out = vec![0.0; width];
    if width == 0 {
        return out;
    }
    for row in buffer.chunks_exact(width) {
        for (o, v) in out.iter_mut().zip(row) {
            *o += v;
        }
    }
    out
}

/// Both tensors hold the same number of elements and samples
pub fn ensure_same_layout(op: &str, a: &Tensor, b: &Tensor) -> GradResult<()> {
    if a.batch_count() != b.batch_count() || a.item_len() != b.item_len() {
        return Err(GradError::shape_error(
            &format!("{} x {}", a.batch_count(), a.shape()),
            &format!("{} x {}", b.batch_count(), b.shape()),
            Some(&format!("Inputs of '{}' must share batch count and per-sample size", op)),
        ));
    }
    Ok(())
}
