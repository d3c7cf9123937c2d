//! Publishes instance positions to the GPU once per frame.
//!
//! Texture-buffer strategies get every live position of every geometry in one
//! contiguous write, geometry 0 first. Uniform-array strategies get positions
//! in fixed-size batches right before each batched draw.

use std::ops::Range;

use crate::{backend::GraphicsBackend, data_structures::instance::GeometryFrame};

/// Writes all positions into the shared buffer and returns each geometry's
/// starting offset, indexed like `frames`.
pub fn upload_all<B: GraphicsBackend + ?Sized>(backend: &mut B, frames: &[GeometryFrame]) -> Vec<u32> {
    let offsets = stream_offsets(frames);
    let total: usize = frames.iter().map(GeometryFrame::num_instances).sum();
    let mut positions = Vec::with_capacity(total);
    for frame in frames {
        positions.extend_from_slice(&frame.positions);
    }
    backend.write_positions(&positions);
    offsets
}

/// Offset of every geometry's first position in the shared stream: the sum of
/// the live counts of all geometries before it.
pub fn stream_offsets(frames: &[GeometryFrame]) -> Vec<u32> {
    frames
        .iter()
        .scan(0u32, |next, frame| {
            let offset = *next;
            *next += frame.num_instances() as u32;
            Some(offset)
        })
        .collect()
}

/// Loads one batch of positions into the batch uniform.
pub fn upload_batch<B: GraphicsBackend + ?Sized>(backend: &mut B, positions: &[[f32; 2]]) {
    backend.write_position_batch(positions);
}

/// Splits `count` instances into consecutive batches of at most `batch_size`.
pub fn batches(count: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..count)
        .step_by(batch_size)
        .map(move |start| start..(start + batch_size).min(count))
}
