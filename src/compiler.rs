//! Turns dirty geometry into GPU vertex buffers shaped for the active
//! strategy.
//!
//! Hardware-instanced and fixed-pipeline strategies upload one copy of the
//! shape, two floats per vertex. Pseudo-instancing strategies upload
//! `max_instances` replicas of the shape, each vertex extended by its replica
//! index, so that a single ordinary draw of `n * vertices_per_instance`
//! vertices covers `n` instances. Strips are unrolled into lists first, a
//! strip running through consecutive replicas would join them.

use crate::{
    backend::{BufferHandle, GraphicsBackend},
    data_structures::geometry::DrawMode,
    strategy::RenderStrategy,
};

/// What the dispatcher needs to draw one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGeometry {
    /// `None` when the shape has no vertices.
    pub buffer: Option<BufferHandle>,
    pub components: u32,
    pub vertices_per_instance: u32,
    pub draw_mode: DrawMode,
}

/// Unrolls strip topologies into independent primitives.
///
/// Odd triangles of a strip swap their first two vertices to keep the winding
/// of the strip. Other modes are returned unchanged.
pub fn unroll_strips(draw_mode: DrawMode, vertices: &[f32]) -> (DrawMode, Vec<f32>) {
    let points: Vec<&[f32]> = vertices.chunks_exact(2).collect();
    match draw_mode {
        DrawMode::TriangleStrip => {
            let mut out = Vec::with_capacity(points.len().saturating_sub(2) * 6);
            for (i, w) in points.windows(3).enumerate() {
                let order = if i % 2 == 0 { [0, 1, 2] } else { [1, 0, 2] };
                for k in order {
                    out.extend_from_slice(w[k]);
                }
            }
            (DrawMode::Triangles, out)
        }
        DrawMode::LineStrip => {
            let mut out = Vec::with_capacity(points.len().saturating_sub(1) * 4);
            for w in points.windows(2) {
                out.extend_from_slice(w[0]);
                out.extend_from_slice(w[1]);
            }
            (DrawMode::Lines, out)
        }
        mode => (mode, points.concat()),
    }
}

/// Lays out `vertices` (flat `x, y` pairs) for `strategy`. Strips must
/// already be unrolled when the strategy replicates.
pub fn vertex_data(strategy: RenderStrategy, vertices: &[f32], max_instances: usize) -> Vec<f32> {
    let points = vertices.chunks_exact(2);
    if !strategy.requires_manual_indexing() {
        return points.flatten().copied().collect();
    }

    let mut data = Vec::with_capacity(max_instances * (vertices.len() / 2) * 3);
    for replica in 0..max_instances {
        for point in points.clone() {
            data.extend_from_slice(&[point[0], point[1], replica as f32]);
        }
    }
    data
}

/// Compiles one geometry, reusing `previous`'s buffer where possible.
pub fn compile<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    strategy: RenderStrategy,
    max_instances: usize,
    previous: Option<&CompiledGeometry>,
    draw_mode: DrawMode,
    vertices: &[f32],
) -> CompiledGeometry {
    if vertices.len() % 2 != 0 {
        log::warn!(
            "geometry has an odd number of coordinates ({}), dropping the last one",
            vertices.len()
        );
    }
    let (draw_mode, shape) = if strategy.requires_manual_indexing() {
        unroll_strips(draw_mode, vertices)
    } else {
        (draw_mode, vertices.to_vec())
    };
    let vertices_per_instance = (shape.len() / 2) as u32;
    let components = strategy.vertex_components();
    let existing = previous.and_then(|c| c.buffer);

    let buffer = if vertices_per_instance == 0 {
        if let Some(stale) = existing {
            backend.release_vertex_buffer(stale);
        }
        None
    } else {
        let data = vertex_data(strategy, &shape, max_instances);
        Some(backend.write_vertex_buffer(existing, &data))
    };

    log::debug!(
        "compiled {} vertices x {} components for {}",
        vertices_per_instance,
        components,
        strategy
    );
    CompiledGeometry {
        buffer,
        components,
        vertices_per_instance,
        draw_mode,
    }
}
