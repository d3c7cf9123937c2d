//! Issues the per-geometry draw calls of the instanced path.

use cgmath::{Matrix3, SquareMatrix, Vector2};

use crate::{
    backend::GraphicsBackend,
    compiler::CompiledGeometry,
    data_structures::instance::GeometryFrame,
    strategy::RenderStrategy,
    upload::{batches, upload_batch},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub draw_calls: usize,
    pub batches: usize,
    pub instances: usize,
}

/// Draws every geometry with live instances.
///
/// `compiled` is indexed by geometry id. `offsets` is what
/// [`upload_all`](crate::upload::upload_all) returned and is only read by the
/// texture-buffer strategies.
pub fn dispatch<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    strategy: RenderStrategy,
    batch_size: usize,
    frames: &[GeometryFrame],
    compiled: &[Option<CompiledGeometry>],
    offsets: &[u32],
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    for frame in frames {
        let count = frame.num_instances();
        if count == 0 {
            continue;
        }
        let Some((geometry, buffer)) = compiled
            .get(frame.id)
            .and_then(Option::as_ref)
            .and_then(|c| c.buffer.map(|b| (c, b)))
        else {
            log::trace!("geometry {} has no vertex buffer, skipping", frame.id);
            continue;
        };

        let vertices = geometry.vertices_per_instance;
        // Batches never exceed the full count, so one check covers them all.
        let replicated = match u32::try_from(count).ok().and_then(|n| n.checked_mul(vertices)) {
            Some(total) => total,
            None if strategy.requires_manual_indexing() => {
                log::warn!(
                    "geometry {}: {} instances of {} vertices overflow a draw, skipping",
                    frame.id,
                    count,
                    vertices
                );
                continue;
            }
            None => 0,
        };

        backend.bind_vertex_buffer(buffer, geometry.components);
        let mode = geometry.draw_mode;
        let offset = offsets.get(frame.id).copied().unwrap_or(0);

        match strategy {
            RenderStrategy::ShaderTextureBufferInstanced => {
                backend.set_position_offset(offset);
                backend.draw_arrays_instanced(mode, vertices, count as u32);
                stats.draw_calls += 1;
            }
            RenderStrategy::ShaderTextureBufferPseudoInstance => {
                backend.set_position_offset(offset);
                backend.draw_arrays(mode, replicated);
                stats.draw_calls += 1;
            }
            RenderStrategy::ShaderUniformBatch | RenderStrategy::ShaderUniformBatchInstanced => {
                for batch in batches(count, batch_size) {
                    let positions = &frame.positions[batch];
                    upload_batch(backend, positions);
                    let n = positions.len() as u32;
                    if strategy.hardware_instanced() {
                        backend.draw_arrays_instanced(mode, vertices, n);
                    } else {
                        // n <= count, bounded by `replicated`.
                        backend.draw_arrays(mode, n * vertices);
                    }
                    stats.draw_calls += 1;
                    stats.batches += 1;
                }
            }
            RenderStrategy::FixedPipelinePerInstance => {
                for [x, y] in &frame.positions {
                    backend.set_model(&Matrix3::from_translation(Vector2::new(*x, *y)));
                    backend.draw_arrays(mode, vertices);
                    stats.draw_calls += 1;
                }
                backend.set_model(&Matrix3::identity());
            }
        }
        stats.instances += count;
    }

    stats
}
