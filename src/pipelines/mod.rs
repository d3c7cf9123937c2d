//! Render pipeline construction for the `wgpu` backend.
//!
//! Every program shares one bind group layout:
//!
//! - binding 0: per-draw uniform block (projection, model, position offset),
//!   dynamic offset
//! - binding 1: shared position buffer, only present for texture-buffer
//!   strategies
//! - binding 2: uniform position batch, dynamic offset
//!
//! Pipelines differ only in shader module, vertex width and topology.

use std::num::NonZeroU64;

/// Bytes of the `Globals` uniform block as laid out by WGSL.
pub const GLOBALS_SIZE: u64 = 112;
/// Bytes of one `array<vec4<f32>, 256>` position batch.
pub const BATCH_BYTES: u64 = 4096;

const VERTEX_2D: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x2,
    offset: 0,
    shader_location: 0,
}];

const VERTEX_REPLICA: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: 0,
}];

/// Layout of one vertex with `components` floats (2, or 3 with a replica
/// index).
pub fn vertex_layout(components: u32) -> wgpu::VertexBufferLayout<'static> {
    let attributes: &'static [wgpu::VertexAttribute] = if components == 3 {
        &VERTEX_REPLICA
    } else {
        &VERTEX_2D
    };
    wgpu::VertexBufferLayout {
        array_stride: (components as usize * size_of::<f32>()) as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

fn dynamic_uniform(binding: u32, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(size),
        },
        count: None,
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device, with_position_buffer: bool) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        dynamic_uniform(0, GLOBALS_SIZE),
        dynamic_uniform(2, BATCH_BYTES),
    ];
    if with_position_buffer {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("instancing_bind_group_layout"),
        entries: &entries,
    })
}

pub fn mk_pipeline_layout(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Instancing Pipeline Layout"),
        bind_group_layouts: &[bind_group_layout],
        immediate_size: 0,
    })
}

pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    shader: &wgpu::ShaderModule,
    components: u32,
    topology: wgpu::PrimitiveTopology,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Render Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout(components)],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_vertices_are_three_floats_wide() {
        assert_eq!(vertex_layout(3).array_stride, 12);
        assert_eq!(vertex_layout(3).attributes[0].format, wgpu::VertexFormat::Float32x3);
        assert_eq!(vertex_layout(2).array_stride, 8);
    }
}
