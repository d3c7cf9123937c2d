//! `wgpu` implementation of [`GraphicsBackend`].
//!
//! Calls made during a frame are not executed immediately. Each draw is
//! recorded together with the uniform state it needs (a slot in the per-draw
//! uniform buffer, a slot in the batch buffer, a range of the client vertex
//! buffer). `end_frame` uploads all of that in one go and replays the draws
//! into a single render pass.

use std::{collections::HashMap, iter, num::NonZeroU64, ops::Range};

use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix3, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::{
    backend::{BufferHandle, GraphicsBackend, Location, ProgramHandle},
    config::MAX_BATCH_SIZE,
    context::Context,
    data_structures::geometry::DrawMode,
    error::{RenderError, Result},
    pipelines::{self, BATCH_BYTES, GLOBALS_SIZE},
    shader,
    strategy::{Capabilities, RenderStrategy},
};

const BATCH_FLOATS: usize = MAX_BATCH_SIZE * 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct Globals {
    projection: [[f32; 4]; 3],
    model: [[f32; 4]; 3],
    position_offset: u32,
    _padding: [u32; 3],
}

impl Default for Globals {
    fn default() -> Self {
        let identity = columns(&Matrix3::identity());
        Self {
            projection: identity,
            model: identity,
            position_offset: 0,
            _padding: [0; 3],
        }
    }
}

/// WGSL stores each `mat3x3` column padded to a `vec4`.
fn columns(m: &Matrix3<f32>) -> [[f32; 4]; 3] {
    [
        [m.x.x, m.x.y, m.x.z, 0.0],
        [m.y.x, m.y.y, m.y.z, 0.0],
        [m.z.x, m.z.y, m.z.z, 0.0],
    ]
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// A buffer that is reallocated (doubling) when a frame needs more room.
struct GrowableBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    size: u64,
}

impl GrowableBuffer {
    fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages, size: u64) -> Self {
        let size = size.max(16);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            label,
            usage,
            buffer,
            size,
        }
    }

    /// Returns true if the buffer was replaced.
    fn reserve(&mut self, device: &wgpu::Device, size: u64) -> bool {
        if size <= self.size {
            return false;
        }
        log::debug!("growing {} from {} to {} bytes", self.label, self.size, size);
        *self = Self::new(device, self.label, self.usage, size.next_power_of_two());
        true
    }
}

struct Program {
    source: String,
    module: wgpu::ShaderModule,
}

#[derive(Debug, Clone, Copy)]
enum VertexSource {
    Buffer(BufferHandle),
    Client,
}

type PipelineKey = (Option<ProgramHandle>, u32, wgpu::PrimitiveTopology);

struct DrawOp {
    key: PipelineKey,
    source: VertexSource,
    vertices: Range<u32>,
    instances: u32,
    globals: u32,
    batch: u32,
}

/// Draw state accumulated between `begin_frame` and `end_frame`.
#[derive(Default)]
struct FrameRecorder {
    clear: wgpu::Color,
    program: Option<ProgramHandle>,
    current: Globals,
    globals_dirty: bool,
    bound: Option<(BufferHandle, u32)>,
    uniforms: Vec<Globals>,
    batches: Vec<f32>,
    client_vertices: Vec<f32>,
    ops: Vec<DrawOp>,
}

impl FrameRecorder {
    fn reset(&mut self, clear: wgpu::Color) {
        *self = Self {
            clear,
            ..Default::default()
        };
    }

    fn globals_slot(&mut self) -> u32 {
        if self.globals_dirty || self.uniforms.is_empty() {
            self.uniforms.push(self.current);
            self.globals_dirty = false;
        }
        (self.uniforms.len() - 1) as u32
    }

    fn batch_slot(&self) -> u32 {
        (self.batches.len() / BATCH_FLOATS).saturating_sub(1) as u32
    }

    fn record(
        &mut self,
        source: VertexSource,
        components: u32,
        mode: DrawMode,
        vertices: Range<u32>,
        instances: u32,
    ) {
        let globals = self.globals_slot();
        let batch = self.batch_slot();
        self.ops.push(DrawOp {
            key: (self.program, components, mode.topology()),
            source,
            vertices,
            instances,
            globals,
            batch,
        });
    }
}

pub struct WgpuBackend {
    ctx: Context,
    strategy: Option<RenderStrategy>,
    programs: Vec<Program>,
    fixed_function: Option<wgpu::ShaderModule>,
    pipeline_layout: Option<wgpu::PipelineLayout>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    bind_group: Option<wgpu::BindGroup>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    vertex_buffers: HashMap<BufferHandle, wgpu::Buffer>,
    next_buffer: u32,
    uniform_stride: u64,
    batch_stride: u64,
    globals: GrowableBuffer,
    batches: GrowableBuffer,
    client_vertices: GrowableBuffer,
    positions: Option<GrowableBuffer>,
    frame: FrameRecorder,
}

impl WgpuBackend {
    pub fn new(ctx: Context) -> Self {
        let alignment = u64::from(ctx.device.limits().min_uniform_buffer_offset_alignment);
        let uniform_stride = align_to(GLOBALS_SIZE, alignment);
        let batch_stride = align_to(BATCH_BYTES, alignment);
        let device = &ctx.device;
        let globals = GrowableBuffer::new(
            device,
            "Globals Buffer",
            wgpu::BufferUsages::UNIFORM,
            64 * uniform_stride,
        );
        let batches = GrowableBuffer::new(
            device,
            "Position Batch Buffer",
            wgpu::BufferUsages::UNIFORM,
            4 * batch_stride,
        );
        let client_vertices = GrowableBuffer::new(
            device,
            "Client Vertex Buffer",
            wgpu::BufferUsages::VERTEX,
            64 * 1024,
        );
        Self {
            ctx,
            strategy: None,
            programs: Vec::new(),
            fixed_function: None,
            pipeline_layout: None,
            bind_group_layout: None,
            bind_group: None,
            pipelines: HashMap::new(),
            vertex_buffers: HashMap::new(),
            next_buffer: 1,
            uniform_stride,
            batch_stride,
            globals,
            batches,
            client_vertices,
            positions: None,
            frame: FrameRecorder::default(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The strategy the backend was prepared for.
    pub fn strategy(&self) -> Option<RenderStrategy> {
        self.strategy
    }

    fn create_module(&self, name: &str, source: &str) -> Result<wgpu::ShaderModule> {
        let module = self
            .ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let info = futures::executor::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if !errors.is_empty() {
            return Err(RenderError::ShaderCompilation {
                program: name.to_owned(),
                message: errors.join("\n"),
            });
        }
        Ok(module)
    }

    fn ensure_pipelines(&mut self) -> Result<()> {
        let Some(layout) = self.pipeline_layout.as_ref() else {
            return Err(RenderError::InvalidConfig(
                "backend used before prepare".into(),
            ));
        };
        for op in &self.frame.ops {
            if self.pipelines.contains_key(&op.key) {
                continue;
            }
            let (program, components, topology) = op.key;
            let module = match program {
                Some(handle) => self.programs.get(handle.0 as usize).map(|p| &p.module),
                None => self.fixed_function.as_ref(),
            };
            let Some(module) = module else {
                log::warn!("draw recorded without a usable program, skipping");
                continue;
            };
            log::debug!("creating pipeline {:?}", op.key);
            let pipeline = pipelines::mk_render_pipeline(
                &self.ctx.device,
                layout,
                self.ctx.config.format,
                module,
                components,
                topology,
            );
            self.pipelines.insert(op.key, pipeline);
        }
        Ok(())
    }

    /// Uploads the recorded uniforms, batches and client vertices, growing
    /// buffers if needed.
    fn flush_frame_data(&mut self) {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let frame = &self.frame;

        let stride = self.uniform_stride as usize;
        if !frame.uniforms.is_empty() {
            let mut bytes = vec![0u8; frame.uniforms.len() * stride];
            for (i, globals) in frame.uniforms.iter().enumerate() {
                bytes[i * stride..i * stride + size_of::<Globals>()]
                    .copy_from_slice(bytemuck::bytes_of(globals));
            }
            if self.globals.reserve(device, bytes.len() as u64) {
                self.bind_group = None;
            }
            queue.write_buffer(&self.globals.buffer, 0, &bytes);
        }

        if !frame.batches.is_empty() {
            let stride = self.batch_stride as usize;
            let count = frame.batches.len() / BATCH_FLOATS;
            let mut bytes = vec![0u8; count * stride];
            for (i, batch) in frame.batches.chunks_exact(BATCH_FLOATS).enumerate() {
                bytes[i * stride..i * stride + BATCH_BYTES as usize]
                    .copy_from_slice(bytemuck::cast_slice(batch));
            }
            if self.batches.reserve(device, bytes.len() as u64) {
                self.bind_group = None;
            }
            queue.write_buffer(&self.batches.buffer, 0, &bytes);
        }

        if !frame.client_vertices.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&frame.client_vertices);
            self.client_vertices.reserve(device, bytes.len() as u64);
            queue.write_buffer(&self.client_vertices.buffer, 0, bytes);
        }
    }

    fn ensure_bind_group(&mut self) -> Result<()> {
        if self.bind_group.is_some() {
            return Ok(());
        }
        let Some(layout) = self.bind_group_layout.as_ref() else {
            return Err(RenderError::InvalidConfig(
                "backend used before prepare".into(),
            ));
        };
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.globals.buffer,
                    offset: 0,
                    size: NonZeroU64::new(GLOBALS_SIZE),
                }),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.batches.buffer,
                    offset: 0,
                    size: NonZeroU64::new(BATCH_BYTES),
                }),
            },
        ];
        if let Some(positions) = &self.positions {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: positions.buffer.as_entire_binding(),
            });
        }
        self.bind_group = Some(self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("instancing_bind_group"),
            layout,
            entries: &entries,
        }));
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn capabilities(&self) -> Capabilities {
        self.ctx.capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.ctx.config.width, self.ctx.config.height)
    }

    fn compile_program(&mut self, name: &str, source: &str) -> Result<ProgramHandle> {
        let module = self.create_module(name, source)?;
        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push(Program {
            source: source.to_owned(),
            module,
        });
        log::debug!("compiled program `{}` as {:?}", name, handle);
        Ok(handle)
    }

    fn locate(&self, program: ProgramHandle, name: &str) -> Option<Location> {
        let program = self.programs.get(program.0 as usize)?;
        shader::declares(&program.source, name).then(|| Location(shader::slot_of(name)))
    }

    fn prepare(
        &mut self,
        strategy: RenderStrategy,
        max_instances: usize,
        batch_size: usize,
    ) -> Result<()> {
        if strategy.uses_texture_buffer() && !self.ctx.capabilities.buffer_texture {
            return Err(RenderError::MissingFeature(
                "storage buffers readable from the vertex stage".into(),
            ));
        }
        if batch_size > MAX_BATCH_SIZE {
            return Err(RenderError::InvalidConfig(format!(
                "batch size {} exceeds the shader limit of {}",
                batch_size, MAX_BATCH_SIZE
            )));
        }
        if !strategy.uses_shaders() {
            self.fixed_function =
                Some(self.create_module("fixed_function", shader::FIXED_FUNCTION)?);
        }
        if strategy.uses_texture_buffer() {
            self.positions = Some(GrowableBuffer::new(
                &self.ctx.device,
                "Position Buffer",
                wgpu::BufferUsages::STORAGE,
                (max_instances * size_of::<[f32; 2]>()) as u64,
            ));
        }
        let bind_group_layout =
            pipelines::mk_bind_group_layout(&self.ctx.device, strategy.uses_texture_buffer());
        self.pipeline_layout = Some(pipelines::mk_pipeline_layout(
            &self.ctx.device,
            &bind_group_layout,
        ));
        self.bind_group_layout = Some(bind_group_layout);
        self.bind_group = None;
        self.pipelines.clear();
        self.strategy = Some(strategy);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
    }

    fn begin_frame(&mut self, clear: wgpu::Color) -> Result<()> {
        self.frame.reset(clear);
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.frame.program = program;
    }

    fn set_projection(&mut self, projection: &Matrix3<f32>) {
        self.frame.current.projection = columns(projection);
        self.frame.globals_dirty = true;
    }

    fn set_model(&mut self, model: &Matrix3<f32>) {
        self.frame.current.model = columns(model);
        self.frame.globals_dirty = true;
    }

    fn write_vertex_buffer(
        &mut self,
        existing: Option<BufferHandle>,
        data: &[f32],
    ) -> BufferHandle {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if let Some(handle) = existing {
            if let Some(buffer) = self.vertex_buffers.get(&handle) {
                if buffer.size() == bytes.len() as u64 {
                    self.ctx.queue.write_buffer(buffer, 0, bytes);
                    return handle;
                }
            }
        }
        let handle = existing.unwrap_or_else(|| {
            let handle = BufferHandle(self.next_buffer);
            self.next_buffer += 1;
            handle
        });
        let buffer = self
            .ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Geometry Vertex Buffer"),
                contents: bytes,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
        self.vertex_buffers.insert(handle, buffer);
        handle
    }

    fn release_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.vertex_buffers.remove(&buffer);
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, components: u32) {
        self.frame.bound = Some((buffer, components));
    }

    fn write_positions(&mut self, positions: &[[f32; 2]]) {
        let Some(buffer) = self.positions.as_mut() else {
            log::warn!("positions written without a position buffer");
            return;
        };
        if positions.is_empty() {
            return;
        }
        let bytes: &[u8] = bytemuck::cast_slice(positions);
        if buffer.reserve(&self.ctx.device, bytes.len() as u64) {
            self.bind_group = None;
        }
        self.ctx.queue.write_buffer(&buffer.buffer, 0, bytes);
    }

    fn set_position_offset(&mut self, offset: u32) {
        self.frame.current.position_offset = offset;
        self.frame.globals_dirty = true;
    }

    fn write_position_batch(&mut self, positions: &[[f32; 2]]) {
        let positions = if positions.len() > MAX_BATCH_SIZE {
            log::warn!(
                "batch of {} positions truncated to {}",
                positions.len(),
                MAX_BATCH_SIZE
            );
            &positions[..MAX_BATCH_SIZE]
        } else {
            positions
        };
        let start = self.frame.batches.len();
        self.frame
            .batches
            .extend(positions.iter().flat_map(|p| p.iter().copied()));
        self.frame.batches.resize(start + BATCH_FLOATS, 0.0);
    }

    fn draw_arrays(&mut self, mode: DrawMode, count: u32) {
        let Some((buffer, components)) = self.frame.bound else {
            log::trace!("draw without a bound vertex buffer");
            return;
        };
        self.frame
            .record(VertexSource::Buffer(buffer), components, mode, 0..count, 1);
    }

    fn draw_arrays_instanced(&mut self, mode: DrawMode, count: u32, instances: u32) {
        let Some((buffer, components)) = self.frame.bound else {
            log::trace!("draw without a bound vertex buffer");
            return;
        };
        self.frame.record(
            VertexSource::Buffer(buffer),
            components,
            mode,
            0..count,
            instances,
        );
    }

    fn draw_client_vertices(&mut self, mode: DrawMode, vertices: &[f32]) {
        let first = (self.frame.client_vertices.len() / 2) as u32;
        let count = (vertices.len() / 2) as u32;
        if count == 0 {
            return;
        }
        self.frame
            .client_vertices
            .extend_from_slice(&vertices[..count as usize * 2]);
        self.frame
            .record(VertexSource::Client, 2, mode, first..first + count, 1);
    }

    fn end_frame(&mut self) -> Result<()> {
        let output = match self.ctx.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.ctx.reconfigure();
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.flush_frame_data();
        self.ensure_pipelines()?;
        self.ensure_bind_group()?;

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.frame.clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                multiview_mask: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some(bind_group) = &self.bind_group {
                for op in &self.frame.ops {
                    let Some(pipeline) = self.pipelines.get(&op.key) else {
                        continue;
                    };
                    let vertex_buffer = match op.source {
                        VertexSource::Buffer(handle) => match self.vertex_buffers.get(&handle) {
                            Some(buffer) => buffer,
                            None => continue,
                        },
                        VertexSource::Client => &self.client_vertices.buffer,
                    };
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(
                        0,
                        bind_group,
                        &[
                            (u64::from(op.globals) * self.uniform_stride) as u32,
                            (u64::from(op.batch) * self.batch_stride) as u32,
                        ],
                    );
                    render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                    render_pass.draw(op.vertices.clone(), 0..op.instances);
                }
            }
        }

        self.ctx.queue.submit(iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}
