//! In-memory backend.
//!
//! Records every call it receives and keeps the contents of every vertex
//! buffer, so tests can assert on compiled layouts, uploads and draws without
//! a GPU.

use std::collections::{HashMap, HashSet};

use cgmath::Matrix3;

use crate::{
    backend::{BufferHandle, GraphicsBackend, Location, ProgramHandle},
    data_structures::geometry::DrawMode,
    error::{RenderError, Result},
    shader,
    strategy::{Capabilities, RenderStrategy},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CompileProgram(String),
    Prepare {
        strategy: RenderStrategy,
        max_instances: usize,
        batch_size: usize,
    },
    Resize(u32, u32),
    BeginFrame,
    UseProgram(Option<ProgramHandle>),
    SetProjection(Matrix3<f32>),
    SetModel(Matrix3<f32>),
    WriteVertexBuffer {
        buffer: BufferHandle,
        floats: usize,
        reused: bool,
    },
    ReleaseVertexBuffer(BufferHandle),
    BindVertexBuffer {
        buffer: BufferHandle,
        components: u32,
    },
    WritePositions(usize),
    SetPositionOffset(u32),
    WritePositionBatch(usize),
    DrawArrays {
        mode: DrawMode,
        count: u32,
    },
    DrawArraysInstanced {
        mode: DrawMode,
        count: u32,
        instances: u32,
    },
    DrawClientVertices {
        mode: DrawMode,
        count: u32,
    },
    EndFrame,
}

impl Call {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Call::DrawArrays { .. } | Call::DrawArraysInstanced { .. } | Call::DrawClientVertices { .. }
        )
    }
}

pub struct HeadlessBackend {
    capabilities: Capabilities,
    size: (u32, u32),
    programs: Vec<(String, String)>,
    failing: HashSet<String>,
    buffers: HashMap<BufferHandle, Vec<f32>>,
    next_buffer: u32,
    positions: Vec<[f32; 2]>,
    batches: Vec<Vec<[f32; 2]>>,
    calls: Vec<Call>,
}

impl HeadlessBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            size: (800, 600),
            programs: Vec::new(),
            failing: HashSet::new(),
            buffers: HashMap::new(),
            next_buffer: 1,
            positions: Vec::new(),
            batches: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    /// Makes compilation of `program` fail.
    pub fn fail_program(mut self, program: &str) -> Self {
        self.failing.insert(program.to_owned());
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn draw_calls(&self) -> Vec<&Call> {
        self.calls.iter().filter(|c| c.is_draw()).collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
        self.batches.clear();
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&[f32]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Contents of the shared position buffer as of the last upload.
    pub fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    /// Every uniform batch loaded since the last `clear_calls`.
    pub fn batches(&self) -> &[Vec<[f32; 2]>] {
        &self.batches
    }

    pub fn program_name(&self, program: ProgramHandle) -> Option<&str> {
        self.programs
            .get(program.0 as usize)
            .map(|(name, _)| name.as_str())
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn compile_program(&mut self, name: &str, source: &str) -> Result<ProgramHandle> {
        self.calls.push(Call::CompileProgram(name.to_owned()));
        if self.failing.contains(name) {
            return Err(RenderError::ShaderCompilation {
                program: name.to_owned(),
                message: "rejected by headless backend".to_owned(),
            });
        }
        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push((name.to_owned(), source.to_owned()));
        Ok(handle)
    }

    fn locate(&self, program: ProgramHandle, name: &str) -> Option<Location> {
        let (_, source) = self.programs.get(program.0 as usize)?;
        shader::declares(source, name).then(|| Location(shader::slot_of(name)))
    }

    fn prepare(
        &mut self,
        strategy: RenderStrategy,
        max_instances: usize,
        batch_size: usize,
    ) -> Result<()> {
        self.calls.push(Call::Prepare {
            strategy,
            max_instances,
            batch_size,
        });
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.calls.push(Call::Resize(width, height));
    }

    fn begin_frame(&mut self, _clear: wgpu::Color) -> Result<()> {
        self.calls.push(Call::BeginFrame);
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.calls.push(Call::UseProgram(program));
    }

    fn set_projection(&mut self, projection: &Matrix3<f32>) {
        self.calls.push(Call::SetProjection(*projection));
    }

    fn set_model(&mut self, model: &Matrix3<f32>) {
        self.calls.push(Call::SetModel(*model));
    }

    fn write_vertex_buffer(
        &mut self,
        existing: Option<BufferHandle>,
        data: &[f32],
    ) -> BufferHandle {
        let reusable = existing.filter(|b| {
            self.buffers
                .get(b)
                .is_some_and(|contents| contents.len() == data.len())
        });
        let buffer = match reusable {
            Some(buffer) => buffer,
            None => {
                if let Some(stale) = existing {
                    self.buffers.remove(&stale);
                }
                let buffer = BufferHandle(self.next_buffer);
                self.next_buffer += 1;
                buffer
            }
        };
        self.buffers.insert(buffer, data.to_vec());
        self.calls.push(Call::WriteVertexBuffer {
            buffer,
            floats: data.len(),
            reused: reusable.is_some(),
        });
        buffer
    }

    fn release_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.calls.push(Call::ReleaseVertexBuffer(buffer));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, components: u32) {
        self.calls.push(Call::BindVertexBuffer { buffer, components });
    }

    fn write_positions(&mut self, positions: &[[f32; 2]]) {
        self.positions = positions.to_vec();
        self.calls.push(Call::WritePositions(positions.len()));
    }

    fn set_position_offset(&mut self, offset: u32) {
        self.calls.push(Call::SetPositionOffset(offset));
    }

    fn write_position_batch(&mut self, positions: &[[f32; 2]]) {
        self.batches.push(positions.to_vec());
        self.calls.push(Call::WritePositionBatch(positions.len()));
    }

    fn draw_arrays(&mut self, mode: DrawMode, count: u32) {
        self.calls.push(Call::DrawArrays { mode, count });
    }

    fn draw_arrays_instanced(&mut self, mode: DrawMode, count: u32, instances: u32) {
        self.calls.push(Call::DrawArraysInstanced {
            mode,
            count,
            instances,
        });
    }

    fn draw_client_vertices(&mut self, mode: DrawMode, vertices: &[f32]) {
        self.calls.push(Call::DrawClientVertices {
            mode,
            count: (vertices.len() / 2) as u32,
        });
    }

    fn end_frame(&mut self) -> Result<()> {
        self.calls.push(Call::EndFrame);
        Ok(())
    }
}
