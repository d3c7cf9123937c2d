//! The seam between the renderer and a graphics device.
//!
//! The renderer never talks to `wgpu` directly. It drives a [`GraphicsBackend`]
//! with a small, GL-flavoured vocabulary: compile a named program, bind a vertex
//! buffer, set the projection and model matrix, publish instance positions,
//! draw. Two implementations exist:
//!
//! - [`wgpu_backend::WgpuBackend`] records the calls of a frame and replays them into
//!   a single render pass on the real device
//! - [`headless::HeadlessBackend`] keeps every call and every buffer in memory,
//!   for tests and tooling without a GPU

pub mod headless;
pub mod wgpu_backend;

use cgmath::Matrix3;

use crate::{
    data_structures::geometry::DrawMode, error::Result, strategy::Capabilities,
    strategy::RenderStrategy,
};

/// A compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// A GPU-resident vertex buffer owned by the render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Where a named attribute or uniform lives inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location(pub u32);

pub trait GraphicsBackend {
    /// What the device can do. Queried once by the renderer at startup.
    fn capabilities(&self) -> Capabilities;

    /// Current drawable area in physical pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Compiles `source` under `name`. Failure is fatal to the renderer.
    fn compile_program(&mut self, name: &str, source: &str) -> Result<ProgramHandle>;

    /// Looks up an attribute or uniform of a compiled program.
    fn locate(&self, program: ProgramHandle, name: &str) -> Option<Location>;

    /// Allocates whatever the strategy needs for the lifetime of the renderer
    /// (the shared position buffer, batch uniforms, the fixed-function path).
    fn prepare(
        &mut self,
        strategy: RenderStrategy,
        max_instances: usize,
        batch_size: usize,
    ) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self, clear: wgpu::Color) -> Result<()>;

    /// Selects the program for subsequent draws; `None` selects the fixed
    /// pipeline.
    fn use_program(&mut self, program: Option<ProgramHandle>);

    fn set_projection(&mut self, projection: &Matrix3<f32>);

    fn set_model(&mut self, model: &Matrix3<f32>);

    /// Writes `data` into `existing` when it has the same size, otherwise
    /// (re)allocates. Returns the handle to use from now on.
    fn write_vertex_buffer(&mut self, existing: Option<BufferHandle>, data: &[f32])
    -> BufferHandle;

    fn release_vertex_buffer(&mut self, buffer: BufferHandle);

    /// Binds a vertex buffer with `components` floats per vertex.
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, components: u32);

    /// Replaces the contents of the shared position buffer.
    fn write_positions(&mut self, positions: &[[f32; 2]]);

    /// Index of the first position the next draw reads from the shared buffer.
    fn set_position_offset(&mut self, offset: u32);

    /// Loads one uniform batch of positions for the next draw.
    fn write_position_batch(&mut self, positions: &[[f32; 2]]);

    /// Draws `count` vertices of the bound buffer, starting at vertex 0.
    fn draw_arrays(&mut self, mode: DrawMode, count: u32);

    fn draw_arrays_instanced(&mut self, mode: DrawMode, count: u32, instances: u32);

    /// Draws flat `x, y` pairs that are not held in a vertex buffer.
    fn draw_client_vertices(&mut self, mode: DrawMode, vertices: &[f32]);

    /// Submits the frame.
    fn end_frame(&mut self) -> Result<()>;
}
