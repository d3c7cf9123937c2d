//! Frame orchestration.
//!
//! A [`Renderer`] owns the backend and everything GPU-side: the negotiated
//! strategy, the compiled programs and the compiled geometry table. Game code
//! only ever sees the [`Scene`] handle.
//!
//! One call to [`Renderer::draw_frame`] is one render tick:
//!
//! 1. copy the scene graph draw list and the instance positions out of the
//!    shared state (locks are released afterwards)
//! 2. draw the scene graph with the default program
//! 3. compile geometry that became dirty
//! 4. publish positions and dispatch the instanced draws

use cgmath::{Matrix3, SquareMatrix};
use instant::{Duration, Instant};

use crate::{
    backend::{GraphicsBackend, ProgramHandle},
    compiler::{self, CompiledGeometry},
    config::RendererConfig,
    data_structures::{geometry::GeometryId, instance::GeometryFrame},
    dispatch::{self, DispatchStats},
    error::{RenderError, Result},
    scene::Scene,
    shader::{DEFAULT_PROGRAM_INPUTS, ShaderLoader},
    strategy::RenderStrategy,
    upload,
    viewport::Viewport,
};

/// What one frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Scene-graph draws.
    pub scene_draws: usize,
    /// Geometries compiled this frame.
    pub compiled: usize,
    pub instanced: DispatchStats,
    pub cpu_time: Duration,
}

pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    strategy: RenderStrategy,
    default_program: Option<ProgramHandle>,
    instancing_program: Option<ProgramHandle>,
    compiled: Vec<Option<CompiledGeometry>>,
    scene: Scene,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Negotiates the strategy, compiles and checks its programs and prepares
    /// the backend. Any error here is fatal.
    pub fn new(mut backend: B, config: RendererConfig, shaders: &dyn ShaderLoader) -> Result<Self> {
        config.validate()?;

        let capabilities = backend.capabilities().masked(&config.capabilities);
        let strategy = RenderStrategy::negotiate(capabilities);
        log::info!("render strategy: {} ({:?})", strategy, capabilities);

        let default_program = match strategy.default_program() {
            Some(name) => Some(compile_checked(
                &mut backend,
                shaders,
                name,
                DEFAULT_PROGRAM_INPUTS,
            )?),
            None => None,
        };
        let instancing_program = match strategy.instancing_program() {
            Some(name) => Some(compile_checked(
                &mut backend,
                shaders,
                name,
                strategy.instancing_inputs(),
            )?),
            None => None,
        };

        backend.prepare(strategy, config.max_instances, config.batch_size)?;

        let (width, height) = backend.surface_size();
        let scene = Scene::new(
            config.max_instances,
            Viewport::new(width, height, config.view_width),
        );

        Ok(Self {
            backend,
            config,
            strategy,
            default_program,
            instancing_program,
            compiled: Vec::new(),
            scene,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The compiled form of a geometry, `None` until it was first drawn.
    pub fn compiled(&self, id: GeometryId) -> Option<&CompiledGeometry> {
        self.compiled.get(id).and_then(Option::as_ref)
    }

    /// New window size in physical pixels.
    pub fn resize(&mut self, screen_width: u32, screen_height: u32) {
        let viewport = self.scene.resize(screen_width, screen_height);
        self.backend.resize(screen_width, screen_height);
        log::debug!(
            "resized to {}x{}, view {}x{}",
            screen_width,
            screen_height,
            viewport.view_width,
            viewport.view_height
        );
    }

    pub fn draw_frame(&mut self) -> Result<FrameStats> {
        let started = Instant::now();
        self.scene.mark_drawn(started);

        let viewport = self.scene.viewport();
        let (view_width, view_height) = (viewport.view_width, viewport.view_height);
        let items = self.scene.draw_items(view_width, view_height);
        let frames = self.scene.frame_snapshot(view_width, view_height);

        self.backend.begin_frame(self.config.clear_colour)?;

        self.backend.use_program(self.default_program);
        self.backend.set_projection(&viewport.projection());
        for item in &items {
            self.backend.set_model(&item.model);
            self.backend.draw_client_vertices(item.draw_mode, &item.vertices);
        }
        self.backend.set_model(&Matrix3::identity());

        if self.instancing_program.is_some() {
            self.backend.use_program(self.instancing_program);
        }

        let compiled = self.compile_dirty(&frames);
        let offsets = if self.strategy.uses_texture_buffer() {
            upload::upload_all(&mut self.backend, &frames)
        } else {
            Vec::new()
        };
        let instanced = dispatch::dispatch(
            &mut self.backend,
            self.strategy,
            self.config.batch_size,
            &frames,
            &self.compiled,
            &offsets,
        );

        self.backend.end_frame()?;

        let stats = FrameStats {
            scene_draws: items.len(),
            compiled,
            instanced,
            cpu_time: started.elapsed(),
        };
        log::trace!("{:?}", stats);
        Ok(stats)
    }

    fn compile_dirty(&mut self, frames: &[GeometryFrame]) -> usize {
        if self.compiled.len() < frames.len() {
            self.compiled.resize(frames.len(), None);
        }
        let mut count = 0;
        for frame in frames {
            let Some(vertices) = &frame.rebuilt else {
                continue;
            };
            let compiled = compiler::compile(
                &mut self.backend,
                self.strategy,
                self.config.max_instances,
                self.compiled[frame.id].as_ref(),
                frame.draw_mode,
                vertices,
            );
            self.compiled[frame.id] = Some(compiled);
            count += 1;
        }
        count
    }
}

fn compile_checked<B: GraphicsBackend>(
    backend: &mut B,
    shaders: &dyn ShaderLoader,
    name: &str,
    inputs: &[&str],
) -> Result<ProgramHandle> {
    let source = shaders.load(name)?;
    let program = backend.compile_program(name, &source)?;
    for input in inputs {
        if backend.locate(program, input).is_none() {
            return Err(RenderError::MissingShaderInput {
                program: name.to_owned(),
                name: (*input).to_owned(),
            });
        }
    }
    log::debug!("program `{}` ready", name);
    Ok(program)
}

impl<B: GraphicsBackend> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("strategy", &self.strategy)
            .field("compiled", &self.compiled.iter().flatten().count())
            .field("scene", &self.scene)
            .finish()
    }
}
