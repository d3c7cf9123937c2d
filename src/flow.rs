//! Application event loop.
//!
//! A "flow" is a piece of game logic that talks to the renderer through the
//! [`Scene`] handle: it registers drawables, adds and removes instances and
//! reacts to window input. The flow runner owns the window, the `wgpu`
//! context and the [`Renderer`], and drives the render tick at the configured
//! rate.
//!
//! # Lifecycle
//!
//! 1. `resumed`: create the window and the GPU context, negotiate the
//!    strategy, construct the flows and call `on_init` on each
//! 2. every window event is forwarded to `on_window_events`
//! 3. every tick: `on_tick` on all flows, then one rendered frame
//!
//! Simulation that should not be tied to the frame rate can clone the scene
//! handle in `on_init` and run on its own thread.

use std::{fmt::Debug, pin::Pin, sync::Arc};

use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::{
    backend::wgpu_backend::WgpuBackend,
    config::RendererConfig,
    context::Context,
    error::RenderError,
    render::Renderer,
    scene::Scene,
    shader::BuiltinShaders,
};

/// Game logic driven by the flow runner.
pub trait GraphicsFlow {
    /// Called once after the renderer is ready, before the first frame.
    fn on_init(&mut self, scene: &Scene);

    /// Called once per render tick before the frame is drawn. `dt` is the time
    /// since the previous tick.
    fn on_tick(&mut self, scene: &Scene, dt: Duration);

    /// Handle window events (keyboard, mouse, resizing, etc.).
    fn on_window_events(&mut self, _scene: &Scene, _event: &WindowEvent) {}
}

impl Debug for dyn GraphicsFlow + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GraphicsFlow")
    }
}

/// Builds a flow once the scene exists. Constructors may load data
/// asynchronously; they are all awaited before the first frame.
pub type FlowConstructor =
    Box<dyn FnOnce(Scene) -> Pin<Box<dyn Future<Output = Box<dyn GraphicsFlow>>>>>;

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "instanced-ngin".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

struct AppState {
    window: Arc<Window>,
    renderer: Renderer<WgpuBackend>,
}

impl AppState {
    async fn new(window: Arc<Window>, config: RendererConfig) -> Result<Self, RenderError> {
        let ctx = Context::new(window.clone()).await?;
        let renderer = Renderer::new(WgpuBackend::new(ctx), config, &BuiltinShaders)?;
        Ok(Self { window, renderer })
    }

    fn render(&mut self) {
        match self.renderer.draw_frame() {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => log::warn!("frame skipped: {}", e),
            Err(e) => log::error!("Unable to render {}", e),
        }
    }
}

pub struct App {
    async_runtime: tokio::runtime::Runtime,
    config: RendererConfig,
    window_config: WindowConfig,
    state: Option<AppState>,
    graphics_flows: Vec<Box<dyn GraphicsFlow>>,
    // Taken on the first `resumed`.
    constructors: Option<Vec<FlowConstructor>>,
    last_tick: Instant,
    next_tick: Instant,
    error: Option<RenderError>,
}

impl App {
    fn new(
        config: RendererConfig,
        window_config: WindowConfig,
        constructors: Vec<FlowConstructor>,
    ) -> anyhow::Result<Self> {
        let now = Instant::now();
        Ok(Self {
            async_runtime: tokio::runtime::Runtime::new()?,
            config,
            window_config,
            state: None,
            graphics_flows: Vec::new(),
            constructors: Some(constructors),
            last_tick: now,
            next_tick: now,
            error: None,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: RenderError) {
        log::error!("App initialization failed: {}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn tick(&mut self) {
        let Some(state) = &mut self.state else {
            return;
        };
        let dt = self.last_tick.elapsed();
        self.last_tick = Instant::now();
        let scene = state.renderer.scene().clone();
        self.graphics_flows
            .iter_mut()
            .for_each(|flow| flow.on_tick(&scene, dt));
        state.render();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(constructors) = self.constructors.take() else {
            return;
        };

        let window_attributes = Window::default_attributes()
            .with_title(self.window_config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.window_config.width,
                self.window_config.height,
            ));
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.fail(event_loop, RenderError::SurfaceCreation(e.to_string()));
                return;
            }
        };

        let state = match self
            .async_runtime
            .block_on(AppState::new(window, self.config.clone()))
        {
            Ok(state) => state,
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        };

        let scene = state.renderer.scene().clone();
        let flow_futures: Vec<_> = constructors
            .into_iter()
            .map(|constructor| constructor(scene.clone()))
            .collect();
        self.graphics_flows = self
            .async_runtime
            .block_on(futures::future::join_all(flow_futures));
        self.graphics_flows
            .iter_mut()
            .for_each(|flow| flow.on_init(&scene));

        log::info!(
            "{} flow(s) running with {}",
            self.graphics_flows.len(),
            state.renderer.strategy()
        );
        state.window.request_redraw();
        self.state = Some(state);
        self.last_tick = Instant::now();
        self.next_tick = self.last_tick;
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        let scene = state.renderer.scene().clone();
        self.graphics_flows
            .iter_mut()
            .for_each(|flow| flow.on_window_events(&scene, &event));

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => state.renderer.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.tick(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = &self.state else {
            return;
        };
        let now = Instant::now();
        if now >= self.next_tick {
            state.window.request_redraw();
            self.next_tick = now + self.config.tick_duration();
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_tick));
    }
}

/// Opens a window and runs the flows until it is closed.
///
/// Setup errors (no adapter, missing capability, bad shader) end the event
/// loop and are returned.
pub fn run(
    config: RendererConfig,
    window_config: WindowConfig,
    constructors: Vec<FlowConstructor>,
) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    };
    config.validate()?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, window_config, constructors)?;
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
