#![allow(dead_code)]

use std::sync::Arc;

use instanced_ngin::{
    Capabilities, DrawMode, Geometry, RendererConfig,
    backend::headless::{Call, HeadlessBackend},
    render::Renderer,
    shader::BuiltinShaders,
};

pub const TRIANGLE: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.5, 1.0];

pub fn caps(shaders: bool, hardware_instancing: bool, buffer_texture: bool) -> Capabilities {
    Capabilities {
        shaders,
        hardware_instancing,
        buffer_texture,
    }
}

/// Every capability combination that leads to a distinct strategy.
pub fn all_strategy_caps() -> [Capabilities; 5] {
    [
        caps(false, false, false),
        caps(true, false, false),
        caps(true, false, true),
        caps(true, true, false),
        caps(true, true, true),
    ]
}

pub fn triangle(name: &str) -> Arc<Geometry> {
    Arc::new(Geometry::new(name, DrawMode::Triangles, TRIANGLE.to_vec()))
}

/// Small capacity keeps pseudo-instanced buffers cheap in tests.
pub fn test_config() -> RendererConfig {
    RendererConfig::default().with_max_instances(2048)
}

pub fn renderer(capabilities: Capabilities) -> Renderer<HeadlessBackend> {
    renderer_with(capabilities, test_config())
}

pub fn renderer_with(capabilities: Capabilities, config: RendererConfig) -> Renderer<HeadlessBackend> {
    Renderer::new(HeadlessBackend::new(capabilities), config, &BuiltinShaders)
        .expect("headless renderer should always initialize with builtin shaders")
}

/// Draws one frame and returns the calls it issued.
pub fn frame_calls(renderer: &mut Renderer<HeadlessBackend>) -> Vec<Call> {
    renderer.backend_mut().clear_calls();
    renderer.draw_frame().expect("headless frames cannot fail");
    renderer.backend().calls().to_vec()
}

/// Instanced draws of a frame: everything but the scene-graph's client vertex
/// draws.
pub fn instanced_draws(calls: &[Call]) -> Vec<&Call> {
    calls
        .iter()
        .filter(|c| c.is_draw() && !matches!(c, Call::DrawClientVertices { .. }))
        .collect()
}
