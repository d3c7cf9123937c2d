//! instanced-ngin
//!
//! A capability-adaptive instanced 2D renderer. At startup it probes what the
//! GPU offers (shaders, hardware instancing, shader-readable position
//! buffers) and picks one of five draw strategies. Every strategy fulfils the
//! same contract: draw N instances of a shape at N positions, with per-frame
//! cost that stays bounded as N grows into the hundreds of thousands.
//!
//! High-level modules
//! - `strategy`: capability flags and strategy negotiation
//! - `data_structures`: geometries, the instance store and the drawable tree
//! - `compiler`: dirty geometry to vertex buffers, shaped per strategy
//! - `upload`: per-frame position publishing
//! - `dispatch`: per-geometry instanced draw calls and batching
//! - `render`: the frame orchestrator tying the above together
//! - `scene`: the cloneable handle game code uses to reach shared state
//! - `backend`: the GPU seam, with a `wgpu` and a recording implementation
//! - `flow`: winit event loop driving the render tick
//!

pub mod backend;
pub mod compiler;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod pipelines;
pub mod render;
pub mod scene;
pub mod shader;
pub mod strategy;
pub mod upload;
pub mod viewport;

// Re-exports commonly used types for convenience in downstream code.
pub use config::RendererConfig;
pub use data_structures::{
    geometry::{DrawMode, Geometry, GeometryId, ShapeBuilder},
    instance::Movable,
    scene_graph::{Drawable, NodeHooks, RemovalHandle},
};
pub use error::{RenderError, Result};
pub use render::{FrameStats, Renderer};
pub use scene::Scene;
pub use strategy::{Capabilities, CapabilityOverrides, RenderStrategy};

pub use cgmath::*;
pub use winit::event::WindowEvent;
