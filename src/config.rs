//! Renderer configuration.

use instant::Duration;

use crate::{
    error::{RenderError, Result},
    strategy::CapabilityOverrides,
};

/// Largest uniform batch the shipped uniform-array shaders can hold.
pub const MAX_BATCH_SIZE: usize = 512;

/// Tunables for a [`Renderer`](crate::render::Renderer).
///
/// The defaults match what the engine was tuned for: 100 000 instances per
/// geometry, 512 positions per uniform batch, a view 100 units wide and a
/// 60 Hz render tick.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Per-geometry instance capacity, also the replica count of
    /// pseudo-instanced geometry buffers.
    pub max_instances: usize,
    /// Positions per uniform-array batch.
    pub batch_size: usize,
    /// Width of the view in view units. The height follows the aspect ratio.
    pub view_width: f32,
    pub clear_colour: wgpu::Color,
    pub tick_rate_hz: u32,
    pub capabilities: CapabilityOverrides,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_instances: 100_000,
            batch_size: MAX_BATCH_SIZE,
            view_width: 100.0,
            clear_colour: wgpu::Color::BLACK,
            tick_rate_hz: 60,
            capabilities: CapabilityOverrides::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_view_width(mut self, view_width: f32) -> Self {
        self.view_width = view_width;
        self
    }

    pub fn with_clear_colour(mut self, clear_colour: wgpu::Color) -> Self {
        self.clear_colour = clear_colour;
        self
    }

    pub fn with_tick_rate(mut self, tick_rate_hz: u32) -> Self {
        self.tick_rate_hz = tick_rate_hz;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityOverrides) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_instances == 0 {
            return Err(RenderError::InvalidConfig(
                "max_instances must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(RenderError::InvalidConfig(format!(
                "batch_size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if !(self.view_width.is_finite() && self.view_width > 0.0) {
            return Err(RenderError::InvalidConfig(format!(
                "view_width must be positive, got {}",
                self.view_width
            )));
        }
        if self.tick_rate_hz == 0 {
            return Err(RenderError::InvalidConfig("tick_rate_hz must be non-zero".into()));
        }
        Ok(())
    }
}
