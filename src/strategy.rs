//! Capability negotiation.
//!
//! The renderer asks its backend once, at startup, which of three features are
//! available and maps the answer onto one [`RenderStrategy`]. The strategy is
//! never renegotiated: every buffer layout, upload path and draw call for the
//! rest of the process is decided by it.

/// Feature flags reported by a graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Programmable vertex/fragment stages.
    pub shaders: bool,
    /// `draw_arrays_instanced` style draws.
    pub hardware_instancing: bool,
    /// A large buffer readable from the vertex stage (GL texture buffer,
    /// wgpu vertex storage).
    pub buffer_texture: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        shaders: false,
        hardware_instancing: false,
        buffer_texture: false,
    };

    pub const ALL: Capabilities = Capabilities {
        shaders: true,
        hardware_instancing: true,
        buffer_texture: true,
    };

    /// Switches off whatever the overrides disable. Overrides never turn a
    /// feature on.
    pub fn masked(self, overrides: &CapabilityOverrides) -> Capabilities {
        Capabilities {
            shaders: self.shaders && !overrides.disable_shaders,
            hardware_instancing: self.hardware_instancing && !overrides.disable_instancing,
            buffer_texture: self.buffer_texture && !overrides.disable_buffer_texture,
        }
    }
}

/// Features to mask off before negotiating, e.g. to exercise a lower
/// strategy on capable hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityOverrides {
    pub disable_shaders: bool,
    pub disable_instancing: bool,
    pub disable_buffer_texture: bool,
}

/// How instanced geometry reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStrategy {
    /// No shaders: one translate + draw per instance.
    FixedPipelinePerInstance,
    /// Replicated geometry indexed into a uniform array, drawn in batches.
    ShaderUniformBatch,
    /// Replicated geometry indexed into the shared position buffer.
    ShaderTextureBufferPseudoInstance,
    /// Hardware instancing, positions pushed through a uniform array in batches.
    ShaderUniformBatchInstanced,
    /// Hardware instancing reading the shared position buffer.
    ShaderTextureBufferInstanced,
}

impl RenderStrategy {
    pub fn negotiate(caps: Capabilities) -> RenderStrategy {
        match (caps.shaders, caps.hardware_instancing, caps.buffer_texture) {
            (false, _, _) => RenderStrategy::FixedPipelinePerInstance,
            (true, false, false) => RenderStrategy::ShaderUniformBatch,
            (true, false, true) => RenderStrategy::ShaderTextureBufferPseudoInstance,
            (true, true, false) => RenderStrategy::ShaderUniformBatchInstanced,
            (true, true, true) => RenderStrategy::ShaderTextureBufferInstanced,
        }
    }

    pub fn uses_shaders(self) -> bool {
        !matches!(self, RenderStrategy::FixedPipelinePerInstance)
    }

    pub fn hardware_instanced(self) -> bool {
        matches!(
            self,
            RenderStrategy::ShaderUniformBatchInstanced | RenderStrategy::ShaderTextureBufferInstanced
        )
    }

    /// Pseudo-instancing: the vertex buffer carries a replica index in z.
    pub fn requires_manual_indexing(self) -> bool {
        matches!(
            self,
            RenderStrategy::ShaderUniformBatch | RenderStrategy::ShaderTextureBufferPseudoInstance
        )
    }

    pub fn uses_texture_buffer(self) -> bool {
        matches!(
            self,
            RenderStrategy::ShaderTextureBufferPseudoInstance
                | RenderStrategy::ShaderTextureBufferInstanced
        )
    }

    pub fn uses_uniform_batches(self) -> bool {
        matches!(
            self,
            RenderStrategy::ShaderUniformBatch | RenderStrategy::ShaderUniformBatchInstanced
        )
    }

    /// Floats per vertex in compiled geometry buffers.
    pub fn vertex_components(self) -> u32 {
        if self.requires_manual_indexing() { 3 } else { 2 }
    }

    /// Name of the program used for instanced geometry, `None` without shaders.
    pub fn instancing_program(self) -> Option<&'static str> {
        match self {
            RenderStrategy::FixedPipelinePerInstance => None,
            RenderStrategy::ShaderUniformBatch => Some("pseudo_instancing_uniform"),
            RenderStrategy::ShaderTextureBufferPseudoInstance => Some("pseudo_instancing_texture"),
            RenderStrategy::ShaderUniformBatchInstanced => Some("instancing_uniform"),
            RenderStrategy::ShaderTextureBufferInstanced => Some("instancing_texture"),
        }
    }

    /// Name of the program used for the scene graph, `None` without shaders.
    pub fn default_program(self) -> Option<&'static str> {
        self.uses_shaders().then_some("default")
    }

    /// Uniforms and attributes the instancing program must expose.
    pub fn instancing_inputs(self) -> &'static [&'static str] {
        if self.uses_texture_buffer() {
            &["projection", "vertex", "positionSampler", "positionOffset"]
        } else if self.uses_uniform_batches() {
            &["projection", "vertex", "positions"]
        } else {
            &[]
        }
    }
}

impl std::fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderStrategy::FixedPipelinePerInstance => "fixed pipeline, per instance",
            RenderStrategy::ShaderUniformBatch => "shader, uniform batches, pseudo-instanced",
            RenderStrategy::ShaderTextureBufferPseudoInstance => {
                "shader, texture buffer, pseudo-instanced"
            }
            RenderStrategy::ShaderUniformBatchInstanced => "shader, uniform batches, instanced",
            RenderStrategy::ShaderTextureBufferInstanced => "shader, texture buffer, instanced",
        };
        f.write_str(name)
    }
}
