//! Shader program sources.

use std::collections::HashMap;

use crate::error::{RenderError, Result};

/// Inputs every scene-graph program has to declare.
pub const DEFAULT_PROGRAM_INPUTS: &[&str] = &["projection", "model", "vertex"];

/// Resolves program names (`default`, `instancing_texture`, ...) to source.
pub trait ShaderLoader {
    fn load(&self, name: &str) -> Result<String>;
}

/// The WGSL programs shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinShaders;

pub(crate) const FIXED_FUNCTION: &str = include_str!("pipelines/fixed_function.wgsl");

impl ShaderLoader for BuiltinShaders {
    fn load(&self, name: &str) -> Result<String> {
        let source = match name {
            "default" => include_str!("pipelines/default.wgsl"),
            "instancing_texture" => include_str!("pipelines/instancing_texture.wgsl"),
            "instancing_uniform" => include_str!("pipelines/instancing_uniform.wgsl"),
            "pseudo_instancing_texture" => include_str!("pipelines/pseudo_instancing_texture.wgsl"),
            "pseudo_instancing_uniform" => include_str!("pipelines/pseudo_instancing_uniform.wgsl"),
            _ => return Err(missing_source(name)),
        };
        Ok(source.to_owned())
    }
}

/// Programs held in memory, e.g. sources the application generated or
/// loaded itself.
#[derive(Debug, Clone, Default)]
pub struct ShaderSources {
    sources: HashMap<String, String>,
}

impl ShaderSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

impl ShaderLoader for ShaderSources {
    fn load(&self, name: &str) -> Result<String> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| missing_source(name))
    }
}

fn missing_source(name: &str) -> RenderError {
    RenderError::ShaderCompilation {
        program: name.to_owned(),
        message: "no source available".to_owned(),
    }
}

/// Whether `source` mentions `name` as a whole identifier.
pub(crate) fn declares(source: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(name).any(|(at, _)| {
        let before = source[..at].chars().next_back();
        let after = source[at + name.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// Binding slot of a named input in the shipped programs.
///
/// The uniform block (`projection`, `model`, `positionOffset`) is binding 0,
/// the position buffer binding 1, the batch array binding 2 and the vertex
/// attribute location 0.
pub(crate) fn slot_of(name: &str) -> u32 {
    match name {
        "positionSampler" => 1,
        "positions" => 2,
        _ => 0,
    }
}
