//! Shape templates shared by many instances.
//!
//! A [`Geometry`] is created and reshaped by game code (terrain builders,
//! projectile factories, ...) and drawn by the renderer. It is shared as
//! `Arc<Geometry>`: the id and instance count are only written by the
//! [`InstanceStore`](super::instance::InstanceStore) while it holds its lock,
//! the vertex data sits behind the geometry's own mutex and is only held for
//! the duration of a single method call.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

/// Index of a geometry in the instance store, assigned on first registration.
pub type GeometryId = usize;

const UNREGISTERED: usize = usize::MAX;

/// Primitive assembly for a geometry's vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl DrawMode {
    pub fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
            DrawMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            DrawMode::Lines => wgpu::PrimitiveTopology::LineList,
            DrawMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// Regenerates a geometry's vertices for the current view size.
///
/// Called by the renderer, never by the owner: the owner only marks the
/// geometry dirty and the next pass that needs the geometry rebuilds it.
pub trait ShapeBuilder: Send {
    /// Returns flat `x, y` pairs in view units. Runs on the render thread
    /// with no renderer lock held.
    fn build(&mut self, view_width: f32, view_height: f32) -> Vec<f32>;
}

impl<F> ShapeBuilder for F
where
    F: FnMut(f32, f32) -> Vec<f32> + Send,
{
    fn build(&mut self, view_width: f32, view_height: f32) -> Vec<f32> {
        self(view_width, view_height)
    }
}

struct Shape {
    vertices: Vec<f32>,
    draw_mode: DrawMode,
    dirty: bool,
    builder: Option<Box<dyn ShapeBuilder>>,
}

pub struct Geometry {
    name: String,
    id: AtomicUsize,
    num_instances: AtomicUsize,
    shape: Mutex<Shape>,
}

impl Geometry {
    /// A geometry with fixed vertex data. It starts out dirty so the first pass
    /// that draws it compiles it.
    pub fn new(name: impl Into<String>, draw_mode: DrawMode, vertices: Vec<f32>) -> Self {
        Self::from_shape(
            name.into(),
            Shape {
                vertices,
                draw_mode,
                dirty: true,
                builder: None,
            },
        )
    }

    /// A geometry whose vertices come from `builder` whenever it is dirty.
    pub fn with_builder(
        name: impl Into<String>,
        draw_mode: DrawMode,
        builder: impl ShapeBuilder + 'static,
    ) -> Self {
        Self::from_shape(
            name.into(),
            Shape {
                vertices: Vec::new(),
                draw_mode,
                dirty: true,
                builder: Some(Box::new(builder)),
            },
        )
    }

    fn from_shape(name: String, shape: Shape) -> Self {
        Self {
            name,
            id: AtomicUsize::new(UNREGISTERED),
            num_instances: AtomicUsize::new(0),
            shape: Mutex::new(shape),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` until the first instance is added.
    pub fn id(&self) -> Option<GeometryId> {
        match self.id.load(Ordering::Acquire) {
            UNREGISTERED => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_id(&self, id: GeometryId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn num_instances(&self) -> usize {
        self.num_instances.load(Ordering::Acquire)
    }

    pub(crate) fn set_num_instances(&self, count: usize) {
        self.num_instances.store(count, Ordering::Release);
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.shape.lock().draw_mode
    }

    pub fn is_dirty(&self) -> bool {
        self.shape.lock().dirty
    }

    /// Requests a rebuild. With a builder attached the builder runs again,
    /// without one the current vertices are re-uploaded.
    pub fn mark_dirty(&self) {
        self.shape.lock().dirty = true;
    }

    /// Replaces the vertex data and marks the geometry dirty.
    pub fn set_vertices(&self, vertices: Vec<f32>) {
        let mut shape = self.shape.lock();
        shape.vertices = vertices;
        shape.dirty = true;
    }

    pub fn set_draw_mode(&self, draw_mode: DrawMode) {
        let mut shape = self.shape.lock();
        shape.draw_mode = draw_mode;
        shape.dirty = true;
    }

    pub fn vertices(&self) -> Vec<f32> {
        self.shape.lock().vertices.clone()
    }

    pub fn vertex_count(&self) -> usize {
        self.shape.lock().vertices.len() / 2
    }

    /// Rebuilds (if a builder is attached) and hands out the vertex data of a
    /// dirty geometry, clearing the flag. Returns `None` when clean.
    ///
    /// The flag is cleared before the builder runs so that a change racing the
    /// compile marks the geometry dirty again instead of being lost. The
    /// builder runs without the shape lock held.
    pub(crate) fn take_rebuild(&self, view_width: f32, view_height: f32) -> Option<Vec<f32>> {
        let mut builder = {
            let mut shape = self.shape.lock();
            if !shape.dirty {
                return None;
            }
            shape.dirty = false;
            match shape.builder.take() {
                Some(builder) => builder,
                None => return Some(shape.vertices.clone()),
            }
        };

        let vertices = builder.build(view_width, view_height);
        let mut shape = self.shape.lock();
        shape.vertices = vertices.clone();
        shape.builder = Some(builder);
        Some(vertices)
    }
}

impl Debug for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.shape.lock();
        f.debug_struct("Geometry")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("num_instances", &self.num_instances())
            .field("draw_mode", &shape.draw_mode)
            .field("vertices", &(shape.vertices.len() / 2))
            .field("dirty", &shape.dirty)
            .finish()
    }
}
