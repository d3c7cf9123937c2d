//! Hierarchical, individually transformed objects.
//!
//! The scene graph is the non-instanced path: a forest of [`Drawable`]s, each
//! carrying a local translate/rotate/scale and optionally a shared
//! [`Geometry`] and/or its own inline vertices. It is meant for a handful of
//! complex objects (a tank made of hull, turret and barrel), not for the
//! hundreds of thousands of particles that go through the instance store.
//!
//! Traversal is depth-first, parent before children. World transforms compose
//! from the root down.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use cgmath::{Deg, Matrix3, SquareMatrix, Vector2};

use crate::data_structures::geometry::{DrawMode, Geometry};

/// Lifecycle callbacks of a [`Drawable`].
///
/// `init` runs once, the first time the node is visited by a frame. It is the
/// place to build vertices that depend on the view size or to attach children.
pub trait NodeHooks: Send {
    fn init(&mut self, node: &mut Drawable, view_width: f32, view_height: f32);

    fn reshape(&mut self, _node: &mut Drawable, _view_width: f32, _view_height: f32) {}
}

/// Shared removal flag. Setting it detaches the node from its parent during
/// the next traversal.
#[derive(Debug, Clone, Default)]
pub struct RemovalHandle(Arc<AtomicBool>);

impl RemovalHandle {
    pub fn remove(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_removed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Vertices owned by a single node, streamed to the GPU each frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineShape {
    pub draw_mode: DrawMode,
    pub vertices: Vec<f32>,
}

pub struct Drawable {
    pub position: Vector2<f32>,
    pub rotation: Deg<f32>,
    pub scale: Vector2<f32>,
    pub geometry: Option<Arc<Geometry>>,
    pub shape: Option<InlineShape>,
    children: Vec<Drawable>,
    hooks: Option<Box<dyn NodeHooks>>,
    initialized: bool,
    removal: RemovalHandle,
}

impl Default for Drawable {
    fn default() -> Self {
        Self {
            position: Vector2::new(0.0, 0.0),
            rotation: Deg(0.0),
            scale: Vector2::new(1.0, 1.0),
            geometry: None,
            shape: None,
            children: Vec::new(),
            hooks: None,
            initialized: false,
            removal: RemovalHandle::default(),
        }
    }
}

impl Drawable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Vector2::new(x, y);
        self
    }

    pub fn rotated(mut self, rotation: Deg<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scaled(mut self, x: f32, y: f32) -> Self {
        self.scale = Vector2::new(x, y);
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<Geometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_shape(mut self, draw_mode: DrawMode, vertices: Vec<f32>) -> Self {
        self.shape = Some(InlineShape {
            draw_mode,
            vertices,
        });
        self
    }

    pub fn with_hooks(mut self, hooks: impl NodeHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn add_child(&mut self, child: Drawable) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[Drawable] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Drawable> {
        &mut self.children
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// A handle that can flag this node for removal after it has been moved
    /// into the scene.
    pub fn removal_handle(&self) -> RemovalHandle {
        self.removal.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.removal.is_removed()
    }

    /// Translate, then rotate about +z, then scale.
    pub fn local_transform(&self) -> Matrix3<f32> {
        let scale = Matrix3::new(
            self.scale.x, 0.0, 0.0, //
            0.0, self.scale.y, 0.0, //
            0.0, 0.0, 1.0,
        );
        Matrix3::from_translation(self.position) * Matrix3::from_angle_z(self.rotation) * scale
    }

    fn init(&mut self, view_width: f32, view_height: f32) {
        self.initialized = true;
        if let Some(mut hooks) = self.hooks.take() {
            hooks.init(self, view_width, view_height);
            self.hooks = Some(hooks);
        }
    }

    fn reshape(&mut self, view_width: f32, view_height: f32) {
        if let Some(mut hooks) = self.hooks.take() {
            hooks.reshape(self, view_width, view_height);
            self.hooks = Some(hooks);
        }
    }
}

impl std::fmt::Debug for Drawable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drawable")
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("geometry", &self.geometry.as_ref().map(|g| g.name().to_owned()))
            .field("shape", &self.shape)
            .field("children", &self.children.len())
            .field("initialized", &self.initialized)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// One scene-graph draw: world matrix plus the vertices to stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub model: Matrix3<f32>,
    pub draw_mode: DrawMode,
    pub vertices: Vec<f32>,
}

/// Walks `nodes` depth-first, pruning removed nodes before descending into
/// them and initializing first-time visitors, and appends what has to be
/// drawn to `out`.
///
/// A node's inline shape is drawn before its geometry. Geometry is taken from
/// its current vertex data; the dirty flag belongs to the instanced path.
pub fn collect_draw_items(
    nodes: &mut Vec<Drawable>,
    parent: Matrix3<f32>,
    view_width: f32,
    view_height: f32,
    out: &mut Vec<DrawItem>,
) {
    nodes.retain(|node| !node.is_removed());
    for node in nodes.iter_mut() {
        if !node.initialized {
            node.init(view_width, view_height);
        }
        let world = parent * node.local_transform();

        if let Some(shape) = node.shape.as_ref().filter(|s| !s.vertices.is_empty()) {
            out.push(DrawItem {
                model: world,
                draw_mode: shape.draw_mode,
                vertices: shape.vertices.clone(),
            });
        }
        if let Some(geometry) = &node.geometry {
            let vertices = geometry.vertices();
            if !vertices.is_empty() {
                out.push(DrawItem {
                    model: world,
                    draw_mode: geometry.draw_mode(),
                    vertices,
                });
            }
        }

        collect_draw_items(&mut node.children, world, view_width, view_height, out);
    }
}

/// Same traversal from the identity transform.
pub fn collect_from_root(nodes: &mut Vec<Drawable>, view_width: f32, view_height: f32) -> Vec<DrawItem> {
    let mut out = Vec::new();
    collect_draw_items(nodes, Matrix3::identity(), view_width, view_height, &mut out);
    out
}

/// Tells every node in the forest about a new view size, parents first.
pub fn reshape_all(nodes: &mut [Drawable], view_width: f32, view_height: f32) {
    for node in nodes {
        node.reshape(view_width, view_height);
        reshape_all(&mut node.children, view_width, view_height);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use cgmath::Vector3;

    use super::*;

    struct CountInit(Arc<AtomicUsize>);

    impl NodeHooks for CountInit {
        fn init(&mut self, node: &mut Drawable, view_width: f32, _view_height: f32) {
            self.0.fetch_add(1, Ordering::SeqCst);
            node.shape = Some(InlineShape {
                draw_mode: DrawMode::Lines,
                vertices: vec![0.0, 0.0, view_width, 0.0],
            });
        }
    }

    fn apply(m: Matrix3<f32>, x: f32, y: f32) -> (f32, f32) {
        let v = m * Vector3::new(x, y, 1.0);
        (v.x, v.y)
    }

    #[test]
    fn transform_is_translate_rotate_scale() {
        let node = Drawable::new().at(10.0, 0.0).rotated(Deg(90.0)).scaled(2.0, 2.0);
        let (x, y) = apply(node.local_transform(), 1.0, 0.0);
        assert!((x - 10.0).abs() < 1e-5);
        assert!((y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn init_runs_once_and_sees_the_view() {
        let inits = Arc::new(AtomicUsize::new(0));
        let mut nodes = vec![Drawable::new().with_hooks(CountInit(inits.clone()))];

        let first = collect_from_root(&mut nodes, 100.0, 75.0);
        collect_from_root(&mut nodes, 100.0, 75.0);

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(nodes[0].is_initialized());
        assert_eq!(first[0].vertices, vec![0.0, 0.0, 100.0, 0.0]);
    }

    #[test]
    fn parents_draw_before_children_with_composed_transforms() {
        let mut parent = Drawable::new()
            .at(5.0, 5.0)
            .with_shape(DrawMode::Points, vec![0.0, 0.0]);
        parent.add_child(Drawable::new().at(1.0, 0.0).with_shape(DrawMode::Points, vec![0.0, 0.0]));
        let mut nodes = vec![parent];

        let items = collect_from_root(&mut nodes, 100.0, 100.0);
        assert_eq!(items.len(), 2);
        assert_eq!(apply(items[0].model, 0.0, 0.0), (5.0, 5.0));
        assert_eq!(apply(items[1].model, 0.0, 0.0), (6.0, 5.0));
    }

    #[test]
    fn removed_nodes_are_pruned_on_the_next_traversal() {
        let mut parent = Drawable::new();
        let child = Drawable::new().with_shape(DrawMode::Points, vec![1.0, 1.0]);
        let handle = child.removal_handle();
        parent.add_child(child);
        let mut nodes = vec![parent];

        assert_eq!(collect_from_root(&mut nodes, 1.0, 1.0).len(), 1);
        handle.remove();
        assert_eq!(nodes[0].children().len(), 1);
        assert!(collect_from_root(&mut nodes, 1.0, 1.0).is_empty());
        assert!(nodes[0].children().is_empty());
    }
}
