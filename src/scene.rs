//! The handle through which game code reaches the renderer's shared state.
//!
//! A [`Scene`] is cheap to clone and can be moved to simulation or input
//! threads. Each collection sits behind its own lock, held for one mutation
//! or one enumeration at a time and never across a GPU call.

use std::sync::Arc;

use instant::{Duration, Instant};
use parking_lot::{Mutex, RwLock};

use crate::{
    data_structures::{
        geometry::{Geometry, GeometryId},
        instance::{GeometryFrame, InstanceStore, Movable},
        scene_graph::{self, DrawItem, Drawable},
    },
    error::Result,
    viewport::Viewport,
};

#[derive(Debug, Default)]
struct FrameTiming {
    last_draw: Option<Instant>,
    since_last_draw: Duration,
}

struct SceneInner {
    store: InstanceStore,
    drawables: Mutex<Vec<Drawable>>,
    viewport: RwLock<Viewport>,
    timing: Mutex<FrameTiming>,
}

#[derive(Clone)]
pub struct Scene {
    inner: Arc<SceneInner>,
}

impl Scene {
    pub fn new(max_instances: usize, viewport: Viewport) -> Self {
        Self {
            inner: Arc::new(SceneInner {
                store: InstanceStore::new(max_instances),
                drawables: Mutex::new(Vec::new()),
                viewport: RwLock::new(viewport),
                timing: Mutex::new(FrameTiming::default()),
            }),
        }
    }

    pub fn store(&self) -> &InstanceStore {
        &self.inner.store
    }

    /// Adds a root node to the scene graph. It is initialized on the next frame.
    pub fn register_drawable(&self, drawable: Drawable) {
        self.inner.drawables.lock().push(drawable);
    }

    /// Runs `f` over the root nodes under the scene-graph lock.
    pub fn with_drawables<R>(&self, f: impl FnOnce(&mut Vec<Drawable>) -> R) -> R {
        f(&mut self.inner.drawables.lock())
    }

    pub fn add_instance(&self, geometry: &Arc<Geometry>, x: f32, y: f32) -> Result<usize> {
        self.inner.store.add_instance(geometry, x, y)
    }

    pub fn remove_instance(&self, geometry_id: GeometryId, index: usize) -> Result<Movable> {
        self.inner.store.remove_instance(geometry_id, index)
    }

    pub fn geometry_id(&self, geometry: &Arc<Geometry>) -> Option<GeometryId> {
        self.inner.store.geometry_id(geometry)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<Arc<Geometry>> {
        self.inner.store.geometry(id)
    }

    pub fn movables(&self) -> Vec<Vec<Movable>> {
        self.inner.store.movables()
    }

    /// Wall-clock time between the last two frames.
    pub fn time_since_last_draw(&self) -> Duration {
        self.inner.timing.lock().since_last_draw
    }

    pub fn viewport(&self) -> Viewport {
        *self.inner.viewport.read()
    }

    pub fn screen_to_view_coords(&self, x: f32, y: f32) -> (f32, f32) {
        self.inner.viewport.read().screen_to_view(x, y)
    }

    pub(crate) fn mark_drawn(&self, now: Instant) {
        let mut timing = self.inner.timing.lock();
        if let Some(last) = timing.last_draw {
            timing.since_last_draw = now.duration_since(last);
        }
        timing.last_draw = Some(now);
    }

    /// Prunes, initializes and flattens the scene graph for one frame.
    pub(crate) fn draw_items(&self, view_width: f32, view_height: f32) -> Vec<DrawItem> {
        let mut drawables = self.inner.drawables.lock();
        scene_graph::collect_from_root(&mut drawables, view_width, view_height)
    }

    pub(crate) fn frame_snapshot(&self, view_width: f32, view_height: f32) -> Vec<GeometryFrame> {
        self.inner.store.frame_snapshot(view_width, view_height)
    }

    /// Updates the viewport and reshapes every node. Returns the new viewport.
    pub(crate) fn resize(&self, screen_width: u32, screen_height: u32) -> Viewport {
        let viewport = {
            let mut viewport = self.inner.viewport.write();
            viewport.resize(screen_width, screen_height);
            *viewport
        };
        let mut drawables = self.inner.drawables.lock();
        scene_graph::reshape_all(&mut drawables, viewport.view_width, viewport.view_height);
        viewport
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("geometries", &self.inner.store.geometry_count())
            .field("drawables", &self.inner.drawables.lock().len())
            .field("viewport", &self.viewport())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let scene = Scene::new(16, Viewport::new(800, 600, 100.0));
        let other = scene.clone();
        let geometry = Arc::new(Geometry::new(
            "dot",
            crate::data_structures::geometry::DrawMode::Points,
            vec![0.0, 0.0],
        ));
        other.add_instance(&geometry, 1.0, 1.0).unwrap();
        assert_eq!(scene.geometry_id(&geometry), Some(0));
        assert_eq!(scene.movables()[0].len(), 1);
    }

    #[test]
    fn frame_time_is_the_gap_between_draws() {
        let scene = Scene::new(1, Viewport::default());
        let start = Instant::now();
        scene.mark_drawn(start);
        scene.mark_drawn(start + Duration::from_millis(16));
        assert_eq!(scene.time_since_last_draw(), Duration::from_millis(16));
    }

    #[test]
    fn resize_keeps_view_width() {
        let scene = Scene::new(1, Viewport::new(800, 600, 100.0));
        let viewport = scene.resize(1000, 500);
        assert_eq!(viewport.view_width, 100.0);
        assert_eq!(viewport.view_height, 50.0);
        assert_eq!(scene.screen_to_view_coords(500.0, 0.0), (50.0, 50.0));
    }
}
