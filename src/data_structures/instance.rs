//! Instance storage for batch-drawn geometry.
//!
//! Every registered [`Geometry`] owns one array of [`Movable`]s. The arrays
//! are append-only at the back and shrink by swapping the last live instance
//! into the removed slot, so instance indices are transient: they are valid
//! until the next removal on the same geometry.
//!
//! All registration, mutation and enumeration happens under one lock. The
//! renderer takes a copy of the live positions per frame and releases the lock
//! before touching the GPU.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    data_structures::geometry::{DrawMode, Geometry, GeometryId},
    error::{RenderError, Result},
};

/// One positioned occurrence of a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movable {
    pub x: f32,
    pub y: f32,
    pub geometry_id: GeometryId,
}

impl Movable {
    pub fn position(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// Per-geometry state handed from the store to the render tick.
#[derive(Debug, Clone)]
pub struct GeometryFrame {
    pub id: GeometryId,
    pub draw_mode: DrawMode,
    /// New vertex data if the geometry was dirty, `None` if the compiled
    /// buffer is still current.
    pub rebuilt: Option<Vec<f32>>,
    pub positions: Vec<[f32; 2]>,
}

impl GeometryFrame {
    pub fn num_instances(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Default)]
struct Registry {
    geometries: Vec<Arc<Geometry>>,
    instances: Vec<Vec<Movable>>,
}

impl Registry {
    fn position_of(&self, geometry: &Arc<Geometry>) -> Option<GeometryId> {
        self.geometries.iter().position(|g| Arc::ptr_eq(g, geometry))
    }
}

pub struct InstanceStore {
    max_instances: usize,
    registry: Mutex<Registry>,
}

impl InstanceStore {
    pub fn new(max_instances: usize) -> Self {
        Self {
            max_instances,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Adds an instance of `geometry` at `(x, y)` and returns its index.
    ///
    /// The geometry is registered on its first instance. Fails without
    /// touching the store when the geometry already holds `max_instances`.
    pub fn add_instance(&self, geometry: &Arc<Geometry>, x: f32, y: f32) -> Result<usize> {
        let mut registry = self.registry.lock();
        let id = match registry.position_of(geometry) {
            Some(id) => id,
            None => {
                let id = registry.geometries.len();
                registry.geometries.push(Arc::clone(geometry));
                registry.instances.push(Vec::new());
                geometry.set_id(id);
                log::debug!("registered geometry `{}` as {}", geometry.name(), id);
                id
            }
        };

        let instances = &mut registry.instances[id];
        if instances.len() >= self.max_instances {
            return Err(RenderError::CapacityExceeded {
                geometry: id,
                max: self.max_instances,
            });
        }
        instances.push(Movable {
            x,
            y,
            geometry_id: id,
        });
        let index = instances.len() - 1;
        geometry.set_num_instances(instances.len());
        Ok(index)
    }

    /// Removes instance `index` of geometry `geometry_id` by moving the last
    /// live instance into its slot. Returns the removed instance.
    pub fn remove_instance(&self, geometry_id: GeometryId, index: usize) -> Result<Movable> {
        let mut registry = self.registry.lock();
        let Registry {
            geometries,
            instances,
        } = &mut *registry;
        let (geometry, instances) = match (geometries.get(geometry_id), instances.get_mut(geometry_id)) {
            (Some(geometry), Some(instances)) => (geometry, instances),
            _ => return Err(RenderError::UnknownGeometry(geometry_id)),
        };

        if index >= instances.len() {
            log::warn!(
                "trying to delete past the end of geometry {}: index {} with {} live instances",
                geometry_id,
                index,
                instances.len()
            );
            return Err(RenderError::InstanceOutOfRange {
                geometry: geometry_id,
                index,
                live: instances.len(),
            });
        }
        let removed = instances.swap_remove(index);
        geometry.set_num_instances(instances.len());
        Ok(removed)
    }

    /// Linear identity search over the registered geometries.
    pub fn geometry_id(&self, geometry: &Arc<Geometry>) -> Option<GeometryId> {
        self.registry.lock().position_of(geometry)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<Arc<Geometry>> {
        self.registry.lock().geometries.get(id).cloned()
    }

    pub fn geometry_count(&self) -> usize {
        self.registry.lock().geometries.len()
    }

    pub fn instance_count(&self, id: GeometryId) -> Option<usize> {
        self.registry.lock().instances.get(id).map(Vec::len)
    }

    /// A copy of every geometry's live instances, indexed by geometry id.
    pub fn movables(&self) -> Vec<Vec<Movable>> {
        self.registry.lock().instances.clone()
    }

    /// Runs `f` over the live instances while holding the store lock.
    pub fn with_movables<R>(&self, f: impl FnOnce(&[Vec<Movable>]) -> R) -> R {
        f(&self.registry.lock().instances)
    }

    /// Runs `f` with mutable access to live instances (e.g. to step physics).
    /// Only the instances themselves can change, not how many there are.
    pub fn with_movables_mut<R>(&self, f: impl FnOnce(&mut [Vec<Movable>]) -> R) -> R {
        f(&mut self.registry.lock().instances)
    }

    /// Copies what the render tick needs out of the store.
    ///
    /// Geometries that are dirty and have live instances are rebuilt here; a
    /// dirty geometry without instances is left dirty until it is drawn.
    /// Builders run after the store lock is released, so they may call back
    /// into the store.
    pub fn frame_snapshot(&self, view_width: f32, view_height: f32) -> Vec<GeometryFrame> {
        let live: Vec<(Arc<Geometry>, Vec<[f32; 2]>)> = {
            let registry = self.registry.lock();
            registry
                .geometries
                .iter()
                .zip(registry.instances.iter())
                .map(|(geometry, instances)| {
                    (geometry.clone(), instances.iter().map(Movable::position).collect())
                })
                .collect()
        };

        live.into_iter()
            .enumerate()
            .map(|(id, (geometry, positions))| {
                let rebuilt = if positions.is_empty() {
                    None
                } else {
                    geometry.take_rebuild(view_width, view_height)
                };
                GeometryFrame {
                    id,
                    draw_mode: geometry.draw_mode(),
                    rebuilt,
                    positions,
                }
            })
            .collect()
    }
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Arc<Geometry> {
        Arc::new(Geometry::new(
            "triangle",
            DrawMode::Triangles,
            vec![0.0, 0.0, 1.0, 0.0, 0.5, 1.0],
        ))
    }

    #[test]
    fn first_instance_registers_geometry() {
        let store = InstanceStore::new(8);
        let geometry = triangle();
        assert_eq!(store.geometry_id(&geometry), None);
        assert_eq!(store.add_instance(&geometry, 1.0, 2.0).unwrap(), 0);
        assert_eq!(geometry.id(), Some(0));
        assert_eq!(store.geometry_id(&geometry), Some(0));
        assert_eq!(geometry.num_instances(), 1);
    }

    #[test]
    fn registering_twice_keeps_one_id() {
        let store = InstanceStore::new(8);
        let geometry = triangle();
        store.add_instance(&geometry, 0.0, 0.0).unwrap();
        store.add_instance(&geometry, 1.0, 0.0).unwrap();
        assert_eq!(store.geometry_count(), 1);
        assert_eq!(store.geometry_id(&geometry), store.geometry_id(&geometry));

        let other = triangle();
        store.add_instance(&other, 0.0, 0.0).unwrap();
        assert_eq!(other.id(), Some(1));
    }

    #[test]
    fn capacity_is_enforced() {
        let store = InstanceStore::new(2);
        let geometry = triangle();
        store.add_instance(&geometry, 0.0, 0.0).unwrap();
        store.add_instance(&geometry, 1.0, 0.0).unwrap();
        let err = store.add_instance(&geometry, 2.0, 0.0).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { geometry: 0, max: 2 }));
        assert_eq!(geometry.num_instances(), 2);
    }

    #[test]
    fn removal_swaps_in_the_last_instance() {
        let store = InstanceStore::new(8);
        let geometry = triangle();
        for x in 0..4 {
            store.add_instance(&geometry, x as f32, 0.0).unwrap();
        }
        let removed = store.remove_instance(0, 1).unwrap();
        assert_eq!(removed.x, 1.0);
        let xs: Vec<f32> = store.movables()[0].iter().map(|m| m.x).collect();
        assert_eq!(xs, vec![0.0, 3.0, 2.0]);
        assert_eq!(geometry.num_instances(), 3);
    }

    #[test]
    fn removing_the_last_only_shrinks() {
        let store = InstanceStore::new(8);
        let geometry = triangle();
        for x in 0..3 {
            store.add_instance(&geometry, x as f32, 0.0).unwrap();
        }
        store.remove_instance(0, 2).unwrap();
        let xs: Vec<f32> = store.movables()[0].iter().map(|m| m.x).collect();
        assert_eq!(xs, vec![0.0, 1.0]);
    }

    #[test]
    fn removing_past_the_end_is_rejected() {
        let store = InstanceStore::new(8);
        let geometry = triangle();
        store.add_instance(&geometry, 5.0, 5.0).unwrap();
        let err = store.remove_instance(0, 1).unwrap_err();
        assert!(matches!(err, RenderError::InstanceOutOfRange { index: 1, live: 1, .. }));
        assert_eq!(store.instance_count(0), Some(1));
        assert!(matches!(store.remove_instance(3, 0), Err(RenderError::UnknownGeometry(3))));
    }

    #[test]
    fn snapshot_keeps_dirty_empty_geometry_dirty() {
        let store = InstanceStore::new(8);
        let busy = triangle();
        let idle = triangle();
        store.add_instance(&busy, 0.0, 0.0).unwrap();
        store.add_instance(&idle, 0.0, 0.0).unwrap();
        store.remove_instance(1, 0).unwrap();

        let frame = store.frame_snapshot(100.0, 100.0);
        assert!(frame[0].rebuilt.is_some());
        assert!(frame[1].rebuilt.is_none());
        assert!(!busy.is_dirty());
        assert!(idle.is_dirty());
    }

    #[test]
    fn builders_may_use_the_store() {
        let store = Arc::new(InstanceStore::new(8));
        let marker = triangle();
        let builder_store = store.clone();
        let builder_marker = marker.clone();
        let ground = Arc::new(Geometry::with_builder(
            "ground",
            DrawMode::Triangles,
            move |w: f32, h: f32| {
                builder_store.add_instance(&builder_marker, w, h).unwrap();
                vec![0.0, 0.0, w, 0.0, 0.0, h]
            },
        ));
        store.add_instance(&ground, 0.0, 0.0).unwrap();

        let frame = store.frame_snapshot(10.0, 5.0);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].rebuilt, Some(vec![0.0, 0.0, 10.0, 0.0, 0.0, 5.0]));
        assert_eq!(store.geometry_id(&marker), Some(1));
        assert_eq!(store.movables()[1][0].position(), [10.0, 5.0]);
    }
}
