//! Engine data structures: geometries, instances and the scene graph.
//!
//! - `geometry` holds shape templates shared by many instances
//! - `instance` stores the per-geometry instance positions
//! - `scene_graph` enables hierarchical, individually transformed objects

pub mod geometry;
pub mod instance;
pub mod scene_graph;
