//! Pure geospatial primitives: distance, unit conversion, and polygon
//! validation math. Nothing in this module performs I/O.

pub mod distance;
pub mod polygon;

pub use distance::{distance_auto_m, distance_m, distance_matrix_m, nearest_point, DistanceAlgorithm};
pub use polygon::{area_m2, auto_close, has_self_intersection, point_in_polygon, polygons_overlap};
