mod geometry;
mod registry;

pub use geometry::{Point, Polygon};
pub use registry::{Zone, ZoneDefinitions, ZoneRegistry, MIN_ZONE_POINTS};
