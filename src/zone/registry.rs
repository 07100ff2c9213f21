use anyhow::{anyhow, Context, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use super::geometry::{Point, Polygon};
use crate::{validate_zone_name, OccupancyError};

/// Minimum vertex count for a zone polygon.
pub const MIN_ZONE_POINTS: usize = 3;

/// Named polygonal region of the frame, one per desk or seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub polygon: Polygon,
}

/// Zone definitions as authored, before validation.
///
/// Entries keep their source order, and duplicate names are kept rather than
/// collapsed so that `ZoneRegistry::load` can reject them. The JSON form is an
/// object mapping zone name to a list of `[x, y]` points:
///
/// ```json
/// { "Desk 1": [[2, 207], [266, 207], [266, 358], [2, 358]] }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZoneDefinitions {
    entries: Vec<(String, Vec<Point>)>,
}

impl ZoneDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, points: Vec<Point>) {
        self.entries.push((name.into(), points));
    }

    pub fn with_zone(mut self, name: impl Into<String>, points: Vec<Point>) -> Self {
        self.push(name, points);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            anyhow!(OccupancyError::configuration(format!(
                "invalid zone definitions: {}",
                e
            )))
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read zone file {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("zone file {}", path.display()))
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<Point>)> for ZoneDefinitions {
    fn from_iter<I: IntoIterator<Item = (S, Vec<Point>)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, points)| (name.into(), points))
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for ZoneDefinitions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DefinitionsVisitor;

        impl<'de> Visitor<'de> for DefinitionsVisitor {
            type Value = ZoneDefinitions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping zone names to [x, y] point lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut defs = ZoneDefinitions::new();
                while let Some((name, points)) = map.next_entry::<String, Vec<Point>>()? {
                    defs.push(name, points);
                }
                Ok(defs)
            }
        }

        deserializer.deserialize_map(DefinitionsVisitor)
    }
}

/// Immutable set of named zones, loaded once per session.
///
/// Iteration order is the definition order and never changes, which makes
/// first-match-wins assignment deterministic.
#[derive(Clone, Debug)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
    inclusive_boundary: bool,
}

impl ZoneRegistry {
    /// Validate definitions and build the registry.
    ///
    /// Fails with a configuration error on an empty definition set, an invalid
    /// or duplicate name, or a polygon with fewer than three points.
    pub fn load(definitions: ZoneDefinitions) -> Result<Self> {
        if definitions.is_empty() {
            return Err(anyhow!(OccupancyError::configuration(
                "zone registry is empty"
            )));
        }

        let mut seen = HashSet::new();
        let mut zones = Vec::with_capacity(definitions.len());
        for (name, points) in definitions.entries {
            validate_zone_name(&name)?;
            if !seen.insert(name.clone()) {
                return Err(anyhow!(OccupancyError::configuration(format!(
                    "duplicate zone name {:?}",
                    name
                ))));
            }
            if points.len() < MIN_ZONE_POINTS {
                return Err(anyhow!(OccupancyError::configuration(format!(
                    "zone {:?} has {} points; at least {} are required",
                    name,
                    points.len(),
                    MIN_ZONE_POINTS
                ))));
            }
            let polygon = Polygon::new(points);
            if polygon.doubled_area() == 0 {
                log::warn!(
                    "zone {:?} has zero area; only boundary points can match it",
                    name
                );
            }
            zones.push(Zone { name, polygon });
        }

        log::info!("zone registry loaded: {} zones", zones.len());
        Ok(Self {
            zones,
            inclusive_boundary: true,
        })
    }

    /// Load and validate a JSON zone definition file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::load(ZoneDefinitions::from_path(path)?)
    }

    /// Select whether boundary points count as inside (default: inclusive).
    pub fn with_inclusive_boundary(mut self, inclusive: bool) -> Self {
        self.inclusive_boundary = inclusive;
        self
    }

    pub fn inclusive_boundary(&self) -> bool {
        self.inclusive_boundary
    }

    /// Zones in registry iteration order.
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.zones.iter().map(|zone| zone.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.zones.iter().position(|zone| zone.name == name)
    }

    /// Containment test under this registry's boundary policy.
    pub fn contains(&self, polygon: &Polygon, point: Point) -> bool {
        polygon.contains(point, self.inclusive_boundary)
    }

    /// Index of the first zone, in iteration order, that contains `point`.
    pub fn zone_for_point(&self, point: Point) -> Option<usize> {
        self.zones
            .iter()
            .position(|zone| self.contains(&zone.polygon, point))
    }
}
