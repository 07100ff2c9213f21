//! Spatial assignment.
//!
//! Maps each tracked detection to at most one zone by testing its reference
//! point against zones in registry order; the first containing zone wins.
//! Overlapping zones are a configuration concern and are not resolved here.
//! Assignment reports instantaneous containment only; smoothing is the
//! hysteresis step's job.

use serde::Serialize;

use crate::detect::Detection;
use crate::hysteresis::ZoneRuntimeState;
use crate::zone::ZoneRegistry;
use crate::FrameIndex;

/// Default tracked class label.
pub const DEFAULT_TRACKED_CLASS: &str = "person";

/// A detection confirmed inside a zone on this frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignedDetection {
    pub zone: String,
    pub detection: Detection,
}

/// Result of one assignment pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    /// Zones confirmed occupied this frame, in registry order, no repeats.
    pub occupied_zones: Vec<String>,
    /// Every detection that landed in a zone, in detection order.
    pub matches: Vec<AssignedDetection>,
    /// Tracked detections whose reference point fell in no zone.
    pub unassigned: usize,
}

impl Assignment {
    pub fn is_occupied(&self, zone: &str) -> bool {
        self.occupied_zones.iter().any(|name| name == zone)
    }
}

/// Filters raw detector output down to the tracked class and assigns it.
#[derive(Clone, Debug)]
pub struct SpatialAssigner {
    tracked_class_label: String,
    min_confidence: f32,
}

impl SpatialAssigner {
    pub fn new(tracked_class_label: impl Into<String>, min_confidence: f32) -> Self {
        Self {
            tracked_class_label: tracked_class_label.into(),
            min_confidence,
        }
    }

    pub fn tracked_class_label(&self) -> &str {
        &self.tracked_class_label
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Whether a detection takes part in assignment at all.
    pub fn is_tracked(&self, detection: &Detection) -> bool {
        detection.label == self.tracked_class_label && detection.confidence >= self.min_confidence
    }

    /// Assign tracked detections and stamp `frame_index` on every zone hit.
    pub fn assign(
        &self,
        detections: &[Detection],
        registry: &ZoneRegistry,
        state: &mut ZoneRuntimeState,
        frame_index: FrameIndex,
    ) -> Assignment {
        let mut hit = vec![false; registry.len()];
        let mut matches = Vec::new();
        let mut unassigned = 0;

        for detection in detections.iter().filter(|d| self.is_tracked(d)) {
            let point = detection.reference_point();
            match registry.zone_for_point(point) {
                Some(zone) => {
                    hit[zone] = true;
                    let name = registry.zones()[zone].name.clone();
                    log::debug!(
                        "frame {}: {} at ({}, {}) -> {:?}",
                        frame_index,
                        detection.label,
                        point.x,
                        point.y,
                        name
                    );
                    matches.push(AssignedDetection {
                        zone: name,
                        detection: detection.clone(),
                    });
                }
                None => unassigned += 1,
            }
        }

        let mut occupied_zones = Vec::new();
        for (zone, occupied) in hit.into_iter().enumerate() {
            if !occupied {
                continue;
            }
            state.mark_occupied(zone, frame_index);
            occupied_zones.push(registry.zones()[zone].name.clone());
        }

        Assignment {
            occupied_zones,
            matches,
            unassigned,
        }
    }
}

impl Default for SpatialAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_CLASS, 0.0)
    }
}
