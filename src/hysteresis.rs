//! Temporal hysteresis.
//!
//! Each zone remembers the last frame on which a detection was assigned to
//! it. A zone stays `Occupied` for `smoothing_window` frames after that, which
//! absorbs missed detections, occlusion, and the gaps between sampled
//! detection passes. This is the engine's only state carried across frames.

use crate::{FrameIndex, OccupancyStatus};

/// `Occupied` iff `frame_index - last_occupied_frame <= smoothing_window`.
///
/// `None` means the zone has never been occupied this session.
pub fn status(
    last_occupied_frame: Option<FrameIndex>,
    frame_index: FrameIndex,
    smoothing_window: u64,
) -> OccupancyStatus {
    match last_occupied_frame {
        Some(last) if frame_index.saturating_sub(last) <= smoothing_window => {
            OccupancyStatus::Occupied
        }
        _ => OccupancyStatus::Vacant,
    }
}

/// Per-zone runtime memory, indexed in registry order.
///
/// Written only by spatial assignment; read by the hysteresis step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRuntimeState {
    last_occupied: Vec<Option<FrameIndex>>,
}

impl ZoneRuntimeState {
    pub fn new(zone_count: usize) -> Self {
        Self {
            last_occupied: vec![None; zone_count],
        }
    }

    pub fn len(&self) -> usize {
        self.last_occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_occupied.is_empty()
    }

    pub fn last_occupied_frame(&self, zone: usize) -> Option<FrameIndex> {
        self.last_occupied.get(zone).copied().flatten()
    }

    /// Record a confirmed detection in `zone` on `frame_index`.
    ///
    /// Writes never move a zone's memory backwards.
    pub fn mark_occupied(&mut self, zone: usize, frame_index: FrameIndex) {
        if let Some(slot) = self.last_occupied.get_mut(zone) {
            *slot = Some(slot.map_or(frame_index, |prev| prev.max(frame_index)));
        }
    }

    pub fn status(
        &self,
        zone: usize,
        frame_index: FrameIndex,
        smoothing_window: u64,
    ) -> OccupancyStatus {
        status(self.last_occupied_frame(zone), frame_index, smoothing_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_occupied_is_vacant() {
        assert_eq!(status(None, 0, 100), OccupancyStatus::Vacant);
        assert_eq!(status(None, 500, u64::MAX), OccupancyStatus::Vacant);
    }

    #[test]
    fn decays_after_window() {
        let window = 3;
        for frame in 10..=13 {
            assert_eq!(status(Some(10), frame, window), OccupancyStatus::Occupied);
        }
        for frame in 14..40 {
            assert_eq!(status(Some(10), frame, window), OccupancyStatus::Vacant);
        }
    }

    #[test]
    fn zero_window_only_on_fresh_frames() {
        assert_eq!(status(Some(5), 5, 0), OccupancyStatus::Occupied);
        assert_eq!(status(Some(5), 6, 0), OccupancyStatus::Vacant);
    }

    #[test]
    fn runtime_state_tracks_latest_frame() {
        let mut state = ZoneRuntimeState::new(2);
        assert_eq!(state.last_occupied_frame(0), None);
        state.mark_occupied(0, 4);
        state.mark_occupied(0, 2);
        assert_eq!(state.last_occupied_frame(0), Some(4));
        assert_eq!(state.last_occupied_frame(1), None);
        assert_eq!(state.status(0, 6, 2), OccupancyStatus::Occupied);
        assert_eq!(state.status(0, 7, 2), OccupancyStatus::Vacant);
        assert_eq!(state.status(1, 7, 2), OccupancyStatus::Vacant);
    }

    #[test]
    fn out_of_range_zone_is_ignored() {
        let mut state = ZoneRuntimeState::new(1);
        state.mark_occupied(3, 1);
        assert_eq!(state.last_occupied_frame(3), None);
        assert_eq!(state.len(), 1);
    }
}
