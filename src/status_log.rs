//! Frame status maps and the session status log.
//!
//! The log is an append-only, frame-ordered audit trail. Entries are never
//! deduplicated or rewritten. It grows for the whole session; `flush` hands
//! new entries to a sink without removing them, so `export` always returns
//! the complete history.

use anyhow::{anyhow, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::io::Write;

use crate::storage::StatusSink;
use crate::{FrameIndex, OccupancyError, OccupancyStatus};

/// Zone name to status for one frame, in registry order.
///
/// Serializes as a JSON object: `{"Desk 1": "Occupied", "Desk 2": "Vacant"}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStatusMap {
    entries: Vec<(String, OccupancyStatus)>,
}

impl FrameStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Set a zone's status, replacing an earlier value for the same zone.
    pub fn insert(&mut self, zone: impl Into<String>, status: OccupancyStatus) {
        let zone = zone.into();
        match self.entries.iter_mut().find(|(name, _)| *name == zone) {
            Some(entry) => entry.1 = status,
            None => self.entries.push((zone, status)),
        }
    }

    pub fn get(&self, zone: &str) -> Option<OccupancyStatus> {
        self.entries
            .iter()
            .find(|(name, _)| name == zone)
            .map(|(_, status)| *status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, OccupancyStatus)> + '_ {
        self.entries
            .iter()
            .map(|(name, status)| (name.as_str(), *status))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn occupied_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, status)| status.is_occupied())
            .count()
    }
}

impl<S: Into<String>> FromIterator<(S, OccupancyStatus)> for FrameStatusMap {
    fn from_iter<I: IntoIterator<Item = (S, OccupancyStatus)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (zone, status) in iter {
            map.insert(zone, status);
        }
        map
    }
}

impl Serialize for FrameStatusMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (zone, status) in &self.entries {
            map.serialize_entry(zone, status)?;
        }
        map.end()
    }
}

/// One log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub frame_index: FrameIndex,
    pub statuses: FrameStatusMap,
}

/// Append-only, frame-ordered status history for one session.
#[derive(Clone, Debug, Default)]
pub struct StatusLog {
    records: Vec<FrameRecord>,
    flushed: usize,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame's statuses. Frame indices must strictly increase.
    pub fn record(&mut self, frame_index: FrameIndex, statuses: FrameStatusMap) -> Result<()> {
        if let Some(last) = self.records.last() {
            if frame_index <= last.frame_index {
                return Err(anyhow!(OccupancyError::OutOfOrderFrame {
                    expected: last.frame_index + 1,
                    received: frame_index,
                }));
            }
        }
        self.records.push(FrameRecord {
            frame_index,
            statuses,
        });
        Ok(())
    }

    /// Full history, oldest first.
    pub fn export(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&FrameRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet handed to a sink via `flush`.
    pub fn pending(&self) -> &[FrameRecord] {
        &self.records[self.flushed..]
    }

    /// Hand every record not yet flushed to `sink`. Returns how many were written.
    ///
    /// A sink error leaves the failing record and everything after it pending.
    pub fn flush(&mut self, sink: &mut dyn StatusSink) -> Result<usize> {
        let start = self.flushed;
        for record in &self.records[start..] {
            sink.record(record)?;
            self.flushed += 1;
        }
        Ok(self.flushed - start)
    }

    /// Write the whole log as one JSON document keyed by frame index:
    /// `{"0": {"Desk 1": "Vacant"}, "1": {...}}`.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

impl Serialize for StatusLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.frame_index, &record.statuses)?;
        }
        map.end()
    }
}
