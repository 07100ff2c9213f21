use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::audit::{hash_entry, verify_chain, ChainReport, ChainedRow, StatusRow, GENESIS_HASH};
use crate::status_log::{FrameRecord, StatusLog};
use crate::{FrameIndex, OccupancyStatus};

/// Destination for flushed status log records.
pub trait StatusSink {
    fn record(&mut self, record: &FrameRecord) -> Result<()>;

    /// Called once at session end.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

fn parse_status(raw: &str) -> Result<OccupancyStatus> {
    match raw {
        "Occupied" => Ok(OccupancyStatus::Occupied),
        "Vacant" => Ok(OccupancyStatus::Vacant),
        other => Err(anyhow!("corrupt status row: unknown status {:?}", other)),
    }
}

fn blob32(bytes: Vec<u8>, context: &str) -> Result<[u8; 32]> {
    if bytes.len() != 32 {
        return Err(anyhow!("corrupt status log: {} size", context));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// -------------------- SQLite --------------------

/// Current status of one zone, as kept in `realtime_state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeState {
    pub zone: String,
    pub status: OccupancyStatus,
    pub frame_index: FrameIndex,
}

/// SQLite persistence for status records.
///
/// - `zone_status`: append-only history, one row per zone per frame (or per
///   change with `with_changes_only`), hash chained.
/// - `realtime_state`: one upserted row per zone holding its latest status,
///   for sync layers that only need the current picture.
pub struct SqliteStatusStore {
    conn: Connection,
    changes_only: bool,
    last_persisted: HashMap<String, OccupancyStatus>,
}

impl SqliteStatusStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open status database {}", db_path))?;
        let mut store = Self {
            conn,
            changes_only: false,
            last_persisted: HashMap::new(),
        };
        store.ensure_schema()?;
        store.last_persisted = store
            .realtime_state()?
            .into_iter()
            .map(|state| (state.zone, state.status))
            .collect();
        Ok(store)
    }

    /// Open an existing database without touching its schema or journal mode.
    /// Any write through the returned store fails.
    pub fn open_read_only(db_path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .with_context(|| format!("failed to open status database {} read-only", db_path))?;
        let mut store = Self {
            conn,
            changes_only: false,
            last_persisted: HashMap::new(),
        };
        store.last_persisted = store
            .realtime_state()?
            .into_iter()
            .map(|state| (state.zone, state.status))
            .collect();
        Ok(store)
    }

    /// Persist history rows only when a zone's status changes.
    pub fn with_changes_only(mut self, enabled: bool) -> Self {
        self.changes_only = enabled;
        self
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zone_status (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              frame_index INTEGER NOT NULL,
              zone TEXT NOT NULL,
              status TEXT NOT NULL,
              prev_hash BLOB NOT NULL,
              entry_hash BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS realtime_state (
              zone TEXT PRIMARY KEY,
              status TEXT NOT NULL,
              frame_index INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_zone_status_frame ON zone_status(frame_index);
            "#,
        )?;
        Ok(())
    }

    fn last_entry_hash(&self) -> Result<[u8; 32]> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry_hash FROM zone_status ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            blob32(row.get(0)?, "entry_hash")
        } else {
            Ok(GENESIS_HASH)
        }
    }

    /// Every history row in insertion order, with stored hashes.
    pub fn read_chain(&self) -> Result<Vec<ChainedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, frame_index, zone, status, prev_hash, entry_hash FROM zone_status ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let frame_index: i64 = row.get(1)?;
            let status: String = row.get(3)?;
            out.push(ChainedRow {
                id: row.get(0)?,
                row: StatusRow {
                    frame_index: u64::try_from(frame_index)
                        .map_err(|_| anyhow!("corrupt status row: negative frame index"))?,
                    zone: row.get(2)?,
                    status: parse_status(&status)?,
                },
                prev_hash: blob32(row.get(4)?, "prev_hash")?,
                entry_hash: blob32(row.get(5)?, "entry_hash")?,
            });
        }
        Ok(out)
    }

    /// Recompute and check the history hash chain.
    pub fn verify(&self) -> Result<ChainReport> {
        verify_chain(&self.read_chain()?)
    }

    /// Latest status per zone, sorted by zone name.
    pub fn realtime_state(&self) -> Result<Vec<RealtimeState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT zone, status, frame_index FROM realtime_state ORDER BY zone ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get(1)?;
            let frame_index: i64 = row.get(2)?;
            out.push(RealtimeState {
                zone: row.get(0)?,
                status: parse_status(&status)?,
                frame_index: u64::try_from(frame_index)
                    .map_err(|_| anyhow!("corrupt realtime row: negative frame index"))?,
            });
        }
        Ok(out)
    }
}

impl StatusSink for SqliteStatusStore {
    fn record(&mut self, record: &FrameRecord) -> Result<()> {
        let frame_index = i64::try_from(record.frame_index)
            .map_err(|_| anyhow!("frame index exceeds i64 range"))?;
        let mut prev_hash = self.last_entry_hash()?;
        let mut changed = Vec::new();

        let tx = self.conn.transaction()?;
        for (zone, status) in record.statuses.iter() {
            let is_change = self.last_persisted.get(zone) != Some(&status);
            tx.execute(
                r#"
                INSERT INTO realtime_state(zone, status, frame_index)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(zone) DO UPDATE SET
                  status = excluded.status,
                  frame_index = excluded.frame_index
                "#,
                params![zone, status.as_str(), frame_index],
            )?;
            if is_change {
                changed.push((zone.to_string(), status));
            }
            if self.changes_only && !is_change {
                continue;
            }

            let row = StatusRow {
                frame_index: record.frame_index,
                zone: zone.to_string(),
                status,
            };
            let entry_hash = hash_entry(&prev_hash, &row.payload()?);
            tx.execute(
                r#"
                INSERT INTO zone_status(frame_index, zone, status, prev_hash, entry_hash)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    frame_index,
                    zone,
                    status.as_str(),
                    prev_hash.to_vec(),
                    entry_hash.to_vec()
                ],
            )?;
            prev_hash = entry_hash;
        }
        tx.commit()?;

        for (zone, status) in changed {
            self.last_persisted.insert(zone, status);
        }
        Ok(())
    }
}

// -------------------- JSON log file --------------------

/// Writes the session log as one JSON document when the session finishes.
pub struct JsonLogFile {
    path: PathBuf,
    log: StatusLog,
}

impl JsonLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log: StatusLog::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let file = std::fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        self.log.write_json(std::io::BufWriter::new(file))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move log into {}", self.path.display()))?;
        Ok(())
    }
}

impl StatusSink for JsonLogFile {
    fn record(&mut self, record: &FrameRecord) -> Result<()> {
        self.log
            .record(record.frame_index, record.statuses.clone())
    }

    fn finish(&mut self) -> Result<()> {
        self.write()?;
        log::info!(
            "status log written to {} ({} frames)",
            self.path.display(),
            self.log.len()
        );
        Ok(())
    }
}

// -------------------- Fan-out --------------------

/// Hands each record to several sinks in order.
///
/// Each sink keeps the highest frame index it has accepted. When a later sink
/// fails, the record stays pending in the log; on retry the sinks that already
/// took it skip it, so nothing is duplicated or rejected as out of order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<FanoutEntry>,
}

struct FanoutEntry {
    sink: Box<dyn StatusSink>,
    accepted: Option<FrameIndex>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl StatusSink + 'static) -> Self {
        self.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn StatusSink>) {
        self.sinks.push(FanoutEntry {
            sink,
            accepted: None,
        });
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutSink {
    fn record(&mut self, record: &FrameRecord) -> Result<()> {
        for entry in &mut self.sinks {
            if entry.accepted.is_some_and(|last| record.frame_index <= last) {
                continue;
            }
            entry.sink.record(record)?;
            entry.accepted = Some(record.frame_index);
        }
        Ok(())
    }

    /// Finishes every sink even if an earlier one fails; returns the first error.
    fn finish(&mut self) -> Result<()> {
        let mut first_err = None;
        for entry in &mut self.sinks {
            if let Err(e) = entry.sink.finish() {
                log::error!("status sink failed to finish: {:#}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// -------------------- In memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryStatusStore {
    records: Vec<FrameRecord>,
    finished: bool,
}

impl InMemoryStatusStore {
    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl StatusSink for InMemoryStatusStore {
    fn record(&mut self, record: &FrameRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_log::FrameStatusMap;
    use OccupancyStatus::{Occupied, Vacant};

    fn record(frame_index: FrameIndex, a: OccupancyStatus, b: OccupancyStatus) -> FrameRecord {
        FrameRecord {
            frame_index,
            statuses: [("Desk 1", a), ("Desk 2", b)].into_iter().collect::<FrameStatusMap>(),
        }
    }

    #[test]
    fn sqlite_store_chains_every_row() {
        let mut store = SqliteStatusStore::open(":memory:").unwrap();
        store.record(&record(0, Occupied, Vacant)).unwrap();
        store.record(&record(1, Occupied, Vacant)).unwrap();
        store.record(&record(2, Vacant, Vacant)).unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.rows_checked, 6);

        let realtime = store.realtime_state().unwrap();
        assert_eq!(
            realtime,
            vec![
                RealtimeState {
                    zone: "Desk 1".to_string(),
                    status: Vacant,
                    frame_index: 2
                },
                RealtimeState {
                    zone: "Desk 2".to_string(),
                    status: Vacant,
                    frame_index: 2
                },
            ]
        );
    }

    #[test]
    fn sqlite_changes_only_skips_repeats() {
        let mut store = SqliteStatusStore::open(":memory:")
            .unwrap()
            .with_changes_only(true);
        store.record(&record(0, Occupied, Vacant)).unwrap();
        store.record(&record(1, Occupied, Vacant)).unwrap();
        store.record(&record(2, Vacant, Vacant)).unwrap();

        let chain = store.read_chain().unwrap();
        let frames: Vec<_> = chain
            .iter()
            .map(|r| (r.row.frame_index, r.row.zone.as_str()))
            .collect();
        assert_eq!(frames, vec![(0, "Desk 1"), (0, "Desk 2"), (2, "Desk 1")]);
        assert_eq!(store.verify().unwrap().rows_checked, 3);
    }

    #[test]
    fn sqlite_detects_tampering() {
        let mut store = SqliteStatusStore::open(":memory:").unwrap();
        store.record(&record(0, Occupied, Vacant)).unwrap();
        store.record(&record(1, Occupied, Vacant)).unwrap();
        store
            .conn
            .execute("UPDATE zone_status SET status = 'Vacant' WHERE id = 1", [])
            .unwrap();
        assert!(store.verify().is_err());
    }

    #[test]
    fn fanout_feeds_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut fanout = FanoutSink::new()
            .with(JsonLogFile::new(&path))
            .with(SqliteStatusStore::open(":memory:").unwrap());
        assert_eq!(fanout.len(), 2);
        fanout.record(&record(0, Occupied, Vacant)).unwrap();
        fanout.finish().unwrap();
        assert!(path.exists());
    }

    struct FlakySink {
        failures_left: usize,
        inner: InMemoryStatusStore,
    }

    impl StatusSink for FlakySink {
        fn record(&mut self, record: &FrameRecord) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(anyhow!("db locked"));
            }
            self.inner.record(record)
        }
    }

    #[test]
    fn fanout_retry_after_failing_sink_neither_rejects_nor_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut log = StatusLog::new();
        log.record(0, record(0, Occupied, Vacant).statuses).unwrap();
        log.record(1, record(1, Vacant, Vacant).statuses).unwrap();

        let flaky = FlakySink {
            failures_left: 1,
            inner: InMemoryStatusStore::default(),
        };
        let mut fanout = FanoutSink::new().with(JsonLogFile::new(&path)).with(flaky);

        let err = log.flush(&mut fanout).unwrap_err();
        assert_eq!(err.to_string(), "db locked");
        assert_eq!(log.pending().len(), 2);

        assert_eq!(log.flush(&mut fanout).unwrap(), 2);
        assert!(log.pending().is_empty());
        fanout.finish().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 2);
        assert_eq!(value["1"]["Desk 1"], "Vacant");
    }

    #[test]
    fn fanout_retry_does_not_duplicate_sqlite_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("status.db");
        let db = db.to_str().unwrap();
        let mut log = StatusLog::new();
        log.record(0, record(0, Occupied, Vacant).statuses).unwrap();

        let flaky = FlakySink {
            failures_left: 1,
            inner: InMemoryStatusStore::default(),
        };
        let mut fanout = FanoutSink::new()
            .with(SqliteStatusStore::open(db).unwrap())
            .with(flaky);
        assert!(log.flush(&mut fanout).is_err());
        log.flush(&mut fanout).unwrap();
        fanout.finish().unwrap();
        drop(fanout);

        let store = SqliteStatusStore::open_read_only(db).unwrap();
        assert_eq!(store.verify().unwrap().rows_checked, 2);
    }

    struct FailingFinish;

    impl StatusSink for FailingFinish {
        fn record(&mut self, _record: &FrameRecord) -> Result<()> {
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn fanout_finishes_later_sinks_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut fanout = FanoutSink::new()
            .with(FailingFinish)
            .with(JsonLogFile::new(&path));
        fanout.record(&record(0, Occupied, Vacant)).unwrap();
        assert!(fanout.finish().is_err());
        assert!(path.exists());
    }

    #[test]
    fn sqlite_changes_only_still_refreshes_realtime_frame() {
        let mut store = SqliteStatusStore::open(":memory:")
            .unwrap()
            .with_changes_only(true);
        store.record(&record(0, Occupied, Vacant)).unwrap();
        store.record(&record(5, Occupied, Vacant)).unwrap();

        assert_eq!(store.read_chain().unwrap().len(), 2);
        let frames: Vec<_> = store
            .realtime_state()
            .unwrap()
            .into_iter()
            .map(|s| s.frame_index)
            .collect();
        assert_eq!(frames, vec![5, 5]);
    }

    #[test]
    fn read_only_store_verifies_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("status.db");
        let db = db.to_str().unwrap();
        {
            let mut store = SqliteStatusStore::open(db).unwrap();
            store.record(&record(0, Occupied, Vacant)).unwrap();
        }

        let mut store = SqliteStatusStore::open_read_only(db).unwrap();
        assert_eq!(store.verify().unwrap().rows_checked, 2);
        assert_eq!(store.realtime_state().unwrap().len(), 2);
        assert!(store.record(&record(1, Vacant, Vacant)).is_err());
        assert_eq!(store.verify().unwrap().rows_checked, 2);

        let missing = dir.path().join("missing.db");
        assert!(SqliteStatusStore::open_read_only(missing.to_str().unwrap()).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn json_log_file_writes_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut sink = JsonLogFile::new(&path);
        sink.record(&record(0, Occupied, Vacant)).unwrap();
        sink.record(&record(1, Vacant, Vacant)).unwrap();
        assert!(!path.exists());
        sink.finish().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["0"]["Desk 1"], "Occupied");
        assert_eq!(value["1"]["Desk 2"], "Vacant");
    }
}
