use rusqlite::Connection;
use tempfile::TempDir;

use desk_occupancy::zone::ZoneDefinitions;
use desk_occupancy::{
    Detection, EngineConfig, Frame, JsonLogFile, OccupancyEngine, OccupancyStatus, Point,
    ReplayBackend, SqliteStatusStore, StatusSink, ZoneRegistry,
};

fn engine() -> OccupancyEngine {
    let defs = ZoneDefinitions::from_json_str(
        r#"{
            "Desk 1": [[2, 207], [266, 207], [266, 358], [2, 358]],
            "Desk 2": [[300, 207], [560, 207], [560, 358], [300, 358]]
        }"#,
    )
    .unwrap();
    let config = EngineConfig::default()
        .with_detection_interval(2)
        .with_smoothing_window(4);
    OccupancyEngine::new(ZoneRegistry::load(defs).unwrap(), config).unwrap()
}

fn run(engine: &mut OccupancyEngine, frames: u64) {
    let mut backend = ReplayBackend::new()
        .with_detections(0, vec![Detection::person_at(Point::new(100, 300))])
        .with_detections(4, vec![Detection::person_at(Point::new(400, 300))]);
    for i in 0..frames {
        engine
            .process_frame(&Frame::blank(i, 1, 1), &mut backend)
            .unwrap();
    }
}

#[test]
fn persisted_history_verifies_and_reopens() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("occupancy.db");
    let db = db_path.to_str().unwrap();

    let mut engine = engine();
    run(&mut engine, 6);
    {
        let mut store = SqliteStatusStore::open(db).unwrap();
        assert_eq!(engine.flush_log(&mut store).unwrap(), 6);
        assert_eq!(store.verify().unwrap().rows_checked, 12);
    }

    // A second session appends to the same chain.
    let mut engine = self::engine();
    run(&mut engine, 3);
    let mut store = SqliteStatusStore::open(db).unwrap();
    engine.flush_log(&mut store).unwrap();
    let report = store.verify().unwrap();
    assert_eq!(report.rows_checked, 18);
    assert_eq!(report.head, store.read_chain().unwrap().last().unwrap().entry_hash);

    let realtime = store.realtime_state().unwrap();
    assert_eq!(realtime.len(), 2);
    assert_eq!(realtime[0].zone, "Desk 1");
    assert_eq!(realtime[0].status, OccupancyStatus::Occupied);
    assert_eq!(realtime[0].frame_index, 2);
}

#[test]
fn tampered_rows_break_the_chain() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("occupancy.db");
    let db = db_path.to_str().unwrap();

    let mut engine = engine();
    run(&mut engine, 6);
    let mut store = SqliteStatusStore::open(db).unwrap();
    engine.flush_log(&mut store).unwrap();
    drop(store);

    let conn = Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE zone_status SET status = 'Vacant' WHERE zone = 'Desk 1' AND frame_index = 1",
        [],
    )
    .unwrap();
    drop(conn);

    let store = SqliteStatusStore::open(db).unwrap();
    let err = store.verify().unwrap_err();
    assert!(err.to_string().contains("chain broken"));

    let conn = Connection::open(&db_path).unwrap();
    conn.execute("DELETE FROM zone_status WHERE id = 5", []).unwrap();
    drop(conn);
    assert!(SqliteStatusStore::open(db).unwrap().verify().is_err());
}

#[test]
fn log_file_matches_the_engine_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");

    let mut engine = engine();
    run(&mut engine, 10);
    let mut sink = JsonLogFile::new(&path);
    engine.flush_log(&mut sink).unwrap();
    sink.finish().unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let mut expected = Vec::new();
    engine.log().write_json(&mut expected).unwrap();
    let expected: serde_json::Value = serde_json::from_slice(&expected).unwrap();
    assert_eq!(written, expected);

    let doc = written.as_object().unwrap();
    assert_eq!(doc.len(), 10);
    assert_eq!(doc["0"]["Desk 1"], "Occupied");
    assert_eq!(doc["0"]["Desk 2"], "Vacant");
    assert_eq!(doc["4"]["Desk 2"], "Occupied");
    assert_eq!(doc["5"]["Desk 1"], "Vacant");
}
