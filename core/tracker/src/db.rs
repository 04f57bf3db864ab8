//! SQLite persistence for trackerd.
//!
//! The single-writer store backing the daemon: a `tracks` table holding one
//! row per recording segment and a `trackpoints` table holding every accepted
//! fix. Timestamps are RFC3339 text; an open track has a NULL or empty
//! `end_time`.

use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;
use tracker_protocol::{FixKind, Track, TrackPoint};

use crate::error::{Result, TrackerError};
use crate::store::{NewTrack, NewTrackPoint, TrackStore};

const TRACK_COLUMNS: &str = "id, name, start_time, end_time, visible";
const POINT_COLUMNS: &str = "id, session, lon, lat, ele, fix, sat, timestamp, provider";
const OPEN_TRACK_FILTER: &str = "(end_time IS NULL OR end_time = '')";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS tracks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    visible INTEGER NOT NULL DEFAULT 1
                 );
                 CREATE TABLE IF NOT EXISTS trackpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                    lon REAL NOT NULL,
                    lat REAL NOT NULL,
                    ele REAL,
                    fix TEXT NOT NULL,
                    sat INTEGER NOT NULL DEFAULT 0,
                    timestamp TEXT NOT NULL,
                    provider TEXT NOT NULL DEFAULT ''
                 );
                 CREATE INDEX IF NOT EXISTS trackpoints_session ON trackpoints(session);
                 COMMIT;",
            )
            .map_err(TrackerError::store("initialize schema"))?;
            ensure_trackpoint_columns(conn)?;
            Ok(())
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(TrackerError::io("create tracker data dir"))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(TrackerError::store("open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(TrackerError::store("enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(TrackerError::store("set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(TrackerError::store("set busy_timeout"))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(TrackerError::store("enable foreign keys"))?;

        Ok(conn)
    }

    /// Runs raw SQL; lets tests seed rows the store API would never write.
    #[cfg(test)]
    pub(crate) fn seed(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(sql)
                .map_err(TrackerError::store("seed"))
        })
    }
}

impl TrackStore for Db {
    fn last_track(&self) -> Result<Option<Track>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id DESC LIMIT 1"),
                [],
                track_from_row,
            )
            .optional()
            .map_err(TrackerError::store("query last track"))
        })
    }

    fn get_track(&self, id: i64) -> Result<Option<Track>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                params![id],
                track_from_row,
            )
            .optional()
            .map_err(TrackerError::store("query track"))
        })
    }

    fn track_name_exists(&self, name: &str) -> Result<bool> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tracks WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .map_err(TrackerError::store("count tracks by name"))
        })?;
        Ok(count > 0)
    }

    fn close_open_tracks(&self, end: &str, keep: Option<i64>) -> Result<usize> {
        self.with_connection(|conn| {
            let touched = match keep {
                Some(keep) => conn.execute(
                    &format!("UPDATE tracks SET end_time = ?1 WHERE {OPEN_TRACK_FILTER} AND id != ?2"),
                    params![end, keep],
                ),
                None => conn.execute(
                    &format!("UPDATE tracks SET end_time = ?1 WHERE {OPEN_TRACK_FILTER}"),
                    params![end],
                ),
            }
            .map_err(TrackerError::store("close open tracks"))?;
            Ok(touched)
        })
    }

    fn rotate_track(&self, end: &str, next: &NewTrack) -> Result<(usize, Track)> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(TrackerError::store("begin rotate transaction"))?;

            let closed = tx
                .execute(
                    &format!("UPDATE tracks SET end_time = ?1 WHERE {OPEN_TRACK_FILTER}"),
                    params![end],
                )
                .map_err(TrackerError::store("close open tracks"))?;

            tx.execute(
                "INSERT INTO tracks (name, start_time, end_time, visible) VALUES (?1, ?2, NULL, ?3)",
                params![next.name, next.start, next.visible],
            )
            .map_err(TrackerError::store("insert track"))?;
            let id = tx.last_insert_rowid();

            tx.commit()
                .map_err(TrackerError::store("commit rotate transaction"))?;

            Ok((
                closed,
                Track {
                    id,
                    name: next.name.clone(),
                    start: next.start.clone(),
                    end: None,
                    visible: next.visible,
                },
            ))
        })
    }

    fn insert_point(&self, point: &NewTrackPoint) -> Result<TrackPoint> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO trackpoints (session, lon, lat, ele, fix, sat, timestamp, provider) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    point.session,
                    point.lon,
                    point.lat,
                    point.ele,
                    point.fix.as_str(),
                    point.sat,
                    point.timestamp,
                    point.provider
                ],
            )
            .map_err(TrackerError::store("insert track point"))?;

            Ok(TrackPoint {
                id: conn.last_insert_rowid(),
                session: point.session,
                lon: point.lon,
                lat: point.lat,
                ele: point.ele,
                fix: point.fix,
                sat: point.sat,
                timestamp: point.timestamp.clone(),
                provider: point.provider.clone(),
            })
        })
    }

    fn list_tracks(&self) -> Result<Vec<Track>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id DESC"))
                .map_err(TrackerError::store("prepare tracks query"))?;

            let rows = stmt
                .query_map([], track_from_row)
                .map_err(TrackerError::store("query tracks"))?;

            let mut tracks = Vec::new();
            for row in rows {
                tracks.push(row.map_err(TrackerError::store("decode track row"))?);
            }
            Ok(tracks)
        })
    }

    fn list_points(&self, track_id: i64) -> Result<Vec<TrackPoint>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {POINT_COLUMNS} FROM trackpoints WHERE session = ?1 ORDER BY id ASC"
                ))
                .map_err(TrackerError::store("prepare track points query"))?;

            let rows = stmt
                .query_map(params![track_id], point_from_row)
                .map_err(TrackerError::store("query track points"))?;

            let mut points = Vec::new();
            for row in rows {
                points.push(row.map_err(TrackerError::store("decode track point row"))?);
            }
            Ok(points)
        })
    }

    fn set_track_visible(&self, id: i64, visible: bool) -> Result<bool> {
        self.with_connection(|conn| {
            let touched = conn
                .execute(
                    "UPDATE tracks SET visible = ?1 WHERE id = ?2",
                    params![visible, id],
                )
                .map_err(TrackerError::store("update track visibility"))?;
            Ok(touched > 0)
        })
    }

    fn delete_tracks(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_connection(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let tx = conn
                .transaction()
                .map_err(TrackerError::store("begin delete transaction"))?;

            tx.execute(
                &format!("DELETE FROM trackpoints WHERE session IN ({placeholders})"),
                params_from_iter(ids.iter()),
            )
            .map_err(TrackerError::store("delete track points"))?;
            let removed = tx
                .execute(
                    &format!("DELETE FROM tracks WHERE id IN ({placeholders})"),
                    params_from_iter(ids.iter()),
                )
                .map_err(TrackerError::store("delete tracks"))?;

            tx.commit()
                .map_err(TrackerError::store("commit delete transaction"))?;
            Ok(removed)
        })
    }

    fn close_and_delete_tracks(&self, end: &str, ids: &[i64]) -> Result<(usize, usize)> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(TrackerError::store("begin delete transaction"))?;

            let closed = tx
                .execute(
                    &format!("UPDATE tracks SET end_time = ?1 WHERE {OPEN_TRACK_FILTER}"),
                    params![end],
                )
                .map_err(TrackerError::store("close open tracks"))?;

            let mut removed = 0;
            if !ids.is_empty() {
                let placeholders = vec!["?"; ids.len()].join(", ");
                tx.execute(
                    &format!("DELETE FROM trackpoints WHERE session IN ({placeholders})"),
                    params_from_iter(ids.iter()),
                )
                .map_err(TrackerError::store("delete track points"))?;
                removed = tx
                    .execute(
                        &format!("DELETE FROM tracks WHERE id IN ({placeholders})"),
                        params_from_iter(ids.iter()),
                    )
                    .map_err(TrackerError::store("delete tracks"))?;
            }

            tx.commit()
                .map_err(TrackerError::store("commit delete transaction"))?;
            Ok((closed, removed))
        })
    }

    fn count_open_tracks(&self) -> Result<usize> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM tracks WHERE {OPEN_TRACK_FILTER}"),
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(TrackerError::store("count open tracks"))
        })?;
        Ok(count.max(0) as usize)
    }
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        name: row.get(1)?,
        start: row.get(2)?,
        end: row
            .get::<_, Option<String>>(3)?
            .filter(|end| !end.trim().is_empty()),
        visible: row.get(4)?,
    })
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackPoint> {
    let fix_raw: String = row.get(5)?;
    let fix = FixKind::from_str(&fix_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            fix_raw.len(),
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown fix type: {}", fix_raw),
            )),
        )
    })?;

    Ok(TrackPoint {
        id: row.get(0)?,
        session: row.get(1)?,
        lon: row.get(2)?,
        lat: row.get(3)?,
        ele: row.get(4)?,
        fix,
        sat: row.get(6)?,
        timestamp: row.get(7)?,
        provider: row.get(8)?,
    })
}

fn ensure_trackpoint_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(trackpoints)")
        .map_err(TrackerError::store("read trackpoints schema"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(TrackerError::store("read trackpoints schema rows"))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.map_err(TrackerError::store("decode schema row"))?);
    }

    if !columns.iter().any(|name| name == "provider") {
        conn.execute(
            "ALTER TABLE trackpoints ADD COLUMN provider TEXT NOT NULL DEFAULT ''",
            [],
        )
        .map_err(TrackerError::store("add provider column"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_track(name: &str, start: &str) -> NewTrack {
        NewTrack {
            name: name.to_string(),
            start: start.to_string(),
            visible: true,
        }
    }

    fn new_point(session: i64, ele: Option<f64>) -> NewTrackPoint {
        NewTrackPoint {
            session,
            lon: 37.61,
            lat: 55.75,
            ele,
            fix: if ele.is_some() {
                FixKind::ThreeD
            } else {
                FixKind::TwoD
            },
            sat: 7,
            timestamp: "2024-01-01T23:59:30+00:00".to_string(),
            provider: "gps".to_string(),
        }
    }

    fn temp_db() -> (tempfile::TempDir, Db) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("tracks.db")).expect("db init");
        (temp_dir, db)
    }

    #[test]
    fn rotate_closes_open_tracks_and_inserts_next() {
        let (_dir, db) = temp_db();

        let (closed, first) = db
            .rotate_track(
                "2024-01-01T23:58:00+00:00",
                &new_track("2024-01-01-1", "2024-01-01T23:58:00+00:00"),
            )
            .expect("first rotate");
        assert_eq!(closed, 0);
        assert!(first.is_open());

        let (closed, second) = db
            .rotate_track(
                "2024-01-02T00:00:00+00:00",
                &new_track("2024-01-02-1", "2024-01-02T00:00:00+00:00"),
            )
            .expect("second rotate");
        assert_eq!(closed, 1);
        assert!(second.id > first.id);

        let first = db.get_track(first.id).expect("get").expect("exists");
        assert_eq!(first.end.as_deref(), Some("2024-01-02T00:00:00+00:00"));
        assert_eq!(db.count_open_tracks().expect("count"), 1);
        assert_eq!(db.last_track().expect("last").expect("exists").id, second.id);
    }

    #[test]
    fn close_sweep_repairs_every_open_row() {
        let (_dir, db) = temp_db();
        db.with_connection(|conn| {
            conn.execute_batch(
                "INSERT INTO tracks (name, start_time, end_time) VALUES ('a', 's', NULL);
                 INSERT INTO tracks (name, start_time, end_time) VALUES ('b', 's', '');
                 INSERT INTO tracks (name, start_time, end_time) VALUES ('c', 's', 'done');",
            )
            .map_err(TrackerError::store("seed"))
        })
        .expect("seed tracks");

        assert_eq!(db.count_open_tracks().expect("count"), 2);
        let touched = db.close_open_tracks("now", None).expect("sweep");
        assert_eq!(touched, 2);
        assert_eq!(db.count_open_tracks().expect("count"), 0);

        let tracks = db.list_tracks().expect("list");
        assert_eq!(tracks.len(), 3);
        assert!(tracks.iter().all(|track| track.end.is_some()));
        assert_eq!(tracks[0].end.as_deref(), Some("done"));
    }

    #[test]
    fn close_sweep_can_keep_one_track_open() {
        let (_dir, db) = temp_db();
        let (_, first) = db.rotate_track("t0", &new_track("a", "t0")).expect("rotate");
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tracks (name, start_time) VALUES ('stray', 't1')",
                [],
            )
            .map_err(TrackerError::store("seed"))
        })
        .expect("seed stray");

        let touched = db.close_open_tracks("t2", Some(first.id)).expect("sweep");
        assert_eq!(touched, 1);
        assert!(db.get_track(first.id).expect("get").expect("exists").is_open());
    }

    #[test]
    fn blank_end_reads_back_as_open() {
        let (_dir, db) = temp_db();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tracks (name, start_time, end_time) VALUES ('x', 's', '')",
                [],
            )
            .map_err(TrackerError::store("seed"))
        })
        .expect("seed");
        let last = db.last_track().expect("last").expect("exists");
        assert_eq!(last.end, None);
        assert!(last.is_open());
    }

    #[test]
    fn inserts_and_lists_points_in_order() {
        let (_dir, db) = temp_db();
        let (_, track) = db.rotate_track("t", &new_track("a", "t")).expect("rotate");

        let first = db.insert_point(&new_point(track.id, Some(150.0))).expect("insert");
        let second = db.insert_point(&new_point(track.id, None)).expect("insert");
        assert!(second.id > first.id);

        let points = db.list_points(track.id).expect("list");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].fix, FixKind::ThreeD);
        assert_eq!(points[0].ele, Some(150.0));
        assert_eq!(points[1].fix, FixKind::TwoD);
        assert_eq!(points[1].ele, None);
        assert_eq!(points[1].sat, 7);
        assert_eq!(points[1].provider, "gps");
    }

    #[test]
    fn identical_points_are_not_deduplicated() {
        let (_dir, db) = temp_db();
        let (_, track) = db.rotate_track("t", &new_track("a", "t")).expect("rotate");
        db.insert_point(&new_point(track.id, None)).expect("insert");
        db.insert_point(&new_point(track.id, None)).expect("insert");
        assert_eq!(db.list_points(track.id).expect("list").len(), 2);
    }

    #[test]
    fn toggles_visibility() {
        let (_dir, db) = temp_db();
        let (_, track) = db.rotate_track("t", &new_track("a", "t")).expect("rotate");
        assert!(db.set_track_visible(track.id, false).expect("hide"));
        assert!(!db.get_track(track.id).expect("get").expect("exists").visible);
        assert!(!db.set_track_visible(track.id + 100, false).expect("missing"));
    }

    #[test]
    fn deletes_tracks_with_their_points() {
        let (_dir, db) = temp_db();
        let (_, first) = db.rotate_track("t0", &new_track("a", "t0")).expect("rotate");
        let (_, second) = db.rotate_track("t1", &new_track("b", "t1")).expect("rotate");
        db.insert_point(&new_point(first.id, None)).expect("insert");
        db.insert_point(&new_point(second.id, None)).expect("insert");

        let removed = db.delete_tracks(&[first.id, 999]).expect("delete");
        assert_eq!(removed, 1);
        assert!(db.get_track(first.id).expect("get").is_none());
        assert!(db.list_points(first.id).expect("list").is_empty());
        assert_eq!(db.list_points(second.id).expect("list").len(), 1);
        assert_eq!(db.delete_tracks(&[]).expect("noop"), 0);
    }

    #[test]
    fn track_ids_are_not_reused_after_delete() {
        let (_dir, db) = temp_db();
        let (_, first) = db.rotate_track("t0", &new_track("a", "t0")).expect("rotate");
        db.delete_tracks(&[first.id]).expect("delete");
        let (_, second) = db.rotate_track("t1", &new_track("b", "t1")).expect("rotate");
        assert!(second.id > first.id);
    }

    #[test]
    fn adds_provider_column_to_older_schema() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("tracks.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.execute_batch(
                "CREATE TABLE tracks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    visible INTEGER NOT NULL DEFAULT 1
                 );
                 CREATE TABLE trackpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session INTEGER NOT NULL,
                    lon REAL NOT NULL,
                    lat REAL NOT NULL,
                    ele REAL,
                    fix TEXT NOT NULL,
                    sat INTEGER NOT NULL DEFAULT 0,
                    timestamp TEXT NOT NULL
                 );",
            )
            .expect("legacy schema");
        }

        let db = Db::new(path).expect("db init");
        let (_, track) = db.rotate_track("t", &new_track("a", "t")).expect("rotate");
        let point = db.insert_point(&new_point(track.id, None)).expect("insert");
        assert_eq!(point.provider, "gps");
    }

    #[test]
    fn fresh_schema_declares_provider_column() {
        let (_dir, db) = temp_db();
        let sql: String = db
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'trackpoints'",
                    [],
                    |row| row.get(0),
                )
                .map_err(TrackerError::store("read schema"))
            })
            .expect("schema");
        assert!(sql.contains("provider TEXT NOT NULL DEFAULT ''"));
    }

    #[test]
    fn close_and_delete_sweeps_open_rows_in_one_transaction() {
        let (_dir, db) = temp_db();
        let (_, kept) = db.rotate_track("t0", &new_track("a", "t0")).expect("rotate");
        let (_, doomed) = db.rotate_track("t1", &new_track("b", "t1")).expect("rotate");
        db.insert_point(&new_point(doomed.id, None)).expect("insert");

        let (closed, removed) = db
            .close_and_delete_tracks("t2", &[doomed.id])
            .expect("close and delete");
        assert_eq!((closed, removed), (1, 1));
        assert!(db.get_track(doomed.id).expect("get").is_none());
        assert_eq!(db.count_open_tracks().expect("count"), 0);
        assert_eq!(
            db.get_track(kept.id).expect("get").and_then(|t| t.end),
            Some("t1".to_string())
        );
    }

    #[test]
    fn name_lookup_is_exact() {
        let (_dir, db) = temp_db();
        db.rotate_track("t", &new_track("2024-01-01-1", "t")).expect("rotate");
        assert!(db.track_name_exists("2024-01-01-1").expect("exists"));
        assert!(!db.track_name_exists("2024-01-01-10").expect("exists"));
    }
}
