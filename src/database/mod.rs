use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub mod schema;
pub mod queries;

pub fn init_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    
    // Enable WAL mode
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    
    schema::create_tables(&conn)?;
    
    Ok(conn)
}

/// Shared handle over a single SQLite connection. Statements are short, so callers
/// run them inline rather than on a blocking pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::from_connection(init_database(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_payload_round_trips_through_compression() {
        let db = Database::open_in_memory().expect("db");
        let json = br#"[{"id":"p1"}]"#;
        db.with_conn(|c| queries::store_source_payload(c, 42, "catalog", json, 1_700_000_000))
            .expect("store");
        let cached = db
            .with_conn(|c| queries::load_source_payload(c, 42, "catalog"))
            .expect("load")
            .expect("row present");
        assert_eq!(cached.json, json.to_vec());
        assert_eq!(cached.fetched_at, 1_700_000_000);
        assert!(db
            .with_conn(|c| queries::load_source_payload(c, 42, "activity"))
            .expect("load")
            .is_none());
    }

    #[test]
    fn learner_state_writes_are_versioned() {
        let db = Database::open_in_memory().expect("db");
        assert!(db.with_conn(|c| queries::put_learner_state(c, "l1", 0, "{}", 1)).expect("create"));
        // Second create loses the race.
        assert!(!db.with_conn(|c| queries::put_learner_state(c, "l1", 0, "{}", 2)).expect("create"));
        assert!(db.with_conn(|c| queries::put_learner_state(c, "l1", 1, "{\"a\":1}", 3)).expect("update"));
        assert!(!db.with_conn(|c| queries::put_learner_state(c, "l1", 1, "{}", 4)).expect("stale"));
        let row = db
            .with_conn(|c| queries::get_learner_state(c, "l1"))
            .expect("get")
            .expect("row");
        assert_eq!(row.version, 2);
        assert_eq!(row.profile_json, "{\"a\":1}");
    }

    #[test]
    fn prune_removes_old_rows() {
        let db = Database::open_in_memory().expect("db");
        db.with_conn(|c| queries::store_source_payload(c, 1, "catalog", b"[]", 10)).expect("store");
        db.with_conn(|c| queries::store_source_payload(c, 1, "activity", b"[]", 100)).expect("store");
        let removed = db.with_conn(|c| queries::prune_source_cache(c, 50)).expect("prune");
        assert_eq!(removed, 1);
    }
}
