use anyhow::Result;
use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<()> {
    // Last good payload per (learner, source), served when a live fetch degrades
    conn.execute(
        "CREATE TABLE IF NOT EXISTS source_cache (
            learner_key INTEGER NOT NULL,
            source TEXT NOT NULL,
            payload BLOB NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (learner_key, source)
        )",
        [],
    )?;

    // Versioned learner profile blobs
    conn.execute(
        "CREATE TABLE IF NOT EXISTS learner_state (
            learner_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            profile_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_source_cache_fetched_at ON source_cache(fetched_at)",
        [],
    )?;

    Ok(())
}
