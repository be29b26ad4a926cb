use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

const ZSTD_LEVEL: i32 = 3;

pub struct CachedPayload {
    pub json: Vec<u8>,
    pub fetched_at: i64,
}

pub fn store_source_payload(
    conn: &Connection,
    learner_key: i64,
    source: &str,
    json: &[u8],
    fetched_at: i64,
) -> Result<()> {
    let compressed = zstd::encode_all(json, ZSTD_LEVEL)?;
    conn.execute(
        "INSERT INTO source_cache (learner_key, source, payload, fetched_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(learner_key, source) DO UPDATE SET
             payload = excluded.payload,
             fetched_at = excluded.fetched_at",
        rusqlite::params![learner_key, source, compressed, fetched_at],
    )?;
    Ok(())
}

pub fn load_source_payload(
    conn: &Connection,
    learner_key: i64,
    source: &str,
) -> Result<Option<CachedPayload>> {
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "SELECT payload, fetched_at FROM source_cache WHERE learner_key = ?1 AND source = ?2",
            rusqlite::params![learner_key, source],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((blob, fetched_at)) => Ok(Some(CachedPayload {
            json: zstd::decode_all(blob.as_slice())?,
            fetched_at,
        })),
        None => Ok(None),
    }
}

/// Drops cached payloads older than `cutoff` (unix seconds). Returns rows removed.
pub fn prune_source_cache(conn: &Connection, cutoff: i64) -> Result<usize> {
    let removed = conn.execute("DELETE FROM source_cache WHERE fetched_at < ?1", [cutoff])?;
    Ok(removed)
}

pub struct LearnerStateRow {
    pub version: i64,
    pub profile_json: String,
    pub updated_at: i64,
}

pub fn get_learner_state(conn: &Connection, learner_id: &str) -> Result<Option<LearnerStateRow>> {
    let row = conn
        .query_row(
            "SELECT version, profile_json, updated_at FROM learner_state WHERE learner_id = ?1",
            [learner_id],
            |row| {
                Ok(LearnerStateRow {
                    version: row.get(0)?,
                    profile_json: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Compare-and-swap write. Returns false when `expected_version` no longer matches.
pub fn put_learner_state(
    conn: &Connection,
    learner_id: &str,
    expected_version: i64,
    profile_json: &str,
    updated_at: i64,
) -> Result<bool> {
    let changed = if expected_version == 0 {
        conn.execute(
            "INSERT OR IGNORE INTO learner_state (learner_id, version, profile_json, updated_at)
             VALUES (?1, 1, ?2, ?3)",
            rusqlite::params![learner_id, profile_json, updated_at],
        )?
    } else {
        conn.execute(
            "UPDATE learner_state SET version = version + 1, profile_json = ?3, updated_at = ?4
             WHERE learner_id = ?1 AND version = ?2",
            rusqlite::params![learner_id, expected_version, profile_json, updated_at],
        )?
    };
    Ok(changed == 1)
}
