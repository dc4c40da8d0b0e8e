use rusqlite::{Connection, Result};

pub const SCHEMA_VERSION: &str = "1";

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per index slot. Slots are dense and define search order.
        CREATE TABLE IF NOT EXISTS vectors (
            slot     INTEGER PRIMARY KEY,
            movie_id INTEGER NOT NULL UNIQUE,
            vector   BLOB NOT NULL   -- little-endian f32 x dimension
        );
    ")?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
