use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, attendance)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                    TEXT PRIMARY KEY,
                username              TEXT NOT NULL UNIQUE,
                password              TEXT NOT NULL,
                last_search_location  TEXT NOT NULL DEFAULT '',
                created_at            TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE attendance (
                id          TEXT PRIMARY KEY,
                venue_id    TEXT NOT NULL,
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(venue_id, user_id)
            );

            CREATE INDEX idx_attendance_user
                ON attendance(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
