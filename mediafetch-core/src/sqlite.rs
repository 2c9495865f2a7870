use rusqlite::Connection;

/// Applies the pragmas every task-store connection runs with.
///
/// WAL keeps readers (dedup lookups) from blocking the writer; the busy
/// timeout lets concurrent writers queue on the database lock instead of
/// failing with `SQLITE_BUSY`.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}
