//! Opening SQLite database files.

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::error::{TuskError, TuskResult};
use crate::models::ConnectionConfig;

const IN_MEMORY: &str = ":memory:";

/// Open the configured file (or `:memory:`) and check it is a database.
///
/// Missing files are created, matching the `sqlite3` shell.
pub(super) fn open(config: &ConnectionConfig) -> TuskResult<Connection> {
    let path = config.filepath.as_deref().ok_or_else(|| {
        TuskError::connection_with_hint(
            "No database file configured",
            "Choose a SQLite database file",
        )
    })?;

    let connection = if path == Path::new(IN_MEMORY) {
        Connection::open_in_memory()
    } else {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
    .map_err(|e| {
        TuskError::connection_with_source(format!("Failed to open '{}'", path.display()), e)
    })?;

    configure(&connection, config)?;
    Ok(connection)
}

fn configure(connection: &Connection, config: &ConnectionConfig) -> TuskResult<()> {
    let busy_timeout = Duration::from_secs(u64::from(config.options.connect_timeout_secs.max(1)));
    connection
        .busy_timeout(busy_timeout)
        .and_then(|_| connection.execute_batch("PRAGMA foreign_keys = ON;"))
        .map_err(|e| TuskError::connection_with_source("Failed to configure SQLite connection", e))?;

    // Reading the schema is what detects a file that is not a database.
    connection
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map_err(|e| {
            TuskError::connection_with_hint(
                format!("Not a usable SQLite database: {e}"),
                "Check that the file is a SQLite 3 database",
            )
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_enables_foreign_keys() {
        let connection = open(&ConnectionConfig::sqlite("mem", IN_MEMORY)).unwrap();
        let enabled: i64 = connection.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_open_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.db");
        open(&ConnectionConfig::sqlite("file", &path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_rejects_non_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"this is definitely not a sqlite database, just some text padding it out")
            .unwrap();
        drop(file);

        let err = open(&ConnectionConfig::sqlite("bad", &path)).unwrap_err();
        assert!(matches!(err, TuskError::Connection { .. }));
    }

    #[test]
    fn test_open_fails_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("x.db");
        let err = open(&ConnectionConfig::sqlite("bad", &path)).unwrap_err();
        assert!(matches!(err, TuskError::Connection { .. }));
    }
}
