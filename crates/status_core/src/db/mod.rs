use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;

use crate::error::{db_error, AppError};

const MIGRATION_0001: (&str, &str) = (
    "0001_init.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
);

const MIGRATION_0002: (&str, &str) = (
    "0002_settings.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0002_settings.sql"
    )),
);

fn migrations() -> Vec<(&'static str, &'static str)> {
    vec![MIGRATION_0001, MIGRATION_0002]
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite database")
            .with_details(format!("path={}; err={e}", path.display()))
    })
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory().map_err(db_error(
        "DB_OPEN_FAILED",
        "Failed to open in-memory SQLite database",
    ))
}

/// Open (creating if needed) and migrate a workspace database.
pub fn open_migrated(path: &Path) -> Result<Connection, AppError> {
    let mut conn = open(path)?;
    migrate(&mut conn)?;
    Ok(conn)
}

pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    // Each named migration is applied exactly once, in order.
    conn.execute_batch(
        r#"
      PRAGMA foreign_keys = ON;
      CREATE TABLE IF NOT EXISTS _migrations (
        name TEXT PRIMARY KEY NOT NULL,
        applied_at TEXT NOT NULL
      );
    "#,
    )
    .map_err(db_error(
        "DB_MIGRATIONS_TABLE_FAILED",
        "Failed to ensure migrations table exists",
    ))?;

    let applied: HashSet<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM _migrations")
            .map_err(db_error(
                "DB_MIGRATIONS_QUERY_FAILED",
                "Failed to query applied migrations",
            ))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_error(
                "DB_MIGRATIONS_QUERY_FAILED",
                "Failed to read applied migrations",
            ))?;
        rows.collect::<Result<HashSet<_>, _>>().map_err(db_error(
            "DB_MIGRATIONS_QUERY_FAILED",
            "Failed to read applied migration row",
        ))?
    };

    for (name, sql) in migrations() {
        if applied.contains(name) {
            continue;
        }
        tracing::debug!(migration = name, "applying migration");

        let tx = conn.transaction().map_err(db_error(
            "DB_TX_FAILED",
            "Failed to start migration transaction",
        ))?;
        tx.execute_batch(sql)
            .map_err(db_error("DB_MIGRATION_FAILED", format!("Migration {name} failed")))?;
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [name],
        )
        .map_err(db_error(
            "DB_MIGRATION_FAILED",
            format!("Failed to record migration {name}"),
        ))?;
        tx.commit().map_err(db_error(
            "DB_TX_FAILED",
            "Failed to commit migration transaction",
        ))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::OptionalExtension;

    #[test]
    fn migrations_create_expected_tables() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");

        for table in ["components", "status_events", "settings"] {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()
                .unwrap();
            assert_eq!(name.as_deref(), Some(table));
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("first");
        migrate(&mut conn).expect("second");
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 2);
    }
}
