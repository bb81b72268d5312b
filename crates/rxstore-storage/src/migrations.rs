//! Schema migrations
//!
//! Every attached storage carries its own `schema_version` table. Steps run
//! one at a time, each in its own transaction, so an interrupted migration
//! resumes from the last completed step.

use rusqlite::Connection;

use crate::storage::schema;
use crate::Result;

pub(crate) const SCHEMA_VERSION: i32 = 3;

type Step = fn(&Connection, &str) -> Result<()>;

const MIGRATIONS: [(i32, Step); 3] = [(1, migrate_v1), (2, migrate_v2), (3, migrate_v3)];

/// Version recorded in `schema`, `None` if the storage was never migrated
pub(crate) fn read_schema_version(conn: &Connection, schema_name: &str) -> Result<Option<i32>> {
    let has_table: i32 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            schema(schema_name)
        ),
        [],
        |row| row.get(0),
    )?;

    if has_table == 0 {
        return Ok(None);
    }

    let result = conn.query_row(
        &format!("SELECT version FROM {}.schema_version LIMIT 1", schema(schema_name)),
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Some(0)),
        Err(e) => Err(e.into()),
    }
}

/// Number of steps needed to bring a storage at `version` up to date
pub(crate) fn pending_steps(version: i32) -> usize {
    MIGRATIONS.iter().filter(|(v, _)| *v > version).count()
}

/// Run every pending step, calling `on_step` after each one commits
pub(crate) fn run_migrations(
    conn: &Connection,
    schema_name: &str,
    mut on_step: impl FnMut(i32),
) -> Result<()> {
    let current_version = read_schema_version(conn, schema_name)?.unwrap_or(0);

    for (version, step) in MIGRATIONS.iter().filter(|(v, _)| *v > current_version) {
        let tx = conn.unchecked_transaction()?;
        step(&tx, schema_name)?;
        set_schema_version(&tx, schema_name, *version)?;
        tx.commit()?;

        tracing::debug!(configuration = %schema_name, version, "Applied migration");
        on_step(*version);
    }

    Ok(())
}

fn set_schema_version(conn: &Connection, schema_name: &str, version: i32) -> Result<()> {
    let schema_name = schema(schema_name);
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {}.schema_version (version INTEGER NOT NULL)",
            schema_name
        ),
        [],
    )?;
    conn.execute(&format!("DELETE FROM {}.schema_version", schema_name), [])?;
    conn.execute(
        &format!("INSERT INTO {}.schema_version (version) VALUES (?1)", schema_name),
        [version],
    )?;
    Ok(())
}

fn migrate_v1(conn: &Connection, schema_name: &str) -> Result<()> {
    tracing::info!(configuration = %schema_name, "Running migration v1: Object graph");

    let schema_name = schema(schema_name);
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema_name}.objects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS {schema_name}.idx_objects_entity ON objects(entity);
    "#
    ))?;

    Ok(())
}

fn migrate_v2(conn: &Connection, schema_name: &str) -> Result<()> {
    tracing::info!(configuration = %schema_name, "Running migration v2: Unique identifiers");

    let schema_name = schema(schema_name);
    conn.execute_batch(&format!(
        r#"
        ALTER TABLE {schema_name}.objects ADD COLUMN unique_id TEXT;

        CREATE UNIQUE INDEX IF NOT EXISTS {schema_name}.idx_objects_unique
            ON objects(entity, unique_id);
    "#
    ))?;

    Ok(())
}

fn migrate_v3(conn: &Connection, schema_name: &str) -> Result<()> {
    tracing::info!(configuration = %schema_name, "Running migration v3: Stack metadata");

    let schema_name = schema(schema_name);
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema_name}.metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("ATTACH DATABASE ':memory:' AS \"default\"", [])
            .unwrap();
        conn
    }

    #[test]
    fn test_fresh_storage_has_no_version() {
        let conn = attached();
        assert_eq!(read_schema_version(&conn, "default").unwrap(), None);
        assert_eq!(pending_steps(0), MIGRATIONS.len());
    }

    #[test]
    fn test_run_migrations_reports_each_step() {
        let conn = attached();
        let mut applied = Vec::new();

        run_migrations(&conn, "default", |v| applied.push(v)).unwrap();

        assert_eq!(applied, vec![1, 2, 3]);
        assert_eq!(
            read_schema_version(&conn, "default").unwrap(),
            Some(SCHEMA_VERSION)
        );
        assert_eq!(pending_steps(SCHEMA_VERSION), 0);

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM \"default\".objects", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_run_migrations_resumes_from_recorded_version() {
        let conn = attached();
        migrate_v1(&conn, "default").unwrap();
        set_schema_version(&conn, "default", 1).unwrap();

        let mut applied = Vec::new();
        run_migrations(&conn, "default", |v| applied.push(v)).unwrap();

        assert_eq!(applied, vec![2, 3]);
    }
}
