//! SQLite-backed `CatalogStore`. Three content tables (`anime`, `tv`,
//! `movies`) share one connection, guarded by a mutex so writes for a given
//! Title are strictly serialized without needing a pool — SQLite itself
//! serializes writers regardless, and queries here are single statements,
//! never held across an `await`.

use super::models::{Kind, ProgressMap, Title};
use super::schema::{CATALOG_BASE_TABLES, CATALOG_MIGRATIONS};
use super::trait_def::CatalogStore;
use crate::error::{CoreError, CoreResult};
use crate::sqlite_persistence::VersionedSchema;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Bootstraps the one table that has to exist before the migration ledger
/// can be consulted at all (`migrations` itself), then runs the ledger.
/// Table creation for `anime`/`tv`/`movies` is migration id 1 (see
/// `schema::CATALOG_MIGRATIONS`), not a separate unrecorded step — so a
/// fresh database and one recovering from a partially-applied ledger go
/// through the exact same path.
fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let migrations_table_exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='migrations'",
        [],
        |r| r.get(0),
    )?;

    if migrations_table_exists == 0 {
        info!("Creating migrations ledger table");
        let base = VersionedSchema {
            version: 0,
            tables: CATALOG_BASE_TABLES,
            migration: None,
        };
        base.create(conn)?;
    }

    run_migrations(conn)
}

/// Applies every entry in `CATALOG_MIGRATIONS` not yet recorded in the
/// `migrations` table, in id order, each inside its own transaction.
/// Column-add migrations are allowed to fail with "duplicate column name"
/// (the migration already ran against this table in a previous, possibly
/// interrupted, startup) — any other error aborts startup.
fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut applied: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM migrations")?;
        stmt.query_map([], |r| r.get::<_, i64>(0))?
            .filter_map(|r| r.ok())
            .collect()
    };

    for migration in CATALOG_MIGRATIONS {
        if applied.contains(&migration.id) {
            continue;
        }

        let tx = conn.transaction()?;
        match (migration.apply)(&tx) {
            Ok(()) => {}
            Err(e) if e.to_string().to_lowercase().contains("duplicate column name") => {
                info!(
                    "Migration {} ({}) already applied to an underlying column, continuing",
                    migration.id, migration.description
                );
            }
            Err(e) => return Err(e).with_context(|| format!("migration {} failed", migration.id)),
        }

        tx.execute(
            "INSERT INTO migrations (id, description, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.id, migration.description, now_ts()],
        )?;
        tx.commit()?;
        applied.insert(migration.id);
        info!("Applied migration {}: {}", migration.id, migration.description);
    }

    Ok(())
}

fn row_to_title(kind: Kind, row: &Row) -> rusqlite::Result<Title> {
    let seasons_data: Option<String> = row.get("seasons_data")?;
    let progress_map: ProgressMap = seasons_data
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    Ok(Title {
        kind,
        name: row.get("name")?,
        provider: row.get::<_, Option<String>>("provider")?.unwrap_or_default(),
        provider_ref: row.get("link")?,
        year: row.get("year")?,
        total_units: if kind == Kind::Film {
            // `movies` has no `numero_episodi` column; a film is always one unit.
            1
        } else {
            row.get::<_, Option<i64>>("numero_episodi")?.unwrap_or(0) as u32
        },
        downloaded_units: if kind == Kind::Film {
            row.get::<_, i64>("scaricato")?
        } else {
            row.get::<_, i64>("episodi_scaricati")?
        } as u32,
        progress_map,
        last_refresh: row.get("last_update")?,
        created_at: row.get("created_at")?,
    })
}

pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref()).context("failed to open catalog database")?;
        ensure_schema(&mut conn)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn add(
        &self,
        kind: Kind,
        name: &str,
        provider: &str,
        provider_ref: &str,
        total_units: u32,
        year: Option<&str>,
    ) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let sql = if kind == Kind::Film {
            format!(
                "INSERT INTO {table} (name, link, provider, year, scaricato, created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5)"
            )
        } else {
            format!(
                "INSERT INTO {table} (name, link, provider, year, numero_episodi, episodi_scaricati, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)"
            )
        };

        let result = if kind == Kind::Film {
            conn.execute(&sql, params![name, provider_ref, provider, year, now_ts()])
        } else {
            conn.execute(
                &sql,
                params![name, provider_ref, provider, year, total_units, now_ts()],
            )
        };

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(CoreError::StorageFailure(e.to_string())),
        }
    }

    fn get(&self, kind: Kind, name: &str) -> CoreResult<Option<Title>> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        conn.query_row(
            &format!("SELECT * FROM {table} WHERE name = ?1"),
            params![name],
            |row| row_to_title(kind, row),
        )
        .optional()
        .map_err(|e| CoreError::StorageFailure(e.to_string()))
    }

    fn search(&self, kind: Kind, name_substring: &str) -> CoreResult<Option<Title>> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let pattern = format!("%{}%", name_substring.to_lowercase());
        conn.query_row(
            &format!("SELECT * FROM {table} WHERE LOWER(name) LIKE ?1 ORDER BY name ASC LIMIT 1"),
            params![pattern],
            |row| row_to_title(kind, row),
        )
        .optional()
        .map_err(|e| CoreError::StorageFailure(e.to_string()))
    }

    fn list(&self, kind: Kind) -> CoreResult<Vec<Title>> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {table} ORDER BY name ASC"))
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row_to_title(kind, row))
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StorageFailure(e.to_string()))
    }

    fn update_progress(&self, kind: Kind, name: &str, downloaded_units: u32) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let column = if kind == Kind::Film { "scaricato" } else { "episodi_scaricati" };
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE name = ?2"),
                params![downloaded_units, name],
            )
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        if affected == 0 {
            return Err(CoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn update_total(&self, kind: Kind, name: &str, total_units: u32) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET numero_episodi = ?1 WHERE name = ?2"),
                params![total_units, name],
            )
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        if affected == 0 {
            return Err(CoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn update_last_refresh(&self, kind: Kind, name: &str, ts: i64) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET last_update = ?1 WHERE name = ?2"),
                params![ts, name],
            )
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        if affected == 0 {
            return Err(CoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn update_progress_map(&self, kind: Kind, name: &str, map: &ProgressMap) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let encoded = serde_json::to_string(map).map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET seasons_data = ?1 WHERE name = ?2"),
                params![encoded, name],
            )
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        if affected == 0 {
            return Err(CoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn remove(&self, kind: Kind, name: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let table = kind.table_name();
        let affected = conn
            .execute(&format!("DELETE FROM {table} WHERE name = ?1"), params![name])
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        Ok(affected > 0)
    }

    fn pending_films(&self) -> CoreResult<Vec<Title>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM movies WHERE scaricato = 0 ORDER BY name ASC")
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row_to_title(Kind::Film, row))
            .map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StorageFailure(e.to_string()))
    }
}
