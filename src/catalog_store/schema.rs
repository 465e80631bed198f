//! Catalog schema: three content tables (`anime`, `tv`, `movies`) plus the
//! `migrations` ledger table. Table columns are declared with the shared
//! `sqlite_column!` DSL (see `sqlite_persistence::versioned_schema`). Only
//! the `migrations` table itself is created outside the ledger (it has to
//! exist before the ledger can be consulted); everything else, including
//! the three content tables, is applied through `CATALOG_MIGRATIONS` in id
//! order and recorded by id — mirroring the migration shape of the source
//! catalog this crate reconciles against: id 1 creates `anime`/`tv`/`movies`,
//! id 2 adds `provider`/`slug`/`media_id`/`provider_language`, id 3 adds
//! `year`/`seasons_data`.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table};
use anyhow::Result;
use rusqlite::Connection;

const ANIME_TABLE: Table = Table {
    name: "anime",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("link", &SqlType::Text, non_null = true),
        sqlite_column!("numero_episodi", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("episodi_scaricati", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("scaricato", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("last_update", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const TV_TABLE: Table = Table {
    name: "tv",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("link", &SqlType::Text, non_null = true),
        sqlite_column!("numero_episodi", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("episodi_scaricati", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("scaricato", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("last_update", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const MOVIES_TABLE: Table = Table {
    name: "movies",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("link", &SqlType::Text, non_null = true),
        sqlite_column!("scaricato", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("last_update", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const MIGRATIONS_TABLE: Table = Table {
    name: "migrations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("applied_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// The one table that must exist before the migration ledger itself can be
/// consulted — created unconditionally, outside the ledger it backs.
pub const CATALOG_BASE_TABLES: &[Table] = &[MIGRATIONS_TABLE];

/// The three content tables, created by migration id 1 (see
/// `create_content_tables` below) rather than at bootstrap, so that table
/// creation is itself a recorded, replayable ledger entry.
const CONTENT_TABLES: &[Table] = &[ANIME_TABLE, TV_TABLE, MOVIES_TABLE];

/// One entry in the migration ledger: an integer id (never reused or
/// reordered), a human description recorded alongside the applied row, and
/// the DDL to run. `apply` must tolerate re-execution for column-add
/// migrations — `run_migrations` below swallows "duplicate column name"
/// errors for exactly that reason, so `apply` itself doesn't need to guard.
pub struct Migration {
    pub id: i64,
    pub description: &'static str,
    pub apply: fn(&Connection) -> Result<()>,
}

fn create_content_tables(conn: &Connection) -> Result<()> {
    for table in CONTENT_TABLES {
        table.create(conn)?;
    }
    Ok(())
}

fn add_provider_columns(conn: &Connection) -> Result<()> {
    for table in ["anime", "tv", "movies"] {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN provider TEXT"), [])?;
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN slug TEXT"), [])?;
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN media_id TEXT"), [])?;
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN provider_language TEXT"),
            [],
        )?;
    }
    Ok(())
}

fn add_seasons_and_year_columns(conn: &Connection) -> Result<()> {
    for table in ["anime", "tv", "movies"] {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN year TEXT"), [])?;
        // Films have no season dimension but keep the column for schema
        // uniformity across the three tables; it stays NULL for movies.
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN seasons_data TEXT"),
            [],
        )?;
    }
    Ok(())
}

pub const CATALOG_MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "create anime/tv/movies content tables",
        apply: create_content_tables,
    },
    Migration {
        id: 2,
        description: "add provider/slug/media_id/provider_language columns",
        apply: add_provider_columns,
    },
    Migration {
        id: 3,
        description: "add year and seasons_data (progress_map JSON) columns",
        apply: add_seasons_and_year_columns,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::VersionedSchema;

    #[test]
    fn base_tables_create_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = VersionedSchema {
            version: 0,
            tables: CATALOG_BASE_TABLES,
            migration: None,
        };
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn migration_ids_are_sequential_and_unique() {
        let mut ids: Vec<i64> = CATALOG_MIGRATIONS.iter().map(|m| m.id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids, sorted, "migration ids must be declared in order");
        ids.dedup();
        assert_eq!(ids.len(), CATALOG_MIGRATIONS.len(), "migration ids must be unique");
    }

    #[test]
    fn migration_one_creates_content_tables() {
        let conn = Connection::open_in_memory().unwrap();
        (CATALOG_MIGRATIONS[0].apply)(&conn).unwrap();
        for table in CONTENT_TABLES {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table.name],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "migration 1 must create table {}", table.name);
        }
    }

    #[test]
    fn column_add_migration_tolerates_re_execution() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = VersionedSchema {
            version: 0,
            tables: CATALOG_BASE_TABLES,
            migration: None,
        };
        schema.create(&conn).unwrap();
        // Migration 2 alters the content tables, so they must already exist.
        (CATALOG_MIGRATIONS[0].apply)(&conn).unwrap();

        (CATALOG_MIGRATIONS[1].apply)(&conn).unwrap();
        let second_attempt = (CATALOG_MIGRATIONS[1].apply)(&conn);
        assert!(second_attempt.is_err());
        let msg = second_attempt.unwrap_err().to_string();
        assert!(msg.to_lowercase().contains("duplicate column name"));
    }
}
