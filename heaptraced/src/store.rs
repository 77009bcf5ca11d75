//! SQLite-backed tabular store: schema bootstrap, migrations, and the
//! prepared-statement-shaped access methods the ingestor and query
//! engine build on. Grounded on the teacher's own `sqlx::SqlitePool`
//! wrapper, generalized to this system's five-table schema.

use std::collections::HashMap;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::RwLock;

const MIGRATIONS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS Migrations (identifier TEXT PRIMARY KEY, position INTEGER NOT NULL)";

/// `(identifier, position, sql)`. Applied in order within one transaction
/// each, skipping identifiers already present in `Migrations`.
const MIGRATIONS: &[(&str, i64, &str)] = &[(
    "0001_baseline",
    1,
    r#"
    CREATE TABLE IF NOT EXISTS Types (
        type_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS Callstacks (
        callstack_id INTEGER PRIMARY KEY AUTOINCREMENT,
        text TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS Events (
        event_id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind INTEGER NOT NULL,
        type_id INTEGER,
        address INTEGER NOT NULL,
        size INTEGER,
        frame INTEGER NOT NULL,
        callstack_id INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_events_frame ON Events(frame);
    CREATE TABLE IF NOT EXISTS FrameStats (
        frame INTEGER PRIMARY KEY,
        allocs INTEGER NOT NULL,
        frees INTEGER NOT NULL,
        size INTEGER NOT NULL
    );
    "#,
)];

pub const EVENT_KIND_ALLOC: i64 = 1;
pub const EVENT_KIND_FREE: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStatsRow {
    pub frame: i64,
    pub allocs: i64,
    pub frees: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub kind: i64,
    pub type_id: Option<i64>,
    pub address: i64,
    pub size: Option<i64>,
    pub frame: i64,
    pub callstack_id: Option<i64>,
}

pub struct Store {
    pool: SqlitePool,
    type_names: RwLock<HashMap<i64, String>>,
    callstack_texts: RwLock<HashMap<i64, String>>,
}

impl Store {
    pub async fn open(db_path: &str, cache_size_kib: i64) -> Result<Self, sqlx::Error> {
        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;

        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = OFF").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA cache_size = -{cache_size_kib}")).execute(&pool).await?;

        let store = Self { pool, type_names: RwLock::new(HashMap::new()), callstack_texts: RwLock::new(HashMap::new()) };
        store.run_migrations().await?;
        store.load_intern_caches().await?;
        log::info!("store: opened {db_path}");
        Ok(store)
    }

    /// An in-memory database, for tests and for the mock server's own
    /// demo runs where durability is not the point.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        let store = Self { pool, type_names: RwLock::new(HashMap::new()), callstack_texts: RwLock::new(HashMap::new()) };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(MIGRATIONS_TABLE_SQL).execute(&self.pool).await?;
        for (identifier, position, sql) in MIGRATIONS {
            let applied: Option<i64> = sqlx::query_scalar("SELECT 1 FROM Migrations WHERE identifier = ?")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
            if applied.is_some() {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            sqlx::query(sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO Migrations (identifier, position) VALUES (?, ?)")
                .bind(identifier)
                .bind(position)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            log::info!("store: applied migration {identifier}");
        }
        Ok(())
    }

    async fn load_intern_caches(&self) -> Result<(), sqlx::Error> {
        let types = sqlx::query("SELECT type_id, name FROM Types").fetch_all(&self.pool).await?;
        let mut type_names = self.type_names.write().await;
        for row in types {
            type_names.insert(row.get(0), row.get(1));
        }
        drop(type_names);

        let stacks = sqlx::query("SELECT callstack_id, text FROM Callstacks").fetch_all(&self.pool).await?;
        let mut callstack_texts = self.callstack_texts.write().await;
        for row in stacks {
            callstack_texts.insert(row.get(0), row.get(1));
        }
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Interns `name`, returning its existing id or inserting a new one.
    /// Updates the in-memory reverse cache so `type_name` sees it
    /// immediately, even before the enclosing transaction commits.
    pub async fn intern_type(&self, conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
        if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT type_id FROM Types WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?
        {
            return Ok(id);
        }
        let result = sqlx::query("INSERT INTO Types (name) VALUES (?)").bind(name).execute(&mut *conn).await?;
        let id = result.last_insert_rowid();
        self.type_names.write().await.insert(id, name.to_string());
        Ok(id)
    }

    pub async fn intern_callstack(&self, conn: &mut SqliteConnection, text: &str) -> Result<i64, sqlx::Error> {
        if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT callstack_id FROM Callstacks WHERE text = ?")
            .bind(text)
            .fetch_optional(&mut *conn)
            .await?
        {
            return Ok(id);
        }
        let result = sqlx::query("INSERT INTO Callstacks (text) VALUES (?)").bind(text).execute(&mut *conn).await?;
        let id = result.last_insert_rowid();
        self.callstack_texts.write().await.insert(id, text.to_string());
        Ok(id)
    }

    pub async fn insert_event(&self, conn: &mut SqliteConnection, row: &EventRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO Events (kind, type_id, address, size, frame, callstack_id) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.kind)
        .bind(row.type_id)
        .bind(row.address)
        .bind(row.size)
        .bind(row.frame)
        .bind(row.callstack_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn upsert_frame_stats(&self, conn: &mut SqliteConnection, row: &FrameStatsRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO FrameStats (frame, allocs, frees, size) VALUES (?, ?, ?, ?)
            ON CONFLICT(frame) DO UPDATE SET allocs = excluded.allocs, frees = excluded.frees, size = excluded.size
            "#,
        )
        .bind(row.frame)
        .bind(row.allocs)
        .bind(row.frees)
        .bind(row.size)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn frame_boundaries(&self) -> Result<Option<(i64, i64)>, sqlx::Error> {
        let row = sqlx::query("SELECT MIN(frame), MAX(frame) FROM FrameStats").fetch_one(&self.pool).await?;
        let min: Option<i64> = row.get(0);
        let max: Option<i64> = row.get(1);
        Ok(min.zip(max))
    }

    pub async fn last_known_size_before(&self, frame: i64) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT size FROM FrameStats WHERE frame <= ? ORDER BY frame DESC LIMIT 1")
            .bind(frame)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn frame_stats_range(&self, from: i64, to: i64) -> Result<Vec<FrameStatsRow>, sqlx::Error> {
        let rows = sqlx::query("SELECT frame, allocs, frees, size FROM FrameStats WHERE frame BETWEEN ? AND ? ORDER BY frame")
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| FrameStatsRow { frame: r.get(0), allocs: r.get(1), frees: r.get(2), size: r.get(3) })
            .collect())
    }

    pub async fn events_in_range(&self, from: i64, to: i64) -> Result<Vec<EventRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT kind, type_id, address, size, frame, callstack_id FROM Events WHERE frame BETWEEN ? AND ? ORDER BY event_id",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| EventRow {
                kind: r.get(0),
                type_id: r.get(1),
                address: r.get(2),
                size: r.get(3),
                frame: r.get(4),
                callstack_id: r.get(5),
            })
            .collect())
    }

    pub async fn count_events_in_range(&self, from: i64, to: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM Events WHERE frame BETWEEN ? AND ?")
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn type_name(&self, type_id: i64) -> Option<String> {
        self.type_names.read().await.get(&type_id).cloned()
    }

    pub async fn callstack_text(&self, callstack_id: i64) -> Option<String> {
        self.callstack_texts.read().await.get(&callstack_id).cloned()
    }

    /// Copies the live database to `dest_path`. Safe to call mid-capture
    /// (it does not block ingestion); the resulting file must not be
    /// reopened as a live capture target.
    pub async fn backup_to_file(&self, dest_path: &str) -> Result<(), sqlx::Error> {
        sqlx::query("VACUUM INTO ?").bind(dest_path).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_bootstraps_schema_and_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.frame_boundaries().await.unwrap(), None);
        // A second migration pass must be a no-op, not an error.
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn interning_is_bijective_and_cached() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let id1 = store.intern_type(&mut tx, "A.B").await.unwrap();
        let id2 = store.intern_type(&mut tx, "A.B").await.unwrap();
        let id3 = store.intern_type(&mut tx, "A.C").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(store.type_name(id1).await.unwrap(), "A.B");
        assert_eq!(store.type_name(id3).await.unwrap(), "A.C");
    }

    #[tokio::test]
    async fn frame_stats_upsert_and_range_query() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        store.upsert_frame_stats(&mut tx, &FrameStatsRow { frame: 1, allocs: 2, frees: 0, size: 48 }).await.unwrap();
        store.upsert_frame_stats(&mut tx, &FrameStatsRow { frame: 2, allocs: 1, frees: 0, size: 56 }).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.frame_boundaries().await.unwrap(), Some((1, 2)));
        let rows = store.frame_stats_range(1, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].size, 56);
    }

    #[tokio::test]
    async fn events_round_trip_and_count_matches_range() {
        let store = Store::open_in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let type_id = store.intern_type(&mut tx, "A.B").await.unwrap();
        let stack_id = store.intern_callstack(&mut tx, "m1\n").await.unwrap();
        store
            .insert_event(
                &mut tx,
                &EventRow { kind: EVENT_KIND_ALLOC, type_id: Some(type_id), address: 0x10, size: Some(16), frame: 1, callstack_id: Some(stack_id) },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let events = store.events_in_range(1, 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(store.count_events_in_range(1, 1).await.unwrap(), 1);
    }
}
