use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit::canonical::encode_value;
use crate::audit::entry::{AuditEntry, ChainHash, GENESIS};
use crate::database::models::{AuditEntryRow, ENTRY_COLUMNS};
use crate::database::schema::AUDIT_CHAIN_SCHEMA;
use crate::database::{
    ChainStore, ChainTail, EntryPage, NewEntry, Order, ScanPage, UnreadableEntry,
};
use crate::error::{AuditError, AuditResult};

/// SQLite result codes that mean another connection holds or changed the write lock.
const SQLITE_BUSY_CODES: [&str; 3] = ["5", "6", "517"];

/// Chain store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteChainStore {
    pool: SqlitePool,
}

impl SqliteChainStore {
    /// Connect to `database_url` and apply the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> AuditResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Audit chain store connected: {}", database_url);
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// Every connection to `sqlite::memory:` opens a fresh database, so the
    /// pool is pinned to one connection that never expires.
    pub async fn new_in_memory() -> AuditResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema must already be applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> AuditResult<()> {
        sqlx::raw_sql(AUDIT_CHAIN_SCHEMA).execute(&self.pool).await?;
        debug!("Audit chain schema applied");
        Ok(())
    }

    /// Run an entry query, fetching one extra row to learn whether another
    /// page exists.
    async fn fetch_rows(
        &self,
        sql: &str,
        binds: &[BindValue<'_>],
        limit: u32,
    ) -> AuditResult<(Vec<AuditEntryRow>, bool)> {
        let mut query = sqlx::query_as::<Sqlite, AuditEntryRow>(sql);
        for bind in binds {
            query = match bind {
                BindValue::Int(v) => query.bind(*v),
                BindValue::Text(v) => query.bind(v.to_string()),
            };
        }
        let mut rows = query.bind(i64::from(limit) + 1).fetch_all(&self.pool).await?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        Ok((rows, has_more))
    }

    async fn fetch_entries(
        &self,
        sql: &str,
        binds: &[BindValue<'_>],
        limit: u32,
    ) -> AuditResult<EntryPage> {
        let (rows, has_more) = self.fetch_rows(sql, binds, limit).await?;
        let entries = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<AuditResult<Vec<_>>>()?;

        let next_cursor = if has_more {
            entries.last().map(|e| e.sequence_id)
        } else {
            None
        };

        Ok(EntryPage {
            entries,
            next_cursor,
        })
    }
}

fn range_query(cursor: Option<i64>, order: Order) -> (String, Vec<BindValue<'static>>) {
    let (comparison, direction) = match order {
        Order::Ascending => (">", "ASC"),
        Order::Descending => ("<", "DESC"),
    };

    let mut sql = format!("SELECT {} FROM audit_entries", ENTRY_COLUMNS);
    let mut binds = Vec::new();
    if let Some(cursor) = cursor {
        sql.push_str(&format!(" WHERE sequence_id {} ?", comparison));
        binds.push(BindValue::Int(cursor));
    }
    sql.push_str(&format!(" ORDER BY sequence_id {} LIMIT ?", direction));
    (sql, binds)
}

enum BindValue<'a> {
    Int(i64),
    Text(&'a str),
}

async fn fetch_tail<'e, E>(executor: E) -> AuditResult<Option<ChainTail>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT sequence_id, entry_hash FROM audit_entries ORDER BY sequence_id DESC LIMIT 1",
    )
    .fetch_optional(executor)
    .await?;

    match row {
        Some((sequence_id, hash)) => {
            let entry_hash: ChainHash = hash.parse().map_err(|e| {
                AuditError::corrupt_entry(sequence_id, format!("unreadable entry_hash: {}", e))
            })?;
            Ok(Some(ChainTail {
                sequence_id,
                entry_hash,
            }))
        }
        None => Ok(None),
    }
}

/// Constraint and lock failures on append mean another writer got there first.
fn classify_append_error(err: sqlx::Error) -> AuditError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AuditError::ConcurrentAppendConflict(format!(
                "chain position already taken: {}",
                db_err.message()
            ));
        }
        if let Some(code) = db_err.code() {
            if SQLITE_BUSY_CODES.iter().any(|busy| *busy == code) {
                return AuditError::ConcurrentAppendConflict(format!(
                    "database busy: {}",
                    db_err.message()
                ));
            }
        }
    }
    AuditError::from(err)
}

#[async_trait]
impl ChainStore for SqliteChainStore {
    async fn tail(&self) -> AuditResult<Option<ChainTail>> {
        fetch_tail(&self.pool).await
    }

    async fn append(&self, entry: NewEntry) -> AuditResult<AuditEntry> {
        let before = entry.fields.event.before.as_ref().map(encode_value).transpose()?;
        let after = entry.fields.event.after.as_ref().map(encode_value).transpose()?;
        let timestamp = entry
            .fields
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let mut tx = self.pool.begin().await.map_err(classify_append_error)?;

        let tail = fetch_tail(&mut *tx).await?;
        let (current_tail_hash, sequence_id) = match tail {
            Some(t) => (t.entry_hash, t.sequence_id + 1),
            None => (GENESIS, 1),
        };
        if current_tail_hash != entry.prev_hash {
            return Err(AuditError::ConcurrentAppendConflict(format!(
                "expected tail {} but found {}",
                entry.prev_hash, current_tail_hash
            )));
        }

        let fields = &entry.fields;
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                sequence_id, timestamp, actor_user_id, actor_email, actor_role, actor_ip,
                action, object_type, object_id, before_state, after_state, reason,
                entry_hash, prev_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sequence_id)
        .bind(&timestamp)
        .bind(&fields.actor.user_id)
        .bind(&fields.actor.email)
        .bind(&fields.actor.role)
        .bind(&fields.actor.source_ip)
        .bind(&fields.event.action)
        .bind(&fields.event.object_type)
        .bind(&fields.event.object_id)
        .bind(&before)
        .bind(&after)
        .bind(&fields.event.reason)
        .bind(entry.entry_hash.to_string())
        .bind(entry.prev_hash.to_string())
        .execute(&mut *tx)
        .await
        .map_err(classify_append_error)?;

        tx.commit().await.map_err(classify_append_error)?;

        Ok(AuditEntry {
            sequence_id,
            fields: entry.fields,
            entry_hash: entry.entry_hash,
            prev_hash: entry.prev_hash,
        })
    }

    async fn range(
        &self,
        cursor: Option<i64>,
        limit: u32,
        order: Order,
    ) -> AuditResult<EntryPage> {
        let (sql, binds) = range_query(cursor, order);
        self.fetch_entries(&sql, &binds, limit).await
    }

    async fn scan(&self, cursor: Option<i64>, limit: u32) -> AuditResult<ScanPage> {
        let (sql, binds) = range_query(cursor, Order::Ascending);
        let (rows, has_more) = self.fetch_rows(&sql, &binds, limit).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match AuditEntry::try_from(row) {
                Ok(entry) => entries.push(entry),
                Err(AuditError::CorruptEntry {
                    sequence_id,
                    reason,
                }) => {
                    return Ok(ScanPage {
                        entries,
                        unreadable: Some(UnreadableEntry {
                            sequence_id,
                            reason,
                        }),
                        next_cursor: None,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let next_cursor = if has_more {
            entries.last().map(|e| e.sequence_id)
        } else {
            None
        };
        Ok(ScanPage {
            entries,
            unreadable: None,
            next_cursor,
        })
    }

    async fn entries_for_object(
        &self,
        object_type: &str,
        object_id: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> AuditResult<EntryPage> {
        let mut sql = format!(
            "SELECT {} FROM audit_entries WHERE object_type = ? AND object_id = ?",
            ENTRY_COLUMNS
        );
        let mut binds = vec![BindValue::Text(object_type), BindValue::Text(object_id)];
        if let Some(cursor) = cursor {
            sql.push_str(" AND sequence_id < ?");
            binds.push(BindValue::Int(cursor));
        }
        sql.push_str(" ORDER BY sequence_id DESC LIMIT ?");

        self.fetch_entries(&sql, &binds, limit).await
    }

    async fn count(&self) -> AuditResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
