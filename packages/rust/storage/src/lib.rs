//! libSQL storage layer for the three record layers of a collection.
//!
//! The [`Storage`] struct wraps a libSQL database holding:
//! - **raw** tables, one per (connector, resource), with atomic generation
//!   replacement per parameter fingerprint
//! - **tool** records, structured rows keyed by connection + natural key
//! - **domain** entities, keyed by their [`DomainId`](lakeflow_shared::DomainId)
//!   and written with an idempotent upsert
//!
//! Writes go through one async lock, so concurrent tasks sharing a handle
//! never interleave their transactions.

mod migrations;

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use lakeflow_shared::{LakeflowError, RawRecord, Result};
use libsql::{Connection, Database, Rows, params};
use regex::Regex;
use tokio::sync::Mutex;
use uuid::Uuid;

static RAW_TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_raw_[a-z0-9_]+$").expect("raw table pattern is valid"));

fn db_err(e: libsql::Error) -> LakeflowError {
    LakeflowError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> LakeflowError {
    LakeflowError::Storage(format!("stored JSON is invalid: {e}"))
}

/// Reject anything that is not a plain raw table name before it is
/// interpolated into SQL.
pub fn validate_raw_table(table: &str) -> Result<()> {
    if RAW_TABLE_NAME.is_match(table) {
        Ok(())
    } else {
        Err(LakeflowError::validation(format!(
            "invalid raw table name `{table}`"
        )))
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// An open, not yet visible collection generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: String,
    pub table: String,
    pub params: String,
}

/// Raw row a tool record or domain entity was derived from.
#[derive(Debug, Clone, Default)]
pub struct RawOrigin {
    pub table: String,
    pub params: String,
    pub id: Option<i64>,
}

/// A structured record ready to be written to the tool layer.
#[derive(Debug, Clone)]
pub struct ToolRecordRow {
    pub connection_id: u64,
    pub record_type: String,
    pub natural_key: String,
    /// Groups the records of one scope, e.g. `owner/repo`.
    pub scope_key: String,
    pub data: serde_json::Value,
    pub origin: RawOrigin,
}

/// A tool record as read back by a cursor.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub natural_key: String,
    pub data: serde_json::Value,
}

/// A domain entity ready to be upserted.
#[derive(Debug, Clone)]
pub struct DomainEntityRow {
    pub entity_type: String,
    pub id: String,
    pub data: serde_json::Value,
    pub origin: Option<RawOrigin>,
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

/// Single-pass cursor over the committed raw rows of one fingerprint.
pub struct RawRecordCursor {
    rows: Option<Rows>,
    table: String,
}

impl RawRecordCursor {
    /// Next row, or `None` once exhausted. Stays exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<RawRecord>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let Some(row) = rows.next().await.map_err(db_err)? else {
            self.rows = None;
            return Ok(None);
        };

        let input = match row.get::<String>(4).ok() {
            Some(text) => Some(serde_json::from_str(&text).map_err(json_err)?),
            None => None,
        };
        Ok(Some(RawRecord {
            id: row.get::<i64>(0).map_err(db_err)?,
            table: self.table.clone(),
            params: row.get::<String>(1).map_err(db_err)?,
            data: row.get::<Vec<u8>>(2).map_err(db_err)?,
            url: row.get::<String>(3).map_err(db_err)?,
            input,
        }))
    }
}

/// Single-pass cursor over tool records, in insertion order.
pub struct RecordCursor {
    rows: Option<Rows>,
}

impl RecordCursor {
    /// Next record, or `None` once exhausted. Stays exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<StoredRecord>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let Some(row) = rows.next().await.map_err(db_err)? else {
            self.rows = None;
            return Ok(None);
        };

        let data: String = row.get(1).map_err(db_err)?;
        Ok(Some(StoredRecord {
            natural_key: row.get::<String>(0).map_err(db_err)?,
            data: serde_json::from_str(&data).map_err(json_err)?,
        }))
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LakeflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LakeflowError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    // -----------------------------------------------------------------------
    // Raw layer
    // -----------------------------------------------------------------------

    /// Open a new generation for `(table, params)`, creating the raw table on
    /// first use. Rows left behind by an earlier interrupted run are purged.
    pub async fn begin_generation(&self, table: &str, params: &str) -> Result<Generation> {
        validate_raw_table(table)?;
        let _guard = self.write_lock.lock().await;

        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id         INTEGER PRIMARY KEY AUTOINCREMENT,
                    params     TEXT NOT NULL,
                    data       BLOB NOT NULL,
                    url        TEXT NOT NULL,
                    input      TEXT,
                    generation TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx{table}_params ON {table}(params, generation);"
            ))
            .await
            .map_err(db_err)?;

        let purged = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM {table} WHERE params = ?1 AND generation NOT IN
                     (SELECT generation FROM raw_generations WHERE raw_table = ?2 AND params = ?1)"
                ),
                params![params, table],
            )
            .await
            .map_err(db_err)?;
        if purged > 0 {
            tracing::debug!(table, purged, "purged rows of an unfinished generation");
        }

        Ok(Generation {
            id: Uuid::now_v7().to_string(),
            table: table.to_string(),
            params: params.to_string(),
        })
    }

    /// Write one page of raw items atomically. Returns the number of rows written.
    pub async fn write_raw_page(
        &self,
        generation: &Generation,
        url: &str,
        input: Option<&serde_json::Value>,
        items: &[Vec<u8>],
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let input = input.map(|v| v.to_string());
        let sql = format!(
            "INSERT INTO {} (params, data, url, input, generation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            generation.table
        );

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let written = async {
            for item in items {
                tx.execute(
                    &sql,
                    params![
                        generation.params.as_str(),
                        item.clone(),
                        url,
                        input.as_deref(),
                        generation.id.as_str(),
                        now.as_str(),
                    ],
                )
                .await?;
            }
            Ok::<_, libsql::Error>(items.len())
        }
        .await;

        match written {
            Ok(count) => {
                tx.commit().await.map_err(db_err)?;
                Ok(count)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Make `generation` the visible one for its fingerprint and drop the
    /// rows of every older generation, in one transaction.
    pub async fn commit_generation(&self, generation: &Generation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let result = async {
            tx.execute(
                "INSERT INTO raw_generations (raw_table, params, generation, committed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(raw_table, params) DO UPDATE SET
                   generation = excluded.generation,
                   committed_at = excluded.committed_at",
                params![
                    generation.table.as_str(),
                    generation.params.as_str(),
                    generation.id.as_str(),
                    now.as_str(),
                ],
            )
            .await?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE params = ?1 AND generation != ?2",
                    generation.table
                ),
                params![generation.params.as_str(), generation.id.as_str()],
            )
            .await
        }
        .await;

        match result {
            Ok(replaced) => {
                tx.commit().await.map_err(db_err)?;
                tracing::debug!(
                    table = %generation.table,
                    generation = %generation.id,
                    replaced,
                    "generation committed"
                );
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Discard the rows of a generation that will never be committed.
    pub async fn abandon_generation(&self, generation: &Generation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE params = ?1 AND generation = ?2",
                    generation.table
                ),
                params![generation.params.as_str(), generation.id.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Stream the committed raw rows of `(table, params)` in insertion order.
    pub async fn raw_records(&self, table: &str, params: &str) -> Result<RawRecordCursor> {
        validate_raw_table(table)?;
        if !self.table_exists(table).await? {
            return Ok(RawRecordCursor {
                rows: None,
                table: table.to_string(),
            });
        }

        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT r.id, r.params, r.data, r.url, r.input
                     FROM {table} r
                     JOIN raw_generations g
                       ON g.raw_table = ?1 AND g.params = r.params AND g.generation = r.generation
                     WHERE r.params = ?2
                     ORDER BY r.id"
                ),
                params![table, params],
            )
            .await
            .map_err(db_err)?;

        Ok(RawRecordCursor {
            rows: Some(rows),
            table: table.to_string(),
        })
    }

    /// Count committed raw rows of `(table, params)`.
    pub async fn count_raw_records(&self, table: &str, params: &str) -> Result<u64> {
        validate_raw_table(table)?;
        if !self.table_exists(table).await? {
            return Ok(0);
        }
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT COUNT(*) FROM {table} r
                     JOIN raw_generations g
                       ON g.raw_table = ?1 AND g.params = r.params AND g.generation = r.generation
                     WHERE r.params = ?2"
                ),
                params![table, params],
            )
            .await
            .map_err(db_err)?;
        count_from(&mut rows).await
    }

    // -----------------------------------------------------------------------
    // Tool layer
    // -----------------------------------------------------------------------

    /// Delete every tool record derived from `(raw_table, raw_params)`.
    pub async fn delete_tool_records_from(&self, raw_table: &str, raw_params: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "DELETE FROM tool_records WHERE raw_table = ?1 AND raw_params = ?2",
                params![raw_table, raw_params],
            )
            .await
            .map_err(db_err)
    }

    /// Insert tool records in one transaction. A record already present under
    /// the same natural key is overwritten.
    pub async fn insert_tool_records(&self, records: &[ToolRecordRow]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let result = async {
            for record in records {
                tx.execute(
                    "INSERT INTO tool_records
                       (connection_id, record_type, natural_key, scope_key, data, raw_table, raw_params, raw_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(connection_id, record_type, natural_key) DO UPDATE SET
                       scope_key = excluded.scope_key,
                       data = excluded.data,
                       raw_table = excluded.raw_table,
                       raw_params = excluded.raw_params,
                       raw_id = excluded.raw_id",
                    params![
                        record.connection_id as i64,
                        record.record_type.as_str(),
                        record.natural_key.as_str(),
                        record.scope_key.as_str(),
                        record.data.to_string(),
                        record.origin.table.as_str(),
                        record.origin.params.as_str(),
                        record.origin.id,
                    ],
                )
                .await?;
            }
            Ok::<_, libsql::Error>(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Stream the tool records of one scope.
    pub async fn tool_records(
        &self,
        connection_id: u64,
        record_type: &str,
        scope_key: &str,
    ) -> Result<RecordCursor> {
        let rows = self
            .conn
            .query(
                "SELECT natural_key, data FROM tool_records
                 WHERE connection_id = ?1 AND record_type = ?2 AND scope_key = ?3
                 ORDER BY rowid",
                params![connection_id as i64, record_type, scope_key],
            )
            .await
            .map_err(db_err)?;
        Ok(RecordCursor { rows: Some(rows) })
    }

    /// Look up one tool record by its exact natural key.
    pub async fn find_tool_record(
        &self,
        connection_id: u64,
        record_type: &str,
        natural_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM tool_records
                 WHERE connection_id = ?1 AND record_type = ?2 AND natural_key = ?3",
                params![connection_id as i64, record_type, natural_key],
            )
            .await
            .map_err(db_err)?;
        first_json(&mut rows).await
    }

    /// Look up the first tool record whose natural key starts with `prefix`,
    /// e.g. a commit referenced by a truncated hash. An empty prefix matches
    /// nothing.
    pub async fn find_tool_record_by_key_prefix(
        &self,
        connection_id: u64,
        record_type: &str,
        prefix: &str,
    ) -> Result<Option<serde_json::Value>> {
        if prefix.is_empty() {
            return Ok(None);
        }
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM tool_records
                 WHERE connection_id = ?1 AND record_type = ?2
                   AND substr(natural_key, 1, length(?3)) = ?3
                 ORDER BY rowid
                 LIMIT 1",
                params![connection_id as i64, record_type, prefix],
            )
            .await
            .map_err(db_err)?;
        first_json(&mut rows).await
    }

    /// Count tool records of one type under a connection.
    pub async fn count_tool_records(&self, connection_id: u64, record_type: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM tool_records WHERE connection_id = ?1 AND record_type = ?2",
                params![connection_id as i64, record_type],
            )
            .await
            .map_err(db_err)?;
        count_from(&mut rows).await
    }

    // -----------------------------------------------------------------------
    // Domain layer
    // -----------------------------------------------------------------------

    /// Upsert domain entities by `(entity_type, id)`. Rows whose data did not
    /// change are left untouched. Returns the number of rows written.
    pub async fn upsert_domain_entities(&self, entities: &[DomainEntityRow]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let result = async {
            let mut written = 0;
            for entity in entities {
                let origin = entity.origin.as_ref();
                written += tx
                    .execute(
                        "INSERT INTO domain_entities (entity_type, id, data, raw_table, raw_params, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(entity_type, id) DO UPDATE SET
                           data = excluded.data,
                           raw_table = excluded.raw_table,
                           raw_params = excluded.raw_params,
                           updated_at = excluded.updated_at
                         WHERE domain_entities.data != excluded.data",
                        params![
                            entity.entity_type.as_str(),
                            entity.id.as_str(),
                            entity.data.to_string(),
                            origin.map(|o| o.table.as_str()),
                            origin.map(|o| o.params.as_str()),
                            now.as_str(),
                        ],
                    )
                    .await?;
            }
            Ok::<_, libsql::Error>(written)
        }
        .await;

        match result {
            Ok(written) => {
                tx.commit().await.map_err(db_err)?;
                Ok(written)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Get one domain entity's data.
    pub async fn get_domain_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM domain_entities WHERE entity_type = ?1 AND id = ?2",
                params![entity_type, id],
            )
            .await
            .map_err(db_err)?;
        first_json(&mut rows).await
    }

    /// Count domain entities of one type.
    pub async fn count_domain_entities(&self, entity_type: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM domain_entities WHERE entity_type = ?1",
                params![entity_type],
            )
            .await
            .map_err(db_err)?;
        count_from(&mut rows).await
    }

    // -----------------------------------------------------------------------
    // Pipeline runs
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run. Returns the generated run ID.
    pub async fn insert_pipeline_run(&self, plan_json: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, started_at, plan_json, status) VALUES (?1, ?2, ?3, 'running')",
                params![id.as_str(), now.as_str(), plan_json],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Record the outcome of a pipeline run.
    pub async fn finish_pipeline_run(
        &self,
        run_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE pipeline_runs SET finished_at = ?1, status = ?2, error = ?3 WHERE id = ?4",
                params![now.as_str(), status, error, run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Status and error of a pipeline run.
    pub async fn get_pipeline_run(&self, run_id: &str) -> Result<Option<(String, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, error FROM pipeline_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some((
                row.get::<String>(0).map_err(db_err)?,
                row.get::<String>(1).ok(),
            ))),
            None => Ok(None),
        }
    }
}

async fn first_json(rows: &mut Rows) -> Result<Option<serde_json::Value>> {
    match rows.next().await.map_err(db_err)? {
        Some(row) => {
            let data: String = row.get(0).map_err(db_err)?;
            Ok(Some(serde_json::from_str(&data).map_err(json_err)?))
        }
        None => Ok(None),
    }
}

async fn count_from(rows: &mut Rows) -> Result<u64> {
    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("lakeflow_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn collect_raw(storage: &Storage, table: &str, params: &str) -> Vec<RawRecord> {
        let mut cursor = storage.raw_records(table, params).await.expect("cursor");
        let mut out = Vec::new();
        while let Some(record) = cursor.next().await.expect("next") {
            out.push(record);
        }
        out
    }

    fn tool_row(natural_key: &str, scope_key: &str, data: serde_json::Value) -> ToolRecordRow {
        ToolRecordRow {
            connection_id: 1,
            record_type: "BitbucketCommit".into(),
            natural_key: natural_key.into(),
            scope_key: scope_key.into(),
            data,
            origin: RawOrigin {
                table: "_raw_bitbucket_api_commits".into(),
                params: r#"{"ConnectionId":1}"#.into(),
                id: None,
            },
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("lakeflow_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let storage = test_storage().await;
        let err = storage
            .begin_generation("_raw_x; DROP TABLE tool_records", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Validation { .. }));
        assert!(validate_raw_table("tool_records").is_err());
        assert!(validate_raw_table("_raw_gitlab_api_merge_requests").is_ok());
    }

    #[tokio::test]
    async fn generation_becomes_visible_only_on_commit() {
        let storage = test_storage().await;
        let table = "_raw_bitbucket_api_pull_requests";
        let params = r#"{"ConnectionId":1,"Owner":"a","Repo":"b"}"#;

        let first = storage.begin_generation(table, params).await.unwrap();
        storage
            .write_raw_page(&first, "https://x/1", None, &[b"{\"id\":1}".to_vec()])
            .await
            .unwrap();
        assert!(collect_raw(&storage, table, params).await.is_empty());
        storage.commit_generation(&first).await.unwrap();
        assert_eq!(collect_raw(&storage, table, params).await.len(), 1);

        // A second run stays invisible until committed, then replaces the first.
        let second = storage.begin_generation(table, params).await.unwrap();
        storage
            .write_raw_page(
                &second,
                "https://x/1",
                Some(&json!({"BitbucketId": 9})),
                &[b"{\"id\":2}".to_vec(), b"{\"id\":3}".to_vec()],
            )
            .await
            .unwrap();
        let visible = collect_raw(&storage, table, params).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].data, b"{\"id\":1}".to_vec());

        storage.commit_generation(&second).await.unwrap();
        let visible = collect_raw(&storage, table, params).await;
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].input, Some(json!({"BitbucketId": 9})));
        assert_eq!(storage.count_raw_records(table, params).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn abandoned_generation_keeps_previous_rows() {
        let storage = test_storage().await;
        let table = "_raw_sonarqube_api_projects";
        let params = r#"{"ConnectionId":2,"ProjectKey":"p"}"#;

        let first = storage.begin_generation(table, params).await.unwrap();
        storage
            .write_raw_page(&first, "u", None, &[b"{}".to_vec()])
            .await
            .unwrap();
        storage.commit_generation(&first).await.unwrap();

        let failed = storage.begin_generation(table, params).await.unwrap();
        storage
            .write_raw_page(&failed, "u", None, &[b"{}".to_vec(), b"{}".to_vec()])
            .await
            .unwrap();
        storage.abandon_generation(&failed).await.unwrap();

        assert_eq!(storage.count_raw_records(table, params).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fingerprints_are_isolated() {
        let storage = test_storage().await;
        let table = "_raw_gitlab_api_merge_requests";

        let a = storage.begin_generation(table, "a").await.unwrap();
        storage.write_raw_page(&a, "u", None, &[b"1".to_vec()]).await.unwrap();
        storage.commit_generation(&a).await.unwrap();

        let b = storage.begin_generation(table, "b").await.unwrap();
        storage.write_raw_page(&b, "u", None, &[b"2".to_vec()]).await.unwrap();
        storage.commit_generation(&b).await.unwrap();

        assert_eq!(storage.count_raw_records(table, "a").await.unwrap(), 1);
        assert_eq!(storage.count_raw_records(table, "b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_raw_table_reads_as_empty() {
        let storage = test_storage().await;
        let mut cursor = storage
            .raw_records("_raw_never_collected", "{}")
            .await
            .unwrap();
        assert!(cursor.next().await.unwrap().is_none());
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_records_upsert_and_prefix_lookup() {
        let storage = test_storage().await;
        let sha = "0123456789abcdef0123456789abcdef01234567";
        storage
            .insert_tool_records(&[
                tool_row(sha, "a/b", json!({"sha": sha, "n": 1})),
                tool_row("ffff", "a/b", json!({"sha": "ffff"})),
            ])
            .await
            .unwrap();
        storage
            .insert_tool_records(&[tool_row(sha, "a/b", json!({"sha": sha, "n": 2}))])
            .await
            .unwrap();
        assert_eq!(storage.count_tool_records(1, "BitbucketCommit").await.unwrap(), 2);

        let hit = storage
            .find_tool_record_by_key_prefix(1, "BitbucketCommit", &sha[..12])
            .await
            .unwrap()
            .expect("prefix match");
        assert_eq!(hit["n"], 2);

        let miss = storage
            .find_tool_record_by_key_prefix(1, "BitbucketCommit", "999999999999")
            .await
            .unwrap();
        assert!(miss.is_none());
        let empty = storage
            .find_tool_record_by_key_prefix(1, "BitbucketCommit", "")
            .await
            .unwrap();
        assert!(empty.is_none());

        let exact = storage.find_tool_record(1, "BitbucketCommit", "ffff").await.unwrap();
        assert!(exact.is_some());
    }

    #[tokio::test]
    async fn tool_cursor_is_scoped_and_fused() {
        let storage = test_storage().await;
        storage
            .insert_tool_records(&[
                tool_row("1", "a/b", json!({"id": 1})),
                tool_row("2", "c/d", json!({"id": 2})),
                tool_row("3", "a/b", json!({"id": 3})),
            ])
            .await
            .unwrap();

        let mut cursor = storage.tool_records(1, "BitbucketCommit", "a/b").await.unwrap();
        let mut keys = Vec::new();
        while let Some(record) = cursor.next().await.unwrap() {
            keys.push(record.natural_key);
        }
        assert_eq!(keys, vec!["1", "3"]);
        assert!(cursor.next().await.unwrap().is_none());

        let removed = storage
            .delete_tool_records_from("_raw_bitbucket_api_commits", r#"{"ConnectionId":1}"#)
            .await
            .unwrap();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn domain_upsert_is_idempotent() {
        let storage = test_storage().await;
        let row = DomainEntityRow {
            entity_type: "pull_requests".into(),
            id: "bitbucket:BitbucketPullRequest:1:7".into(),
            data: json!({"title": "Fix"}),
            origin: None,
        };

        assert_eq!(storage.upsert_domain_entities(&[row.clone()]).await.unwrap(), 1);
        assert_eq!(storage.upsert_domain_entities(&[row.clone()]).await.unwrap(), 0);

        let changed = DomainEntityRow {
            data: json!({"title": "Fix typo"}),
            ..row
        };
        assert_eq!(storage.upsert_domain_entities(&[changed]).await.unwrap(), 1);
        assert_eq!(storage.count_domain_entities("pull_requests").await.unwrap(), 1);

        let stored = storage
            .get_domain_entity("pull_requests", "bitbucket:BitbucketPullRequest:1:7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["title"], "Fix typo");
    }

    #[tokio::test]
    async fn pipeline_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_pipeline_run("[]").await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .finish_pipeline_run(&run_id, "failed", Some("stage #0: boom"))
            .await
            .expect("finish run");
        let (status, error) = storage.get_pipeline_run(&run_id).await.unwrap().unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error.as_deref(), Some("stage #0: boom"));
    }
}
