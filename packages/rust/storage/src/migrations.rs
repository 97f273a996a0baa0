//! SQL migration definitions for the Lakeflow database.
//!
//! Migrations are applied in order on database open. Raw tables are not
//! listed here: they are created on demand, one per (connector, resource).

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: raw_generations, tool_records, domain_entities, pipeline_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Committed collection generation per (raw table, fingerprint)
CREATE TABLE IF NOT EXISTS raw_generations (
    raw_table    TEXT NOT NULL,
    params       TEXT NOT NULL,
    generation   TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    PRIMARY KEY (raw_table, params)
);

-- Tool layer: structured records extracted from raw payloads
CREATE TABLE IF NOT EXISTS tool_records (
    connection_id INTEGER NOT NULL,
    record_type   TEXT NOT NULL,
    natural_key   TEXT NOT NULL,
    scope_key     TEXT NOT NULL,
    data          TEXT NOT NULL,
    raw_table     TEXT NOT NULL,
    raw_params    TEXT NOT NULL,
    raw_id        INTEGER,
    PRIMARY KEY (connection_id, record_type, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_tool_records_scope
    ON tool_records(connection_id, record_type, scope_key);
CREATE INDEX IF NOT EXISTS idx_tool_records_raw
    ON tool_records(raw_table, raw_params);

-- Domain layer: canonical cross-source entities
CREATE TABLE IF NOT EXISTS domain_entities (
    entity_type TEXT NOT NULL,
    id          TEXT NOT NULL,
    data        TEXT NOT NULL,
    raw_table   TEXT,
    raw_params  TEXT,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (entity_type, id)
);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    plan_json   TEXT NOT NULL,
    status      TEXT NOT NULL,
    error       TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
