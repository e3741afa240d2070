//! Schema versions for the libSQL backend.
//!
//! Versions are recorded in `schema_versions`. On open, every version above
//! the recorded maximum is applied in order, each one in its own transaction
//! together with its bookkeeping row, so a crash never leaves a half-applied
//! step behind. Statements use `IF NOT EXISTS`, so older files upgrade in place.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only; never edit a released version.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                last_message_text TEXT NOT NULL DEFAULT '',
                unread_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                activity_seq INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_activity
                ON tickets(updated_at DESC, activity_seq DESC);

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                direction TEXT NOT NULL,
                text TEXT NOT NULL,
                author_label TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, seq);

            CREATE TABLE IF NOT EXISTS human_modes (
                conversation_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tags (
                conversation_id TEXT PRIMARY KEY,
                tag TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "tenants_and_contacts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tenant_assignments (
                conversation_id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                assigned_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tenant_assignments_tenant
                ON tenant_assignments(tenant);

            CREATE TABLE IF NOT EXISTS contacts (
                conversation_id TEXT PRIMARY KEY,
                phone TEXT NOT NULL,
                display_name TEXT,
                avatar_url TEXT,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_versions (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

fn migration_error(context: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(VERSION_TABLE)
        .await
        .map_err(|e| migration_error("creating schema_versions", e))?;

    let applied = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Upgrading schema");
        apply(conn, step).await?;
    }
    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), DatabaseError> {
    let context = format!("schema V{} ({})", step.version, step.name);
    let tx = conn
        .transaction()
        .await
        .map_err(|e| migration_error(&context, e))?;

    tx.execute_batch(step.sql)
        .await
        .map_err(|e| migration_error(&context, e))?;
    tx.execute(
        "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await
    .map_err(|e| migration_error(&context, e))?;

    tx.commit().await.map_err(|e| migration_error(&context, e))
}

/// Highest recorded version; 0 for a fresh file.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_versions", ())
        .await
        .map_err(|e| migration_error("reading schema version", e))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| migration_error("reading schema version", e))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| migration_error("decoding schema version", e))
}
