//! libSQL backend — async `ConversationStore` implementation.
//!
//! A single connection sits behind an async mutex: every accessor takes the
//! lock for the duration of its statements, so mutations never interleave.
//! Multi-statement mutators additionally run inside a transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    Contact, ContactUpdate, Direction, Message, NewMessage, Ticket, TicketUpdate,
    TriageState,
};
use crate::store::traits::ConversationStore;

/// libSQL conversation store.
pub struct LibSqlBackend {
    _db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    ///
    /// Failing to create the parent directory is fatal. An unreadable or
    /// corrupt file is moved aside and replaced by an empty store.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let backend = match Self::open(path).await {
            Ok(backend) => backend,
            Err(e) if path.exists() => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Store unreadable, reinitializing empty"
                );
                let moved_to = quarantine(path)?;
                warn!(moved_to = %moved_to.display(), "Corrupt store moved aside");
                Self::open(path).await?
            }
            Err(e) => return Err(e),
        };

        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            _db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }
}

/// Move a corrupt database file (and its WAL side files) out of the way.
fn quarantine(path: &Path) -> Result<PathBuf, DatabaseError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let target = path.with_file_name(format!(
        "{file_name}.corrupt-{}",
        Utc::now().format("%Y%m%d%H%M%S")
    ));

    if let Err(e) = std::fs::rename(path, &target) {
        warn!(error = %e, "Rename of corrupt store failed, deleting it");
        std::fs::remove_file(path).map_err(|e| {
            DatabaseError::Pool(format!("Failed to discard corrupt store: {e}"))
        })?;
    }

    for suffix in ["-wal", "-shm"] {
        let side = path.with_file_name(format!("{file_name}{suffix}"));
        let _ = std::fs::remove_file(side);
    }

    Ok(target)
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width, so text order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Local part of a transport address (`5511999@s.whatsapp.net` -> `5511999`).
fn phone_from_address(id: &str) -> &str {
    id.split('@').next().unwrap_or(id)
}

const TICKET_COLUMNS: &str = "t.id, a.tenant, t.display_name, t.status, t.last_message_text, \
     t.unread_count, t.created_at, t.updated_at";

const TICKET_FROM: &str =
    "FROM tickets t LEFT JOIN tenant_assignments a ON a.conversation_id = t.id";

const MESSAGE_COLUMNS: &str = "id, timestamp, direction, text, author_label";

async fn select_messages(conn: &Connection, id: &str) -> Result<Vec<Message>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC"
            ),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_messages: {e}")))?;

    let mut messages = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("get_messages row: {e}")))?
    {
        messages.push(row_to_message(&row)?);
    }
    Ok(messages)
}

/// Map a libsql Row to a Ticket. Column order matches TICKET_COLUMNS.
fn row_to_ticket(row: &libsql::Row) -> Result<Ticket, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("ticket row: {e}"));

    let status_str: String = row.get(3).map_err(read)?;
    let unread: i64 = row.get(5).map_err(read)?;
    let created_str: String = row.get(6).map_err(read)?;
    let updated_str: String = row.get(7).map_err(read)?;

    Ok(Ticket {
        id: row.get(0).map_err(read)?,
        tenant: row.get::<String>(1).ok(),
        display_name: row.get(2).map_err(read)?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        last_message_text: row.get(4).map_err(read)?,
        unread_count: u32::try_from(unread).unwrap_or(0),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("message row: {e}"));

    let ts_str: String = row.get(1).map_err(read)?;
    let direction_str: String = row.get(2).map_err(read)?;

    Ok(Message {
        id: row.get(0).map_err(read)?,
        timestamp: parse_datetime(&ts_str),
        direction: Direction::from_db(&direction_str),
        text: row.get(3).map_err(read)?,
        author_label: row.get::<String>(4).ok(),
    })
}

// ── Statements shared by several accessors ──────────────────────────

/// Insert-or-touch a ticket row. `activity_seq` breaks ties between
/// tickets touched within the same millisecond.
async fn touch_ticket(
    conn: &Connection,
    id: &str,
    display_name: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tickets (id, display_name, status, last_message_text, unread_count,
                created_at, updated_at, activity_seq)
         VALUES (?1, COALESCE(?2, ?1), 'open', '', 0, ?3, ?3,
                (SELECT COALESCE(MAX(activity_seq), 0) + 1 FROM tickets))
         ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                activity_seq = excluded.activity_seq,
                display_name = COALESCE(?2, tickets.display_name)",
        params![id, opt_text(display_name), now],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("touch_ticket: {e}")))?;
    Ok(())
}

async fn select_ticket(conn: &Connection, id: &str) -> Result<Option<Ticket>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {TICKET_COLUMNS} {TICKET_FROM} WHERE t.id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_ticket: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row_to_ticket(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_ticket row: {e}"))),
    }
}

async fn select_tag(conn: &Connection, id: &str) -> Result<TriageState, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT tag FROM tags WHERE conversation_id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_tag: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(TriageState::from(row.get::<String>(0).ok())),
        Ok(None) => Ok(TriageState::Untagged),
        Err(e) => Err(DatabaseError::Query(format!("get_tag row: {e}"))),
    }
}

async fn select_tenant(conn: &Connection, id: &str) -> Result<Option<String>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT tenant FROM tenant_assignments WHERE conversation_id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_tenant: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_tenant row: {e}"))),
    }
}

async fn select_contact(conn: &Connection, id: &str) -> Result<Option<Contact>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT c.conversation_id, c.phone, c.display_name, c.avatar_url, a.tenant, g.tag
             FROM contacts c
             LEFT JOIN tenant_assignments a ON a.conversation_id = c.conversation_id
             LEFT JOIN tags g ON g.conversation_id = c.conversation_id
             WHERE c.conversation_id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_contact: {e}")))?;

    let row = match rows.next().await {
        Ok(Some(row)) => row,
        Ok(None) => return Ok(None),
        Err(e) => return Err(DatabaseError::Query(format!("get_contact row: {e}"))),
    };
    let read = |e: libsql::Error| DatabaseError::Query(format!("contact row: {e}"));

    Ok(Some(Contact {
        conversation_id: row.get(0).map_err(read)?,
        phone: row.get(1).map_err(read)?,
        display_name: row.get::<String>(2).ok(),
        avatar_url: row.get::<String>(3).ok(),
        tenant: row.get::<String>(4).ok(),
        tag: TriageState::from(row.get::<String>(5).ok()),
    }))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ConversationStore for LibSqlBackend {
    async fn upsert_ticket(&self, id: &str, update: TicketUpdate) -> Result<Ticket, DatabaseError> {
        let conn = self.conn.lock().await;
        let now = format_datetime(&Utc::now());
        touch_ticket(&conn, id, update.display_name.as_deref(), &now).await?;

        select_ticket(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::Query(format!("ticket {id} vanished after upsert")))
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_ticket(&conn, id).await
    }

    async fn list_tickets(&self, tenant: Option<&str>) -> Result<Vec<Ticket>, DatabaseError> {
        let conn = self.conn.lock().await;
        let order = "ORDER BY t.updated_at DESC, t.activity_seq DESC";

        let mut rows = match tenant {
            Some(tenant) => conn
                .query(
                    &format!("SELECT {TICKET_COLUMNS} {TICKET_FROM} WHERE a.tenant = ?1 {order}"),
                    params![tenant],
                )
                .await,
            None => conn
                .query(&format!("SELECT {TICKET_COLUMNS} {TICKET_FROM} {order}"), ())
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_tickets: {e}")))?;

        let mut tickets = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tickets row: {e}")))?
        {
            tickets.push(row_to_ticket(&row)?);
        }
        Ok(tickets)
    }

    async fn mark_read(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tickets SET unread_count = 0 WHERE id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("mark_read: {e}")))?;
        Ok(())
    }

    async fn close_ticket(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "UPDATE tickets SET status = 'closed' WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("close_ticket: {e}")))?;

        if affected > 0 {
            debug!(conversation_id = id, "Ticket closed");
        }
        Ok(affected > 0)
    }

    async fn append_message(
        &self,
        id: &str,
        message: NewMessage,
    ) -> Result<Message, DatabaseError> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let now_str = format_datetime(&now);
        let message = message.into_message(now);
        let unread_increment: i64 = match message.direction {
            Direction::In => 1,
            Direction::Out => 0,
        };

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message begin: {e}")))?;

        touch_ticket(&tx, id, None, &now_str).await?;

        tx.execute(
            "INSERT INTO messages (id, conversation_id, timestamp, direction, text, author_label)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.as_str(),
                id,
                format_datetime(&message.timestamp),
                message.direction.as_str(),
                message.text.as_str(),
                opt_text(message.author_label.as_deref()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_message insert: {e}")))?;

        tx.execute(
            "UPDATE tickets
             SET last_message_text = ?2, updated_at = ?3, unread_count = unread_count + ?4
             WHERE id = ?1",
            params![id, message.text.as_str(), now_str.as_str(), unread_increment],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_message ticket: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message commit: {e}")))?;

        debug!(
            conversation_id = id,
            message_id = %message.id,
            direction = message.direction.as_str(),
            "Message appended"
        );
        Ok(message)
    }

    async fn get_messages(&self, id: &str) -> Result<Vec<Message>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_messages(&conn, id).await
    }

    async fn read_messages(&self, id: &str) -> Result<Vec<Message>, DatabaseError> {
        // One lock for both steps: an append cannot land between them.
        let conn = self.conn.lock().await;
        let messages = select_messages(&conn, id).await?;
        conn.execute(
            "UPDATE tickets SET unread_count = 0 WHERE id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("read_messages: {e}")))?;
        Ok(messages)
    }

    async fn set_human_mode(&self, id: &str, enabled: bool) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO human_modes (conversation_id, enabled) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET enabled = excluded.enabled",
            params![id, enabled as i64],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_human_mode: {e}")))?;
        Ok(enabled)
    }

    async fn is_human_mode(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT enabled FROM human_modes WHERE conversation_id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_human_mode: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) != 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_human_mode row: {e}"))),
        }
    }

    async fn set_tag(&self, id: &str, tag: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tags (conversation_id, tag) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET tag = excluded.tag",
            params![id, tag],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_tag: {e}")))?;
        Ok(())
    }

    async fn assign_tag_once(&self, id: &str, tag: &str) -> Result<TriageState, DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tags (conversation_id, tag) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO NOTHING",
            params![id, tag],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("assign_tag_once: {e}")))?;
        select_tag(&conn, id).await
    }

    async fn clear_tag(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM tags WHERE conversation_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_tag: {e}")))?;
        Ok(())
    }

    async fn get_tag(&self, id: &str) -> Result<TriageState, DatabaseError> {
        let conn = self.conn.lock().await;
        select_tag(&conn, id).await
    }

    async fn assign_tenant_once(&self, id: &str, tenant: &str) -> Result<String, DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tenant_assignments (conversation_id, tenant, assigned_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO NOTHING",
            params![id, tenant, format_datetime(&Utc::now())],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("assign_tenant_once: {e}")))?;

        select_tenant(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::Query(format!("tenant for {id} vanished after insert")))
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_tenant(&conn, id).await
    }

    async fn upsert_contact(
        &self,
        id: &str,
        update: ContactUpdate,
    ) -> Result<Contact, DatabaseError> {
        let conn = self.conn.lock().await;
        let initial_phone = update
            .phone
            .clone()
            .unwrap_or_else(|| phone_from_address(id).to_string());

        conn.execute(
            "INSERT INTO contacts (conversation_id, phone, display_name, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id) DO UPDATE SET
                phone = COALESCE(?6, contacts.phone),
                display_name = COALESCE(excluded.display_name, contacts.display_name),
                avatar_url = COALESCE(excluded.avatar_url, contacts.avatar_url),
                updated_at = excluded.updated_at",
            params![
                id,
                initial_phone,
                opt_text(update.display_name.as_deref()),
                opt_text(update.avatar_url.as_deref()),
                format_datetime(&Utc::now()),
                opt_text(update.phone.as_deref()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_contact: {e}")))?;

        select_contact(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::Query(format!("contact {id} vanished after upsert")))
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_contact(&conn, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::TicketStatus;

    const ANA: &str = "5511999990001@s.whatsapp.net";
    const BIA: &str = "5511999990002@s.whatsapp.net";

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    // ── Ticket tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_creates_open_ticket() {
        let db = test_db().await;
        let ticket = db.upsert_ticket(ANA, TicketUpdate::default()).await.unwrap();

        assert_eq!(ticket.id, ANA);
        assert_eq!(ticket.display_name, ANA);
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.unread_count, 0);
        assert_eq!(ticket.last_message_text, "");
        assert_eq!(ticket.created_at, ticket.updated_at);
    }

    #[tokio::test]
    async fn upsert_updates_name_and_keeps_created_at() {
        let db = test_db().await;
        let first = db.upsert_ticket(ANA, TicketUpdate::default()).await.unwrap();
        let second = db.upsert_ticket(ANA, TicketUpdate::named("Ana")).await.unwrap();

        assert_eq!(second.display_name, "Ana");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        // Omitting the name keeps the stored one.
        let third = db.upsert_ticket(ANA, TicketUpdate::default()).await.unwrap();
        assert_eq!(third.display_name, "Ana");
        assert_eq!(db.list_tickets(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_missing_ticket() {
        let db = test_db().await;
        assert!(db.get_ticket(ANA).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let db = test_db().await;
        assert!(!db.close_ticket(ANA).await.unwrap());

        db.upsert_ticket(ANA, TicketUpdate::default()).await.unwrap();
        assert!(db.close_ticket(ANA).await.unwrap());
        assert!(db.close_ticket(ANA).await.unwrap());

        let ticket = db.get_ticket(ANA).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);

        // New traffic does not reopen a closed ticket.
        db.append_message(ANA, NewMessage::inbound("oi de novo")).await.unwrap();
        let ticket = db.get_ticket(ANA).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);
    }

    // ── Message tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn append_is_monotonic() {
        let db = test_db().await;
        for i in 0..5 {
            db.append_message(ANA, NewMessage::inbound(format!("msg {i}")))
                .await
                .unwrap();
        }

        let messages = db.get_messages(ANA).await.unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);

        let ticket = db.get_ticket(ANA).await.unwrap().unwrap();
        assert_eq!(ticket.last_message_text, "msg 4");
    }

    #[tokio::test]
    async fn append_returns_stored_message() {
        let db = test_db().await;
        let stored = db
            .append_message(ANA, NewMessage::outbound("bom dia", Some("Ana".into())))
            .await
            .unwrap();

        assert!(!stored.id.is_empty());
        assert_eq!(stored.direction, Direction::Out);

        let messages = db.get_messages(ANA).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, stored.id);
        assert_eq!(messages[0].author_label.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn get_messages_empty_for_unknown() {
        let db = test_db().await;
        assert!(db.get_messages(BIA).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unread_counts_inbound_since_mark_read() {
        let db = test_db().await;
        db.append_message(ANA, NewMessage::inbound("1")).await.unwrap();
        db.append_message(ANA, NewMessage::outbound("2", None)).await.unwrap();
        db.append_message(ANA, NewMessage::inbound("3")).await.unwrap();
        assert_eq!(db.get_ticket(ANA).await.unwrap().unwrap().unread_count, 2);

        db.mark_read(ANA).await.unwrap();
        assert_eq!(db.get_ticket(ANA).await.unwrap().unwrap().unread_count, 0);

        db.append_message(ANA, NewMessage::inbound("4")).await.unwrap();
        assert_eq!(db.get_ticket(ANA).await.unwrap().unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn read_messages_returns_log_and_clears_unread() {
        let db = test_db().await;
        db.append_message(ANA, NewMessage::inbound("a")).await.unwrap();

        let seen = db.read_messages(ANA).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(db.get_ticket(ANA).await.unwrap().unwrap().unread_count, 0);

        db.append_message(ANA, NewMessage::inbound("b")).await.unwrap();
        assert_eq!(db.get_ticket(ANA).await.unwrap().unwrap().unread_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unread_matches_messages_not_yet_read() {
        let db = Arc::new(test_db().await);
        db.append_message(ANA, NewMessage::inbound("0")).await.unwrap();

        let writer = {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                for i in 1..=40 {
                    db.append_message(ANA, NewMessage::inbound(i.to_string()))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let reader = {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                let mut last_seen = 0;
                for _ in 0..40 {
                    last_seen = db.read_messages(ANA).await.unwrap().len();
                    tokio::task::yield_now().await;
                }
                last_seen
            })
        };
        writer.await.unwrap();
        let last_seen = reader.await.unwrap();

        let total = db.get_messages(ANA).await.unwrap().len();
        let unread = db.get_ticket(ANA).await.unwrap().unwrap().unread_count as usize;
        assert_eq!(total, 41);
        assert_eq!(unread, total - last_seen);
    }

    #[tokio::test]
    async fn mark_read_missing_is_noop() {
        let db = test_db().await;
        db.mark_read(ANA).await.unwrap();
        assert!(db.get_ticket(ANA).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let db = test_db().await;
        let carla = "5511999990003@s.whatsapp.net";

        db.upsert_ticket(ANA, TicketUpdate::default()).await.unwrap();
        db.upsert_ticket(BIA, TicketUpdate::default()).await.unwrap();
        db.upsert_ticket(carla, TicketUpdate::default()).await.unwrap();
        db.append_message(ANA, NewMessage::inbound("oi")).await.unwrap();
        db.upsert_ticket(BIA, TicketUpdate::default()).await.unwrap();

        let ids: Vec<String> = db
            .list_tickets(None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![BIA.to_string(), ANA.to_string(), carla.to_string()]);

        let tickets = db.list_tickets(None).await.unwrap();
        for pair in tickets.windows(2) {
            assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }

    // ── Human mode & tags ───────────────────────────────────────────

    #[tokio::test]
    async fn human_mode_defaults_false() {
        let db = test_db().await;
        assert!(!db.is_human_mode(ANA).await.unwrap());

        assert!(db.set_human_mode(ANA, true).await.unwrap());
        assert!(db.is_human_mode(ANA).await.unwrap());

        assert!(!db.set_human_mode(ANA, false).await.unwrap());
        assert!(!db.is_human_mode(ANA).await.unwrap());
    }

    #[tokio::test]
    async fn assign_tag_once_keeps_first_tag() {
        let db = test_db().await;
        assert_eq!(db.get_tag(ANA).await.unwrap(), TriageState::Untagged);

        let state = db.assign_tag_once(ANA, "cursos").await.unwrap();
        assert_eq!(state, TriageState::Tagged("cursos".into()));

        let state = db.assign_tag_once(ANA, "vendas").await.unwrap();
        assert_eq!(state, TriageState::Tagged("cursos".into()));
        assert_eq!(db.get_tag(ANA).await.unwrap(), TriageState::Tagged("cursos".into()));
    }

    #[tokio::test]
    async fn operator_can_retag_and_clear() {
        let db = test_db().await;
        db.assign_tag_once(ANA, "cursos").await.unwrap();

        db.set_tag(ANA, "financeiro").await.unwrap();
        assert_eq!(db.get_tag(ANA).await.unwrap().tag(), Some("financeiro"));

        db.clear_tag(ANA).await.unwrap();
        assert_eq!(db.get_tag(ANA).await.unwrap(), TriageState::Untagged);

        let state = db.assign_tag_once(ANA, "suporte").await.unwrap();
        assert_eq!(state.tag(), Some("suporte"));
    }

    // ── Tenants & contacts ──────────────────────────────────────────

    #[tokio::test]
    async fn tenant_assignment_is_immutable() {
        let db = test_db().await;
        assert_eq!(db.get_tenant(ANA).await.unwrap(), None);

        assert_eq!(db.assign_tenant_once(ANA, "alef").await.unwrap(), "alef");
        assert_eq!(db.assign_tenant_once(ANA, "efcol").await.unwrap(), "alef");
        assert_eq!(db.get_tenant(ANA).await.unwrap().as_deref(), Some("alef"));
    }

    #[tokio::test]
    async fn list_scoped_by_tenant() {
        let db = test_db().await;
        db.assign_tenant_once(ANA, "alef").await.unwrap();
        db.assign_tenant_once(BIA, "efcol").await.unwrap();
        db.append_message(ANA, NewMessage::inbound("oi")).await.unwrap();
        db.append_message(BIA, NewMessage::inbound("ola")).await.unwrap();

        let alef = db.list_tickets(Some("alef")).await.unwrap();
        assert_eq!(alef.len(), 1);
        assert_eq!(alef[0].id, ANA);
        assert_eq!(alef[0].tenant.as_deref(), Some("alef"));

        let efcol = db.list_tickets(Some("efcol")).await.unwrap();
        assert_eq!(efcol.len(), 1);
        assert_eq!(efcol[0].id, BIA);

        assert!(db.list_tickets(Some("sejaprofeta")).await.unwrap().is_empty());
        assert_eq!(db.list_tickets(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn contact_merges_updates() {
        let db = test_db().await;
        let contact = db
            .upsert_contact(
                ANA,
                ContactUpdate {
                    display_name: Some("Ana".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(contact.phone, "5511999990001");
        assert_eq!(contact.display_name.as_deref(), Some("Ana"));
        assert_eq!(contact.avatar_url, None);

        db.assign_tenant_once(ANA, "alef").await.unwrap();
        db.assign_tag_once(ANA, "seminarios").await.unwrap();

        let contact = db
            .upsert_contact(
                ANA,
                ContactUpdate {
                    avatar_url: Some("https://pps.example/ana.jpg".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(contact.display_name.as_deref(), Some("Ana"));
        assert_eq!(contact.avatar_url.as_deref(), Some("https://pps.example/ana.jpg"));
        assert_eq!(contact.tenant.as_deref(), Some("alef"));
        assert_eq!(contact.tag, TriageState::Tagged("seminarios".into()));

        assert!(db.get_contact(BIA).await.unwrap().is_none());
    }

    // ── Persistence ─────────────────────────────────────────────────

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("wadesk.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.append_message(ANA, NewMessage::inbound("oi")).await.unwrap();
            db.set_human_mode(ANA, true).await.unwrap();
            db.assign_tag_once(ANA, "cursos").await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let tickets = db.list_tickets(None).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].unread_count, 1);
        assert_eq!(db.get_messages(ANA).await.unwrap().len(), 1);
        assert!(db.is_human_mode(ANA).await.unwrap());
        assert_eq!(db.get_tag(ANA).await.unwrap().tag(), Some("cursos"));
    }

    #[tokio::test]
    async fn corrupt_file_reinitializes_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wadesk.db");
        std::fs::write(&path, "{ this is not a database ".repeat(200)).unwrap();

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.list_tickets(None).await.unwrap().is_empty());

        db.upsert_ticket(ANA, TicketUpdate::named("Ana")).await.unwrap();
        drop(db);

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let tickets = db.list_tickets(None).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].display_name, "Ana");

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }

    #[tokio::test]
    async fn directory_creation_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let result = LibSqlBackend::new_local(&blocker.join("wadesk.db")).await;
        assert!(matches!(result, Err(DatabaseError::Pool(_))));
    }
}
