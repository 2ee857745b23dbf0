//! PostgreSQL store backend

use async_trait::async_trait;
use sqlx::{FromRow, PgConnection, PgPool};
use supportchat_shared::{
    Message, NewMessage, Page, Role, SenderType, SummaryUpdate, Thread, ThreadFilter, UnreadDelta,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{summary_for, ChatStore, StoreError, StoreResult};

const THREAD_COLUMNS: &str = "id, customer_id, last_message_text, last_message_at, \
     unread_for_admin, unread_for_customer, created_at";

const MESSAGE_COLUMNS: &str = "id, thread_id, sender_type, sender_id, text, image_url, created_at";

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: Uuid,
    customer_id: Uuid,
    last_message_text: Option<String>,
    last_message_at: Option<OffsetDateTime>,
    unread_for_admin: i32,
    unread_for_customer: i32,
    created_at: OffsetDateTime,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Thread {
            id: row.id,
            customer_id: row.customer_id,
            last_message_text: row.last_message_text,
            last_message_at: row.last_message_at,
            unread_for_admin: row.unread_for_admin,
            unread_for_customer: row.unread_for_customer,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    thread_id: Uuid,
    sender_type: String,
    sender_id: Uuid,
    text: Option<String>,
    image_url: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sender_type: SenderType = row
            .sender_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("corrupt message row {}: {e}", row.id)))?;
        Ok(Message {
            id: row.id,
            thread_id: row.thread_id,
            sender_type,
            sender_id: row.sender_id,
            text: row.text,
            image_url: row.image_url,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// PostgreSQL-backed [`ChatStore`]
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_message_row(conn: &mut PgConnection, new: NewMessage) -> StoreResult<Message> {
    let message = new.into_message(OffsetDateTime::now_utc());
    let row: MessageRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO chat_messages (id, thread_id, sender_type, sender_id, text, image_url, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(message.id)
    .bind(message.thread_id)
    .bind(message.sender_type.as_str())
    .bind(message.sender_id)
    .bind(&message.text)
    .bind(&message.image_url)
    .bind(message.created_at)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

async fn apply_summary(
    conn: &mut PgConnection,
    thread_id: Uuid,
    update: &SummaryUpdate,
) -> StoreResult<Thread> {
    let row: Option<ThreadRow> = sqlx::query_as(&format!(
        r#"
        UPDATE chat_threads
        SET last_message_text = $2,
            last_message_at = $3,
            unread_for_admin = unread_for_admin + $4,
            unread_for_customer = unread_for_customer + $5
        WHERE id = $1
        RETURNING {THREAD_COLUMNS}
        "#
    ))
    .bind(thread_id)
    .bind(&update.last_text)
    .bind(update.last_at)
    .bind(update.unread.for_admin)
    .bind(update.unread.for_customer)
    .fetch_optional(conn)
    .await?;

    row.map(Into::into).ok_or(StoreError::NotFound)
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_thread(&self, customer_id: Uuid) -> StoreResult<Thread> {
        let thread = Thread::new(customer_id);
        let row: ThreadRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO chat_threads (id, customer_id, created_at)
            VALUES ($1, $2, $3)
            RETURNING {THREAD_COLUMNS}
            "#
        ))
        .bind(thread.id)
        .bind(thread.customer_id)
        .bind(thread.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_thread(&self, thread_id: Uuid) -> StoreResult<Thread> {
        let row: Option<ThreadRow> = sqlx::query_as(&format!(
            "SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id = $1"
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    async fn list_threads(&self, filter: ThreadFilter, page: Page) -> StoreResult<Vec<Thread>> {
        let sql = if filter.canonical_only {
            format!(
                r#"
                SELECT {THREAD_COLUMNS}
                FROM (
                    SELECT DISTINCT ON (customer_id) {THREAD_COLUMNS}
                    FROM chat_threads
                    WHERE ($1::uuid IS NULL OR customer_id = $1)
                    ORDER BY customer_id, COALESCE(last_message_at, created_at) DESC, id DESC
                ) canonical
                ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC
                LIMIT $2 OFFSET $3
                "#
            )
        } else {
            format!(
                r#"
                SELECT {THREAD_COLUMNS}
                FROM chat_threads
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC
                LIMIT $2 OFFSET $3
                "#
            )
        };

        let rows: Vec<ThreadRow> = sqlx::query_as(&sql)
            .bind(filter.customer_id)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut conn = self.pool.acquire().await?;
        insert_message_row(&mut conn, new).await
    }

    async fn list_messages(&self, thread_id: Uuid) -> StoreResult<Vec<Message>> {
        // Distinguish "no messages yet" from "no such thread"
        self.get_thread(thread_id).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE thread_id = $1 ORDER BY seq ASC"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn upsert_thread_summary(
        &self,
        thread_id: Uuid,
        update: SummaryUpdate,
    ) -> StoreResult<Thread> {
        let mut conn = self.pool.acquire().await?;
        apply_summary(&mut conn, thread_id, &update).await
    }

    async fn append_message(
        &self,
        new: NewMessage,
        unread: UnreadDelta,
    ) -> StoreResult<(Message, Thread)> {
        let mut tx = self.pool.begin().await?;

        let message = insert_message_row(&mut tx, new).await?;
        let thread = apply_summary(&mut tx, message.thread_id, &summary_for(&message, unread)).await?;

        tx.commit().await?;

        tracing::debug!(
            thread_id = %message.thread_id,
            message_id = %message.id,
            "Message appended"
        );
        Ok((message, thread))
    }

    async fn reset_unread(&self, thread_id: Uuid, side: Role) -> StoreResult<Thread> {
        let column = match side {
            Role::Admin => "unread_for_admin",
            Role::Customer => "unread_for_customer",
        };
        let row: Option<ThreadRow> = sqlx::query_as(&format!(
            "UPDATE chat_threads SET {column} = 0 WHERE id = $1 RETURNING {THREAD_COLUMNS}"
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    async fn sum_unread_for_admin(&self) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(unread_for_admin), 0)::BIGINT
            FROM (
                SELECT DISTINCT ON (customer_id) unread_for_admin
                FROM chat_threads
                ORDER BY customer_id, COALESCE(last_message_at, created_at) DESC, id DESC
            ) canonical
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn delete_thread_cascade(&self, thread_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chat_messages WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM chat_threads WHERE id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
