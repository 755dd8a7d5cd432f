use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use watertruck_domain::{DispatchResult, NotificationQueueEntry, NotificationQueueRepository};

pub struct PostgresNotificationQueueRepository {
    pool: PgPool,
}

impl PostgresNotificationQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> DispatchResult<NotificationQueueEntry> {
        Ok(NotificationQueueEntry {
            user_id: row.try_get("user_id")?,
            customer_count: row.try_get("customer_count")?,
            last_customer_at: row.try_get("last_customer_at")?,
            last_notified_at: row.try_get("last_notified_at")?,
        })
    }
}

#[async_trait]
impl NotificationQueueRepository for PostgresNotificationQueueRepository {
    #[instrument(skip(self))]
    async fn increment(&self, user_id: i64) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue (user_id, customer_count, last_customer_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                customer_count = notification_queue.customer_count + 1,
                last_customer_at = NOW()
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_entries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DispatchResult<Vec<NotificationQueueEntry>> {
        let rows = sqlx::query(
            "SELECT user_id, customer_count, last_customer_at, last_notified_at \
             FROM notification_queue \
             WHERE last_notified_at IS NULL OR last_notified_at <= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn mark_notified(&self, user_id: i64) -> DispatchResult<()> {
        sqlx::query(
            "UPDATE notification_queue \
             SET customer_count = 0, last_notified_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
