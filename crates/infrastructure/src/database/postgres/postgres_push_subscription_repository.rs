use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use watertruck_domain::{DispatchResult, PushSubscription, PushSubscriptionRepository};

pub struct PostgresPushSubscriptionRepository {
    pool: PgPool,
}

impl PostgresPushSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushSubscriptionRepository for PostgresPushSubscriptionRepository {
    #[instrument(skip(self, endpoint, p256dh, auth))]
    async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO push_subscriptions (user_id, endpoint, p256dh, auth)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                endpoint = EXCLUDED.endpoint,
                p256dh = EXCLUDED.p256dh,
                auth = EXCLUDED.auth,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(p256dh)
        .bind(auth)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: i64) -> DispatchResult<Option<PushSubscription>> {
        let row = sqlx::query(
            "SELECT user_id, endpoint, p256dh, auth, created_at, updated_at \
             FROM push_subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PushSubscription {
                user_id: row.try_get("user_id")?,
                endpoint: row.try_get("endpoint")?,
                p256dh: row.try_get("p256dh")?,
                auth: row.try_get("auth")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}
