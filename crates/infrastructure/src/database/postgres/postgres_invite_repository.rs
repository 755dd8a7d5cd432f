use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use watertruck_domain::{DispatchResult, Invite, InviteRepository};

const INVITE_COLUMNS: &str = "id, operator_id, token, used, truck_id, created_at, used_at";

pub struct PostgresInviteRepository {
    pool: PgPool,
}

impl PostgresInviteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_invite(row: &sqlx::postgres::PgRow) -> DispatchResult<Invite> {
        Ok(Invite {
            id: row.try_get("id")?,
            operator_id: row.try_get("operator_id")?,
            token: row.try_get("token")?,
            used: row.try_get("used")?,
            truck_id: row.try_get("truck_id")?,
            created_at: row.try_get("created_at")?,
            used_at: row.try_get("used_at")?,
        })
    }
}

#[async_trait]
impl InviteRepository for PostgresInviteRepository {
    #[instrument(skip(self, token))]
    async fn create(&self, operator_id: i64, token: &str) -> DispatchResult<Invite> {
        let row = sqlx::query(&format!(
            "INSERT INTO invites (operator_id, token) VALUES ($1, $2) RETURNING {INVITE_COLUMNS}"
        ))
        .bind(operator_id)
        .bind(token)
        .fetch_one(&self.pool)
        .await?;

        let invite = Self::row_to_invite(&row)?;
        debug!("创建邀请成功: ID {}", invite.id);
        Ok(invite)
    }

    async fn find_by_token(&self, token: &str) -> DispatchResult<Option<Invite>> {
        let row = sqlx::query(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_invite).transpose()
    }

    #[instrument(skip(self))]
    async fn mark_used(&self, id: i64, truck_id: i64) -> DispatchResult<bool> {
        // used是一次性标记，条件更新防止并发重复核销
        let result = sqlx::query(
            "UPDATE invites SET used = TRUE, truck_id = $1, used_at = NOW() \
             WHERE id = $2 AND used = FALSE",
        )
        .bind(truck_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
