use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use watertruck_domain::{DispatchResult, User, UserPatch, UserRepository};

const USER_COLUMNS: &str =
    "id, device_token, name, phone, email, role, created_at, updated_at";

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &sqlx::postgres::PgRow) -> DispatchResult<User> {
        Ok(User {
            id: row.try_get("id")?,
            device_token: row.try_get("device_token")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self))]
    async fn create(&self, device_token: &str) -> DispatchResult<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (device_token) VALUES ($1) RETURNING {USER_COLUMNS}"
        ))
        .bind(device_token)
        .fetch_one(&self.pool)
        .await?;

        let user = Self::row_to_user(&row)?;
        debug!("创建用户成功: ID {}", user.id);
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_by_device_token(&self, device_token: &str) -> DispatchResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE device_token = $1"
        ))
        .bind(device_token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    #[instrument(skip(self, patch), fields(user_id = %id))]
    async fn update(&self, id: i64, patch: &UserPatch) -> DispatchResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE users SET
                name = COALESCE($1, name),
                phone = COALESCE($2, phone),
                email = COALESCE($3, email),
                role = COALESCE($4, role),
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(patch.name.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.role)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn email_in_use(&self, email: &str, exclude_user_id: i64) -> DispatchResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE email = $1 AND id <> $2")
            .bind(email)
            .bind(exclude_user_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count > 0)
    }
}
