use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use watertruck_domain::{DispatchResult, Operator, OperatorMode, OperatorRepository};

const OPERATOR_COLUMNS: &str = "id, user_id, mode, service_area, created_at, updated_at";

pub struct PostgresOperatorRepository {
    pool: PgPool,
}

impl PostgresOperatorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_operator(row: &sqlx::postgres::PgRow) -> DispatchResult<Operator> {
        Ok(Operator {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            mode: row.try_get("mode")?,
            service_area: row.try_get("service_area")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OperatorRepository for PostgresOperatorRepository {
    #[instrument(skip(self))]
    async fn create(
        &self,
        user_id: i64,
        mode: OperatorMode,
        service_area: Option<&str>,
    ) -> DispatchResult<Operator> {
        let row = sqlx::query(&format!(
            "INSERT INTO operators (user_id, mode, service_area) \
             VALUES ($1, $2, $3) RETURNING {OPERATOR_COLUMNS}"
        ))
        .bind(user_id)
        .bind(mode)
        .bind(service_area)
        .fetch_one(&self.pool)
        .await?;

        let operator = Self::row_to_operator(&row)?;
        debug!("创建运营商成功: ID {}", operator.id);
        Ok(operator)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Operator>> {
        let row = sqlx::query(&format!(
            "SELECT {OPERATOR_COLUMNS} FROM operators WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_operator).transpose()
    }

    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Operator>> {
        let row = sqlx::query(&format!(
            "SELECT {OPERATOR_COLUMNS} FROM operators WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_operator).transpose()
    }

    async fn update_mode(&self, id: i64, mode: OperatorMode) -> DispatchResult<()> {
        sqlx::query("UPDATE operators SET mode = $1, updated_at = NOW() WHERE id = $2")
            .bind(mode)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_service_area(&self, id: i64, service_area: &str) -> DispatchResult<()> {
        sqlx::query("UPDATE operators SET service_area = $1, updated_at = NOW() WHERE id = $2")
            .bind(service_area)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn truck_count(&self, id: i64) -> DispatchResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trucks WHERE operator_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
