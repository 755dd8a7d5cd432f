use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use watertruck_domain::{
    DispatchResult, GeoPoint, OperatorMode, Truck, TruckPatch, TruckRepository, TruckWithQueue,
};

const TRUCK_COLUMNS: &str = "id, user_id, operator_id, name, phone, capacity_gallons, \
     price_fixed, avg_job_minutes, is_active, last_seen_at, current_lat, current_lng, \
     location_updated_at, created_at, updated_at";

pub struct PostgresTruckRepository {
    pool: PgPool,
}

impl PostgresTruckRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_truck(row: &sqlx::postgres::PgRow) -> DispatchResult<Truck> {
        Ok(Truck {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            operator_id: row.try_get("operator_id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            capacity_gallons: row.try_get("capacity_gallons")?,
            price_fixed: row.try_get("price_fixed")?,
            avg_job_minutes: row.try_get("avg_job_minutes")?,
            is_active: row.try_get("is_active")?,
            last_seen_at: row.try_get("last_seen_at")?,
            current_lat: row.try_get("current_lat")?,
            current_lng: row.try_get("current_lng")?,
            location_updated_at: row.try_get("location_updated_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TruckRepository for PostgresTruckRepository {
    #[instrument(skip(self))]
    async fn create(
        &self,
        user_id: i64,
        operator_id: Option<i64>,
        avg_job_minutes: i32,
    ) -> DispatchResult<Truck> {
        let row = sqlx::query(&format!(
            "INSERT INTO trucks (user_id, operator_id, avg_job_minutes) \
             VALUES ($1, $2, $3) RETURNING {TRUCK_COLUMNS}"
        ))
        .bind(user_id)
        .bind(operator_id)
        .bind(avg_job_minutes)
        .fetch_one(&self.pool)
        .await?;

        let truck = Self::row_to_truck(&row)?;
        debug!("创建水车成功: ID {}", truck.id);
        Ok(truck)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Truck>> {
        let row = sqlx::query(&format!("SELECT {TRUCK_COLUMNS} FROM trucks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_truck).transpose()
    }

    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Truck>> {
        let row = sqlx::query(&format!(
            "SELECT {TRUCK_COLUMNS} FROM trucks WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_truck).transpose()
    }

    async fn find_by_operator_id(&self, operator_id: i64) -> DispatchResult<Vec<Truck>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRUCK_COLUMNS} FROM trucks WHERE operator_id = $1 ORDER BY name"
        ))
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_truck).collect()
    }

    #[instrument(skip(self, patch), fields(truck_id = %id))]
    async fn update(&self, id: i64, patch: &TruckPatch) -> DispatchResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE trucks SET
                name = COALESCE($1, name),
                phone = COALESCE($2, phone),
                capacity_gallons = COALESCE($3, capacity_gallons),
                price_fixed = COALESCE($4, price_fixed),
                avg_job_minutes = COALESCE($5, avg_job_minutes),
                is_active = COALESCE($6, is_active),
                updated_at = NOW()
            WHERE id = $7
            "#,
        )
        .bind(patch.name.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.capacity_gallons)
        .bind(patch.price_fixed)
        .bind(patch.avg_job_minutes)
        .bind(patch.is_active)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_operator(&self, truck_id: i64, operator_id: i64) -> DispatchResult<()> {
        sqlx::query("UPDATE trucks SET operator_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(operator_id)
            .bind(truck_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_last_seen(&self, id: i64) -> DispatchResult<()> {
        sqlx::query("UPDATE trucks SET last_seen_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_location(&self, id: i64, point: GeoPoint) -> DispatchResult<()> {
        sqlx::query(
            "UPDATE trucks SET current_lat = $1, current_lng = $2, \
             location_updated_at = NOW(), last_seen_at = NOW() WHERE id = $3",
        )
        .bind(point.lat)
        .bind(point.lng)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64> {
        let result = sqlx::query(
            "UPDATE trucks SET is_active = FALSE \
             WHERE is_active = TRUE AND last_seen_at IS NOT NULL AND last_seen_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_available(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<TruckWithQueue>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT t.*, o.mode AS operator_mode,
                (
                    SELECT COUNT(*)
                    FROM jobs j
                    WHERE j.truck_id = t.id
                    AND j.status IN ('accepted', 'en_route')
                ) AS queue_length
            FROM trucks t
            LEFT JOIN operators o ON t.operator_id = o.id
            WHERE t.is_active = TRUE
            AND t.name IS NOT NULL
            AND t.phone IS NOT NULL
            AND t.capacity_gallons IS NOT NULL
            AND t.last_seen_at IS NOT NULL
            AND t.last_seen_at >= $1
            ORDER BY queue_length ASC, t.name ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TruckWithQueue {
                    truck: Self::row_to_truck(row)?,
                    queue_length: row.try_get("queue_length")?,
                    operator_mode: row.try_get::<Option<OperatorMode>, _>("operator_mode")?,
                })
            })
            .collect()
    }

    async fn queue_length(&self, truck_id: i64) -> DispatchResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs \
             WHERE truck_id = $1 AND status IN ('accepted', 'en_route')",
        )
        .bind(truck_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn find_offline(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<Truck>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRUCK_COLUMNS} FROM trucks
            WHERE name IS NOT NULL
            AND phone IS NOT NULL
            AND capacity_gallons IS NOT NULL
            AND (is_active = FALSE OR last_seen_at IS NULL OR last_seen_at < $1)
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_truck).collect()
    }
}
