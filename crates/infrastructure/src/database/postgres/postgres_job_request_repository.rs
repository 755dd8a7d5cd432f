use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use watertruck_domain::{
    DispatchResult, JobRequest, JobRequestOffer, JobRequestRepository, PendingOffer,
};

pub struct PostgresJobRequestRepository {
    pool: PgPool,
}

impl PostgresJobRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &sqlx::postgres::PgRow) -> DispatchResult<JobRequest> {
        Ok(JobRequest {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            truck_id: row.try_get("truck_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl JobRequestRepository for PostgresJobRequestRepository {
    #[instrument(skip(self))]
    async fn create(&self, job_id: i64, truck_id: i64) -> DispatchResult<JobRequest> {
        let row = sqlx::query(
            "INSERT INTO job_requests (job_id, truck_id) VALUES ($1, $2) \
             RETURNING id, job_id, truck_id, status, created_at",
        )
        .bind(job_id)
        .bind(truck_id)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_request(&row)
    }

    async fn find_by_job_and_truck(
        &self,
        job_id: i64,
        truck_id: i64,
    ) -> DispatchResult<Option<JobRequest>> {
        let row = sqlx::query(
            "SELECT id, job_id, truck_id, status, created_at \
             FROM job_requests WHERE job_id = $1 AND truck_id = $2",
        )
        .bind(job_id)
        .bind(truck_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_request).transpose()
    }

    async fn find_by_job(&self, job_id: i64) -> DispatchResult<Vec<JobRequestOffer>> {
        let rows = sqlx::query(
            r#"
            SELECT jr.*, t.name AS truck_name,
                t.capacity_gallons AS truck_capacity_gallons,
                t.price_fixed AS truck_price_fixed
            FROM job_requests jr
            INNER JOIN trucks t ON jr.truck_id = t.id
            WHERE jr.job_id = $1
            ORDER BY jr.created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(JobRequestOffer {
                    request: Self::row_to_request(row)?,
                    truck_name: row.try_get("truck_name")?,
                    truck_capacity_gallons: row.try_get("truck_capacity_gallons")?,
                    truck_price_fixed: row.try_get("truck_price_fixed")?,
                })
            })
            .collect()
    }

    async fn find_pending_by_truck(&self, truck_id: i64) -> DispatchResult<Vec<PendingOffer>> {
        let rows = sqlx::query(
            r#"
            SELECT jr.*, j.location, j.customer_name, j.customer_phone,
                j.lat, j.lng, j.created_at AS job_created_at
            FROM job_requests jr
            INNER JOIN jobs j ON jr.job_id = j.id
            WHERE jr.truck_id = $1
            AND jr.status = 'pending'
            AND j.status = 'pending'
            ORDER BY jr.created_at ASC
            "#,
        )
        .bind(truck_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingOffer {
                    request: Self::row_to_request(row)?,
                    location: row.try_get("location")?,
                    customer_name: row.try_get("customer_name")?,
                    customer_phone: row.try_get("customer_phone")?,
                    lat: row.try_get("lat")?,
                    lng: row.try_get("lng")?,
                    job_created_at: row.try_get("job_created_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(request_id = %id))]
    async fn mark_rejected(&self, id: i64) -> DispatchResult<bool> {
        let result = sqlx::query(
            "UPDATE job_requests SET status = 'rejected' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_count(&self, job_id: i64) -> DispatchResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM job_requests WHERE job_id = $1 AND status = 'pending'",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }
}
