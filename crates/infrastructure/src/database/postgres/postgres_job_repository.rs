use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use watertruck_domain::{
    DispatchResult, Job, JobRepository, JobStatus, JobWithParties, NewJob, OperatorActiveJob,
    OperatorPendingJob,
};

const JOB_COLUMNS: &str = "id, customer_user_id, truck_id, status, price, location, \
     customer_name, customer_phone, lat, lng, created_at, accepted_at, completed_at";

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> DispatchResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            customer_user_id: row.try_get("customer_user_id")?,
            truck_id: row.try_get("truck_id")?,
            status: row.try_get("status")?,
            price: row.try_get("price")?,
            location: row.try_get("location")?,
            customer_name: row.try_get("customer_name")?,
            customer_phone: row.try_get("customer_phone")?,
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            created_at: row.try_get("created_at")?,
            accepted_at: row.try_get("accepted_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, new_job), fields(customer = %new_job.customer_user_id))]
    async fn create_with_requests(
        &self,
        new_job: &NewJob,
        truck_ids: &[i64],
    ) -> DispatchResult<Job> {
        // 订单与扇出请求必须同生共死
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO jobs (customer_user_id, location, customer_name, customer_phone, lat, lng) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_job.customer_user_id)
        .bind(&new_job.location)
        .bind(new_job.customer_name.as_deref())
        .bind(new_job.customer_phone.as_deref())
        .bind(new_job.lat)
        .bind(new_job.lng)
        .fetch_one(&mut *tx)
        .await?;
        let job = Self::row_to_job(&row)?;

        for &truck_id in truck_ids {
            sqlx::query("INSERT INTO job_requests (job_id, truck_id) VALUES ($1, $2)")
                .bind(job.id)
                .bind(truck_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!("创建订单 {} 并扇出 {} 条请求", job.id, truck_ids.len());
        Ok(job)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_with_parties(&self, id: i64) -> DispatchResult<Option<JobWithParties>> {
        let row = sqlx::query(
            r#"
            SELECT j.*,
                t.name AS truck_name,
                t.phone AS truck_phone,
                t.capacity_gallons AS truck_capacity_gallons,
                u.name AS customer_display_name
            FROM jobs j
            LEFT JOIN trucks t ON j.truck_id = t.id
            LEFT JOIN users u ON j.customer_user_id = u.id
            WHERE j.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(JobWithParties {
                job: Self::row_to_job(&row)?,
                truck_name: row.try_get("truck_name")?,
                truck_phone: row.try_get("truck_phone")?,
                truck_capacity_gallons: row.try_get("truck_capacity_gallons")?,
                customer_display_name: row.try_get("customer_display_name")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id, truck_id = %truck_id))]
    async fn try_accept(
        &self,
        job_id: i64,
        request_id: i64,
        truck_id: i64,
        price: f64,
    ) -> DispatchResult<bool> {
        // 先接先得：对订单行做条件更新，按受影响行数判定胜负。
        // 整个效果集（订单、获胜请求、其余请求过期）在同一事务内落库。
        let mut tx = self.pool.begin().await?;

        let job_hit = sqlx::query(
            "UPDATE jobs SET truck_id = $1, price = $2, status = 'accepted', accepted_at = NOW() \
             WHERE id = $3 AND status = 'pending'",
        )
        .bind(truck_id)
        .bind(price)
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if job_hit == 0 {
            tx.rollback().await?;
            debug!("订单 {} 接单竞争失败：状态已非pending", job_id);
            return Ok(false);
        }

        let request_hit = sqlx::query(
            "UPDATE job_requests SET status = 'accepted' WHERE id = $1 AND status = 'pending'",
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if request_hit == 0 {
            tx.rollback().await?;
            debug!("订单 {} 的请求 {} 已非pending", job_id, request_id);
            return Ok(false);
        }

        sqlx::query(
            "UPDATE job_requests SET status = 'expired' \
             WHERE job_id = $1 AND id <> $2 AND status = 'pending'",
        )
        .bind(job_id)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn transition(&self, id: i64, from: JobStatus, to: JobStatus) -> DispatchResult<bool> {
        let sql = if to == JobStatus::Delivered {
            "UPDATE jobs SET status = $1, completed_at = NOW() WHERE id = $2 AND status = $3"
        } else {
            "UPDATE jobs SET status = $1 WHERE id = $2 AND status = $3"
        };
        let result = sqlx::query(sql)
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn cancel_with_requests(&self, id: i64) -> DispatchResult<bool> {
        let mut tx = self.pool.begin().await?;

        let hit = sqlx::query(
            "UPDATE jobs SET status = 'cancelled' \
             WHERE id = $1 AND status IN ('pending', 'accepted')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if hit == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE job_requests SET status = 'expired' WHERE job_id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("订单 {} 已取消，pending请求全部过期", id);
        Ok(true)
    }

    async fn find_by_customer(&self, customer_user_id: i64) -> DispatchResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE customer_user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(customer_user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn find_by_truck(
        &self,
        truck_id: i64,
        status: Option<JobStatus>,
    ) -> DispatchResult<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE truck_id = $1 AND status = $2 ORDER BY created_at DESC"
                ))
                .bind(truck_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE truck_id = $1 ORDER BY created_at DESC"
                ))
                .bind(truck_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn find_pending_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorPendingJob>> {
        let rows = sqlx::query(
            r#"
            SELECT j.*, jr.truck_id AS requested_truck_id, t.name AS requested_truck_name
            FROM jobs j
            INNER JOIN job_requests jr ON j.id = jr.job_id AND jr.status = 'pending'
            INNER JOIN trucks t ON jr.truck_id = t.id
            WHERE t.operator_id = $1
            AND j.status = 'pending'
            ORDER BY j.created_at ASC
            "#,
        )
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OperatorPendingJob {
                    job: Self::row_to_job(row)?,
                    requested_truck_id: row.try_get("requested_truck_id")?,
                    requested_truck_name: row.try_get("requested_truck_name")?,
                })
            })
            .collect()
    }

    async fn find_active_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorActiveJob>> {
        let rows = sqlx::query(
            r#"
            SELECT j.*, t.name AS truck_name
            FROM jobs j
            INNER JOIN trucks t ON j.truck_id = t.id
            WHERE t.operator_id = $1
            AND j.status IN ('accepted', 'en_route')
            ORDER BY j.accepted_at DESC
            "#,
        )
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OperatorActiveJob {
                    job: Self::row_to_job(row)?,
                    truck_name: row.try_get("truck_name")?,
                })
            })
            .collect()
    }
}
