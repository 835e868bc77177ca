use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Executor, Pool, Postgres, Row,
};
use uuid::Uuid;

use super::Store;
use crate::entities::{
    ActionStatus, CancellationRecord, Escalation, MatchingAttemptLog, Quote, Ride, Status,
    SurgeZone, WorkflowAction,
};
use crate::error::Error;

/// Postgres-backed store. Each table keeps the full record as JSONB next to the
/// columns that queries filter or guard on.
pub struct PgStore {
    pool: Pool<Postgres>,
}

fn ride_columns(ride: &Ride) -> (String, i64, Option<DateTime<Utc>>) {
    let offer_expires_at = match ride.status {
        Status::DriverFound => ride.offer.as_ref().map(|offer| offer.expires_at),
        _ => None,
    };

    (ride.status.name(), ride.version as i64, offer_expires_at)
}

fn rides_from_rows(rows: &[PgRow]) -> Result<Vec<Ride>, Error> {
    let mut rides = vec![];

    for row in rows.iter() {
        let Json(ride): Json<Ride> = row.try_get("data")?;
        rides.push(ride);
    }

    Ok(rides)
}

fn action_from_row(row: &PgRow) -> Result<WorkflowAction, Error> {
    let Json(mut action): Json<WorkflowAction> = row.try_get("data")?;
    let status: String = row.try_get("status")?;

    action.status = serde_json::from_value(serde_json::Value::String(status))?;
    action.updated_at = row.try_get("updated_at")?;

    Ok(action)
}

fn actions_from_rows(rows: &[PgRow]) -> Result<Vec<WorkflowAction>, Error> {
    rows.iter().map(action_from_row).collect()
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::connect", skip(db_uri))]
    pub async fn connect(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        Self::new(pool).await
    }

    pub async fn new(pool: Pool<Postgres>) -> Result<Self, Error> {
        // TODO: move these into sqlx migrations once the schema settles
        pool.execute(
            "CREATE TABLE IF NOT EXISTS rides (
                id UUID PRIMARY KEY,
                rider_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                version INT8 NOT NULL,
                offer_expires_at TIMESTAMPTZ,
                data JSONB NOT NULL
            )",
        )
        .await?;
        pool.execute("CREATE INDEX IF NOT EXISTS rides_status_idx ON rides (status)")
            .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS matching_logs (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS cancellations (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL,
                rider_id UUID NOT NULL,
                actor VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS workflow_actions (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                dedup_key VARCHAR NOT NULL UNIQUE,
                scheduled_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute("CREATE TABLE IF NOT EXISTS quotes (token UUID PRIMARY KEY, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS surge_zones (id UUID PRIMARY KEY, data JSONB NOT NULL)")
            .await?;
        pool.execute(
            "CREATE TABLE IF NOT EXISTS escalations (
                ride_id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> Pool<Postgres> {
        self.pool.clone()
    }
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        let (status, version, offer_expires_at) = ride_columns(ride);
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO rides (id, rider_id, status, version, offer_expires_at, data)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&ride.id)
            .bind(&ride.rider_id)
            .bind(status)
            .bind(version)
            .bind(offer_expires_at)
            .bind(Json(ride)),
        )
        .await?;

        Ok(())
    }

    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_row = conn
            .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(&id))
            .await?;

        match maybe_row {
            Some(row) => {
                let Json(ride): Json<Ride> = row.try_get("data")?;
                Ok(Some(ride))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id, version = ride.version))]
    async fn update_ride(&self, ride: &Ride, expected_version: u64) -> Result<(), Error> {
        let (status, version, offer_expires_at) = ride_columns(ride);
        let mut conn = self.pool.acquire().await?;

        let updated = conn
            .execute(
                sqlx::query(
                    "UPDATE rides
                     SET status = $2, version = $3, offer_expires_at = $4, data = $5
                     WHERE id = $1 AND version = $6",
                )
                .bind(&ride.id)
                .bind(status)
                .bind(version)
                .bind(offer_expires_at)
                .bind(Json(ride))
                .bind(expected_version as i64),
            )
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::concurrency_conflict_error(
                format!("ride {}", ride.id),
                expected_version,
            ));
        }

        Ok(())
    }

    async fn rides_with_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        let names: Vec<String> = statuses.iter().map(|status| status.name()).collect();
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(sqlx::query("SELECT data FROM rides WHERE status = ANY($1)").bind(names))
            .await?;

        rides_from_rows(&rows)
    }

    async fn rides_with_expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Ride>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT data FROM rides WHERE status = $1 AND offer_expires_at <= $2",
                )
                .bind(Status::DriverFound.name())
                .bind(now),
            )
            .await?;

        rides_from_rows(&rows)
    }

    async fn append_matching_log(&self, log: &MatchingAttemptLog) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO matching_logs (id, ride_id, created_at, data) VALUES ($1, $2, $3, $4)",
            )
            .bind(&log.id)
            .bind(&log.ride_id)
            .bind(log.created_at)
            .bind(Json(log)),
        )
        .await?;

        Ok(())
    }

    async fn matching_logs(&self, ride_id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT data FROM matching_logs WHERE ride_id = $1 ORDER BY created_at ASC",
                )
                .bind(&ride_id),
            )
            .await?;

        let mut logs = vec![];
        for row in rows.iter() {
            let Json(log): Json<MatchingAttemptLog> = row.try_get("data")?;
            logs.push(log);
        }

        Ok(logs)
    }

    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO cancellations (id, ride_id, rider_id, actor, created_at, data)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&record.id)
            .bind(&record.ride_id)
            .bind(&record.rider_id)
            .bind(record.actor.name())
            .bind(record.created_at)
            .bind(Json(record)),
        )
        .await?;

        Ok(())
    }

    async fn cancellations(&self, ride_id: Uuid) -> Result<Vec<CancellationRecord>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT data FROM cancellations WHERE ride_id = $1 ORDER BY created_at ASC",
                )
                .bind(&ride_id),
            )
            .await?;

        let mut records = vec![];
        for row in rows.iter() {
            let Json(record): Json<CancellationRecord> = row.try_get("data")?;
            records.push(record);
        }

        Ok(records)
    }

    async fn count_rider_cancellations(
        &self,
        rider_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let mut conn = self.pool.acquire().await?;

        let count: i64 = conn
            .fetch_one(
                sqlx::query(
                    "SELECT COUNT(*) AS n FROM cancellations
                     WHERE rider_id = $1 AND actor = 'rider' AND created_at >= $2",
                )
                .bind(&rider_id)
                .bind(since),
            )
            .await?
            .try_get("n")?;

        Ok(count.max(0) as u32)
    }

    #[tracing::instrument(skip(self, action), fields(dedup_key = %action.dedup_key))]
    async fn insert_action(&self, action: &WorkflowAction) -> Result<bool, Error> {
        let mut conn = self.pool.acquire().await?;

        let inserted = conn
            .execute(
                sqlx::query(
                    "INSERT INTO workflow_actions (id, ride_id, status, dedup_key, scheduled_at, updated_at, data)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (dedup_key) DO NOTHING",
                )
                .bind(&action.id)
                .bind(&action.ride_id)
                .bind(action.status.name())
                .bind(&action.dedup_key)
                .bind(action.scheduled_at)
                .bind(action.updated_at)
                .bind(Json(action)),
            )
            .await?
            .rows_affected();

        Ok(inserted == 1)
    }

    async fn find_action(&self, id: Uuid) -> Result<Option<WorkflowAction>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_row = conn
            .fetch_optional(
                sqlx::query("SELECT status, updated_at, data FROM workflow_actions WHERE id = $1")
                    .bind(&id),
            )
            .await?;

        maybe_row.as_ref().map(action_from_row).transpose()
    }

    async fn claim_action(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowAction>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_row = conn
            .fetch_optional(
                sqlx::query(
                    "UPDATE workflow_actions
                     SET status = 'processing', updated_at = $2
                     WHERE id = $1 AND status = 'pending' AND scheduled_at <= $2
                     RETURNING status, updated_at, data",
                )
                .bind(&id)
                .bind(now),
            )
            .await?;

        maybe_row.as_ref().map(action_from_row).transpose()
    }

    async fn update_action(&self, action: &WorkflowAction) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "UPDATE workflow_actions
                 SET status = $2, scheduled_at = $3, updated_at = $4, data = $5
                 WHERE id = $1",
            )
            .bind(&action.id)
            .bind(action.status.name())
            .bind(action.scheduled_at)
            .bind(action.updated_at)
            .bind(Json(action)),
        )
        .await?;

        Ok(())
    }

    async fn due_actions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowAction>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT status, updated_at, data FROM workflow_actions
                     WHERE status = 'pending' AND scheduled_at <= $1
                     ORDER BY scheduled_at ASC",
                )
                .bind(now),
            )
            .await?;

        actions_from_rows(&rows)
    }

    async fn actions_with_status(
        &self,
        status: ActionStatus,
    ) -> Result<Vec<WorkflowAction>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT status, updated_at, data FROM workflow_actions
                     WHERE status = $1 ORDER BY scheduled_at ASC",
                )
                .bind(status.name()),
            )
            .await?;

        actions_from_rows(&rows)
    }

    async fn actions_for_ride(&self, ride_id: Uuid) -> Result<Vec<WorkflowAction>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT status, updated_at, data FROM workflow_actions
                     WHERE ride_id = $1 ORDER BY scheduled_at ASC",
                )
                .bind(&ride_id),
            )
            .await?;

        actions_from_rows(&rows)
    }

    async fn release_stale_actions(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut conn = self.pool.acquire().await?;

        let released = conn
            .execute(
                sqlx::query(
                    "UPDATE workflow_actions SET status = 'pending'
                     WHERE status = 'processing' AND updated_at < $1",
                )
                .bind(before),
            )
            .await?
            .rows_affected();

        Ok(released)
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query("INSERT INTO quotes (token, data) VALUES ($1, $2)")
                .bind(&quote.token)
                .bind(Json(quote)),
        )
        .await?;

        Ok(())
    }

    async fn find_quote(&self, token: Uuid) -> Result<Option<Quote>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_row = conn
            .fetch_optional(sqlx::query("SELECT data FROM quotes WHERE token = $1").bind(&token))
            .await?;

        match maybe_row {
            Some(row) => {
                let Json(quote): Json<Quote> = row.try_get("data")?;
                Ok(Some(quote))
            }
            None => Ok(None),
        }
    }

    async fn upsert_zone(&self, zone: &SurgeZone) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO surge_zones (id, data) VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
            )
            .bind(&zone.id)
            .bind(Json(zone)),
        )
        .await?;

        Ok(())
    }

    async fn zones(&self) -> Result<Vec<SurgeZone>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(sqlx::query("SELECT data FROM surge_zones"))
            .await?;

        let mut zones = vec![];
        for row in rows.iter() {
            let Json(zone): Json<SurgeZone> = row.try_get("data")?;
            zones.push(zone);
        }

        Ok(zones)
    }

    #[tracing::instrument(skip(self, escalation), fields(ride_id = %escalation.ride_id))]
    async fn upsert_escalation(&self, escalation: &Escalation) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO escalations (ride_id, status, data) VALUES ($1, $2, $3)
                 ON CONFLICT (ride_id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data",
            )
            .bind(&escalation.ride_id)
            .bind(escalation.status.name())
            .bind(Json(escalation)),
        )
        .await?;

        Ok(())
    }

    async fn escalations(&self) -> Result<Vec<Escalation>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(sqlx::query("SELECT data FROM escalations"))
            .await?;

        let mut escalations = vec![];
        for row in rows.iter() {
            let Json(escalation): Json<Escalation> = row.try_get("data")?;
            escalations.push(escalation);
        }

        Ok(escalations)
    }
}
