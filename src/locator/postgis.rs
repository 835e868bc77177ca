use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_types::Geometry;
use geozero::wkb;
use sqlx::{postgres::PgRow, types::Json, Acquire, Executor, Pool, Postgres, Row};
use uuid::Uuid;

use super::{idle_since_after_swap, Candidate, DriverLocator, SearchFilter};
use crate::entities::{Availability, Coordinates, Driver};
use crate::error::Error;

/// Driver index backed by PostGIS.
///
/// The `status` column mirrors `Driver::availability` and is the column the
/// claim `UPDATE` is guarded on; the JSONB body is patched afterwards.
pub struct PgLocator {
    pool: Pool<Postgres>,
}

fn parse_availability(status: &str) -> Result<Availability, Error> {
    serde_json::from_value(serde_json::Value::String(status.into()))
        .map_err(|_| Error::unexpected_error(format!("unknown driver status {:?}", status)))
}

fn driver_from_row(row: &PgRow) -> Result<Driver, Error> {
    let Json(mut driver): Json<Driver> = row.try_get("data")?;
    let status: String = row.try_get("status")?;
    driver.availability = parse_availability(&status)?;

    Ok(driver)
}

impl PgLocator {
    #[tracing::instrument(name = "PgLocator::new", skip_all)]
    pub async fn new(pool: Pool<Postgres>) -> Result<Self, Error> {
        pool.execute("CREATE EXTENSION IF NOT EXISTS postgis").await?;
        pool.execute(
            "CREATE TABLE IF NOT EXISTS drivers (
                id UUID PRIMARY KEY,
                status VARCHAR NOT NULL,
                location geography(Point, 4326),
                location_updated_at TIMESTAMPTZ,
                data JSONB NOT NULL
            )",
        )
        .await?;
        pool.execute(
            "CREATE INDEX IF NOT EXISTS drivers_location_idx ON drivers USING GIST (location)",
        )
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DriverLocator for PgLocator {
    #[tracing::instrument(skip(self, driver), fields(driver_id = %driver.id))]
    async fn register(&self, driver: Driver) -> Result<Driver, Error> {
        let location: Option<wkb::Encode<Geometry<f64>>> =
            driver.location.map(|location| wkb::Encode(location.into()));

        let mut conn = self.pool.acquire().await?;

        let inserted = conn
            .execute(
                sqlx::query(
                    "INSERT INTO drivers (id, status, location, location_updated_at, data)
                     VALUES ($1, $2, ST_SetSRID($3::geometry, 4326)::geography, $4, $5)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(&driver.id)
                .bind(driver.availability.name())
                .bind(location)
                .bind(driver.location_updated_at)
                .bind(Json(&driver)),
            )
            .await?
            .rows_affected();

        if inserted == 0 {
            return Err(Error::validation_error(format!(
                "driver {} is already registered",
                driver.id
            )));
        }

        Ok(driver)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Driver>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_row = conn
            .fetch_optional(sqlx::query("SELECT status, data FROM drivers WHERE id = $1").bind(&id))
            .await?;

        maybe_row.as_ref().map(driver_from_row).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn report(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
        now: DateTime<Utc>,
    ) -> Result<Driver, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let row = tx
            .fetch_optional(
                sqlx::query("SELECT status, data FROM drivers WHERE id = $1 FOR UPDATE").bind(&id),
            )
            .await?
            .ok_or_else(|| Error::not_found_error(format!("driver {}", id)))?;

        let mut driver = driver_from_row(&row)?;
        driver.report(location, availability, now)?;

        let encoded: Option<wkb::Encode<Geometry<f64>>> =
            driver.location.map(|location| wkb::Encode(location.into()));

        tx.execute(
            sqlx::query(
                "UPDATE drivers
                 SET status = $2,
                     location = ST_SetSRID($3::geometry, 4326)::geography,
                     location_updated_at = $4,
                     data = $5
                 WHERE id = $1",
            )
            .bind(&driver.id)
            .bind(driver.availability.name())
            .bind(encoded)
            .bind(driver.location_updated_at)
            .bind(Json(&driver)),
        )
        .await?;

        tx.commit().await?;

        Ok(driver)
    }

    async fn nearest_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<Candidate>, Error> {
        let origin: Geometry<f64> = point.into();

        let query = "
            SELECT
                status,
                data,
                ST_Distance(location, ST_SetSRID($1::geometry, 4326)::geography) / 1000.0 AS distance_km
            FROM
                drivers
            WHERE
                status = 'available'
                AND location IS NOT NULL
                AND location_updated_at >= $3
                AND NOT (id = ANY($4))
                AND ST_DWithin(location, ST_SetSRID($1::geometry, 4326)::geography, $2)
            ORDER BY
                distance_km ASC
        ";

        let mut conn = self.pool.acquire().await?;
        let rows = conn
            .fetch_all(
                sqlx::query(query)
                    .bind(wkb::Encode(origin))
                    .bind(radius_km * 1000.0)
                    .bind(filter.fresh_since)
                    .bind(&filter.excluded),
            )
            .await?;

        let mut candidates = vec![];

        for row in rows.iter() {
            let driver = driver_from_row(row)?;
            let distance_km: f64 = row.try_get("distance_km")?;

            if filter.admits(&driver) {
                candidates.push(Candidate {
                    driver,
                    distance_km,
                });
            }
        }

        Ok(candidates)
    }

    async fn count_available_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let origin: Geometry<f64> = point.into();

        let mut conn = self.pool.acquire().await?;
        let count: i64 = conn
            .fetch_one(
                sqlx::query(
                    "SELECT COUNT(*) AS n FROM drivers
                     WHERE status = 'available'
                       AND location_updated_at >= $3
                       AND ST_DWithin(location, ST_SetSRID($1::geometry, 4326)::geography, $2)",
                )
                .bind(wkb::Encode(origin))
                .bind(radius_km * 1000.0)
                .bind(fresh_since),
            )
            .await?
            .try_get("n")?;

        Ok(count.max(0) as u32)
    }

    #[tracing::instrument(skip(self))]
    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected: Availability,
        new: Availability,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let maybe_row = tx
            .fetch_optional(
                sqlx::query(
                    "UPDATE drivers SET status = $3 WHERE id = $1 AND status = $2 RETURNING status, data",
                )
                .bind(&id)
                .bind(expected.name())
                .bind(new.name()),
            )
            .await?;

        let row = match maybe_row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                return Ok(false);
            }
        };

        let mut driver = driver_from_row(&row)?;
        driver.idle_since = idle_since_after_swap(driver.idle_since, expected, new, now);

        tx.execute(
            sqlx::query("UPDATE drivers SET data = $2 WHERE id = $1")
                .bind(&id)
                .bind(Json(&driver)),
        )
        .await?;

        tx.commit().await?;

        Ok(true)
    }
}
