use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use h3o::{CellIndex, LatLng, Resolution};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{idle_since_after_swap, Candidate, DriverLocator, SearchFilter};
use crate::entities::{Availability, Coordinates, Driver};
use crate::error::Error;

/// Smallest hexagon edge at a resolution relative to its average, rounded down.
const MIN_EDGE_RATIO: f64 = 0.5;

struct DriverSlot {
    availability: AtomicU8,
    snapshot: RwLock<Driver>,
}

impl DriverSlot {
    fn new(driver: Driver) -> Self {
        Self {
            availability: AtomicU8::new(driver.availability.as_u8()),
            snapshot: RwLock::new(driver),
        }
    }

    fn availability(&self) -> Availability {
        Availability::from_u8(self.availability.load(Ordering::Acquire))
            .unwrap_or(Availability::Offline)
    }

    async fn load(&self) -> Driver {
        let mut driver = self.snapshot.read().await.clone();
        driver.availability = self.availability();
        driver
    }
}

/// In-memory driver index keyed by H3 cell.
///
/// A driver's index entry only moves while its snapshot lock is held, so the
/// cell a driver is filed under always matches its last stored position.
/// Searches scan a `grid_disk` around the pickup and never wait on dispatch.
/// The availability byte of each driver is swapped atomically and is the
/// single point of truth for claims.
pub struct GridLocator {
    resolution: Resolution,
    slots: RwLock<HashMap<Uuid, Arc<DriverSlot>>>,
    cells: RwLock<HashMap<CellIndex, HashSet<Uuid>>>,
}

impl Default for GridLocator {
    fn default() -> Self {
        Self::new(Resolution::Seven)
    }
}

impl GridLocator {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            slots: RwLock::new(HashMap::new()),
            cells: RwLock::new(HashMap::new()),
        }
    }

    fn cell_of(&self, point: &Coordinates) -> Result<CellIndex, Error> {
        LatLng::new(point.lat, point.lng)
            .map(|latlng| latlng.to_cell(self.resolution))
            .map_err(|err| {
                Error::validation_error(format!(
                    "no cell for ({}, {}): {}",
                    point.lat, point.lng, err
                ))
            })
    }

    /// Grid distance whose disk covers every point within `radius_km`.
    fn rings_for(&self, radius_km: f64) -> u32 {
        // neighbouring centres are sqrt(3) edges apart
        let spacing_km = self.resolution.edge_length_km() * 3f64.sqrt() * MIN_EDGE_RATIO;

        (radius_km.max(0.0) / spacing_km).ceil() as u32 + 1
    }

    async fn slot(&self, id: &Uuid) -> Result<Arc<DriverSlot>, Error> {
        self.slots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found_error(format!("driver {}", id)))
    }

    /// Callers hold the driver's snapshot write lock.
    async fn reindex(&self, id: Uuid, from: Option<CellIndex>, to: CellIndex) {
        if from == Some(to) {
            return;
        }

        let mut cells = self.cells.write().await;

        if let Some(from) = from {
            if let Some(members) = cells.get_mut(&from) {
                members.remove(&id);
                if members.is_empty() {
                    cells.remove(&from);
                }
            }
        }

        cells.entry(to).or_default().insert(id);
    }

    async fn within(&self, point: &Coordinates, radius_km: f64) -> Result<Vec<(Driver, f64)>, Error> {
        let disk = self
            .cell_of(point)?
            .grid_disk::<Vec<_>>(self.rings_for(radius_km));

        let ids: HashSet<Uuid> = {
            let cells = self.cells.read().await;
            disk.iter()
                .filter_map(|cell| cells.get(cell))
                .flatten()
                .copied()
                .collect()
        };

        let slots: Vec<Arc<DriverSlot>> = {
            let slots = self.slots.read().await;
            ids.iter().filter_map(|id| slots.get(id).cloned()).collect()
        };

        let mut found = vec![];

        for slot in slots {
            let driver = slot.load().await;

            if let Some(location) = driver.location {
                let distance_km = point.distance_km(&location);
                if distance_km <= radius_km {
                    found.push((driver, distance_km));
                }
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl DriverLocator for GridLocator {
    #[tracing::instrument(skip(self, driver), fields(driver_id = %driver.id))]
    async fn register(&self, driver: Driver) -> Result<Driver, Error> {
        let cell = driver
            .location
            .map(|location| self.cell_of(&location))
            .transpose()?;

        let slot = Arc::new(DriverSlot::new(driver.clone()));
        let _snapshot = slot.snapshot.write().await;

        {
            let mut slots = self.slots.write().await;

            if slots.contains_key(&driver.id) {
                return Err(Error::validation_error(format!(
                    "driver {} is already registered",
                    driver.id
                )));
            }

            slots.insert(driver.id, slot.clone());
        }

        if let Some(cell) = cell {
            self.reindex(driver.id, None, cell).await;
        }

        Ok(driver)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Driver>, Error> {
        let slot = self.slots.read().await.get(&id).cloned();

        match slot {
            Some(slot) => Ok(Some(slot.load().await)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn report(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
        now: DateTime<Utc>,
    ) -> Result<Driver, Error> {
        let slot = self.slot(&id).await?;
        let to = location
            .map(|location| self.cell_of(&location))
            .transpose()?;

        loop {
            let before = slot.load().await;
            let mut driver = before.clone();
            driver.report(location, availability, now)?;

            let swapped = driver.availability != before.availability;

            if swapped
                && slot
                    .availability
                    .compare_exchange(
                        before.availability.as_u8(),
                        driver.availability.as_u8(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
            {
                tracing::debug!("availability moved underneath report, retrying");
                continue;
            }

            let mut snapshot = slot.snapshot.write().await;
            let from = snapshot
                .location
                .and_then(|location| self.cell_of(&location).ok());

            if location.is_some() {
                snapshot.location = driver.location;
                snapshot.location_updated_at = driver.location_updated_at;
            }
            if swapped {
                snapshot.idle_since = driver.idle_since;
            }

            if let Some(to) = to {
                self.reindex(id, from, to).await;
            }

            return Ok(driver);
        }
    }

    async fn nearest_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<Candidate>, Error> {
        let mut candidates: Vec<Candidate> = self
            .within(&point, radius_km)
            .await?
            .into_iter()
            .filter(|(driver, _)| filter.admits(driver))
            .map(|(driver, distance_km)| Candidate {
                driver,
                distance_km,
            })
            .collect();

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        Ok(candidates)
    }

    async fn count_available_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count = self
            .within(&point, radius_km)
            .await?
            .iter()
            .filter(|(driver, _)| {
                driver.is_available()
                    && driver
                        .location_updated_at
                        .map_or(false, |updated_at| updated_at >= fresh_since)
            })
            .count();

        Ok(count as u32)
    }

    #[tracing::instrument(skip(self))]
    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected: Availability,
        new: Availability,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let slot = self.slot(&id).await?;

        if slot
            .availability
            .compare_exchange(
                expected.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(false);
        }

        let mut snapshot = slot.snapshot.write().await;
        snapshot.availability = new;
        snapshot.idle_since = idle_since_after_swap(snapshot.idle_since, expected, new, now);

        Ok(true)
    }
}
