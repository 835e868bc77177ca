use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

use crate::error::Error;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::validation_error(format!(
                "latitude out of range: {}",
                self.lat
            )));
        }

        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::validation_error(format!(
                "longitude out of range: {}",
                self.lng
            )));
        }

        Ok(())
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let (lat1, lng1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lng2) = (other.lat.to_radians(), other.lng.to_radians());
        let sin_dlat = ((lat2 - lat1) * 0.5).sin();
        let sin_dlng = ((lng2 - lng1) * 0.5).sin();
        let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;

        2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
    }

    /// Point `km` kilometres due north; used to lay out test fixtures and zone bounds.
    pub fn offset_north_km(&self, km: f64) -> Self {
        Self {
            lat: self.lat + (km / EARTH_RADIUS_KM).to_degrees(),
            lng: self.lng,
        }
    }
}

impl From<Coordinates> for Geometry<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Geometry::Point(Point::new(coordinates.lng, coordinates.lat))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coordinates: Coordinates,
    pub address: String,
}

impl Location {
    pub fn new(coordinates: Coordinates, address: String) -> Self {
        Self {
            coordinates,
            address,
        }
    }
}
