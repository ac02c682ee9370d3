use std::fmt;

use realtime::Error;
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A map coordinate in `(lat, lng)` order, degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Converts a GeoJSON `[lng, lat]` pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` when the pair does not have exactly two members
    /// or the coordinate is outside the valid range.
    pub fn from_geojson(coordinates: &[f64]) -> Result<Self, Error> {
        let [lng, lat] = coordinates else {
            return Err(Error::InvalidFormat(format!(
                "expected [lng, lat], got {} values",
                coordinates.len()
            )));
        };
        let latlng = Self::new(*lat, *lng);
        latlng.validate()?;
        Ok(latlng)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// # Errors
    ///
    /// Returns `InvalidFormat` for non-finite or out of range coordinates.
    pub fn validate(&self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidFormat(format!("coordinate out of range: {self}")))
        }
    }

    /// Great-circle distance in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lat, self.lng)
    }
}

/// Heading in degrees, or `None` for the `-1` sentinel and non-finite values.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn known_heading(heading: Option<f64>) -> Option<f64> {
    heading.filter(|h| h.is_finite() && *h != -1.0)
}
