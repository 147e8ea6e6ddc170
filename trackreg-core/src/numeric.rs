//! Numeric helpers shared by the driver and the reference backend.
//!
//! Reductions over per-batch errors, min-max coordinate scaling and great
//! circle distance between predicted and observed track points.

use crate::error::{Result, TrackRegError};
use serde::{Deserialize, Serialize};

/// Mean radius of the earth in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Root mean squared error between two equally sized slices.
pub fn rmse(pred: &[f32], target: &[f32]) -> Option<f64> {
    if pred.is_empty() || pred.len() != target.len() {
        return None;
    }
    let sse: f64 = pred
        .iter()
        .zip(target)
        .map(|(p, t)| {
            let d = f64::from(*p) - f64::from(*t);
            d * d
        })
        .sum();
    Some((sse / pred.len() as f64).sqrt())
}

/// Per-coordinate min-max scaling into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxNormalizer {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl MinMaxNormalizer {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Result<Self> {
        if min.is_empty() || min.len() != max.len() {
            return Err(TrackRegError::invalid_input(format!(
                "min/max lists must be non-empty and equal length (got {} and {})",
                min.len(),
                max.len()
            )));
        }
        if let Some(idx) = min
            .iter()
            .zip(&max)
            .position(|(lo, hi)| lo.partial_cmp(hi) != Some(std::cmp::Ordering::Less))
        {
            return Err(TrackRegError::invalid_input(format!(
                "coordinate {idx}: min {} must be below max {}",
                min[idx], max[idx]
            )));
        }
        Ok(Self { min, max })
    }

    /// Number of coordinates covered.
    pub fn dim(&self) -> usize {
        self.min.len()
    }

    pub fn normalize(&self, idx: usize, value: f64) -> f64 {
        (value - self.min[idx]) / (self.max[idx] - self.min[idx])
    }

    /// Maps a network output back to its coordinate range.
    pub fn denormalize(&self, idx: usize, value: f64) -> f64 {
        value * (self.max[idx] - self.min[idx]) + self.min[idx]
    }

    /// Normalizes a full row in place. The row length must equal `dim()`.
    pub fn normalize_row(&self, row: &mut [f32]) -> Result<()> {
        self.check_row(row.len())?;
        for (idx, v) in row.iter_mut().enumerate() {
            *v = self.normalize(idx, f64::from(*v)) as f32;
        }
        Ok(())
    }

    pub fn denormalize_row(&self, row: &mut [f32]) -> Result<()> {
        self.check_row(row.len())?;
        for (idx, v) in row.iter_mut().enumerate() {
            *v = self.denormalize(idx, f64::from(*v)) as f32;
        }
        Ok(())
    }

    fn check_row(&self, len: usize) -> Result<()> {
        if len != self.dim() {
            return Err(TrackRegError::invalid_input(format!(
                "row has {len} coordinates, normalizer covers {}",
                self.dim()
            )));
        }
        Ok(())
    }
}

/// Haversine distance in kilometres between two `(lat, lon)` points in degrees.
pub fn latlong_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
