//! Great-circle travel estimate (fallback when the routing service is
//! unavailable).
//!
//! Ignores the road network, so distances are optimistic, but the estimate
//! is always available, deterministic, and satisfies the triangle
//! inequality.

use crate::matrix::{MatrixSource, TravelMatrices};

/// Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two (lat, lon) points in meters.
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Derives distance and duration matrices from geometry and an assumed
/// average speed.
#[derive(Debug, Clone)]
pub struct GreatCircleEstimator {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl GreatCircleEstimator {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Estimated (meters, seconds) for one leg.
    pub fn leg(&self, from: (f64, f64), to: (f64, f64)) -> (f64, f64) {
        let meters = haversine_m(from, to);
        let seconds = meters / (self.speed_kmh * 1000.0 / 3600.0);
        (meters, seconds)
    }

    /// Estimated rows from each source to every destination.
    pub fn rows(
        &self,
        sources: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let mut distances = Vec::with_capacity(sources.len());
        let mut durations = Vec::with_capacity(sources.len());
        for from in sources {
            let mut dist_row = Vec::with_capacity(destinations.len());
            let mut dur_row = Vec::with_capacity(destinations.len());
            for to in destinations {
                if from == to {
                    dist_row.push(0.0);
                    dur_row.push(0.0);
                } else {
                    let (meters, seconds) = self.leg(*from, *to);
                    dist_row.push(meters);
                    dur_row.push(seconds);
                }
            }
            distances.push(dist_row);
            durations.push(dur_row);
        }
        (distances, durations)
    }

    /// Full fallback matrices over the coordinate list.
    pub fn matrices(&self, coords: &[(f64, f64)]) -> TravelMatrices {
        let (distances, durations) = self.rows(coords, coords);
        TravelMatrices {
            distances,
            durations,
            source: MatrixSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_has_zero_distance() {
        let meters = haversine_m((36.1, -115.1), (36.1, -115.1));
        assert!(meters < 1.0, "same point should have ~0 distance");
    }

    #[test]
    fn known_distance_las_vegas_to_los_angeles() {
        // Actual great-circle distance is ~370 km.
        let meters = haversine_m((36.17, -115.14), (34.05, -118.24));
        assert!(
            meters > 350_000.0 && meters < 400_000.0,
            "LV to LA should be ~370km, got {meters}"
        );
    }

    #[test]
    fn matrix_diagonal_is_zero() {
        let estimator = GreatCircleEstimator::new(40.0);
        let coords = vec![(36.1, -115.1), (36.2, -115.2), (36.3, -115.3)];
        let matrices = estimator.matrices(&coords);

        for i in 0..coords.len() {
            assert_eq!(matrices.distances[i][i], 0.0);
            assert_eq!(matrices.durations[i][i], 0.0);
        }
        assert_eq!(matrices.source, MatrixSource::Fallback);
    }

    #[test]
    fn matrix_is_symmetric() {
        let estimator = GreatCircleEstimator::new(40.0);
        let coords = vec![(36.1, -115.1), (36.2, -115.2)];
        let matrices = estimator.matrices(&coords);

        assert_eq!(matrices.distances[0][1], matrices.distances[1][0]);
        assert_eq!(matrices.durations[0][1], matrices.durations[1][0]);
    }

    #[test]
    fn duration_follows_the_configured_speed() {
        let estimator = GreatCircleEstimator::new(40.0);
        // Two points ~10km apart on a meridian; 10 km at 40 km/h = 900 s.
        let delta = 10.0 / 111.195;
        let (_, seconds) = estimator.leg((0.0, 10.0), (delta, 10.0));
        assert!((seconds - 900.0).abs() < 10.0, "expected ~900s, got {seconds}");
    }

    #[test]
    fn triangle_inequality_holds() {
        let estimator = GreatCircleEstimator::new(40.0);
        let coords = vec![(3.45, -76.53), (3.46, -76.51), (3.43, -76.55), (3.48, -76.50)];
        let matrices = estimator.matrices(&coords);

        let n = coords.len();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    assert!(
                        matrices.distances[i][j]
                            <= matrices.distances[i][k] + matrices.distances[k][j] + 1e-6,
                        "triangle inequality violated at ({i},{j},{k})"
                    );
                }
            }
        }
    }
}
