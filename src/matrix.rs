//! Travel matrix provider: cache lookup, batched live fetch, geometric
//! fallback.
//!
//! The provider never fails and never returns a partial matrix: every
//! output is square, complete, finite, and non-negative, with a zero
//! diagonal. Live results and fallback results are both cached, fallback
//! ones under a shorter TTL so the live service gets retried.

use std::hash::Hasher;
use std::sync::Arc;

use fxhash::FxHasher;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::{FallbackPolicy, MatrixConfig};
use crate::error::EngineError;
use crate::haversine::GreatCircleEstimator;
use crate::traits::RoutingService;

/// Where a matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatrixSource {
    Live,
    Fallback,
    /// Live rows with fallback rows mixed in for failed batches.
    Mixed,
}

impl MatrixSource {
    /// True when any value was derived geometrically.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, MatrixSource::Live)
    }
}

/// Square distance (meters) and duration (seconds) matrices over an
/// ordered coordinate list, plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelMatrices {
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
    pub source: MatrixSource,
}

impl TravelMatrices {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// Quantize a coordinate to microdegrees.
///
/// Cache-key contract: coordinates are rounded to 1e-6 degrees (~0.1 m)
/// before hashing, so near-duplicate requests hit the same entry and keys
/// never drift across platforms.
pub fn quantize(coord: (f64, f64)) -> (i64, i64) {
    (
        (coord.0 * 1e6).round() as i64,
        (coord.1 * 1e6).round() as i64,
    )
}

/// Content hash of an ordered coordinate sequence.
///
/// Feeds the quantized (lat, lon) pairs to `FxHasher` in little-endian
/// byte order; see [`quantize`] for the rounding contract.
pub fn coordinate_key(coords: &[(f64, f64)]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(coords.len());
    for coord in coords {
        let (lat, lon) = quantize(*coord);
        hasher.write(&lat.to_le_bytes());
        hasher.write(&lon.to_le_bytes());
    }
    hasher.finish()
}

/// Produces travel matrices for ordered coordinate lists.
pub struct MatrixProvider<S> {
    service: Option<S>,
    estimator: GreatCircleEstimator,
    cache: Arc<CacheStore<TravelMatrices>>,
    config: MatrixConfig,
    pool: rayon::ThreadPool,
}

impl<S: RoutingService> MatrixProvider<S> {
    pub fn new(
        config: MatrixConfig,
        service: Option<S>,
        cache: Arc<CacheStore<TravelMatrices>>,
    ) -> Result<Self, EngineError> {
        if config.batch_size == 0 || config.concurrency == 0 {
            return Err(EngineError::Configuration(
                "matrix batch_size and concurrency must be at least 1".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .build()
            .map_err(|err| EngineError::Configuration(format!("matrix thread pool: {err}")))?;
        Ok(Self {
            service,
            estimator: GreatCircleEstimator::new(config.average_speed_kmh),
            cache,
            config,
            pool,
        })
    }

    /// Distance and duration matrices for the ordered coordinates.
    ///
    /// Cache hits return the stored matrices bit-identically. Misses fetch
    /// from the routing service in bounded batches and fall back to the
    /// great-circle estimate for failed rows (or for everything, per
    /// policy).
    pub fn matrices(&self, coords: &[(f64, f64)]) -> TravelMatrices {
        if coords.is_empty() {
            return TravelMatrices {
                distances: Vec::new(),
                durations: Vec::new(),
                source: MatrixSource::Live,
            };
        }

        let key = coordinate_key(coords);
        if self.config.cache_enabled {
            if let Some(hit) = self.cache.get(key) {
                debug!(key, n = coords.len(), "matrix cache hit");
                return hit;
            }
        }

        let mut result = match &self.service {
            None => self.estimator.matrices(coords),
            Some(service) => self.fetch(service, coords),
        };
        zero_diagonal(&mut result);

        if self.config.cache_enabled {
            let ttl = match result.source {
                MatrixSource::Live => self.config.live_ttl,
                MatrixSource::Fallback | MatrixSource::Mixed => self.config.fallback_ttl,
            };
            self.cache.put(key, result.clone(), ttl);
        }
        result
    }

    fn fetch(&self, service: &S, coords: &[(f64, f64)]) -> TravelMatrices {
        let n = coords.len();
        let batches: Vec<&[(f64, f64)]> = coords.chunks(self.config.batch_size).collect();

        let fetched: Vec<Option<(Vec<Vec<f64>>, Vec<Vec<f64>>)>> = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| match service.table(batch, coords) {
                    Ok(table) => validate_table(table, batch.len(), n),
                    Err(err) => {
                        warn!(%err, rows = batch.len(), "matrix batch failed");
                        None
                    }
                })
                .collect()
        });

        let failed = fetched.iter().filter(|r| r.is_none()).count();
        if failed == batches.len()
            || (failed > 0 && self.config.fallback_policy == FallbackPolicy::AllOrNothing)
        {
            warn!(failed, total = batches.len(), "falling back to great-circle matrices");
            return self.estimator.matrices(coords);
        }

        let mut distances = Vec::with_capacity(n);
        let mut durations = Vec::with_capacity(n);
        for (batch, rows) in batches.iter().zip(fetched) {
            let (dist_rows, dur_rows) = match rows {
                Some(rows) => rows,
                None => self.estimator.rows(batch, coords),
            };
            distances.extend(dist_rows);
            durations.extend(dur_rows);
        }
        TravelMatrices {
            distances,
            durations,
            source: if failed == 0 {
                MatrixSource::Live
            } else {
                MatrixSource::Mixed
            },
        }
    }
}

/// Accept a service table only when it is completely filled with finite,
/// non-negative values of the expected shape.
fn validate_table(
    table: crate::traits::ServiceTable,
    rows: usize,
    cols: usize,
) -> Option<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let well_formed = |matrix: &Vec<Vec<f64>>| {
        matrix.len() == rows
            && matrix
                .iter()
                .all(|row| row.len() == cols && row.iter().all(|v| v.is_finite() && *v >= 0.0))
    };
    if well_formed(&table.distances) && well_formed(&table.durations) {
        Some((table.distances, table.durations))
    } else {
        warn!(rows, cols, "routing service table had the wrong shape or bad values");
        None
    }
}

fn zero_diagonal(matrices: &mut TravelMatrices) {
    for i in 0..matrices.distances.len() {
        matrices.distances[i][i] = 0.0;
        matrices.durations[i][i] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::traits::ServiceTable;

    #[test]
    fn keys_are_stable_under_sub_quantum_jitter() {
        let a = vec![(3.4516, -76.532), (3.46, -76.51)];
        let jittered = vec![(3.4516000004, -76.5320000002), (3.46, -76.51)];
        assert_eq!(coordinate_key(&a), coordinate_key(&jittered));
    }

    #[test]
    fn keys_depend_on_order_and_content() {
        let a = vec![(3.45, -76.53), (3.46, -76.51)];
        let reversed = vec![(3.46, -76.51), (3.45, -76.53)];
        assert_ne!(coordinate_key(&a), coordinate_key(&reversed));
        assert_ne!(coordinate_key(&a), coordinate_key(&a[..1].to_vec()));
    }

    struct NoService;
    impl RoutingService for NoService {
        fn table(
            &self,
            _: &[(f64, f64)],
            _: &[(f64, f64)],
        ) -> Result<ServiceTable, ServiceError> {
            Err(ServiceError::Unavailable("test".into()))
        }
    }

    fn provider(service: Option<NoService>, config: MatrixConfig) -> MatrixProvider<NoService> {
        MatrixProvider::new(config, service, Arc::new(CacheStore::new())).unwrap()
    }

    #[test]
    fn unavailable_service_yields_complete_fallback_matrices() {
        let provider = provider(Some(NoService), MatrixConfig::default());
        let coords = vec![(3.45, -76.53), (3.46, -76.51), (3.43, -76.55)];
        let matrices = provider.matrices(&coords);

        assert_eq!(matrices.source, MatrixSource::Fallback);
        assert_eq!(matrices.len(), 3);
        for row in matrices.distances.iter().chain(matrices.durations.iter()) {
            assert_eq!(row.len(), 3);
            assert!(row.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn cached_calls_are_bit_identical() {
        let provider = provider(None, MatrixConfig::default());
        let coords = vec![(3.45, -76.53), (3.46, -76.51)];
        let first = provider.matrices(&coords);
        let second = provider.matrices(&coords);
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_tables_are_rejected() {
        let table = ServiceTable {
            distances: vec![vec![0.0, f64::NAN]],
            durations: vec![vec![0.0, 1.0]],
        };
        assert!(validate_table(table, 1, 2).is_none());

        let short = ServiceTable {
            distances: vec![vec![0.0]],
            durations: vec![vec![0.0]],
        };
        assert!(validate_table(short, 1, 2).is_none());
    }
}
