//! Engine configuration.
//!
//! Every tunable is an explicit value passed into component constructors;
//! there is no ambient or module-level state. Callers that read settings
//! from files or the environment construct these types at the boundary.

use std::time::Duration;

use crate::error::EngineError;
use crate::scenario::{Break, TimeWindow};

/// How the matrix provider reacts when some live batches fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Only the failed rows are estimated geometrically.
    PerBatch,
    /// Any failure discards the live rows and the whole matrix is estimated.
    AllOrNothing,
}

/// First-solution and improvement strategy for the bundled optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Cheapest-insertion construction only.
    CheapestInsertion,
    /// Cheapest insertion followed by seeded local search.
    GuidedLocalSearch,
}

impl SearchStrategy {
    /// Resolve a configured strategy name. Unknown names mean the requested
    /// optimizer does not exist, which is fatal.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        match name {
            "cheapest-insertion" => Ok(SearchStrategy::CheapestInsertion),
            "guided-local-search" => Ok(SearchStrategy::GuidedLocalSearch),
            other => Err(EngineError::Configuration(format!(
                "unknown search strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Maximum source rows per routing-service request.
    pub batch_size: usize,
    /// Parallel batch fetches.
    pub concurrency: usize,
    /// Average speed used to turn great-circle distance into duration.
    pub average_speed_kmh: f64,
    pub cache_enabled: bool,
    pub live_ttl: Duration,
    /// Materially shorter than `live_ttl` so a later solve retries the
    /// live service.
    pub fallback_ttl: Duration,
    pub fallback_policy: FallbackPolicy,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            average_speed_kmh: 40.0,
            cache_enabled: true,
            live_ttl: Duration::from_secs(6 * 3600),
            fallback_ttl: Duration::from_secs(600),
            fallback_policy: FallbackPolicy::PerBatch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget for the whole solve, minimization attempts
    /// included.
    pub time_limit: Duration,
    pub strategy: SearchStrategy,
    /// Seed for the search perturbation; equal seeds and inputs reproduce
    /// the solution exactly.
    pub seed: u64,
    /// Try progressively larger vehicle prefixes before the full fleet.
    pub minimize_vehicles: bool,
    /// Upper bound on improvement rounds, so converged solves are
    /// reproducible independent of wall-clock jitter.
    pub max_iterations: usize,
    /// Objective weights (duration seconds, distance meters).
    pub time_weight: f64,
    pub distance_weight: f64,
    /// Tolerated overtime past the working-window end, in seconds.
    pub overtime_slack: i64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(10),
            strategy: SearchStrategy::GuidedLocalSearch,
            seed: 0,
            minimize_vehicles: false,
            max_iterations: 100,
            time_weight: 0.7,
            distance_weight: 0.3,
            overtime_slack: 0,
        }
    }
}

/// Values filled into records that omit optional fields.
#[derive(Debug, Clone)]
pub struct ScenarioDefaults {
    /// Service duration in seconds for stops that don't state one.
    pub service_duration: i64,
    /// Depot used for vehicles without explicit start/end locations.
    pub depot: Option<(f64, f64)>,
    pub working_window: TimeWindow,
    pub break_plan: Option<Break>,
}

impl Default for ScenarioDefaults {
    fn default() -> Self {
        Self {
            service_duration: 480,
            depot: None,
            working_window: TimeWindow {
                start: 8 * 3600,
                end: 18 * 3600,
            },
            break_plan: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub matrix: MatrixConfig,
    pub solver: SolverConfig,
    pub defaults: ScenarioDefaults,
}

impl EngineConfig {
    /// Reject configurations the pipeline cannot run with. Checked before
    /// any network or solver call.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.matrix.batch_size == 0 {
            return Err(EngineError::Configuration(
                "matrix batch_size must be at least 1".into(),
            ));
        }
        if self.matrix.concurrency == 0 {
            return Err(EngineError::Configuration(
                "matrix concurrency must be at least 1".into(),
            ));
        }
        if !(self.matrix.average_speed_kmh > 0.0) {
            return Err(EngineError::Configuration(
                "fallback average speed must be positive".into(),
            ));
        }
        if self.solver.time_limit.is_zero() {
            return Err(EngineError::Configuration(
                "solver time limit must be positive".into(),
            ));
        }
        if self.defaults.service_duration < 0 {
            return Err(EngineError::Configuration(
                "default service duration must be non-negative".into(),
            ));
        }
        Ok(())
    }
}
