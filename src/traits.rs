//! Collaborator seams for the routing engine.
//!
//! The engine talks to the outside world through these two traits: a
//! routing service that prices legs over the real road network, and an
//! optimizer that searches for route assignments. Concrete adapters live in
//! their own modules; tests substitute mocks.

use std::time::Instant;

use crate::error::ServiceError;
use crate::solver::{Problem, RawSolution};

/// One batched answer from the routing service: a row per source, a column
/// per destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTable {
    /// Meters.
    pub distances: Vec<Vec<f64>>,
    /// Seconds.
    pub durations: Vec<Vec<f64>>,
}

/// Prices source→destination legs over the road network.
///
/// Implementations must report unavailability as
/// [`ServiceError::Unavailable`], which is distinct from a successful but
/// empty table.
pub trait RoutingService: Send + Sync {
    fn table(
        &self,
        sources: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Result<ServiceTable, ServiceError>;
}

/// Searches for route assignments under the problem's constraints.
///
/// Implementations must honor `deadline` and return the best assignment
/// found so far rather than nothing, and must be deterministic for a fixed
/// `problem.config.seed` and identical inputs.
pub trait Optimizer: Send + Sync {
    fn optimize(&self, problem: &Problem<'_>, deadline: Instant) -> RawSolution;
}
