//! Pipeline façade: raw records → scenario → matrices → solve → solution.
//!
//! The engine owns no per-solve state; independent scenarios can be solved
//! concurrently from multiple threads sharing one engine.

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extract::{self, RouteSolution};
use crate::formulation::NodePlan;
use crate::matrix::{MatrixProvider, TravelMatrices};
use crate::osrm::OsrmClient;
use crate::scenario::{Scenario, ScenarioBuilder, ScenarioRules, StopRecord, VehicleRecord};
use crate::solver::{self, LocalSearchOptimizer, SolveOutcome};
use crate::traits::{Optimizer, RoutingService};

pub struct RoutingEngine<S = OsrmClient, O = LocalSearchOptimizer> {
    config: EngineConfig,
    provider: MatrixProvider<S>,
    optimizer: O,
}

impl RoutingEngine<OsrmClient, LocalSearchOptimizer> {
    /// Engine with the bundled optimizer. `service` is `None` to run purely
    /// on geometric estimates.
    pub fn new(config: EngineConfig, service: Option<OsrmClient>) -> Result<Self, EngineError> {
        Self::with_parts(config, service, LocalSearchOptimizer)
    }
}

impl<S: RoutingService, O: Optimizer> RoutingEngine<S, O> {
    /// Engine with explicit collaborators. Configuration problems are
    /// rejected here, before any solve can reach the network or the
    /// optimizer.
    pub fn with_parts(
        config: EngineConfig,
        service: Option<S>,
        optimizer: O,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let provider = MatrixProvider::new(
            config.matrix.clone(),
            service,
            Arc::new(CacheStore::new()),
        )?;
        Ok(Self {
            config,
            provider,
            optimizer,
        })
    }

    /// Full pipeline from raw records.
    pub fn solve_records(
        &self,
        stops: Vec<StopRecord>,
        vehicles: Vec<VehicleRecord>,
        rules: ScenarioRules,
    ) -> Result<RouteSolution, EngineError> {
        let scenario =
            ScenarioBuilder::new(self.config.defaults.clone()).build(stops, vehicles, rules)?;
        Ok(self.solve_scenario(&scenario))
    }

    /// Pipeline from a pre-built scenario. Always yields a structured
    /// result; infeasibility is a status, not an error.
    pub fn solve_scenario(&self, scenario: &Scenario) -> RouteSolution {
        let plan = NodePlan::for_scenario(scenario);
        info!(
            stops = scenario.stops.len(),
            vehicles = scenario.vehicles.len(),
            nodes = plan.node_count(),
            formulation = ?plan.formulation,
            "solving scenario"
        );

        let matrices = self.provider.matrices(&plan.coords);
        debug_assert_eq!(matrices.len(), plan.real_count());

        match solver::solve(
            scenario,
            &plan,
            &matrices,
            &self.config.solver,
            &self.optimizer,
        ) {
            SolveOutcome::Solved(raw) => extract::extract(scenario, &plan, &matrices, &raw),
            SolveOutcome::Infeasible(conflicts) => {
                RouteSolution::infeasible(scenario, conflicts, matrices.source)
            }
        }
    }

    /// Matrix access for callers that only need travel costs.
    pub fn travel_matrices(&self, coords: &[(f64, f64)]) -> TravelMatrices {
        self.provider.matrices(coords)
    }
}
