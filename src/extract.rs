//! Solution extraction: raw optimizer output into ordered stop sequences
//! and KPIs.
//!
//! Route distance and duration are re-summed from the matrices,
//! independently of the optimizer's own accounting, so inconsistencies
//! surface instead of propagating.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::formulation::{NodeKind, NodePlan};
use crate::matrix::{MatrixSource, TravelMatrices};
use crate::scenario::Scenario;
use crate::solver::{Conflict, RawSolution, UnservedReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedRoute {
    pub vehicle_id: String,
    pub stop_ids: Vec<String>,
    /// Meters, re-summed from the distance matrix.
    pub distance: f64,
    /// Seconds of travel plus service, re-summed from the duration matrix.
    pub duration: f64,
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnservedStop {
    pub stop_id: String,
    pub reason: UnservedReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolutionStatus {
    /// Every stop is on a route.
    Complete,
    /// Some stops are unserved and the rules allow it.
    Partial,
    /// Hard constraints admit no assignment.
    Infeasible,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_distance: f64,
    pub total_duration: f64,
    pub served_ratio: f64,
    /// Standard deviation of stops-per-vehicle across used vehicles.
    pub stop_balance: f64,
    pub vehicles_used: usize,
}

/// The structured result handed to the presentation layer. Always present,
/// even in total failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSolution {
    pub routes: Vec<PlannedRoute>,
    pub unserved: Vec<UnservedStop>,
    /// Populated when `status` is `Infeasible`.
    pub conflicts: Vec<Conflict>,
    pub status: SolutionStatus,
    /// False when the search was cut by the time limit or never converged.
    pub optimality_proven: bool,
    pub matrix_source: MatrixSource,
    pub kpis: Kpis,
}

impl RouteSolution {
    /// Failure result: no routes, every stop unserved, conflicts as the
    /// reason code.
    pub fn infeasible(
        scenario: &Scenario,
        conflicts: Vec<Conflict>,
        matrix_source: MatrixSource,
    ) -> Self {
        let unserved = scenario
            .stops
            .iter()
            .map(|stop| UnservedStop {
                stop_id: stop.id.clone(),
                reason: conflicts
                    .iter()
                    .find(|c| c.stop_id == stop.id)
                    .map(|c| c.reason)
                    .unwrap_or(UnservedReason::NoVehicleFeasible),
            })
            .collect();
        Self {
            routes: Vec::new(),
            unserved,
            conflicts,
            status: SolutionStatus::Infeasible,
            optimality_proven: false,
            matrix_source,
            kpis: Kpis {
                total_distance: 0.0,
                total_duration: 0.0,
                served_ratio: 0.0,
                stop_balance: 0.0,
                vehicles_used: 0,
            },
        }
    }
}

/// Translate node paths back to stop ids, re-sum totals, and compute KPIs.
pub fn extract(
    scenario: &Scenario,
    plan: &NodePlan,
    matrices: &TravelMatrices,
    raw: &RawSolution,
) -> RouteSolution {
    let mut routes = Vec::new();
    let mut served: HashSet<usize> = HashSet::new();

    for (vehicle_idx, path) in raw.paths.iter().enumerate() {
        let stop_indices: Vec<usize> = path
            .iter()
            .filter_map(|&node| match plan.kind(node) {
                NodeKind::Stop(i) => Some(i),
                NodeKind::Depot | NodeKind::Virtual => None,
            })
            .collect();
        if stop_indices.is_empty() {
            continue;
        }

        let (distance, duration) = resum(plan, matrices, scenario, path);
        if let Some(&(reported_m, _)) = raw.costs.get(vehicle_idx) {
            if reported_m > 0.0 && (reported_m - distance).abs() > 1.0 {
                warn!(
                    vehicle = %scenario.vehicles[vehicle_idx].id,
                    reported = reported_m,
                    resummed = distance,
                    "optimizer-reported distance disagrees with the matrix re-sum"
                );
            }
        }

        let mut load = 0.0;
        let mut stop_ids = Vec::with_capacity(stop_indices.len());
        for &i in &stop_indices {
            served.insert(i);
            load += scenario.stops[i].demand;
            stop_ids.push(scenario.stops[i].id.clone());
        }
        routes.push(PlannedRoute {
            vehicle_id: scenario.vehicles[vehicle_idx].id.clone(),
            stop_ids,
            distance,
            duration,
            load,
        });
    }

    let mut unserved: Vec<UnservedStop> = raw
        .unserved
        .iter()
        .map(|&(i, reason)| UnservedStop {
            stop_id: scenario.stops[i].id.clone(),
            reason,
        })
        .collect();

    // Completeness check: no stop may silently disappear.
    let listed: HashSet<String> = unserved.iter().map(|u| u.stop_id.clone()).collect();
    for (i, stop) in scenario.stops.iter().enumerate() {
        if !served.contains(&i) && !listed.contains(stop.id.as_str()) {
            debug_assert!(false, "stop {} missing from both served and unserved", stop.id);
            warn!(stop = %stop.id, "stop missing from both served and unserved; listing it");
            unserved.push(UnservedStop {
                stop_id: stop.id.clone(),
                reason: UnservedReason::NoVehicleFeasible,
            });
        }
    }

    let total_stops = scenario.stops.len();
    let served_ratio = if total_stops == 0 {
        1.0
    } else {
        served.len() as f64 / total_stops as f64
    };
    let kpis = Kpis {
        total_distance: routes.iter().map(|r| r.distance).sum(),
        total_duration: routes.iter().map(|r| r.duration).sum(),
        served_ratio,
        stop_balance: stddev(routes.iter().map(|r| r.stop_ids.len() as f64)),
        vehicles_used: routes.len(),
    };
    let status = if unserved.is_empty() {
        SolutionStatus::Complete
    } else {
        SolutionStatus::Partial
    };

    RouteSolution {
        routes,
        unserved,
        conflicts: Vec::new(),
        status,
        optimality_proven: raw.converged && !raw.time_limit_hit,
        matrix_source: matrices.source,
        kpis,
    }
}

/// Walk a node path and re-sum distance and duration (travel, window
/// waits, service) from the matrices.
fn resum(
    plan: &NodePlan,
    matrices: &TravelMatrices,
    scenario: &Scenario,
    path: &[usize],
) -> (f64, f64) {
    let mut distance = 0.0;
    let mut travel = 0.0;
    for pair in path.windows(2) {
        let (leg_m, leg_s) = plan.arc(matrices, pair[0], pair[1]);
        distance += leg_m;
        travel += leg_s;
    }
    let service: f64 = path
        .iter()
        .filter_map(|&node| plan.stop_index(node))
        .map(|i| scenario.stops[i].service_duration as f64)
        .sum();
    (distance, travel + service)
}

fn stddev(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stddev_of_balanced_fleet_is_zero() {
        assert_eq!(stddev([4.0, 4.0, 4.0].into_iter()), 0.0);
    }

    #[test]
    fn stddev_of_skewed_fleet_is_positive() {
        assert!(stddev([1.0, 7.0].into_iter()) > 2.9);
    }

    #[test]
    fn stddev_of_single_route_is_zero() {
        assert_eq!(stddev([5.0].into_iter()), 0.0);
    }
}
