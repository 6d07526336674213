//! Constraint solve over a node plan.
//!
//! Builds per-vehicle cumulative dimensions (load, time, route distance
//! and duration) while scheduling, pre-scans structural conflicts,
//! optionally minimizes the vehicle count, and drives an [`Optimizer`]
//! under a wall-clock deadline. The bundled optimizer is a
//! cheapest-insertion construction followed by seeded local search.

use std::fmt;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{SearchStrategy, SolverConfig};
use crate::formulation::NodePlan;
use crate::matrix::TravelMatrices;
use crate::scenario::{Scenario, Vehicle};
use crate::traits::Optimizer;

/// Everything an optimizer needs for one attempt.
pub struct Problem<'a> {
    pub scenario: &'a Scenario,
    pub plan: &'a NodePlan,
    pub matrices: &'a TravelMatrices,
    /// Scenario stop indices the optimizer must try to serve.
    pub active_stops: &'a [usize],
    /// Only the first `enabled_vehicles` vehicles may be used.
    pub enabled_vehicles: usize,
    pub config: &'a SolverConfig,
}

/// Why a stop is not on any route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnservedReason {
    /// Its time window cannot be met by any vehicle's working window.
    TimeWindowUnreachable,
    /// Its demand exceeds every vehicle's capacity.
    DemandExceedsCapacity,
    /// No feasible insertion was found under the combined constraints.
    NoVehicleFeasible,
}

impl fmt::Display for UnservedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnservedReason::TimeWindowUnreachable => "time window unreachable",
            UnservedReason::DemandExceedsCapacity => "demand exceeds capacity",
            UnservedReason::NoVehicleFeasible => "no feasible vehicle",
        };
        f.write_str(text)
    }
}

/// A stop that makes the scenario structurally infeasible, and the
/// constraint it violates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub stop_id: String,
    pub reason: UnservedReason,
}

/// Raw optimizer output, in node-index space.
#[derive(Debug, Clone)]
pub struct RawSolution {
    /// Node path per enabled vehicle, endpoints included.
    pub paths: Vec<Vec<usize>>,
    /// Optimizer-reported (meters, seconds) per path.
    pub costs: Vec<(f64, f64)>,
    /// Active stops the optimizer could not place.
    pub unserved: Vec<(usize, UnservedReason)>,
    /// The search reached a local optimum before the deadline.
    pub converged: bool,
    pub time_limit_hit: bool,
}

#[derive(Debug)]
pub enum SolveOutcome {
    Solved(RawSolution),
    Infeasible(Vec<Conflict>),
}

/// Dimension totals for one scheduled route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteSchedule {
    pub load: f64,
    /// Meters driven.
    pub distance: f64,
    /// Elapsed seconds from working-window start to route end: travel,
    /// window waits, service, and break.
    pub duration: f64,
}

/// Walks a candidate stop sequence for one vehicle, accumulating every
/// dimension; `None` when any hard constraint is violated.
pub fn schedule_route(
    vehicle: &Vehicle,
    vehicle_idx: usize,
    stop_seq: &[usize],
    scenario: &Scenario,
    plan: &NodePlan,
    matrices: &TravelMatrices,
    config: &SolverConfig,
) -> Option<RouteSchedule> {
    let window = vehicle.working_window;
    let shift_end = (window.end + config.overtime_slack) as f64;
    let mut time = window.start as f64;
    let mut load = 0.0_f64;
    let mut distance = 0.0_f64;
    let mut pending_break = vehicle.break_plan;
    let mut node = plan.vehicle_start(vehicle_idx);

    for &stop_idx in stop_seq {
        let stop = &scenario.stops[stop_idx];
        let next = plan.node_of_stop(stop_idx);
        let (leg_m, leg_s) = plan.arc(matrices, node, next);
        time += leg_s;
        distance += leg_m;

        if let Some(brk) = pending_break {
            if time >= brk.window.start as f64 {
                time += brk.duration as f64;
                pending_break = None;
            }
        }
        if let Some(tw) = stop.time_window {
            if time < tw.start as f64 {
                time = tw.start as f64;
            }
            if time > tw.end as f64 {
                return None;
            }
        }
        load += stop.demand;
        if let Some(capacity) = vehicle.capacity {
            if load > capacity + 1e-9 {
                return None;
            }
        }
        time += stop.service_duration as f64;
        if time > shift_end {
            return None;
        }
        node = next;
    }

    let (leg_m, leg_s) = plan.arc(matrices, node, plan.vehicle_end(vehicle_idx));
    time += leg_s;
    distance += leg_m;
    if time > shift_end {
        return None;
    }
    if let Some(max_m) = vehicle.max_route_distance {
        if distance > max_m {
            return None;
        }
    }
    let duration = time - window.start as f64;
    if let Some(max_s) = vehicle.max_route_duration {
        if duration > max_s as f64 {
            return None;
        }
    }
    Some(RouteSchedule {
        load,
        distance,
        duration,
    })
}

/// Stops that no vehicle can serve in isolation, with the violated
/// constraint.
fn structural_conflicts(
    scenario: &Scenario,
    plan: &NodePlan,
    matrices: &TravelMatrices,
    config: &SolverConfig,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, stop) in scenario.stops.iter().enumerate() {
        let demand_fits = scenario
            .vehicles
            .iter()
            .any(|v| v.capacity.is_none_or(|c| stop.demand <= c + 1e-9));
        if !demand_fits {
            conflicts.push(Conflict {
                stop_id: stop.id.clone(),
                reason: UnservedReason::DemandExceedsCapacity,
            });
            continue;
        }
        let reachable = (0..scenario.vehicles.len()).any(|v| {
            schedule_route(&scenario.vehicles[v], v, &[i], scenario, plan, matrices, config)
                .is_some()
        });
        if !reachable {
            let reason = if stop.time_window.is_some() {
                UnservedReason::TimeWindowUnreachable
            } else {
                UnservedReason::NoVehicleFeasible
            };
            conflicts.push(Conflict {
                stop_id: stop.id.clone(),
                reason,
            });
        }
    }
    conflicts
}

/// Full constraint solve: conflict pre-scan, optional vehicle-count
/// minimization, optimizer invocation under the configured deadline.
pub fn solve(
    scenario: &Scenario,
    plan: &NodePlan,
    matrices: &TravelMatrices,
    config: &SolverConfig,
    optimizer: &dyn Optimizer,
) -> SolveOutcome {
    let deadline = Instant::now() + config.time_limit;

    let conflicts = structural_conflicts(scenario, plan, matrices, config);
    if scenario.rules.require_full_service && !conflicts.is_empty() {
        info!(conflicts = conflicts.len(), "scenario is structurally infeasible");
        return SolveOutcome::Infeasible(conflicts);
    }

    let conflicted: Vec<usize> = scenario
        .stops
        .iter()
        .enumerate()
        .filter(|(_, stop)| conflicts.iter().any(|c| c.stop_id == stop.id))
        .map(|(i, _)| i)
        .collect();
    let active: Vec<usize> = (0..scenario.stops.len())
        .filter(|i| !conflicted.contains(i))
        .collect();

    let fleet = scenario.vehicles.len();
    let attempts: Vec<usize> = if config.minimize_vehicles && fleet > 1 {
        (vehicle_lower_bound(scenario, &active)..=fleet).collect()
    } else {
        vec![fleet]
    };

    let mut best: Option<RawSolution> = None;
    for enabled in attempts {
        if best.is_some() && Instant::now() >= deadline {
            break;
        }
        debug!(enabled, "solver attempt");
        let problem = Problem {
            scenario,
            plan,
            matrices,
            active_stops: &active,
            enabled_vehicles: enabled,
            config,
        };
        let raw = optimizer.optimize(&problem, deadline);
        let solved_all = raw.unserved.is_empty();
        let better = best
            .as_ref()
            .is_none_or(|b| raw.unserved.len() < b.unserved.len());
        if better {
            best = Some(raw);
        }
        if solved_all {
            break;
        }
    }

    let mut raw = match best {
        Some(raw) => raw,
        // Unreachable with a non-empty fleet; return a fully-unserved result
        // rather than panicking.
        None => RawSolution {
            paths: Vec::new(),
            costs: Vec::new(),
            unserved: active
                .iter()
                .map(|&i| (i, UnservedReason::NoVehicleFeasible))
                .collect(),
            converged: false,
            time_limit_hit: false,
        },
    };

    if scenario.rules.require_full_service && !raw.unserved.is_empty() {
        let conflicts = raw
            .unserved
            .iter()
            .map(|&(i, reason)| Conflict {
                stop_id: scenario.stops[i].id.clone(),
                reason,
            })
            .collect();
        return SolveOutcome::Infeasible(conflicts);
    }

    for (i, stop) in scenario.stops.iter().enumerate() {
        if conflicted.contains(&i) {
            let reason = conflicts
                .iter()
                .find(|c| c.stop_id == stop.id)
                .map(|c| c.reason)
                .unwrap_or(UnservedReason::NoVehicleFeasible);
            raw.unserved.push((i, reason));
        }
    }

    info!(
        routes = raw.paths.iter().filter(|p| p.len() > 2).count(),
        unserved = raw.unserved.len(),
        time_limit_hit = raw.time_limit_hit,
        "solve finished"
    );
    SolveOutcome::Solved(raw)
}

/// Demand-based lower bound for the minimization pre-pass:
/// `ceil(total demand / max capacity)`, at least 1.
fn vehicle_lower_bound(scenario: &Scenario, active: &[usize]) -> usize {
    let demand: f64 = active.iter().map(|&i| scenario.stops[i].demand).sum();
    match scenario.max_capacity() {
        Some(capacity) if capacity > 0.0 && demand > 0.0 => {
            ((demand / capacity).ceil() as usize).clamp(1, scenario.vehicles.len())
        }
        _ => 1,
    }
}

// ============================================================================
// Bundled optimizer
// ============================================================================

/// Cheapest-insertion construction plus seeded local search (2-opt and
/// inter-route relocation), honoring the deadline and returning the best
/// assignment found so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSearchOptimizer;

#[derive(Clone)]
struct RouteBuild {
    stops: Vec<usize>,
    /// `None` marks a vehicle that cannot even drive its empty route.
    schedule: Option<RouteSchedule>,
}

impl Optimizer for LocalSearchOptimizer {
    fn optimize(&self, problem: &Problem<'_>, deadline: Instant) -> RawSolution {
        let enabled = problem.enabled_vehicles.min(problem.scenario.vehicles.len());
        let mut routes: Vec<RouteBuild> = (0..enabled)
            .map(|v| RouteBuild {
                stops: Vec::new(),
                schedule: reschedule(problem, v, &[]),
            })
            .collect();

        let mut unserved = construct(problem, &mut routes);

        let mut converged = false;
        let mut time_limit_hit = false;
        if problem.config.strategy == SearchStrategy::GuidedLocalSearch {
            let mut rng = StdRng::seed_from_u64(problem.config.seed);
            let mut best = (routes.clone(), unserved.clone());
            let mut best_cost = fleet_cost(&routes, problem.config);
            let mut fruitless_perturbs = 0;

            for _ in 0..problem.config.max_iterations {
                if Instant::now() >= deadline {
                    time_limit_hit = true;
                    break;
                }
                let mut improved = false;
                for r in 0..routes.len() {
                    improved |= two_opt(problem, &mut routes[r], r);
                }
                improved |= relocate(problem, &mut routes);
                improved |= reinsert_unserved(problem, &mut routes, &mut unserved);

                let cost = fleet_cost(&routes, problem.config);
                let fewer_unserved = unserved.len() < best.1.len();
                if fewer_unserved || (unserved.len() == best.1.len() && cost + 1e-6 < best_cost) {
                    best = (routes.clone(), unserved.clone());
                    best_cost = cost;
                    fruitless_perturbs = 0;
                }
                if !improved {
                    // Local optimum: escape twice before declaring the
                    // search exhausted.
                    if fruitless_perturbs >= 2 {
                        converged = true;
                        break;
                    }
                    perturb(problem, &mut routes, &mut rng);
                    fruitless_perturbs += 1;
                }
            }
            routes = best.0;
            unserved = best.1;
        }

        let paths = routes
            .iter()
            .enumerate()
            .map(|(v, route)| {
                let mut path = Vec::with_capacity(route.stops.len() + 2);
                path.push(problem.plan.vehicle_start(v));
                path.extend(route.stops.iter().map(|&s| problem.plan.node_of_stop(s)));
                path.push(problem.plan.vehicle_end(v));
                path
            })
            .collect();
        let costs = routes
            .iter()
            .map(|route| match (&route.schedule, route.stops.is_empty()) {
                (Some(schedule), false) => (schedule.distance, schedule.duration),
                _ => (0.0, 0.0),
            })
            .collect();

        RawSolution {
            paths,
            costs,
            unserved,
            converged,
            time_limit_hit,
        }
    }
}

fn reschedule(problem: &Problem<'_>, vehicle_idx: usize, stops: &[usize]) -> Option<RouteSchedule> {
    schedule_route(
        &problem.scenario.vehicles[vehicle_idx],
        vehicle_idx,
        stops,
        problem.scenario,
        problem.plan,
        problem.matrices,
        problem.config,
    )
}

fn route_cost(schedule: &RouteSchedule, config: &SolverConfig) -> f64 {
    config.time_weight * schedule.duration + config.distance_weight * schedule.distance
}

fn fleet_cost(routes: &[RouteBuild], config: &SolverConfig) -> f64 {
    routes
        .iter()
        .filter(|r| !r.stops.is_empty())
        .filter_map(|r| r.schedule.as_ref())
        .map(|s| route_cost(s, config))
        .sum()
}

/// Cheapest-insertion construction in deterministic stop order.
fn construct(problem: &Problem<'_>, routes: &mut [RouteBuild]) -> Vec<(usize, UnservedReason)> {
    let mut unserved = Vec::new();
    for &stop_idx in problem.active_stops {
        if !insert_cheapest(problem, routes, stop_idx) {
            unserved.push((stop_idx, UnservedReason::NoVehicleFeasible));
        }
    }
    unserved
}

/// Insert one stop at its cheapest feasible position across all routes.
fn insert_cheapest(problem: &Problem<'_>, routes: &mut [RouteBuild], stop_idx: usize) -> bool {
    let mut best: Option<(usize, usize, RouteSchedule, f64)> = None;
    for (r, route) in routes.iter().enumerate() {
        let Some(current) = route.schedule else {
            continue;
        };
        let current_cost = if route.stops.is_empty() {
            0.0
        } else {
            route_cost(&current, problem.config)
        };
        for pos in 0..=route.stops.len() {
            let mut candidate = route.stops.clone();
            candidate.insert(pos, stop_idx);
            if let Some(schedule) = reschedule(problem, r, &candidate) {
                let delta = route_cost(&schedule, problem.config) - current_cost;
                if best.as_ref().is_none_or(|(_, _, _, d)| delta < *d) {
                    best = Some((r, pos, schedule, delta));
                }
            }
        }
    }
    match best {
        Some((r, pos, schedule, _)) => {
            routes[r].stops.insert(pos, stop_idx);
            routes[r].schedule = Some(schedule);
            true
        }
        None => false,
    }
}

/// 2-opt: reverse a segment within a route. First improvement wins.
fn two_opt(problem: &Problem<'_>, route: &mut RouteBuild, vehicle_idx: usize) -> bool {
    if route.stops.len() < 3 {
        return false;
    }
    let Some(current) = route.schedule else {
        return false;
    };
    let current_cost = route_cost(&current, problem.config);
    let n = route.stops.len();

    for i in 0..n - 1 {
        for j in i + 2..n {
            let mut candidate = route.stops.clone();
            candidate[i + 1..=j].reverse();
            if let Some(schedule) = reschedule(problem, vehicle_idx, &candidate) {
                if route_cost(&schedule, problem.config) + 1e-9 < current_cost {
                    route.stops = candidate;
                    route.schedule = Some(schedule);
                    return true;
                }
            }
        }
    }
    false
}

/// Relocate: move one stop to another position in the same or another
/// route. First improvement wins.
fn relocate(problem: &Problem<'_>, routes: &mut [RouteBuild]) -> bool {
    for from in 0..routes.len() {
        for visit_idx in 0..routes[from].stops.len() {
            let stop_idx = routes[from].stops[visit_idx];
            for to in 0..routes.len() {
                let current_pair_cost = pair_cost(routes, from, to, problem.config);
                let mut from_candidate = routes[from].stops.clone();
                from_candidate.remove(visit_idx);

                let positions = if from == to {
                    from_candidate.len() + 1
                } else {
                    routes[to].stops.len() + 1
                };
                for pos in 0..positions {
                    if from == to && (pos == visit_idx) {
                        continue;
                    }
                    if from == to {
                        let mut candidate = from_candidate.clone();
                        candidate.insert(pos, stop_idx);
                        let Some(schedule) = reschedule(problem, from, &candidate) else {
                            continue;
                        };
                        if route_cost(&schedule, problem.config) + 1e-9 < current_pair_cost {
                            routes[from].stops = candidate;
                            routes[from].schedule = Some(schedule);
                            return true;
                        }
                    } else {
                        if routes[to].schedule.is_none() {
                            break;
                        }
                        let mut to_candidate = routes[to].stops.clone();
                        to_candidate.insert(pos, stop_idx);
                        let Some(from_schedule) = reschedule(problem, from, &from_candidate)
                        else {
                            continue;
                        };
                        let Some(to_schedule) = reschedule(problem, to, &to_candidate) else {
                            continue;
                        };
                        let moved_cost = optional_cost(&from_candidate, &from_schedule, problem)
                            + route_cost(&to_schedule, problem.config);
                        if moved_cost + 1e-9 < current_pair_cost {
                            routes[from].stops = from_candidate;
                            routes[from].schedule = Some(from_schedule);
                            routes[to].stops = to_candidate;
                            routes[to].schedule = Some(to_schedule);
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

fn optional_cost(stops: &[usize], schedule: &RouteSchedule, problem: &Problem<'_>) -> f64 {
    if stops.is_empty() {
        0.0
    } else {
        route_cost(schedule, problem.config)
    }
}

fn pair_cost(routes: &[RouteBuild], from: usize, to: usize, config: &SolverConfig) -> f64 {
    let single = |r: usize| {
        if routes[r].stops.is_empty() {
            0.0
        } else {
            routes[r]
                .schedule
                .as_ref()
                .map_or(0.0, |s| route_cost(s, config))
        }
    };
    if from == to {
        single(from)
    } else {
        single(from) + single(to)
    }
}

/// Retry unserved stops after the routes have been reshaped.
fn reinsert_unserved(
    problem: &Problem<'_>,
    routes: &mut [RouteBuild],
    unserved: &mut Vec<(usize, UnservedReason)>,
) -> bool {
    let mut improved = false;
    unserved.retain(|&(stop_idx, _)| {
        if insert_cheapest(problem, routes, stop_idx) {
            improved = true;
            false
        } else {
            true
        }
    });
    improved
}

/// Reverse a random feasible segment to escape a local optimum. The next
/// rounds re-descend; the caller keeps the best snapshot.
fn perturb(problem: &Problem<'_>, routes: &mut [RouteBuild], rng: &mut StdRng) {
    let candidates: Vec<usize> = routes
        .iter()
        .enumerate()
        .filter(|(_, r)| r.stops.len() >= 3)
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return;
    }
    let r = candidates[rng.random_range(0..candidates.len())];
    let n = routes[r].stops.len();
    let i = rng.random_range(0..n - 1);
    let j = rng.random_range(i + 1..n);
    let mut candidate = routes[r].stops.clone();
    candidate[i..=j].reverse();
    if let Some(schedule) = reschedule(problem, r, &candidate) {
        routes[r].stops = candidate;
        routes[r].schedule = Some(schedule);
    }
}
