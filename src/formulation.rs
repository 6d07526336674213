//! Route formulation selection and the node index mapping.
//!
//! The formulation is picked exactly once per solve and threaded through
//! as an immutable value; nothing downstream re-inspects start/end
//! equality. Node order is depots first, stops after, one virtual node
//! last when endpoints are free. Matrices cover only the real nodes; the
//! virtual node exists purely in the solver's index space with zero-cost
//! arcs.

use std::collections::HashMap;

use crate::matrix::{quantize, TravelMatrices};
use crate::scenario::Scenario;

/// Which index-mapping shape the solve uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formulation {
    /// Every vehicle starts and ends at one shared depot.
    ClosedTour { depot: usize },
    /// Every vehicle returns to its own depot, but depots differ.
    MultiDepot { starts: Vec<usize>, ends: Vec<usize> },
    /// At least one vehicle ends away from its start (fixed or free
    /// endpoints).
    OpenPath { starts: Vec<usize>, ends: Vec<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Depot,
    /// Index into `Scenario::stops`.
    Stop(usize),
    Virtual,
}

/// Immutable node index space for one solve.
#[derive(Debug, Clone)]
pub struct NodePlan {
    /// One entry per real node, in matrix order.
    pub coords: Vec<(f64, f64)>,
    kinds: Vec<NodeKind>,
    pub formulation: Formulation,
    /// Scenario stop index → node index.
    stop_nodes: Vec<usize>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl NodePlan {
    /// Build the index mapping and select the formulation for a scenario.
    pub fn for_scenario(scenario: &Scenario) -> Self {
        let mut coords: Vec<(f64, f64)> = Vec::new();
        let mut kinds: Vec<NodeKind> = Vec::new();
        let mut depot_index: HashMap<(i64, i64), usize> = HashMap::new();

        let mut intern_depot = |coord: (f64, f64), coords: &mut Vec<(f64, f64)>, kinds: &mut Vec<NodeKind>| {
            *depot_index.entry(quantize(coord)).or_insert_with(|| {
                coords.push(coord);
                kinds.push(NodeKind::Depot);
                coords.len() - 1
            })
        };

        // Endpoint nodes per vehicle; None marks a free endpoint for now.
        let mut starts: Vec<Option<usize>> = Vec::with_capacity(scenario.vehicles.len());
        let mut ends: Vec<Option<usize>> = Vec::with_capacity(scenario.vehicles.len());
        for vehicle in &scenario.vehicles {
            starts.push(vehicle.start.map(|c| intern_depot(c, &mut coords, &mut kinds)));
            ends.push(vehicle.end.map(|c| intern_depot(c, &mut coords, &mut kinds)));
        }

        let depot_count = coords.len();
        let mut stop_nodes = Vec::with_capacity(scenario.stops.len());
        for (i, stop) in scenario.stops.iter().enumerate() {
            coords.push(stop.location());
            kinds.push(NodeKind::Stop(i));
            stop_nodes.push(depot_count + i);
        }

        let any_free = starts.iter().chain(ends.iter()).any(Option::is_none);
        let virtual_node = if any_free {
            kinds.push(NodeKind::Virtual);
            Some(kinds.len() - 1)
        } else {
            None
        };
        let starts: Vec<usize> = starts
            .iter()
            .copied()
            .map(|e| e.or(virtual_node).expect("free endpoint implies a virtual node"))
            .collect();
        let ends: Vec<usize> = ends
            .iter()
            .copied()
            .map(|e| e.or(virtual_node).expect("free endpoint implies a virtual node"))
            .collect();

        let round_trip = !any_free && starts == ends;
        let formulation = if round_trip && !starts.is_empty() && starts.windows(2).all(|w| w[0] == w[1]) {
            Formulation::ClosedTour { depot: starts[0] }
        } else if round_trip {
            Formulation::MultiDepot {
                starts: starts.clone(),
                ends: ends.clone(),
            }
        } else {
            Formulation::OpenPath {
                starts: starts.clone(),
                ends: ends.clone(),
            }
        };

        Self {
            coords,
            kinds,
            formulation,
            stop_nodes,
            starts,
            ends,
        }
    }

    /// Total node count, virtual node included.
    pub fn node_count(&self) -> usize {
        self.kinds.len()
    }

    /// Nodes backed by a coordinate (and therefore by matrix entries).
    pub fn real_count(&self) -> usize {
        self.coords.len()
    }

    pub fn kind(&self, node: usize) -> NodeKind {
        self.kinds[node]
    }

    /// Scenario stop index behind a node, if it is a stop node.
    pub fn stop_index(&self, node: usize) -> Option<usize> {
        match self.kinds[node] {
            NodeKind::Stop(i) => Some(i),
            _ => None,
        }
    }

    pub fn node_of_stop(&self, stop_index: usize) -> usize {
        self.stop_nodes[stop_index]
    }

    pub fn vehicle_start(&self, vehicle: usize) -> usize {
        self.starts[vehicle]
    }

    pub fn vehicle_end(&self, vehicle: usize) -> usize {
        self.ends[vehicle]
    }

    /// (meters, seconds) for one arc; arcs touching the virtual node cost
    /// nothing.
    pub fn arc(&self, matrices: &TravelMatrices, from: usize, to: usize) -> (f64, f64) {
        if from >= self.coords.len() || to >= self.coords.len() {
            return (0.0, 0.0);
        }
        (
            matrices.distances[from][to],
            matrices.durations[from][to],
        )
    }
}
