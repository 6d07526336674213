//! Scenario normalization: raw stop/vehicle records into a solver-ready
//! model.
//!
//! The builder validates and defaults records without touching network or
//! disk. Every rejected record is reported, never just the first.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScenarioDefaults;
use crate::error::{IssueReason, RecordIssue, ValidationError};

/// Ordered pair of absolute timestamps, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: i64, end: i64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// A pause of `duration` seconds to be taken once the clock enters
/// `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Break {
    pub window: TimeWindow,
    pub duration: i64,
}

/// Raw stop row as supplied by the surrounding application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopRecord {
    pub id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub demand: Option<f64>,
    /// Seconds spent at the stop.
    pub service_duration: Option<i64>,
    /// Absolute (start, end) timestamps in seconds.
    pub time_window: Option<(i64, i64)>,
    pub priority: Option<u8>,
}

/// Raw vehicle row as supplied by the surrounding application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleRecord {
    pub id: String,
    pub start: Option<(f64, f64)>,
    pub end: Option<(f64, f64)>,
    pub capacity: Option<f64>,
    pub working_window: Option<(i64, i64)>,
    pub break_window: Option<(i64, i64)>,
    pub break_duration: Option<i64>,
    /// Meters.
    pub max_route_distance: Option<f64>,
    /// Seconds.
    pub max_route_duration: Option<i64>,
}

/// Validated stop. Identity is the id, never the array position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub demand: f64,
    pub service_duration: i64,
    pub time_window: Option<TimeWindow>,
    /// Informational only; the solver does not rank by it.
    pub priority: u8,
}

impl Stop {
    pub fn location(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

/// Validated vehicle. `start`/`end` are `None` only under free-endpoint
/// rules, where the solver picks them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: String,
    pub start: Option<(f64, f64)>,
    pub end: Option<(f64, f64)>,
    /// `None` means unlimited.
    pub capacity: Option<f64>,
    pub working_window: TimeWindow,
    pub break_plan: Option<Break>,
    pub max_route_distance: Option<f64>,
    pub max_route_duration: Option<i64>,
}

/// Global solve rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioRules {
    /// When true, any unservable stop makes the whole solve infeasible.
    pub require_full_service: bool,
    /// Every route returns to its start.
    pub closed_routes: bool,
    /// Open routes may leave endpoints to the solver when records omit
    /// them. Ignored for closed routes.
    pub free_endpoints: bool,
}

impl Default for ScenarioRules {
    fn default() -> Self {
        Self {
            require_full_service: true,
            closed_routes: false,
            free_endpoints: false,
        }
    }
}

/// Canonical, solver-ready bundle of stops, vehicles, and rules.
///
/// Stop and vehicle order is not meaningful but is stable: index↔id
/// mappings built from it hold for the whole pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub stops: Vec<Stop>,
    pub vehicles: Vec<Vehicle>,
    pub rules: ScenarioRules,
    /// Records excluded during normalization, with reasons.
    pub excluded: Vec<RecordIssue>,
}

impl Scenario {
    pub fn total_demand(&self) -> f64 {
        self.stops.iter().map(|s| s.demand).sum()
    }

    /// Largest single-vehicle capacity, `None` when any vehicle is
    /// unlimited.
    pub fn max_capacity(&self) -> Option<f64> {
        let mut max = 0.0_f64;
        for vehicle in &self.vehicles {
            match vehicle.capacity {
                None => return None,
                Some(c) => max = max.max(c),
            }
        }
        Some(max)
    }
}

/// Builds a [`Scenario`] from raw records, or fails with every offending
/// record listed.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    defaults: ScenarioDefaults,
    expected_stop_count: Option<usize>,
}

impl ScenarioBuilder {
    pub fn new(defaults: ScenarioDefaults) -> Self {
        Self {
            defaults,
            expected_stop_count: None,
        }
    }

    /// Declare how many stops must survive normalization. A mismatch fails
    /// the build instead of silently losing records.
    pub fn expect_stops(mut self, count: usize) -> Self {
        self.expected_stop_count = Some(count);
        self
    }

    pub fn build(
        &self,
        stop_records: Vec<StopRecord>,
        vehicle_records: Vec<VehicleRecord>,
        rules: ScenarioRules,
    ) -> Result<Scenario, ValidationError> {
        let mut excluded = Vec::new();

        let stops = self.normalize_stops(stop_records, &mut excluded);
        let vehicles = self.normalize_vehicles(vehicle_records, rules, &mut excluded);

        if let Some(expected) = self.expected_stop_count {
            if stops.len() != expected {
                return Err(ValidationError { issues: excluded });
            }
        }
        if stops.is_empty() || vehicles.is_empty() {
            return Err(ValidationError { issues: excluded });
        }

        debug!(
            stops = stops.len(),
            vehicles = vehicles.len(),
            excluded = excluded.len(),
            "scenario built"
        );
        Ok(Scenario {
            stops,
            vehicles,
            rules,
            excluded,
        })
    }

    fn normalize_stops(
        &self,
        records: Vec<StopRecord>,
        excluded: &mut Vec<RecordIssue>,
    ) -> Vec<Stop> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut stops = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                excluded.push(RecordIssue::new(&record.id, IssueReason::DuplicateId));
                continue;
            }
            let (lat, lon) = match (record.lat, record.lon) {
                (Some(lat), Some(lon)) => (lat, lon),
                _ => {
                    excluded.push(RecordIssue::new(&record.id, IssueReason::MissingCoordinates));
                    continue;
                }
            };
            if let Some(reason) = coordinate_issue(lat, lon) {
                excluded.push(RecordIssue::new(&record.id, reason));
                continue;
            }
            let demand = record.demand.unwrap_or(0.0);
            if !demand.is_finite() || demand < 0.0 {
                excluded.push(RecordIssue::new(&record.id, IssueReason::NegativeDemand));
                continue;
            }
            let time_window = match record.time_window {
                None => None,
                Some((start, end)) => match TimeWindow::new(start, end) {
                    Some(window) => Some(window),
                    None => {
                        excluded
                            .push(RecordIssue::new(&record.id, IssueReason::InvalidTimeWindow));
                        continue;
                    }
                },
            };
            stops.push(Stop {
                id: record.id,
                lat,
                lon,
                demand,
                service_duration: record
                    .service_duration
                    .unwrap_or(self.defaults.service_duration)
                    .max(0),
                time_window,
                priority: record.priority.unwrap_or(3).clamp(1, 5),
            });
        }
        stops
    }

    fn normalize_vehicles(
        &self,
        records: Vec<VehicleRecord>,
        rules: ScenarioRules,
        excluded: &mut Vec<RecordIssue>,
    ) -> Vec<Vehicle> {
        let free = rules.free_endpoints && !rules.closed_routes;
        let mut seen: HashSet<String> = HashSet::new();
        let mut vehicles = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                excluded.push(RecordIssue::new(&record.id, IssueReason::DuplicateId));
                continue;
            }
            let start = record.start.or(self.defaults.depot);
            let end = record.end.or(if rules.closed_routes { start } else { self.defaults.depot });
            if !free && (start.is_none() || end.is_none()) {
                excluded.push(RecordIssue::new(&record.id, IssueReason::MissingLocation));
                continue;
            }
            if let Some(reason) = start
                .and_then(|(lat, lon)| coordinate_issue(lat, lon))
                .or_else(|| end.and_then(|(lat, lon)| coordinate_issue(lat, lon)))
            {
                excluded.push(RecordIssue::new(&record.id, reason));
                continue;
            }
            let end = if rules.closed_routes { start } else { end };
            let working_window = record
                .working_window
                .and_then(|(s, e)| TimeWindow::new(s, e))
                .unwrap_or(self.defaults.working_window);
            let break_plan = match (record.break_window, record.break_duration) {
                (Some((s, e)), duration) => TimeWindow::new(s, e).map(|window| Break {
                    window,
                    duration: duration
                        .unwrap_or_else(|| {
                            self.defaults.break_plan.map_or(window.duration(), |b| b.duration)
                        })
                        .max(0),
                }),
                (None, _) => self.defaults.break_plan,
            };
            vehicles.push(Vehicle {
                id: record.id,
                start,
                end,
                capacity: record.capacity.filter(|c| c.is_finite() && *c >= 0.0),
                working_window,
                break_plan,
                max_route_distance: record.max_route_distance.filter(|d| d.is_finite() && *d > 0.0),
                max_route_duration: record.max_route_duration.filter(|d| *d > 0),
            });
        }
        vehicles
    }
}

fn coordinate_issue(lat: f64, lon: f64) -> Option<IssueReason> {
    if !lat.is_finite() || !lon.is_finite() {
        Some(IssueReason::NonFiniteCoordinates)
    } else if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        Some(IssueReason::CoordinatesOutOfRange)
    } else if lat == 0.0 && lon == 0.0 {
        Some(IssueReason::NullIsland)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, lat: f64, lon: f64) -> StopRecord {
        StopRecord {
            id: id.to_string(),
            lat: Some(lat),
            lon: Some(lon),
            ..StopRecord::default()
        }
    }

    fn vehicle(id: &str, at: (f64, f64)) -> VehicleRecord {
        VehicleRecord {
            id: id.to_string(),
            start: Some(at),
            end: Some(at),
            ..VehicleRecord::default()
        }
    }

    fn builder() -> ScenarioBuilder {
        ScenarioBuilder::new(ScenarioDefaults::default())
    }

    #[test]
    fn null_island_and_out_of_range_are_excluded() {
        let scenario = builder()
            .build(
                vec![
                    stop("ok", 3.45, -76.53),
                    stop("null-island", 0.0, 0.0),
                    stop("bad-lat", 95.0, 10.0),
                ],
                vec![vehicle("v1", (3.4, -76.5))],
                ScenarioRules::default(),
            )
            .unwrap();

        assert_eq!(scenario.stops.len(), 1);
        assert_eq!(scenario.stops[0].id, "ok");
        let reasons: Vec<_> = scenario.excluded.iter().map(|i| i.reason).collect();
        assert!(reasons.contains(&IssueReason::NullIsland));
        assert!(reasons.contains(&IssueReason::CoordinatesOutOfRange));
    }

    #[test]
    fn all_offenders_are_reported_not_just_the_first() {
        let err = builder()
            .build(
                vec![
                    StopRecord {
                        id: "a".into(),
                        ..StopRecord::default()
                    },
                    stop("b", 0.0, 0.0),
                ],
                vec![vehicle("v1", (3.4, -76.5))],
                ScenarioRules::default(),
            )
            .unwrap_err();

        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn duplicate_stop_ids_keep_the_first_occurrence() {
        let scenario = builder()
            .build(
                vec![stop("s1", 1.0, 1.0), stop("s1", 2.0, 2.0)],
                vec![vehicle("v1", (3.4, -76.5))],
                ScenarioRules::default(),
            )
            .unwrap();

        assert_eq!(scenario.stops.len(), 1);
        assert_eq!(scenario.stops[0].lat, 1.0);
        assert_eq!(scenario.excluded[0].reason, IssueReason::DuplicateId);
    }

    #[test]
    fn expected_count_mismatch_fails_loudly() {
        let result = builder().expect_stops(2).build(
            vec![stop("a", 1.0, 1.0), stop("b", 0.0, 0.0)],
            vec![vehicle("v1", (3.4, -76.5))],
            ScenarioRules::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let scenario = builder()
            .build(
                vec![stop("a", 1.0, 1.0)],
                vec![vehicle("v1", (3.4, -76.5))],
                ScenarioRules::default(),
            )
            .unwrap();

        let s = &scenario.stops[0];
        assert_eq!(s.demand, 0.0);
        assert_eq!(s.service_duration, ScenarioDefaults::default().service_duration);
        assert_eq!(s.priority, 3);
        assert_eq!(
            scenario.vehicles[0].working_window,
            ScenarioDefaults::default().working_window
        );
    }

    #[test]
    fn closed_routes_pin_end_to_start() {
        let mut record = vehicle("v1", (3.4, -76.5));
        record.end = Some((9.9, 9.9));
        let scenario = builder()
            .build(
                vec![stop("a", 1.0, 1.0)],
                vec![record],
                ScenarioRules {
                    closed_routes: true,
                    ..ScenarioRules::default()
                },
            )
            .unwrap();

        assert_eq!(scenario.vehicles[0].end, scenario.vehicles[0].start);
    }

    #[test]
    fn vehicle_without_location_needs_depot_or_free_endpoints() {
        let bare = VehicleRecord {
            id: "v1".into(),
            ..VehicleRecord::default()
        };

        let err = builder().build(
            vec![stop("a", 1.0, 1.0)],
            vec![bare.clone()],
            ScenarioRules::default(),
        );
        assert!(err.is_err());

        let defaults = ScenarioDefaults {
            depot: Some((3.4, -76.5)),
            ..ScenarioDefaults::default()
        };
        let scenario = ScenarioBuilder::new(defaults)
            .build(
                vec![stop("a", 1.0, 1.0)],
                vec![bare.clone()],
                ScenarioRules::default(),
            )
            .unwrap();
        assert_eq!(scenario.vehicles[0].start, Some((3.4, -76.5)));

        let free = builder()
            .build(
                vec![stop("a", 1.0, 1.0)],
                vec![bare],
                ScenarioRules {
                    free_endpoints: true,
                    ..ScenarioRules::default()
                },
            )
            .unwrap();
        assert_eq!(free.vehicles[0].start, None);
    }
}
