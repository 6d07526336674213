//! fleet-router: vehicle visit-sequence planning.
//!
//! Normalizes raw stop/vehicle records into scenarios, prices travel with
//! cached routing-service matrices (great-circle fallback when the service
//! is down), and solves capacity/time-window/route-cap constrained routing
//! under a wall-clock deadline.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod formulation;
pub mod haversine;
pub mod matrix;
pub mod osrm;
pub mod scenario;
pub mod solver;
pub mod traits;
