//! Error taxonomy for the routing engine.
//!
//! Validation and configuration problems abort a solve before any network
//! or optimizer work. Routing-service failures are recovered inside the
//! matrix provider and never escape it. Infeasibility and time-limit
//! conditions are structured results, not errors.

use std::fmt;

use thiserror::Error;

/// Why a raw record was rejected or dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum IssueReason {
    MissingCoordinates,
    NonFiniteCoordinates,
    CoordinatesOutOfRange,
    /// (0, 0) is treated as "no GPS fix", never a real location.
    NullIsland,
    DuplicateId,
    NegativeDemand,
    InvalidTimeWindow,
    /// Vehicle has no start/end and no default depot is configured.
    MissingLocation,
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IssueReason::MissingCoordinates => "missing coordinates",
            IssueReason::NonFiniteCoordinates => "non-finite coordinates",
            IssueReason::CoordinatesOutOfRange => "coordinates out of range",
            IssueReason::NullIsland => "coordinates at (0, 0)",
            IssueReason::DuplicateId => "duplicate id",
            IssueReason::NegativeDemand => "negative demand",
            IssueReason::InvalidTimeWindow => "time window end precedes start",
            IssueReason::MissingLocation => "no location and no default depot",
        };
        f.write_str(text)
    }
}

/// A single rejected record: which one and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RecordIssue {
    pub id: String,
    pub reason: IssueReason,
}

impl RecordIssue {
    pub fn new(id: impl Into<String>, reason: IssueReason) -> Self {
        Self {
            id: id.into(),
            reason,
        }
    }
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

/// Input validation failed. Carries every offending record, not just the
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub issues: Vec<RecordIssue>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation rejected {} record(s): ", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Fatal pre-solve errors. Anything else comes back as a structured
/// [`RouteSolution`](crate::extract::RouteSolution).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Routing-service failures, as seen by the matrix provider.
///
/// `Unavailable` is a distinct signal from an empty-but-successful answer.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("routing service unavailable: {0}")]
    Unavailable(String),
    #[error("routing service response malformed: {0}")]
    Malformed(String),
    #[error("routing service returned an empty table")]
    Empty,
}
