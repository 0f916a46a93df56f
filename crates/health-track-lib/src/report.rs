//! Aggregated counts of recoverable problems met during a run

use std::fmt;
use std::ops::AddAssign;

/// Counts of skipped or failed items, by kind
///
/// Every extraction returns one of these next to its output, so a run that "succeeds" still
/// reports what it had to leave out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueSummary {
    /// Route files that could not be parsed
    pub parse_errors: usize,
    /// Route files that parsed but produced no points
    pub empty_routes: usize,
    /// Points dropped for being outside the WGS84 range
    pub invalid_coordinates: usize,
    /// Point elements without a latitude or longitude
    pub missing_coordinates: usize,
    /// Points dropped because they had no timestamp and the policy asked for one
    pub untimed_points: usize,
    /// Record elements skipped for missing or unparsable fields
    pub malformed_records: usize,
}

impl IssueSummary {
    /// Total number of skipped items of any kind
    pub fn total(&self) -> usize {
        self.parse_errors
            + self.empty_routes
            + self.invalid_coordinates
            + self.missing_coordinates
            + self.untimed_points
            + self.malformed_records
    }

    /// Whether nothing had to be skipped
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for IssueSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.parse_errors += rhs.parse_errors;
        self.empty_routes += rhs.empty_routes;
        self.invalid_coordinates += rhs.invalid_coordinates;
        self.missing_coordinates += rhs.missing_coordinates;
        self.untimed_points += rhs.untimed_points;
        self.malformed_records += rhs.malformed_records;
    }
}

impl fmt::Display for IssueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} parse errors, {} empty routes, {} invalid coordinates, {} points without \
             coordinates, {} untimed points, {} malformed records",
            self.parse_errors,
            self.empty_routes,
            self.invalid_coordinates,
            self.missing_coordinates,
            self.untimed_points,
            self.malformed_records
        )
    }
}
