//! Grid carbon intensity readings and the providers that produce them.

pub mod fixed;
pub mod national_grid;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sentinel for an intensity value the provider did not supply.
pub const UNKNOWN_INTENSITY: i32 = -1;

/// One carbon intensity reading in gCO2/kWh.
///
/// `next` and `later` are the forecasts for the following two half-hour
/// windows. A valid snapshot always has a non-negative `now`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntensitySnapshot {
    pub now: i32,
    pub next: i32,
    pub later: i32,
    pub valid: bool,
    pub error: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Default for IntensitySnapshot {
    fn default() -> Self {
        Self {
            now: UNKNOWN_INTENSITY,
            next: UNKNOWN_INTENSITY,
            later: UNKNOWN_INTENSITY,
            valid: false,
            error: None,
            valid_from: None,
            valid_to: None,
        }
    }
}

impl IntensitySnapshot {
    /// A usable reading. A negative current value cannot be used for
    /// accounting and yields an error snapshot instead.
    pub fn ok(
        now: i32,
        next: i32,
        later: i32,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Self {
        if now < 0 {
            return Self::error(format!("Provider reported a negative intensity ({}).", now));
        }

        Self {
            now,
            next,
            later,
            valid: true,
            error: None,
            valid_from: Some(valid_from),
            valid_to: Some(valid_to),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Whether this reading must be fetched again before use at `at`.
    pub fn is_out_of_date(&self, at: DateTime<Utc>) -> bool {
        if !self.valid {
            return true;
        }
        self.valid_to.is_none_or(|to| at > to)
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unspecified error")
    }
}

/// Source of carbon intensity readings for a region.
///
/// Implementations may block (bounded by their own timeout) but never fail:
/// problems are reported as an invalid snapshot carrying the reason.
pub trait CarbonIntensityProvider {
    fn name(&self) -> &str;

    fn fetch(&self, region_id: &str) -> IntensitySnapshot;
}

impl<T: CarbonIntensityProvider + ?Sized> CarbonIntensityProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, region_id: &str) -> IntensitySnapshot {
        (**self).fetch(region_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_default_is_empty_and_invalid() {
        let s = IntensitySnapshot::default();
        assert_eq!(s.now, -1);
        assert_eq!(s.next, -1);
        assert_eq!(s.later, -1);
        assert!(!s.valid);
        assert!(s.error.is_none());
        assert!(s.valid_from.is_none());
        assert!(s.valid_to.is_none());
    }

    #[test]
    fn test_error_snapshot() {
        let s = IntensitySnapshot::error("API didn't reply in time.");
        assert!(!s.valid);
        assert_eq!(s.now, UNKNOWN_INTENSITY);
        assert_eq!(s.error_message(), "API didn't reply in time.");
    }

    #[test]
    fn test_ok_rejects_negative_now() {
        let now = Utc::now();
        let s = IntensitySnapshot::ok(-5, 10, 10, now, now);
        assert!(!s.valid);
        assert!(s.error_message().contains("negative"));

        // Unknown forecasts are fine.
        let s = IntensitySnapshot::ok(120, -1, -1, now, now);
        assert!(s.valid);
        assert_eq!(s.next, UNKNOWN_INTENSITY);
    }

    #[test]
    fn test_out_of_date() {
        let from = Utc::now();
        let to = from + TimeDelta::minutes(30);
        let s = IntensitySnapshot::ok(100, 100, 100, from, to);

        assert!(!s.is_out_of_date(from));
        assert!(!s.is_out_of_date(to));
        assert!(s.is_out_of_date(to + TimeDelta::seconds(1)));
        assert!(IntensitySnapshot::default().is_out_of_date(from));
    }
}
