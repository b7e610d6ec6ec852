use super::{CarbonIntensityProvider, IntensitySnapshot};
use chrono::{TimeDelta, Utc};

/// Provider returning configured values. Useful where no grid API exists
/// or the machine is offline.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedIntensity {
    pub now: i32,
    pub next: i32,
    pub later: i32,
    pub valid_for: TimeDelta,
}

impl FixedIntensity {
    pub fn new(now: i32, next: i32, later: i32, valid_minutes: u32) -> Self {
        Self {
            now,
            next,
            later,
            valid_for: TimeDelta::minutes(i64::from(valid_minutes.max(1))),
        }
    }
}

impl CarbonIntensityProvider for FixedIntensity {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fetch(&self, _region_id: &str) -> IntensitySnapshot {
        let from = Utc::now();
        IntensitySnapshot::ok(self.now, self.next, self.later, from, from + self.valid_for)
    }
}
