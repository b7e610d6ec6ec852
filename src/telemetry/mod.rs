//! Battery telemetry sources.
//!
//! A [`BatteryTelemetry`] answers raw questions about the machine's battery.
//! Every query returns `None` when the platform cannot answer, so callers
//! can degrade instead of failing.

pub mod power_supply;

use crate::sysfs::{POWER_SUPPLY_DIR, SysfsRoot};
use log::{debug, info};

/// Raw battery facts as reported by the platform.
///
/// Rates are in milliwatts and capacity in milliwatt-hours. Implementations
/// must never panic on read failures.
pub trait BatteryTelemetry {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    fn has_battery(&self) -> Option<bool>;
    fn is_fully_charged(&self) -> Option<bool>;
    fn is_charging(&self) -> Option<bool>;
    fn charge_rate_mw(&self) -> Option<i64>;
    fn discharge_rate_mw(&self) -> Option<i64>;
    fn current_capacity_mwh(&self) -> Option<i64>;
}

impl<T: BatteryTelemetry + ?Sized> BatteryTelemetry for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn has_battery(&self) -> Option<bool> {
        (**self).has_battery()
    }

    fn is_fully_charged(&self) -> Option<bool> {
        (**self).is_fully_charged()
    }

    fn is_charging(&self) -> Option<bool> {
        (**self).is_charging()
    }

    fn charge_rate_mw(&self) -> Option<i64> {
        (**self).charge_rate_mw()
    }

    fn discharge_rate_mw(&self) -> Option<i64> {
        (**self).discharge_rate_mw()
    }

    fn current_capacity_mwh(&self) -> Option<i64> {
        (**self).current_capacity_mwh()
    }
}

/// Backend for machines without a power supply class (desktops, containers).
/// Reports a definite "no battery" so the flat estimate applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTelemetry;

impl BatteryTelemetry for NoTelemetry {
    fn name(&self) -> &str {
        "none"
    }

    fn has_battery(&self) -> Option<bool> {
        Some(false)
    }

    fn is_fully_charged(&self) -> Option<bool> {
        Some(false)
    }

    fn is_charging(&self) -> Option<bool> {
        Some(false)
    }

    fn charge_rate_mw(&self) -> Option<i64> {
        None
    }

    fn discharge_rate_mw(&self) -> Option<i64> {
        None
    }

    fn current_capacity_mwh(&self) -> Option<i64> {
        None
    }
}

/// Pick the telemetry backend for this machine.
pub fn detect(sysfs: &SysfsRoot) -> Box<dyn BatteryTelemetry> {
    if sysfs.exists(POWER_SUPPLY_DIR) {
        let backend = power_supply::PowerSupplyTelemetry::new(sysfs.clone());
        info!("Using {} battery telemetry", backend.name());
        Box::new(backend)
    } else {
        debug!("{} not found", sysfs.path(POWER_SUPPLY_DIR).display());
        info!("No power supply class available, assuming a machine without battery");
        Box::new(NoTelemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detect_without_power_supply_class() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = detect(&SysfsRoot::new(tmp.path()));
        assert_eq!(backend.name(), "none");
        assert_eq!(backend.has_battery(), Some(false));
    }

    #[test]
    fn test_detect_with_power_supply_class() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join(POWER_SUPPLY_DIR)).unwrap();
        let backend = detect(&SysfsRoot::new(tmp.path()));
        assert_eq!(backend.name(), "power_supply");
        assert_eq!(backend.has_battery(), Some(false));
    }
}
