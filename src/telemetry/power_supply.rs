use super::BatteryTelemetry;
use crate::error::Result;
use crate::sysfs::{POWER_SUPPLY_DIR, SysfsRoot, supply_attr};
use log::{debug, warn};

/// Linux `power_supply` class backend.
///
/// The battery is located again on every query so hot-swapped batteries and
/// late-loading drivers are picked up without a restart.
#[derive(Debug, Clone)]
pub struct PowerSupplyTelemetry {
    sysfs: SysfsRoot,
}

impl PowerSupplyTelemetry {
    pub fn new(sysfs: SysfsRoot) -> Self {
        Self { sysfs }
    }

    /// Find the system battery. `Err` means the class itself is unreadable.
    fn locate(&self) -> Result<Option<String>> {
        let entries = self.sysfs.list_dir(POWER_SUPPLY_DIR)?;

        for name in entries {
            let ptype = self.read_attr(&name, "type");
            if ptype.as_deref() != Some("Battery") {
                continue;
            }
            // Peripheral batteries (mice, headsets) report scope=Device.
            let scope = self.read_attr(&name, "scope");
            if scope.as_deref() == Some("Device") {
                debug!("Skipping peripheral battery {}", name);
                continue;
            }
            return Ok(Some(name));
        }

        Ok(None)
    }

    fn battery(&self) -> Option<String> {
        self.locate().unwrap_or_else(|e| {
            warn!("Cannot list power supplies: {}", e);
            None
        })
    }

    fn read_attr(&self, supply: &str, attr: &str) -> Option<String> {
        self.sysfs
            .read_optional(supply_attr(supply, attr))
            .unwrap_or_else(|e| {
                debug!("{}", e);
                None
            })
    }

    fn status(&self) -> Option<String> {
        let battery = self.battery()?;
        self.read_attr(&battery, "status")
    }

    fn mains_online(&self) -> bool {
        let Ok(entries) = self.sysfs.list_dir(POWER_SUPPLY_DIR) else {
            return false;
        };

        entries.iter().any(|name| {
            self.read_attr(name, "type").as_deref() == Some("Mains")
                && self.read_attr(name, "online").as_deref() == Some("1")
        })
    }

    /// Instantaneous battery power in mW. Drivers either expose `power_now`
    /// (µW) or `current_now` (µA) together with `voltage_now` (µV). Some
    /// report negative values while discharging, so the magnitude is used.
    fn rate_mw(&self) -> Option<i64> {
        let battery = self.battery()?;

        if let Some(uw) = self.sysfs.read_number::<i64>(supply_attr(&battery, "power_now")) {
            return Some(uw.abs() / 1_000);
        }

        let ua = self.sysfs.read_number::<i64>(supply_attr(&battery, "current_now"))?;
        let uv = self.sysfs.read_number::<i64>(supply_attr(&battery, "voltage_now"))?;
        Some(ua.abs().saturating_mul(uv) / 1_000_000_000)
    }
}

impl BatteryTelemetry for PowerSupplyTelemetry {
    fn name(&self) -> &str {
        "power_supply"
    }

    fn has_battery(&self) -> Option<bool> {
        let battery = match self.locate() {
            Ok(Some(b)) => b,
            Ok(None) => return Some(false),
            Err(e) => {
                warn!("Cannot list power supplies: {}", e);
                return None;
            }
        };

        // Drivers without a `present` attribute only list batteries that exist.
        let present = self.read_attr(&battery, "present");
        Some(present.as_deref().is_none_or(|p| p == "1"))
    }

    fn is_fully_charged(&self) -> Option<bool> {
        let status = self.status()?;
        Some(status == "Full" || (status == "Not charging" && self.mains_online()))
    }

    fn is_charging(&self) -> Option<bool> {
        Some(self.status()? == "Charging")
    }

    fn charge_rate_mw(&self) -> Option<i64> {
        if self.status()? != "Charging" {
            return Some(0);
        }
        self.rate_mw()
    }

    fn discharge_rate_mw(&self) -> Option<i64> {
        if self.status()? != "Discharging" {
            return Some(0);
        }
        self.rate_mw()
    }

    fn current_capacity_mwh(&self) -> Option<i64> {
        let battery = self.battery()?;

        if let Some(uwh) = self.sysfs.read_number::<i64>(supply_attr(&battery, "energy_now")) {
            return Some(uwh / 1_000);
        }

        let uah = self.sysfs.read_number::<i64>(supply_attr(&battery, "charge_now"))?;
        let uv = self.sysfs.read_number::<i64>(supply_attr(&battery, "voltage_now"))?;
        Some(uah.saturating_mul(uv) / 1_000_000_000)
    }
}
