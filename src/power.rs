//! Grid power draw estimation from battery telemetry.
//!
//! Without a wattmeter the only signal is the battery. The estimator
//! classifies the battery into a [`PowerState`] and turns that into the
//! power the machine is pulling from the wall.

use crate::config::PowerConfig;
use crate::telemetry::BatteryTelemetry;
use log::{debug, info, warn};
use serde::Serialize;

/// Battery state as seen by the last sampling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Unknown,
    NoBattery,
    FullyCharged,
    Charging,
    Discharging,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::NoBattery => write!(f, "no battery"),
            PowerState::FullyCharged => write!(f, "fully charged"),
            PowerState::Charging => write!(f, "charging"),
            PowerState::Discharging => write!(f, "discharging"),
        }
    }
}

/// Running estimate of the machine's own consumption, derived from how fast
/// the battery drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DischargeModel {
    pub last_capacity_mwh: i64,
    pub current_capacity_mwh: i64,
    pub current_charge_rate_mw: i64,
    pub current_discharge_rate_mw: i64,
    pub average_discharge_rate_mw: i64,
}

impl DischargeModel {
    fn blend(&mut self, rate_mw: i64) {
        self.average_discharge_rate_mw = if self.average_discharge_rate_mw == 0 {
            rate_mw
        } else {
            (self.average_discharge_rate_mw + rate_mw) / 2
        };
    }
}

/// Anything that can report the machine's current grid draw in watts.
pub trait PowerSource {
    fn sample(&mut self) -> f64;
}

/// Estimator tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// Flat draw assumed for machines without a battery.
    pub no_battery_watts: f64,
    /// Minutes between [`PowerEstimator::recalibrate`] calls.
    pub recalibration_minutes: u32,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            no_battery_watts: 60.0,
            recalibration_minutes: 5,
        }
    }
}

impl From<&PowerConfig> for EstimatorSettings {
    fn from(config: &PowerConfig) -> Self {
        Self {
            no_battery_watts: config.no_battery_watts,
            recalibration_minutes: config.recalibration_interval_mins,
        }
    }
}

pub struct PowerEstimator<T> {
    telemetry: T,
    settings: EstimatorSettings,
    state: PowerState,
    model: DischargeModel,
}

impl<T: BatteryTelemetry> PowerEstimator<T> {
    pub fn new(telemetry: T, settings: EstimatorSettings) -> Self {
        Self {
            telemetry,
            settings: EstimatorSettings {
                recalibration_minutes: settings.recalibration_minutes.max(1),
                ..settings
            },
            state: PowerState::Unknown,
            model: DischargeModel::default(),
        }
    }

    /// Seed the average discharge rate, typically from the previous run.
    pub fn with_average_discharge_rate(mut self, rate_mw: i64) -> Self {
        self.model.average_discharge_rate_mw = rate_mw.max(0);
        self
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn model(&self) -> DischargeModel {
        self.model
    }

    pub fn average_discharge_rate_mw(&self) -> i64 {
        self.model.average_discharge_rate_mw
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    /// Estimate the current grid draw in watts.
    pub fn estimate_watts(&mut self) -> f64 {
        self.update_state();

        let milliwatts = match self.state {
            PowerState::Unknown => {
                warn!("Battery state unknown, assuming no grid draw");
                0
            }
            PowerState::NoBattery => {
                debug!(
                    "No battery, using {} W estimate",
                    self.settings.no_battery_watts
                );
                return self.settings.no_battery_watts;
            }
            PowerState::FullyCharged => {
                // No live data while topped up; the last drain rate is the
                // closest thing to the idle consumption.
                debug!("Fully charged, using average discharge rate");
                self.model.average_discharge_rate_mw
            }
            PowerState::Charging => {
                debug!("Charging, adding charge rate to average consumption");
                self.model.current_charge_rate_mw + self.model.average_discharge_rate_mw
            }
            PowerState::Discharging => {
                debug!("Discharging, no grid draw");
                0
            }
        };

        let watts = milliwatts.max(0) as f64 / 1000.0;
        debug!("Estimated consumption: {:.3} W", watts);
        watts
    }

    /// Refresh the discharge model. Meant to run on its own, slower
    /// schedule than sampling.
    pub fn recalibrate(&mut self) {
        self.update_state();

        if self.state != PowerState::Discharging {
            // Capacity moves the other way off battery; the next discharge
            // pass starts a fresh baseline.
            self.model.last_capacity_mwh = 0;
            return;
        }

        let current = self.model.current_capacity_mwh;

        if self.model.current_discharge_rate_mw > 0 {
            self.model.blend(self.model.current_discharge_rate_mw);
            debug!(
                "Direct discharge rate {} mW, average now {} mW",
                self.model.current_discharge_rate_mw, self.model.average_discharge_rate_mw
            );
        } else if self.model.last_capacity_mwh > 0 && current > 0 {
            let consumed = self.model.last_capacity_mwh - current;
            if consumed > 0 {
                let rate = consumed * 60 / i64::from(self.settings.recalibration_minutes);
                self.model.blend(rate);
                debug!(
                    "Capacity {} -> {} mWh, average discharge now {} mW",
                    self.model.last_capacity_mwh, current, self.model.average_discharge_rate_mw
                );
            } else {
                debug!(
                    "Capacity did not drop ({} -> {} mWh), keeping average",
                    self.model.last_capacity_mwh, current
                );
            }
        } else {
            debug!("No previous capacity yet, storing {} mWh", current);
        }

        self.model.last_capacity_mwh = current;
    }

    fn update_state(&mut self) {
        let state = self.read_state();
        if state != self.state {
            info!("Power state: {} -> {}", self.state, state);
        }
        self.state = state;
    }

    fn read_state(&mut self) -> PowerState {
        let Some(has_battery) = self.telemetry.has_battery() else {
            return PowerState::Unknown;
        };
        if !has_battery {
            return PowerState::NoBattery;
        }

        let Some(full) = self.telemetry.is_fully_charged() else {
            return PowerState::Unknown;
        };
        if full {
            return PowerState::FullyCharged;
        }

        let Some(charging) = self.telemetry.is_charging() else {
            return PowerState::Unknown;
        };
        if charging {
            self.model.current_charge_rate_mw = self.telemetry.charge_rate_mw().unwrap_or(0);
            return PowerState::Charging;
        }

        self.model.current_discharge_rate_mw = self.telemetry.discharge_rate_mw().unwrap_or(0);
        self.model.current_capacity_mwh = self.telemetry.current_capacity_mwh().unwrap_or(0);
        PowerState::Discharging
    }
}

impl<T: BatteryTelemetry> PowerSource for PowerEstimator<T> {
    fn sample(&mut self) -> f64 {
        self.estimate_watts()
    }
}
