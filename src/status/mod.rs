use crate::accountant::{self, ChargeForecast, UsageLevel};
use crate::config::LeafConfig;
use crate::daemon;
use crate::error::Result;
use crate::intensity::{CarbonIntensityProvider, IntensitySnapshot, registry};
use crate::power::{EstimatorSettings, PowerEstimator, PowerState};
use crate::store::{CarbonStore, StateFile};
use crate::sysfs::SysfsRoot;
use crate::telemetry::{self, BatteryTelemetry};
use serde::Serialize;

/// What the battery says right now.
#[derive(Debug, Clone, Serialize)]
pub struct BatteryStatus {
    pub backend: String,
    pub state: PowerState,
    pub estimated_watts: f64,
    pub average_discharge_rate_mw: i64,
}

/// The configured region and its current reading.
#[derive(Debug, Clone, Serialize)]
pub struct IntensityStatus {
    pub provider: String,
    pub country: String,
    pub region_id: String,
    pub region_name: Option<String>,
    pub snapshot: IntensitySnapshot,
    pub usage_level: Option<UsageLevel>,
    pub forecast: Option<ChargeForecast>,
    /// Grams per hour at the estimated draw, if intensity is known.
    pub grams_per_hour: Option<f64>,
}

/// One-shot view of the system. Collecting it never adds to the totals.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: String,
    pub state_file: String,
    pub lifetime_carbon_grams: f64,
    pub battery: BatteryStatus,
    pub intensity: IntensityStatus,
}

impl IntensityStatus {
    fn new(config: &LeafConfig, provider: &str, snapshot: IntensitySnapshot, watts: f64) -> Self {
        let region_name = registry::country(&config.region.country)
            .and_then(|c| c.regions.iter().find(|r| r.id == config.region.region_id))
            .map(|r| r.name.to_string());

        let (usage_level, forecast, grams_per_hour) = if snapshot.valid {
            (
                Some(accountant::classify(snapshot.now)),
                Some(accountant::forecast(
                    snapshot.now,
                    snapshot.next,
                    snapshot.later,
                )),
                Some(accountant::incremental_carbon(
                    watts,
                    f64::from(snapshot.now),
                    60.0,
                )),
            )
        } else {
            (None, None, None)
        };

        Self {
            provider: provider.to_string(),
            country: config.region.country.clone(),
            region_id: config.region.region_id.clone(),
            region_name,
            snapshot,
            usage_level,
            forecast,
            grams_per_hour,
        }
    }
}

impl StatusReport {
    pub fn is_intensity_available(&self) -> bool {
        self.intensity.snapshot.valid
    }
}

fn battery_status<T: BatteryTelemetry>(mut estimator: PowerEstimator<T>) -> BatteryStatus {
    let estimated_watts = estimator.estimate_watts();
    BatteryStatus {
        backend: estimator.telemetry().name().to_string(),
        state: estimator.state(),
        estimated_watts,
        average_discharge_rate_mw: estimator.average_discharge_rate_mw(),
    }
}

/// Sample the battery and fetch one intensity reading.
pub fn collect(config: &LeafConfig, sysfs: &SysfsRoot) -> Result<StatusReport> {
    let path = daemon::state_path(config)?;
    let store = StateFile::open(&path);
    let provider = registry::for_config(config)?;

    let estimator = PowerEstimator::new(telemetry::detect(sysfs), EstimatorSettings::from(&config.power))
        .with_average_discharge_rate(store.average_discharge_rate_mw());
    let battery = battery_status(estimator);

    let snapshot = provider.fetch(&config.region.region_id);
    let intensity = IntensityStatus::new(config, provider.name(), snapshot, battery.estimated_watts);

    Ok(StatusReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        state_file: path.to_string_lossy().into_owned(),
        lifetime_carbon_grams: store.load_lifetime_carbon(),
        battery,
        intensity,
    })
}
