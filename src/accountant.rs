//! The accounting step: power draw times grid intensity, integrated per tick.

use crate::intensity::{CarbonIntensityProvider, IntensitySnapshot};
use crate::power::PowerSource;
use crate::store::CarbonStore;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::Duration;

/// How dirty the grid is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl std::fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageLevel::VeryLow => write!(f, "very low"),
            UsageLevel::Low => write!(f, "low"),
            UsageLevel::Medium => write!(f, "medium"),
            UsageLevel::High => write!(f, "high"),
            UsageLevel::VeryHigh => write!(f, "very high"),
        }
    }
}

/// Advice on when to plug in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeForecast {
    ChargeNow,
    ChargeIn30,
    ChargeIn60,
    ChargeWhenNeeded,
}

impl std::fmt::Display for ChargeForecast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargeForecast::ChargeNow => write!(f, "charge now"),
            ChargeForecast::ChargeIn30 => write!(f, "charge in 30 minutes"),
            ChargeForecast::ChargeIn60 => write!(f, "charge in 60 minutes"),
            ChargeForecast::ChargeWhenNeeded => write!(f, "charge when needed"),
        }
    }
}

/// Map a current intensity in gCO2/kWh to a usage level.
pub fn classify(now: i32) -> UsageLevel {
    match now {
        ..=49 => UsageLevel::VeryLow,
        50..=129 => UsageLevel::Low,
        130..=209 => UsageLevel::Medium,
        210..=310 => UsageLevel::High,
        _ => UsageLevel::VeryHigh,
    }
}

/// Charge timing from the current and the two upcoming half-hour forecasts.
///
/// Branches overlap; the first match wins.
pub fn forecast(now: i32, next: i32, later: i32) -> ChargeForecast {
    if now <= next && now < later {
        ChargeForecast::ChargeNow
    } else if now > next {
        ChargeForecast::ChargeIn30
    } else if now > later {
        ChargeForecast::ChargeIn60
    } else {
        ChargeForecast::ChargeWhenNeeded
    }
}

/// Grams of CO2 for drawing `watts` over `minutes` at `intensity` gCO2/kWh.
/// A negative product points at bad input and is sign-flipped.
pub fn incremental_carbon(watts: f64, intensity: f64, minutes: f64) -> f64 {
    let grams = watts * intensity * minutes / (60.0 * 1000.0);
    if grams < 0.0 {
        warn!(
            "Negative carbon increment {:.6} g ({} W at {} gCO2/kWh), flipping sign",
            grams, watts, intensity
        );
        return -grams;
    }
    grams
}

/// Change notifications for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum AccountEvent {
    SessionCarbonChanged(f64),
    LifetimeCarbonChanged(f64),
    UsageLevelChanged(UsageLevel),
    ChargeForecastChanged(ChargeForecast),
    IntensityUnavailable(String),
}

/// Copy of the accountant's state for readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingSnapshot {
    pub session_carbon_grams: f64,
    pub lifetime_carbon_grams: f64,
    pub usage_level: UsageLevel,
    pub forecast: ChargeForecast,
    pub intensity: IntensitySnapshot,
    pub last_watts: f64,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Accounted { watts: f64, grams: f64 },
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct AccountantSettings {
    pub region_id: String,
    pub tick_interval: Duration,
}

impl Default for AccountantSettings {
    fn default() -> Self {
        Self {
            region_id: String::new(),
            tick_interval: Duration::from_secs(60),
        }
    }
}

type Listener = Box<dyn FnMut(&AccountEvent)>;

pub struct CarbonAccountant<P, I, S> {
    power: P,
    provider: I,
    store: S,
    settings: AccountantSettings,
    session_carbon_grams: f64,
    lifetime_carbon_grams: f64,
    usage_level: UsageLevel,
    forecast: ChargeForecast,
    cached_intensity: IntensitySnapshot,
    last_watts: f64,
    listeners: Vec<Listener>,
}

impl<P, I, S> CarbonAccountant<P, I, S>
where
    P: PowerSource,
    I: CarbonIntensityProvider,
    S: CarbonStore,
{
    /// Build an accountant, seeding the lifetime total from `store`.
    pub fn new(power: P, provider: I, store: S, settings: AccountantSettings) -> Self {
        let lifetime = store.load_lifetime_carbon().max(0.0);
        info!(
            "Lifetime carbon {:.3} g, region '{}' via {}",
            lifetime,
            settings.region_id,
            provider.name()
        );

        Self {
            power,
            provider,
            store,
            settings,
            session_carbon_grams: 0.0,
            lifetime_carbon_grams: lifetime,
            usage_level: UsageLevel::VeryHigh,
            forecast: ChargeForecast::ChargeWhenNeeded,
            cached_intensity: IntensitySnapshot::default(),
            last_watts: 0.0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&AccountEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now())
    }

    /// One accounting step at `now`. An unusable intensity reading leaves
    /// every total and classification untouched.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut watts = self.power.sample();
        if !watts.is_finite() || watts < 0.0 {
            warn!("Power source reported {} W, using 0", watts);
            watts = 0.0;
        }
        self.last_watts = watts;

        let snapshot = if self.cached_intensity.is_out_of_date(now) {
            debug!("Intensity cache out of date, fetching for region '{}'", self.settings.region_id);
            self.provider.fetch(&self.settings.region_id)
        } else {
            self.cached_intensity.clone()
        };

        if !snapshot.valid {
            let reason = snapshot.error_message().to_string();
            error!("Carbon intensity unavailable: {}", reason);
            self.emit(AccountEvent::IntensityUnavailable(reason.clone()));
            return TickOutcome::Skipped { reason };
        }

        let grams = incremental_carbon(
            watts,
            f64::from(snapshot.now),
            self.settings.tick_interval.as_secs_f64() / 60.0,
        );
        debug!(
            "{:.3} W at {} gCO2/kWh -> {:.6} g",
            watts, snapshot.now, grams
        );

        self.set_session_carbon(self.session_carbon_grams + grams);
        self.set_lifetime_carbon(self.lifetime_carbon_grams + grams);
        self.set_usage_level(classify(snapshot.now));
        self.set_forecast(forecast(snapshot.now, snapshot.next, snapshot.later));
        self.cached_intensity = snapshot;

        TickOutcome::Accounted { watts, grams }
    }

    /// Zero both totals and persist the cleared lifetime value.
    pub fn reset_stats(&mut self) {
        info!("Resetting carbon totals");
        self.set_session_carbon(0.0);
        self.set_lifetime_carbon(0.0);
        self.store.save_lifetime_carbon(0.0);
    }

    /// Persist the lifetime total.
    pub fn flush(&mut self) {
        debug!("Saving lifetime carbon {:.3} g", self.lifetime_carbon_grams);
        self.store.save_lifetime_carbon(self.lifetime_carbon_grams);
    }

    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            session_carbon_grams: self.session_carbon_grams,
            lifetime_carbon_grams: self.lifetime_carbon_grams,
            usage_level: self.usage_level,
            forecast: self.forecast,
            intensity: self.cached_intensity.clone(),
            last_watts: self.last_watts,
        }
    }

    pub fn session_carbon_grams(&self) -> f64 {
        self.session_carbon_grams
    }

    pub fn lifetime_carbon_grams(&self) -> f64 {
        self.lifetime_carbon_grams
    }

    pub fn usage_level(&self) -> UsageLevel {
        self.usage_level
    }

    pub fn forecast(&self) -> ChargeForecast {
        self.forecast
    }

    pub fn cached_intensity(&self) -> &IntensitySnapshot {
        &self.cached_intensity
    }

    pub fn settings(&self) -> &AccountantSettings {
        &self.settings
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    pub fn power_mut(&mut self) -> &mut P {
        &mut self.power
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn emit(&mut self, event: AccountEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    fn set_session_carbon(&mut self, grams: f64) {
        if grams != self.session_carbon_grams {
            self.session_carbon_grams = grams;
            self.emit(AccountEvent::SessionCarbonChanged(grams));
        }
    }

    fn set_lifetime_carbon(&mut self, grams: f64) {
        if grams != self.lifetime_carbon_grams {
            self.lifetime_carbon_grams = grams;
            self.emit(AccountEvent::LifetimeCarbonChanged(grams));
        }
    }

    fn set_usage_level(&mut self, level: UsageLevel) {
        if level != self.usage_level {
            info!("Usage level: {}", level);
            self.usage_level = level;
            self.emit(AccountEvent::UsageLevelChanged(level));
        }
    }

    fn set_forecast(&mut self, forecast: ChargeForecast) {
        if forecast != self.forecast {
            info!("Charge forecast: {}", forecast);
            self.forecast = forecast;
            self.emit(AccountEvent::ChargeForecastChanged(forecast));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::power::tests::FakeTelemetry;
    use crate::power::{EstimatorSettings, PowerEstimator};
    use chrono::{TimeDelta, TimeZone};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Power source with a settable reading.
    #[derive(Clone, Default)]
    pub(crate) struct FakePower(pub Rc<Cell<f64>>);

    impl PowerSource for FakePower {
        fn sample(&mut self) -> f64 {
            self.0.get()
        }
    }

    /// Provider returning a settable snapshot and counting fetches.
    #[derive(Clone, Default)]
    pub(crate) struct FakeProvider {
        pub snapshot: Rc<RefCell<IntensitySnapshot>>,
        pub fetches: Rc<Cell<usize>>,
    }

    impl FakeProvider {
        pub(crate) fn returning(snapshot: IntensitySnapshot) -> Self {
            let p = Self::default();
            *p.snapshot.borrow_mut() = snapshot;
            p
        }
    }

    impl CarbonIntensityProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch(&self, _region_id: &str) -> IntensitySnapshot {
            self.fetches.set(self.fetches.get() + 1);
            self.snapshot.borrow().clone()
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub lifetime: Rc<Cell<f64>>,
        pub saves: Rc<Cell<usize>>,
    }

    impl CarbonStore for MemoryStore {
        fn load_lifetime_carbon(&self) -> f64 {
            self.lifetime.get()
        }

        fn save_lifetime_carbon(&mut self, grams: f64) {
            self.lifetime.set(grams);
            self.saves.set(self.saves.get() + 1);
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 10, 0, 0).unwrap()
    }

    fn reading(now: i32, next: i32, later: i32) -> IntensitySnapshot {
        IntensitySnapshot::ok(now, next, later, t0(), t0() + TimeDelta::minutes(30))
    }

    fn settings() -> AccountantSettings {
        AccountantSettings {
            region_id: "13".to_string(),
            tick_interval: Duration::from_secs(60),
        }
    }

    fn accountant(
        watts: f64,
        snapshot: IntensitySnapshot,
    ) -> (
        CarbonAccountant<FakePower, FakeProvider, MemoryStore>,
        FakePower,
        FakeProvider,
        MemoryStore,
    ) {
        let power = FakePower::default();
        power.0.set(watts);
        let provider = FakeProvider::returning(snapshot);
        let store = MemoryStore::default();
        let acc = CarbonAccountant::new(power.clone(), provider.clone(), store.clone(), settings());
        (acc, power, provider, store)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0), UsageLevel::VeryLow);
        assert_eq!(classify(49), UsageLevel::VeryLow);
        assert_eq!(classify(50), UsageLevel::Low);
        assert_eq!(classify(129), UsageLevel::Low);
        assert_eq!(classify(130), UsageLevel::Medium);
        assert_eq!(classify(209), UsageLevel::Medium);
        assert_eq!(classify(210), UsageLevel::High);
        assert_eq!(classify(310), UsageLevel::High);
        assert_eq!(classify(311), UsageLevel::VeryHigh);
        assert!(UsageLevel::VeryLow < UsageLevel::VeryHigh);
    }

    #[test]
    fn test_forecast_precedence() {
        assert_eq!(forecast(100, 100, 50), ChargeForecast::ChargeIn60);
        assert_eq!(forecast(100, 100, 150), ChargeForecast::ChargeNow);
        assert_eq!(forecast(100, 50, 200), ChargeForecast::ChargeIn30);
        // Both drops hold; the nearer one wins.
        assert_eq!(forecast(100, 50, 20), ChargeForecast::ChargeIn30);
        assert_eq!(forecast(100, 100, 100), ChargeForecast::ChargeWhenNeeded);
        assert_eq!(forecast(100, 150, 100), ChargeForecast::ChargeWhenNeeded);
    }

    #[test]
    fn test_incremental_carbon() {
        assert_close(incremental_carbon(60.0, 100.0, 1.0), 0.1);
        assert_close(incremental_carbon(60.0, 100.0, 5.0), 0.5);
        assert_close(incremental_carbon(0.0, 400.0, 1.0), 0.0);
        assert_close(incremental_carbon(60.0, -100.0, 1.0), 0.1);
    }

    #[test]
    fn test_initial_state() {
        let mut store = MemoryStore::default();
        store.save_lifetime_carbon(12.5);
        let acc = CarbonAccountant::new(
            FakePower::default(),
            FakeProvider::default(),
            store,
            settings(),
        );
        assert_eq!(acc.session_carbon_grams(), 0.0);
        assert_eq!(acc.lifetime_carbon_grams(), 12.5);
        assert_eq!(acc.usage_level(), UsageLevel::VeryHigh);
        assert_eq!(acc.forecast(), ChargeForecast::ChargeWhenNeeded);
        assert!(!acc.cached_intensity().valid);
    }

    #[test]
    fn test_no_battery_scenario() {
        let estimator = PowerEstimator::new(FakeTelemetry::no_battery(), EstimatorSettings::default());
        let provider = FakeProvider::returning(reading(100, 100, 100));
        let mut acc = CarbonAccountant::new(estimator, provider, MemoryStore::default(), settings());

        let outcome = acc.tick_at(t0());
        assert!(matches!(outcome, TickOutcome::Accounted { watts, .. } if watts == 60.0));
        assert_close(acc.session_carbon_grams(), 0.1);
        assert_close(acc.lifetime_carbon_grams(), 0.1);
        assert_eq!(acc.usage_level(), UsageLevel::Low);
    }

    #[test]
    fn test_discharging_accrues_nothing() {
        let estimator = PowerEstimator::new(
            FakeTelemetry::discharging(Some(40_000), 50_000),
            EstimatorSettings::default(),
        )
        .with_average_discharge_rate(15_000);
        let provider = FakeProvider::returning(reading(450, 450, 450));
        let mut acc = CarbonAccountant::new(estimator, provider, MemoryStore::default(), settings());

        acc.tick_at(t0());
        assert_eq!(acc.session_carbon_grams(), 0.0);
        assert_eq!(acc.lifetime_carbon_grams(), 0.0);
        // Classification still follows the grid.
        assert_eq!(acc.usage_level(), UsageLevel::VeryHigh);
    }

    #[test]
    fn test_cache_reused_within_window() {
        let (mut acc, _, provider, _) = accountant(60.0, reading(100, 100, 100));

        acc.tick_at(t0() + TimeDelta::minutes(1));
        acc.tick_at(t0() + TimeDelta::minutes(2));
        assert_eq!(provider.fetches.get(), 1);

        acc.tick_at(t0() + TimeDelta::minutes(30));
        assert_eq!(provider.fetches.get(), 1);

        acc.tick_at(t0() + TimeDelta::minutes(31));
        assert_eq!(provider.fetches.get(), 2);
    }

    #[test]
    fn test_invalid_snapshot_changes_nothing() {
        let (mut acc, _, provider, _) = accountant(60.0, reading(250, 100, 300));
        acc.tick_at(t0());
        let before = acc.snapshot();

        *provider.snapshot.borrow_mut() = IntensitySnapshot::error("API didn't reply in time.");
        let outcome = acc.tick_at(t0() + TimeDelta::hours(1));

        assert_eq!(
            outcome,
            TickOutcome::Skipped {
                reason: "API didn't reply in time.".to_string()
            }
        );
        let after = acc.snapshot();
        assert_eq!(
            after.session_carbon_grams.to_bits(),
            before.session_carbon_grams.to_bits()
        );
        assert_eq!(
            after.lifetime_carbon_grams.to_bits(),
            before.lifetime_carbon_grams.to_bits()
        );
        assert_eq!(after.usage_level, before.usage_level);
        assert_eq!(after.forecast, before.forecast);
    }

    #[test]
    fn test_invalid_snapshot_retried_every_tick() {
        let (mut acc, _, provider, _) = accountant(60.0, IntensitySnapshot::error("down"));
        acc.tick_at(t0());
        acc.tick_at(t0() + TimeDelta::minutes(1));
        assert_eq!(provider.fetches.get(), 2);
        assert_eq!(acc.session_carbon_grams(), 0.0);
    }

    #[test]
    fn test_reset_then_tick() {
        let (mut acc, _, _, store) = accountant(60.0, reading(100, 100, 100));
        store.lifetime.set(0.0);
        acc.tick_at(t0());
        acc.tick_at(t0() + TimeDelta::minutes(1));
        assert!(acc.lifetime_carbon_grams() > 0.0);

        acc.reset_stats();
        assert_eq!(acc.session_carbon_grams(), 0.0);
        assert_eq!(acc.lifetime_carbon_grams(), 0.0);
        assert_eq!(store.lifetime.get(), 0.0);
        assert_eq!(store.saves.get(), 1);

        acc.tick_at(t0() + TimeDelta::minutes(2));
        assert_close(acc.session_carbon_grams(), 0.1);
        assert_close(acc.lifetime_carbon_grams(), 0.1);
    }

    #[test]
    fn test_totals_monotonic() {
        let (mut acc, power, _, _) = accountant(0.0, reading(180, 200, 220));
        let samples = [0.0, 12.0, -40.0, f64::NAN, 90.0, 0.5, 30.0];
        let mut session = acc.session_carbon_grams();
        let mut lifetime = acc.lifetime_carbon_grams();

        for (i, watts) in samples.into_iter().enumerate() {
            power.0.set(watts);
            acc.tick_at(t0() + TimeDelta::minutes(i as i64));
            assert!(acc.session_carbon_grams() >= session);
            assert!(acc.lifetime_carbon_grams() >= lifetime);
            session = acc.session_carbon_grams();
            lifetime = acc.lifetime_carbon_grams();
        }
        assert!(session > 0.0);
    }

    #[test]
    fn test_negative_watts_clamped() {
        let (mut acc, _, _, _) = accountant(-75.0, reading(300, 300, 300));
        let outcome = acc.tick_at(t0());
        assert_eq!(
            outcome,
            TickOutcome::Accounted {
                watts: 0.0,
                grams: 0.0
            }
        );
        assert_eq!(acc.snapshot().last_watts, 0.0);
    }

    #[test]
    fn test_tick_interval_scales_increment() {
        let power = FakePower::default();
        power.0.set(60.0);
        let mut acc = CarbonAccountant::new(
            power,
            FakeProvider::returning(reading(100, 100, 100)),
            MemoryStore::default(),
            AccountantSettings {
                region_id: "13".to_string(),
                tick_interval: Duration::from_secs(300),
            },
        );
        acc.tick_at(t0());
        assert_close(acc.session_carbon_grams(), 0.5);
    }

    #[test]
    fn test_events_only_on_change() {
        let (mut acc, power, _, _) = accountant(0.0, reading(100, 50, 200));
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        acc.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        // Zero watts: only the classifications change.
        acc.tick_at(t0());
        assert_eq!(
            *events.borrow(),
            vec![
                AccountEvent::UsageLevelChanged(UsageLevel::Low),
                AccountEvent::ChargeForecastChanged(ChargeForecast::ChargeIn30),
            ]
        );

        events.borrow_mut().clear();
        acc.tick_at(t0() + TimeDelta::minutes(1));
        assert!(events.borrow().is_empty());

        power.0.set(60.0);
        acc.tick_at(t0() + TimeDelta::minutes(2));
        let got = events.borrow();
        assert_eq!(got.len(), 2);
        assert!(matches!(got[0], AccountEvent::SessionCarbonChanged(g) if (g - 0.1).abs() < 1e-9));
        assert!(matches!(got[1], AccountEvent::LifetimeCarbonChanged(g) if (g - 0.1).abs() < 1e-9));
    }

    #[test]
    fn test_unavailable_event() {
        let (mut acc, _, _, _) = accountant(60.0, IntensitySnapshot::error("Empty reply received."));
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        acc.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        acc.tick_at(t0());
        assert_eq!(
            *events.borrow(),
            vec![AccountEvent::IntensityUnavailable(
                "Empty reply received.".to_string()
            )]
        );
    }

    #[test]
    fn test_flush_saves_lifetime() {
        let (mut acc, _, _, store) = accountant(60.0, reading(100, 100, 100));
        acc.tick_at(t0());
        acc.flush();
        assert_close(store.lifetime.get(), 0.1);
    }
}
