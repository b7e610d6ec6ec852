//! Foreground accounting loop.
//!
//! Two jobs share one thread: the accounting tick and the slower discharge
//! recalibration. SIGINT/SIGTERM stop the loop and SIGUSR1 resets totals.

use crate::accountant::{AccountEvent, AccountantSettings, CarbonAccountant};
use crate::config::LeafConfig;
use crate::error::{Error, Result};
use crate::intensity::{CarbonIntensityProvider, registry};
use crate::power::{EstimatorSettings, PowerEstimator};
use crate::store::StateFile;
use crate::sysfs::SysfsRoot;
use crate::telemetry::{self, BatteryTelemetry};
use log::{debug, info};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest stretch the loop sleeps before checking its flags again.
const POLL_STEP: Duration = Duration::from_millis(250);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static RESET: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown(_: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn on_reset(_: nix::libc::c_int) {
    RESET.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<()> {
    let shutdown = SigAction::new(
        SigHandler::Handler(on_shutdown),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let reset = SigAction::new(
        SigHandler::Handler(on_reset),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    // SAFETY: the handlers only store to atomics, which is async-signal-safe.
    unsafe {
        sigaction(Signal::SIGINT, &shutdown)?;
        sigaction(Signal::SIGTERM, &shutdown)?;
        sigaction(Signal::SIGUSR1, &reset)?;
    }
    Ok(())
}

/// A periodic job on the shared loop.
#[derive(Debug, Clone, Copy)]
pub struct Job {
    period: Duration,
    next_due: Instant,
}

impl Job {
    /// Due right away, then every `period`.
    pub fn immediate(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now,
        }
    }

    /// First due one `period` after `now`.
    pub fn delayed(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now + period,
        }
    }

    /// Whether the job should run at `now`. Rearms it when it does.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = now + self.period;
        true
    }

    pub fn until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}

pub type SystemAccountant = CarbonAccountant<
    PowerEstimator<Box<dyn BatteryTelemetry>>,
    Box<dyn CarbonIntensityProvider>,
    StateFile,
>;

pub fn state_path(config: &LeafConfig) -> Result<PathBuf> {
    config
        .storage
        .state_file
        .clone()
        .or_else(StateFile::default_path)
        .ok_or_else(|| Error::State("no data directory for the state file".to_string()))
}

/// Wire telemetry, provider and state file into an accountant.
pub fn build_accountant(config: &LeafConfig, sysfs: &SysfsRoot) -> Result<SystemAccountant> {
    let provider = registry::for_config(config)?;
    let store = StateFile::open(state_path(config)?);

    let telemetry = telemetry::detect(sysfs);
    info!("Battery telemetry: {}", telemetry.name());
    let estimator = PowerEstimator::new(telemetry, EstimatorSettings::from(&config.power))
        .with_average_discharge_rate(store.average_discharge_rate_mw());

    Ok(CarbonAccountant::new(
        estimator,
        provider,
        store,
        AccountantSettings {
            region_id: config.region.region_id.clone(),
            tick_interval: config.accounting.tick_interval(),
        },
    ))
}

/// Drive `accountant` until `shutdown` is set, then persist its totals.
pub fn run_until<T, I>(
    accountant: &mut CarbonAccountant<PowerEstimator<T>, I, StateFile>,
    recalibration_interval: Duration,
    shutdown: &AtomicBool,
    reset: &AtomicBool,
) where
    T: BatteryTelemetry,
    I: CarbonIntensityProvider,
{
    let start = Instant::now();
    let mut tick = Job::immediate(accountant.settings().tick_interval, start);
    let mut recalibration = Job::delayed(recalibration_interval, start);

    while !shutdown.load(Ordering::SeqCst) {
        if reset.swap(false, Ordering::SeqCst) {
            accountant.reset_stats();
        }

        let now = Instant::now();
        if recalibration.poll(now) {
            accountant.power_mut().recalibrate();
        }
        if tick.poll(now) {
            accountant.tick();
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let wait = tick
            .until_due(now)
            .min(recalibration.until_due(now))
            .min(POLL_STEP);
        std::thread::sleep(wait);
    }

    info!("Shutting down, saving totals");
    accountant.flush();
    let rate = accountant.power().average_discharge_rate_mw();
    debug!("Saving average discharge rate {} mW", rate);
    accountant.store_mut().save_average_discharge_rate(rate);
}

/// Run the accounting loop in the foreground until interrupted.
pub fn run(
    config: &LeafConfig,
    sysfs: &SysfsRoot,
    listener: impl FnMut(&AccountEvent) + 'static,
) -> Result<()> {
    install_signal_handlers()?;

    let mut accountant = build_accountant(config, sysfs)?;
    accountant.subscribe(listener);

    info!(
        "Accounting every {}s, recalibrating every {} min",
        config.accounting.tick_interval().as_secs(),
        config.power.recalibration_interval_mins.max(1)
    );
    run_until(
        &mut accountant,
        config.power.recalibration_interval(),
        &SHUTDOWN,
        &RESET,
    );
    Ok(())
}
