use std::time::Duration;

use crate::config::DEFAULT_FILTER_US;
use crate::count_mode::EdgeMode;
use crate::hal::{Level, UlpCoprocessor, UlpVar};
use crate::storage::{Backend, PulseCounterStorage, PulseRead, StorageError};

/// How often the coprocessor wakes up to sample the pin.
pub const ULP_DEFAULT_WAKEUP_PERIOD: Duration = Duration::from_millis(20);
/// Consecutive samples the program needs before it believes a level change.
pub const ULP_MIN_DEBOUNCE_SAMPLES: u16 = 3;

/// Delta between two readings of the 16-bit edge counter.
///
/// The counter is never reset and wraps, so the difference is taken modulo
/// 2^16 and read as signed; per-period counts must stay below 2^15.
pub fn edge_count_delta(previous: u16, current: u16) -> i32 {
    i32::from(current.wrapping_sub(previous) as i16)
}

/// Debounce sample count realising a filter of `filter_us` at the given wakeup period.
pub fn debounce_samples(filter_us: u32, wakeup_period: Duration) -> u16 {
    let period_us = wakeup_period.as_micros().max(1);
    let samples = u128::from(filter_us).div_ceil(period_us);
    u16::try_from(samples)
        .unwrap_or(u16::MAX)
        .max(ULP_MIN_DEBOUNCE_SAMPLES)
}

/// Coprocessor backend: the ULP program counts edges into RTC memory and the
/// main CPU diffs successive readings.
pub struct UlpPulseCounterStorage<C> {
    ulp: C,
    pin: u8,
    rising_edge: EdgeMode,
    falling_edge: EdgeMode,
    filter_us: u32,
    wakeup_period: Duration,
    last_value: u16,
}

impl<C: UlpCoprocessor> UlpPulseCounterStorage<C> {
    pub fn new(ulp: C, pin: u8) -> Self {
        Self {
            ulp,
            pin,
            rising_edge: EdgeMode::Increment,
            falling_edge: EdgeMode::Disable,
            filter_us: DEFAULT_FILTER_US,
            wakeup_period: ULP_DEFAULT_WAKEUP_PERIOD,
            last_value: 0,
        }
    }

    pub fn with_wakeup_period(mut self, wakeup_period: Duration) -> Self {
        self.wakeup_period = wakeup_period;
        self
    }

    pub fn wakeup_period(&self) -> Duration {
        self.wakeup_period
    }

    pub fn debounce_samples(&self) -> u16 {
        debounce_samples(self.filter_us, self.wakeup_period)
    }

    /// Shortest pulse the program can see: one sample to notice, then the debounce run.
    pub fn min_pulse_width(&self) -> Duration {
        self.wakeup_period * (u32::from(self.debounce_samples()) + 1)
    }

    pub fn coprocessor(&self) -> &C {
        &self.ulp
    }

    fn load_and_start(&mut self) -> Result<(), StorageError> {
        let rtc_io = self
            .ulp
            .rtc_io_number(self.pin)
            .ok_or(StorageError::NotRtcIo { pin: self.pin })?;

        self.ulp.load_program()?;

        self.ulp.init_rtc_input(self.pin)?;
        // The first edge the program waits for leaves the level the line idles at.
        let next_edge = self.ulp.input_level(self.pin)?.toggled();

        let debounce = self.debounce_samples();
        self.ulp.write_word(UlpVar::EdgeCount, 0)?;
        self.ulp.write_word(UlpVar::LastRead, 0)?;
        self.ulp.write_word(UlpVar::RunCount, 0)?;
        self.ulp.write_word(UlpVar::DebounceCounter, debounce)?;
        self.ulp.write_word(UlpVar::DebounceMaxCount, debounce)?;
        self.ulp.write_word(UlpVar::NextEdge, level_word(next_edge))?;
        self.ulp.write_word(UlpVar::IoNumber, u16::from(rtc_io))?;
        self.ulp.write_word(UlpVar::RisingStep, self.rising_edge.as_ulp_word())?;
        self.ulp.write_word(UlpVar::FallingStep, self.falling_edge.as_ulp_word())?;

        self.ulp.set_wakeup_period(self.wakeup_period)?;
        self.ulp.start()?;
        self.last_value = 0;
        Ok(())
    }
}

/// Encoding of a pin level in the program's `next_edge` word.
pub fn level_word(level: Level) -> u16 {
    match level {
        Level::High => 1,
        Level::Low => 0,
    }
}

impl<C: UlpCoprocessor> PulseCounterStorage for UlpPulseCounterStorage<C> {
    fn backend(&self) -> Backend {
        Backend::Ulp
    }

    fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode) {
        self.rising_edge = rising;
        self.falling_edge = falling;
    }

    fn set_filter_us(&mut self, filter_us: u32) {
        self.filter_us = filter_us;
    }

    fn setup(&mut self) -> Result<(), StorageError> {
        if self.ulp.woke_from_deep_sleep() {
            log::debug!("Woke up from sleep, skipping set-up of ULP program");
            // Edges counted while asleep are reported by the first read.
            self.last_value = self.ulp.read_word(UlpVar::LastRead)?;
            return Ok(());
        }

        log::debug!(
            "Did not wake up from sleep, assuming restart or first boot and setting up ULP program"
        );
        self.load_and_start().inspect_err(|e| {
            log::error!("Setting up ULP pulse counter on GPIO{} failed: {}", self.pin, e);
        })
    }

    fn pulse_counter_read(&mut self) -> PulseRead {
        match self.ulp.read_word(UlpVar::EdgeCount) {
            Ok(current) => {
                let delta = edge_count_delta(self.last_value, current);
                self.last_value = current;
                if let Err(e) = self.ulp.write_word(UlpVar::LastRead, current) {
                    log::warn!("Saving ULP read position failed: {}", e);
                }
                PulseRead::ok(delta)
            }
            Err(e) => {
                log::warn!("Reading ULP edge counter failed: {}", e);
                PulseRead::failed(0)
            }
        }
    }

    fn dump_config(&self) {
        log::info!("  Pin: GPIO{}", self.pin);
        log::info!("  Rising Edge: {}", self.rising_edge);
        log::info!("  Falling Edge: {}", self.falling_edge);
        log::info!(
            "  Sampling every {:?}, {} samples debounce (minimum pulse width {:?})",
            self.wakeup_period,
            self.debounce_samples(),
            self.min_pulse_width()
        );
    }
}
