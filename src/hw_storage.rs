use crate::config::DEFAULT_FILTER_US;
use crate::count_mode::EdgeMode;
use crate::hal::{PcntConfig, PulseCounterUnit};
use crate::storage::{Backend, PulseCounterStorage, PulseRead, StorageError};

/// The PCNT glitch filter counts APB clock cycles.
pub const PCNT_APB_CLOCK_MHZ: u32 = 80;
/// The filter register is 10 bits wide.
pub const PCNT_MAX_FILTER_CYCLES: u16 = 1023;
/// Largest filter accepted at configuration time.
pub const PCNT_MAX_FILTER_US: u32 = 13;

pub const PCNT_HIGH_LIMIT: i16 = 32766;
pub const PCNT_LOW_LIMIT: i16 = -32766;

/// Filter register value for a filter of `filter_us`, or `None` to disable filtering.
pub fn filter_cycles(filter_us: u32) -> Option<u16> {
    if filter_us == 0 {
        return None;
    }
    let cycles = filter_us.saturating_mul(PCNT_APB_CLOCK_MHZ);
    Some(cycles.min(u32::from(PCNT_MAX_FILTER_CYCLES)) as u16)
}

/// Hardware backend: a PCNT unit counts, the poll reads and clears it.
pub struct HwPulseCounterStorage<U> {
    unit: U,
    pin: u8,
    rising_edge: EdgeMode,
    falling_edge: EdgeMode,
    filter_us: u32,
}

impl<U: PulseCounterUnit> HwPulseCounterStorage<U> {
    pub fn new(unit: U, pin: u8) -> Self {
        Self {
            unit,
            pin,
            rising_edge: EdgeMode::Increment,
            falling_edge: EdgeMode::Disable,
            filter_us: DEFAULT_FILTER_US,
        }
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    fn pcnt_config(&self) -> PcntConfig {
        PcntConfig {
            pulse_pin: self.pin,
            rising_edge: self.rising_edge,
            falling_edge: self.falling_edge,
            counter_h_lim: PCNT_HIGH_LIMIT,
            counter_l_lim: PCNT_LOW_LIMIT,
        }
    }
}

impl<U: PulseCounterUnit> PulseCounterStorage for HwPulseCounterStorage<U> {
    fn backend(&self) -> Backend {
        Backend::Hardware
    }

    fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode) {
        self.rising_edge = rising;
        self.falling_edge = falling;
    }

    fn set_filter_us(&mut self, filter_us: u32) {
        self.filter_us = filter_us;
    }

    fn setup(&mut self) -> Result<(), StorageError> {
        log::debug!("Setting up PCNT unit on GPIO{}", self.pin);
        self.unit.configure(&self.pcnt_config())?;

        let cycles = filter_cycles(self.filter_us);
        if let Some(cycles) = cycles {
            log::debug!("PCNT filter: {} µs -> {} APB cycles", self.filter_us, cycles);
        }
        self.unit.set_filter(cycles)?;

        self.unit.pause()?;
        self.unit.clear()?;
        self.unit.resume()?;
        Ok(())
    }

    fn pulse_counter_read(&mut self) -> PulseRead {
        let count = match self.unit.counter() {
            Ok(count) => i32::from(count),
            Err(e) => {
                log::warn!("Reading PCNT counter on GPIO{} failed: {}", self.pin, e);
                return PulseRead::failed(0);
            }
        };

        if let Err(e) = self.unit.clear() {
            // The count stays in the register and is picked up by the next read.
            log::warn!("Clearing PCNT counter on GPIO{} failed: {}", self.pin, e);
            return PulseRead::failed(count);
        }

        if self.unit.take_overflow() {
            log::warn!(
                "PCNT counter on GPIO{} hit its limit, pulses of this period were lost",
                self.pin
            );
            return PulseRead::failed(count);
        }

        PulseRead::ok(count)
    }

    fn dump_config(&self) {
        log::info!("  Pin: GPIO{}", self.pin);
        log::info!("  Rising Edge: {}", self.rising_edge);
        log::info!("  Falling Edge: {}", self.falling_edge);
        match filter_cycles(self.filter_us) {
            Some(cycles) => log::info!(
                "  Filtering pulses shorter than {} µs ({} APB cycles)",
                self.filter_us,
                cycles
            ),
            None => log::info!("  Filter disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Level;
    use crate::sim::SimulatedPcnt;

    fn storage(
        rising: EdgeMode,
        falling: EdgeMode,
        filter_us: u32,
    ) -> (SimulatedPcnt, HwPulseCounterStorage<SimulatedPcnt>) {
        let pcnt = SimulatedPcnt::new();
        let mut storage = HwPulseCounterStorage::new(pcnt.clone(), 5);
        storage.set_edge_modes(rising, falling);
        storage.set_filter_us(filter_us);
        storage.setup().unwrap();
        (pcnt, storage)
    }

    #[test]
    fn test_filter_cycles() {
        assert_eq!(filter_cycles(0), None);
        assert_eq!(filter_cycles(1), Some(80));
        assert_eq!(filter_cycles(12), Some(960));
        // 13 µs would be 1040 cycles, more than the register holds.
        assert_eq!(filter_cycles(13), Some(PCNT_MAX_FILTER_CYCLES));
        assert_eq!(filter_cycles(u32::MAX), Some(PCNT_MAX_FILTER_CYCLES));
    }

    #[test]
    fn test_setup_programs_unit() {
        let (pcnt, storage) = storage(EdgeMode::Increment, EdgeMode::Decrement, 13);
        assert!(storage.unit().is_running());
        let config = pcnt.config().unwrap();
        assert_eq!(config.pulse_pin, 5);
        assert_eq!(config.rising_edge, EdgeMode::Increment);
        assert_eq!(config.falling_edge, EdgeMode::Decrement);
        assert_eq!(config.counter_h_lim, PCNT_HIGH_LIMIT);
        assert_eq!(pcnt.filter_cycles(), Some(1023));
    }

    #[test]
    fn test_full_pulse_for_every_mode_pair() {
        let modes = [EdgeMode::Disable, EdgeMode::Increment, EdgeMode::Decrement];
        for rising in modes {
            for falling in modes {
                if rising == EdgeMode::Disable && falling == EdgeMode::Disable {
                    continue;
                }
                let (pcnt, mut storage) = storage(rising, falling, 13);
                pcnt.pulse(1_000, 500);
                assert_eq!(
                    storage.pulse_counter_read(),
                    PulseRead::ok(rising.step() + falling.step()),
                    "rising {rising}, falling {falling}"
                );
            }
        }
    }

    #[test]
    fn test_both_disabled_never_counts() {
        let (pcnt, mut storage) = storage(EdgeMode::Disable, EdgeMode::Disable, 0);
        for i in 0..10 {
            pcnt.pulse(i * 100, 10);
        }
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(0));
    }

    #[test]
    fn test_read_resets_counter() {
        let (pcnt, mut storage) = storage(EdgeMode::Increment, EdgeMode::Increment, 1);
        pcnt.pulse(100, 50);
        pcnt.pulse(200, 50);
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(4));
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(0));
    }

    #[test]
    fn test_glitches_shorter_than_filter_are_ignored() {
        let (pcnt, mut storage) = storage(EdgeMode::Increment, EdgeMode::Disable, 10);
        pcnt.drive(Level::High, 1_000);
        pcnt.drive(Level::Low, 1_002);
        pcnt.drive(Level::High, 1_004);
        pcnt.drive(Level::Low, 2_000);
        assert_eq!(storage.pulse_counter_read().delta, 1);
    }

    #[test]
    fn test_busy_unit_is_a_failed_read_and_keeps_count() {
        let (pcnt, mut storage) = storage(EdgeMode::Increment, EdgeMode::Disable, 0);
        pcnt.pulse(0, 10);
        pcnt.pulse(100, 10);
        pcnt.set_busy_reads(1);
        assert_eq!(storage.pulse_counter_read(), PulseRead::failed(0));
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(2));
    }

    #[test]
    fn test_overflow_is_a_failed_read() {
        let (pcnt, mut storage) = storage(EdgeMode::Increment, EdgeMode::Disable, 0);
        for i in 0..u32::from(PCNT_HIGH_LIMIT.unsigned_abs()) + 3 {
            pcnt.pulse(i * 10, 5);
        }
        let read = storage.pulse_counter_read();
        assert!(!read.success);
        assert_eq!(read.delta, 3);
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(0));
    }

    #[test]
    fn test_decrement_reaches_low_limit() {
        let (pcnt, mut storage) = storage(EdgeMode::Decrement, EdgeMode::Disable, 0);
        for i in 0..5 {
            pcnt.pulse(i * 10, 5);
        }
        assert_eq!(storage.pulse_counter_read(), PulseRead::ok(-5));
    }

    #[test]
    fn test_rejected_filter_fails_setup() {
        let pcnt = SimulatedPcnt::new();
        pcnt.set_max_filter_cycles(500);
        let mut storage = HwPulseCounterStorage::new(pcnt, 5);
        storage.set_filter_us(13);
        assert!(matches!(storage.setup(), Err(StorageError::Pcnt(_))));
    }
}
