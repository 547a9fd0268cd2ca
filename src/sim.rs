//! Software stand-ins for the counting hardware.
//!
//! Each simulated device is a cheap handle over shared state, so a test or demo
//! keeps one clone to drive edges while the storage owns another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::edge_filter::EdgeFilter;
use crate::hal::{
    Clock, EdgeHandler, InterruptPin, Level, PcntConfig, PcntError, PinError, PulseCounterUnit,
    UlpCoprocessor, UlpError, UlpVar,
};
use crate::hw_storage::{PCNT_APB_CLOCK_MHZ, PCNT_MAX_FILTER_CYCLES};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let by_us = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.now_us.fetch_add(by_us, Ordering::Relaxed);
    }

    pub fn set_micros(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }
}

struct PinState {
    level: Level,
    configured: bool,
    handler: Option<Arc<dyn EdgeHandler>>,
}

/// GPIO whose transitions are produced by the caller.
#[derive(Clone)]
pub struct SimulatedPin {
    number: u8,
    available: bool,
    state: Arc<Mutex<PinState>>,
}

impl SimulatedPin {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            available: true,
            state: Arc::new(Mutex::new(PinState {
                level: Level::Low,
                configured: false,
                handler: None,
            })),
        }
    }

    /// A pin that refuses to be configured.
    pub fn unavailable(number: u8) -> Self {
        Self {
            available: false,
            ..Self::new(number)
        }
    }

    pub fn level(&self) -> Level {
        lock(&self.state).level
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.state).configured
    }

    /// Move the pin to `level` at `timestamp_us`, raising the edge interrupt if it changed.
    pub fn set_level(&self, level: Level, timestamp_us: u32) {
        let handler = {
            let mut state = lock(&self.state);
            if state.level == level {
                return;
            }
            state.level = level;
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler.on_edge(level, timestamp_us);
        }
    }

    /// A high pulse of `width_us` starting at `start_us`.
    pub fn pulse(&self, start_us: u32, width_us: u32) {
        self.set_level(Level::High, start_us);
        self.set_level(Level::Low, start_us.wrapping_add(width_us));
    }
}

impl InterruptPin for SimulatedPin {
    fn number(&self) -> u8 {
        self.number
    }

    fn setup(&mut self) -> Result<(), PinError> {
        if !self.available {
            return Err(PinError::Unavailable { pin: self.number });
        }
        lock(&self.state).configured = true;
        Ok(())
    }

    fn attach_any_edge(&mut self, handler: Arc<dyn EdgeHandler>) -> Result<(), PinError> {
        let mut state = lock(&self.state);
        if !state.configured {
            return Err(PinError::InterruptUnavailable { pin: self.number });
        }
        state.handler = Some(handler);
        Ok(())
    }
}

#[derive(Default)]
struct PcntState {
    config: Option<PcntConfig>,
    filter_cycles: Option<u16>,
    filter: EdgeFilter,
    running: bool,
    count: i16,
    overflow: bool,
    busy_reads: u32,
    max_filter_cycles: u16,
}

/// PCNT unit fed with edges by the caller.
///
/// The glitch filter is modelled at microsecond resolution: a filter of `n`
/// APB cycles rejects edges closer than `n / 80` µs to the last counted one.
#[derive(Clone)]
pub struct SimulatedPcnt {
    state: Arc<Mutex<PcntState>>,
}

impl SimulatedPcnt {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PcntState {
                max_filter_cycles: PCNT_MAX_FILTER_CYCLES,
                ..PcntState::default()
            })),
        }
    }

    pub fn config(&self) -> Option<PcntConfig> {
        lock(&self.state).config
    }

    pub fn filter_cycles(&self) -> Option<u16> {
        lock(&self.state).filter_cycles
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Make the next `reads` counter reads report the unit as busy.
    pub fn set_busy_reads(&self, reads: u32) {
        lock(&self.state).busy_reads = reads;
    }

    /// Narrow the filter register, to exercise configuration failures.
    pub fn set_max_filter_cycles(&self, cycles: u16) {
        lock(&self.state).max_filter_cycles = cycles;
    }

    /// A transition of the input to `level` at `timestamp_us`.
    pub fn drive(&self, level: Level, timestamp_us: u32) {
        let mut state = lock(&self.state);
        let Some(config) = state.config else {
            return;
        };
        if !state.running || !state.filter.accept(timestamp_us) {
            return;
        }
        let mode = match level {
            Level::High => config.rising_edge,
            Level::Low => config.falling_edge,
        };
        let count = state.count.saturating_add(mode.step() as i16);
        if count >= config.counter_h_lim || count <= config.counter_l_lim {
            state.count = 0;
            state.overflow = true;
        } else {
            state.count = count;
        }
    }

    pub fn pulse(&self, start_us: u32, width_us: u32) {
        self.drive(Level::High, start_us);
        self.drive(Level::Low, start_us.wrapping_add(width_us));
    }
}

impl Default for SimulatedPcnt {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseCounterUnit for SimulatedPcnt {
    fn configure(&mut self, config: &PcntConfig) -> Result<(), PcntError> {
        if config.counter_l_lim >= 0 || config.counter_h_lim <= 0 {
            return Err(PcntError::InvalidConfig(format!(
                "limits {}..{} must straddle zero",
                config.counter_l_lim, config.counter_h_lim
            )));
        }
        let mut state = lock(&self.state);
        state.config = Some(*config);
        state.count = 0;
        Ok(())
    }

    fn set_filter(&mut self, cycles: Option<u16>) -> Result<(), PcntError> {
        let mut state = lock(&self.state);
        if let Some(cycles) = cycles {
            if cycles > state.max_filter_cycles {
                return Err(PcntError::FilterOutOfRange(cycles));
            }
        }
        state.filter_cycles = cycles;
        let filter_us = cycles.map_or(0, |c| u32::from(c) / PCNT_APB_CLOCK_MHZ);
        state.filter = EdgeFilter::from_micros(filter_us);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PcntError> {
        lock(&self.state).running = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PcntError> {
        lock(&self.state).running = true;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PcntError> {
        lock(&self.state).count = 0;
        Ok(())
    }

    fn counter(&mut self) -> Result<i16, PcntError> {
        let mut state = lock(&self.state);
        if state.busy_reads > 0 {
            state.busy_reads -= 1;
            return Err(PcntError::Busy);
        }
        Ok(state.count)
    }

    fn take_overflow(&mut self) -> bool {
        std::mem::take(&mut lock(&self.state).overflow)
    }
}

/// ESP32 GPIOs that are routed to the RTC domain, with their RTC IO numbers.
const RTC_IO_MAP: [(u8, u8); 18] = [
    (36, 0),
    (37, 1),
    (38, 2),
    (39, 3),
    (34, 4),
    (35, 5),
    (25, 6),
    (26, 7),
    (33, 8),
    (32, 9),
    (4, 10),
    (0, 11),
    (2, 12),
    (15, 13),
    (13, 14),
    (12, 15),
    (14, 16),
    (27, 17),
];

#[derive(Default)]
struct UlpState {
    memory: HashMap<UlpVar, u16>,
    woke_from_deep_sleep: bool,
    loaded: bool,
    running: bool,
    fail_load: bool,
    fail_reads: bool,
    rtc_inputs: Vec<u8>,
    input_high: bool,
    wakeup_period: Option<Duration>,
}

impl UlpState {
    fn word(&self, var: UlpVar) -> u16 {
        self.memory.get(&var).copied().unwrap_or(0)
    }

    /// One wakeup of the counting program.
    fn run_once(&mut self, level: Level) {
        let run_count = self.word(UlpVar::RunCount).wrapping_add(1);
        self.memory.insert(UlpVar::RunCount, run_count);

        let next_edge = self.word(UlpVar::NextEdge);
        let input = match level {
            Level::High => 1,
            Level::Low => 0,
        };
        if input != next_edge {
            let max = self.word(UlpVar::DebounceMaxCount);
            self.memory.insert(UlpVar::DebounceCounter, max);
            return;
        }

        let debounce = self.word(UlpVar::DebounceCounter);
        if debounce > 0 {
            self.memory.insert(UlpVar::DebounceCounter, debounce - 1);
            return;
        }

        let step = if next_edge == 1 {
            self.word(UlpVar::RisingStep)
        } else {
            self.word(UlpVar::FallingStep)
        };
        let edge_count = self.word(UlpVar::EdgeCount).wrapping_add(step);
        self.memory.insert(UlpVar::EdgeCount, edge_count);
        self.memory.insert(UlpVar::NextEdge, next_edge ^ 1);
        let max = self.word(UlpVar::DebounceMaxCount);
        self.memory.insert(UlpVar::DebounceCounter, max);
    }
}

/// ULP coprocessor running a software model of the edge counting program.
///
/// Every call to [`SimulatedUlp::sample`] is one wakeup: the program reads the
/// pin, requires the new level for `debounce_max_count + 1` consecutive
/// wakeups, then adds the rising or falling step to `edge_count`.
#[derive(Clone, Default)]
pub struct SimulatedUlp {
    state: Arc<Mutex<UlpState>>,
}

impl SimulatedUlp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_woke_from_deep_sleep(&self, woke: bool) {
        let mut state = lock(&self.state);
        state.woke_from_deep_sleep = woke;
        // A program that survived sleep is still running.
        state.running |= woke;
    }

    pub fn set_fail_load(&self, fail: bool) {
        lock(&self.state).fail_load = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).loaded
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn wakeup_period(&self) -> Option<Duration> {
        lock(&self.state).wakeup_period
    }

    pub fn peek(&self, var: UlpVar) -> u16 {
        lock(&self.state).word(var)
    }

    pub fn poke(&self, var: UlpVar, value: u16) {
        lock(&self.state).memory.insert(var, value);
    }

    /// Hold the input at `level` without running the program.
    pub fn set_input(&self, level: Level) {
        lock(&self.state).input_high = level == Level::High;
    }

    /// Run one wakeup of the program with the pin at `level`.
    pub fn sample(&self, level: Level) {
        let mut state = lock(&self.state);
        state.input_high = level == Level::High;
        if state.running {
            state.run_once(level);
        }
    }

    /// `pulses` pulses, each held high for `high_samples` and low for `low_samples` wakeups.
    pub fn pulse_train(&self, pulses: u32, high_samples: u32, low_samples: u32) {
        for _ in 0..pulses {
            for _ in 0..high_samples {
                self.sample(Level::High);
            }
            for _ in 0..low_samples {
                self.sample(Level::Low);
            }
        }
    }
}

impl UlpCoprocessor for SimulatedUlp {
    fn woke_from_deep_sleep(&self) -> bool {
        lock(&self.state).woke_from_deep_sleep
    }

    fn rtc_io_number(&self, gpio: u8) -> Option<u8> {
        RTC_IO_MAP
            .iter()
            .find(|(g, _)| *g == gpio)
            .map(|(_, rtc)| *rtc)
    }

    fn init_rtc_input(&mut self, gpio: u8) -> Result<(), UlpError> {
        let rtc = self.rtc_io_number(gpio).ok_or(UlpError::RtcIo(gpio))?;
        lock(&self.state).rtc_inputs.push(rtc);
        Ok(())
    }

    fn input_level(&self, gpio: u8) -> Result<Level, UlpError> {
        let rtc = self.rtc_io_number(gpio).ok_or(UlpError::RtcIo(gpio))?;
        let state = lock(&self.state);
        if !state.rtc_inputs.contains(&rtc) {
            return Err(UlpError::RtcIo(gpio));
        }
        Ok(Level::from(state.input_high))
    }

    fn load_program(&mut self) -> Result<(), UlpError> {
        let mut state = lock(&self.state);
        if state.fail_load {
            return Err(UlpError::Load("ESP_ERR_INVALID_SIZE".to_string()));
        }
        state.loaded = true;
        state.running = false;
        state.memory.clear();
        Ok(())
    }

    fn set_wakeup_period(&mut self, period: Duration) -> Result<(), UlpError> {
        lock(&self.state).wakeup_period = Some(period);
        Ok(())
    }

    fn start(&mut self) -> Result<(), UlpError> {
        let mut state = lock(&self.state);
        if !state.loaded {
            return Err(UlpError::Start("ESP_ERR_INVALID_STATE".to_string()));
        }
        state.running = true;
        Ok(())
    }

    fn read_word(&self, var: UlpVar) -> Result<u16, UlpError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(UlpError::Memory(var));
        }
        Ok(state.word(var))
    }

    fn write_word(&mut self, var: UlpVar, value: u16) -> Result<(), UlpError> {
        lock(&self.state).memory.insert(var, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(3));
        assert_eq!(other.now_micros(), 3_000);
        other.set_micros(10);
        assert_eq!(clock.now_micros(), 10);
    }

    #[test]
    fn test_pin_requires_setup_before_interrupt() {
        struct Nothing;
        impl EdgeHandler for Nothing {
            fn on_edge(&self, _level: Level, _timestamp_us: u32) {}
        }
        let mut pin = SimulatedPin::new(4);
        assert!(pin.attach_any_edge(Arc::new(Nothing)).is_err());
        pin.setup().unwrap();
        assert!(pin.attach_any_edge(Arc::new(Nothing)).is_ok());
        assert!(pin.is_configured());
    }

    #[test]
    fn test_pin_only_interrupts_on_change() {
        use std::sync::atomic::AtomicU32;

        struct Count(AtomicU32);
        impl EdgeHandler for Count {
            fn on_edge(&self, _level: Level, _timestamp_us: u32) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let edges = Arc::new(Count(AtomicU32::new(0)));
        let mut pin = SimulatedPin::new(4);
        pin.setup().unwrap();
        pin.attach_any_edge(Arc::clone(&edges) as Arc<dyn EdgeHandler>).unwrap();

        pin.set_level(Level::Low, 10);
        pin.set_level(Level::High, 20);
        pin.set_level(Level::High, 30);
        assert_eq!(pin.level(), Level::High);
        assert_eq!(edges.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pcnt_ignores_edges_while_paused() {
        let mut pcnt = SimulatedPcnt::new();
        pcnt.configure(&PcntConfig {
            pulse_pin: 5,
            rising_edge: crate::EdgeMode::Increment,
            falling_edge: crate::EdgeMode::Disable,
            counter_h_lim: 100,
            counter_l_lim: -100,
        })
        .unwrap();
        pcnt.pulse(0, 10);
        assert_eq!(pcnt.counter().unwrap(), 0);
        pcnt.resume().unwrap();
        pcnt.pulse(100, 10);
        assert_eq!(pcnt.counter().unwrap(), 1);
    }

    #[test]
    fn test_ulp_load_failure() {
        let mut ulp = SimulatedUlp::new();
        ulp.set_fail_load(true);
        assert!(matches!(ulp.load_program(), Err(UlpError::Load(_))));
        assert!(matches!(ulp.start(), Err(UlpError::Start(_))));
    }

    #[test]
    fn test_ulp_program_counts_run() {
        let ulp = SimulatedUlp::new();
        ulp.poke(UlpVar::NextEdge, 1);
        ulp.poke(UlpVar::RisingStep, 1);
        ulp.set_woke_from_deep_sleep(true);
        ulp.pulse_train(2, 1, 1);
        assert_eq!(ulp.peek(UlpVar::RunCount), 4);
        // No debounce configured: a single sample confirms each edge.
        assert_eq!(ulp.peek(UlpVar::EdgeCount), 2);
    }

    #[test]
    fn test_ulp_input_level_needs_rtc_input() {
        let mut ulp = SimulatedUlp::new();
        assert!(matches!(ulp.input_level(25), Err(UlpError::RtcIo(25))));
        ulp.init_rtc_input(25).unwrap();
        ulp.set_input(Level::High);
        assert_eq!(ulp.input_level(25).unwrap(), Level::High);
        ulp.sample(Level::Low);
        assert_eq!(ulp.input_level(25).unwrap(), Level::Low);
    }

    #[test]
    fn test_rtc_io_numbers() {
        let ulp = SimulatedUlp::new();
        assert_eq!(ulp.rtc_io_number(25), Some(6));
        assert_eq!(ulp.rtc_io_number(4), Some(10));
        assert_eq!(ulp.rtc_io_number(5), None);
    }
}
