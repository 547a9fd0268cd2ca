//! Hardware seams used by the counting backends.
//!
//! Firmware implements these traits for the real GPIO, PCNT unit and ULP
//! coprocessor; [`crate::sim`] implements them in software.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::count_mode::EdgeMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

impl Level {
    pub fn toggled(self) -> Self {
        match self {
            Level::High => Level::Low,
            Level::Low => Level::High,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Monotonic microsecond time source.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("GPIO{pin} cannot be configured as an input")]
    Unavailable { pin: u8 },

    #[error("Failed to attach edge interrupt on GPIO{pin}")]
    InterruptUnavailable { pin: u8 },
}

/// Called from interrupt context on every transition of the pin.
///
/// `level` is the pin level after the transition, `timestamp_us` the
/// free-running 32-bit microsecond timer read at interrupt entry.
pub trait EdgeHandler: Send + Sync {
    fn on_edge(&self, level: Level, timestamp_us: u32);
}

pub trait InterruptPin {
    fn number(&self) -> u8;

    fn setup(&mut self) -> Result<(), PinError>;

    /// Route both rising and falling transitions to `handler`.
    fn attach_any_edge(&mut self, handler: Arc<dyn EdgeHandler>) -> Result<(), PinError>;
}

/// Configuration of one PCNT unit channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcntConfig {
    pub pulse_pin: u8,
    pub rising_edge: EdgeMode,
    pub falling_edge: EdgeMode,
    /// The counter resets to zero and raises the overflow flag when it reaches a limit.
    pub counter_h_lim: i16,
    pub counter_l_lim: i16,
}

#[derive(Debug, thiserror::Error)]
pub enum PcntError {
    #[error("No free pulse counter unit")]
    NoFreeUnit,

    #[error("Invalid pulse counter configuration: {0}")]
    InvalidConfig(String),

    #[error("Filter value {0} does not fit the 10-bit filter register")]
    FilterOutOfRange(u16),

    #[error("Pulse counter unit is busy")]
    Busy,
}

/// A hardware edge counting unit.
pub trait PulseCounterUnit {
    fn configure(&mut self, config: &PcntConfig) -> Result<(), PcntError>;

    /// Glitch filter length in APB clock cycles; `None` disables the filter.
    fn set_filter(&mut self, cycles: Option<u16>) -> Result<(), PcntError>;

    fn pause(&mut self) -> Result<(), PcntError>;

    fn resume(&mut self) -> Result<(), PcntError>;

    fn clear(&mut self) -> Result<(), PcntError>;

    fn counter(&mut self) -> Result<i16, PcntError>;

    /// Returns and clears the limit-reached flag.
    fn take_overflow(&mut self) -> bool;
}

/// Variables shared between the coprocessor program and the main CPU.
///
/// The coprocessor only sees the lower 16 bits of each RTC slow memory word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UlpVar {
    EdgeCount,
    RunCount,
    NextEdge,
    DebounceCounter,
    DebounceMaxCount,
    IoNumber,
    RisingStep,
    FallingStep,
    /// Written by the main CPU only: the edge count it last reported.
    LastRead,
}

impl UlpVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            UlpVar::EdgeCount => "edge_count",
            UlpVar::RunCount => "run_count",
            UlpVar::NextEdge => "next_edge",
            UlpVar::DebounceCounter => "debounce_counter",
            UlpVar::DebounceMaxCount => "debounce_max_count",
            UlpVar::IoNumber => "io_number",
            UlpVar::RisingStep => "rising_step",
            UlpVar::FallingStep => "falling_step",
            UlpVar::LastRead => "last_read",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UlpError {
    #[error("Loading ULP binary failed: {0}")]
    Load(String),

    #[error("Starting ULP program failed: {0}")]
    Start(String),

    #[error("Failed to configure RTC IO {0}")]
    RtcIo(u8),

    #[error("RTC memory access to '{}' failed", .0.as_str())]
    Memory(UlpVar),
}

/// The always-on coprocessor and its slice of RTC slow memory.
pub trait UlpCoprocessor {
    /// True when the chip came out of deep sleep, i.e. the program kept running.
    fn woke_from_deep_sleep(&self) -> bool;

    /// RTC IO number of `gpio`, or `None` if the pin is not in the RTC domain.
    fn rtc_io_number(&self, gpio: u8) -> Option<u8>;

    /// Configure `gpio` as an RTC input held through sleep.
    fn init_rtc_input(&mut self, gpio: u8) -> Result<(), UlpError>;

    /// Current level of the RTC input `gpio`.
    fn input_level(&self, gpio: u8) -> Result<Level, UlpError>;

    fn load_program(&mut self) -> Result<(), UlpError>;

    fn set_wakeup_period(&mut self, period: Duration) -> Result<(), UlpError>;

    fn start(&mut self) -> Result<(), UlpError>;

    fn read_word(&self, var: UlpVar) -> Result<u16, UlpError>;

    fn write_word(&mut self, var: UlpVar, value: u16) -> Result<(), UlpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_bool_and_toggle() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert_eq!(Level::High.toggled(), Level::Low);
        assert_eq!(Level::Low.toggled().toggled(), Level::Low);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_micros();
        std::thread::sleep(Duration::from_millis(2));
        let second = clock.now_micros();
        assert!(second >= first + 2_000);
    }
}
