//! # pulse-counter
//!
//! Pulse rate and total measurement for flow meters, anemometers, energy meters
//! and anything else that signals by toggling a digital input.
//!
//! Pulses are counted by one of three interchangeable storages:
//!
//! - **Basic**: the pin's edge interrupt filters and counts in software
//! - **Hardware**: a PCNT unit counts in silicon with its own glitch filter
//! - **ULP**: the low-power coprocessor counts while the main CPU sleeps
//!
//! A [`PulseCounterSensor`] polls the chosen storage once per update interval,
//! turns the delta into pulses per minute over the time that actually elapsed,
//! and keeps a running total that [`SetTotalPulsesAction`] can rebase.
//!
//! The hardware is reached through the traits in [`hal`]; [`sim`] provides
//! software versions of each so the whole pipeline runs on a host.
//!
//! ## Examples
//!
//! ### Interrupt counting
//!
//! ```rust
//! use pulse_counter::sim::{ManualClock, SimulatedPin};
//! use pulse_counter::{Backend, BasicPulseCounterStorage, PulseCounterConfig, PulseCounterSensor};
//! use std::time::Duration;
//!
//! let config = PulseCounterConfig::builder("water_meter")
//!     .backend(Backend::Basic)
//!     .internal_filter(Duration::from_micros(100))
//!     .build()?;
//!
//! let pin = SimulatedPin::new(4);
//! let clock = ManualClock::new();
//! let storage = BasicPulseCounterStorage::new(pin.clone());
//! let mut sensor = PulseCounterSensor::new(&config, storage, clock.clone())?;
//! sensor.setup()?;
//! sensor.update(); // starts the clock
//!
//! for i in 0..30 {
//!     pin.pulse(i * 1_000_000, 500);
//! }
//! clock.advance(Duration::from_secs(30));
//!
//! let measurement = sensor.update().expect("the interrupt counter never fails a read");
//! assert_eq!(measurement.rate, Some(60.0));
//! assert_eq!(measurement.total, 30);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Rebasing the total
//!
//! ```rust
//! use pulse_counter::sim::{ManualClock, SimulatedPcnt};
//! use pulse_counter::{
//!     HwPulseCounterStorage, PulseCounterConfig, PulseCounterSensor, SetTotalPulsesAction,
//! };
//!
//! let config = PulseCounterConfig::builder("energy_meter").build()?;
//! let pcnt = SimulatedPcnt::new();
//! let storage = HwPulseCounterStorage::new(pcnt.clone(), 5);
//! let mut sensor = PulseCounterSensor::new(&config, storage, ManualClock::new())?;
//! sensor.setup()?;
//!
//! let reset_meter = SetTotalPulsesAction::new(&sensor, 120_000);
//! reset_meter.play();
//!
//! pcnt.pulse(0, 10);
//! pcnt.pulse(100, 10);
//! sensor.update();
//! assert_eq!(sensor.total_pulses(), 120_002);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod action;
pub mod basic_storage;
pub mod config;
pub mod count_mode;
pub mod edge_filter;
pub mod hal;
pub mod hw_storage;
pub mod measurement_log;
pub mod sensor;
pub mod sim;
pub mod sink;
pub mod storage;
pub mod ulp_storage;

// Re-export the main types for convenience
pub use action::{SetTotalPulsesAction, TotalValue};

pub use basic_storage::{BasicPulseCounterStorage, EdgeCounter};

pub use config::{ConfigError, PulseCounterConfig, PulseCounterConfigBuilder};

pub use count_mode::{CountMode, EdgeMode};

pub use edge_filter::EdgeFilter;

pub use hal::{Clock, Level, SystemClock};

pub use hw_storage::HwPulseCounterStorage;

pub use measurement_log::MeasurementLog;

pub use sensor::{Measurement, PulseCounterSensor, TotalPulses};

pub use sink::{LogSink, Sink};

pub use storage::{Backend, PulseCounterStorage, PulseRead, Storage, StorageError};

pub use ulp_storage::UlpPulseCounterStorage;
