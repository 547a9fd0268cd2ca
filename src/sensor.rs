use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{ConfigError, PulseCounterConfig};
use crate::count_mode::CountMode;
use crate::hal::Clock;
use crate::sink::Sink;
use crate::storage::{PulseCounterStorage, StorageError};

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

struct TotalState {
    value: u32,
    sink: Option<Box<dyn Sink<u32>>>,
}

/// Running pulse total shared by the polling loop and [`crate::SetTotalPulsesAction`].
///
/// Every write and its publication happen under one lock, so concurrent ticks
/// and rebases are applied and published in a single order.
pub struct TotalPulses {
    state: Mutex<TotalState>,
}

impl TotalPulses {
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(TotalState {
                value: initial,
                sink: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TotalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> u32 {
        self.lock().value
    }

    /// Add a signed delta, wrapping at the u32 boundary. Returns the new total.
    pub fn add(&self, delta: i32) -> u32 {
        let mut state = self.lock();
        state.value = state.value.wrapping_add_signed(delta);
        let value = state.value;
        if let Some(sink) = state.sink.as_mut() {
            sink.publish(value);
        }
        value
    }

    /// Rebase the total to `value`.
    pub fn set(&self, value: u32) {
        let mut state = self.lock();
        state.value = value;
        if let Some(sink) = state.sink.as_mut() {
            sink.publish(value);
        }
    }

    pub fn has_sink(&self) -> bool {
        self.lock().sink.is_some()
    }

    fn set_sink(&self, sink: Box<dyn Sink<u32>>) {
        self.lock().sink = Some(sink);
    }
}

impl Default for TotalPulses {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for TotalPulses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotalPulses")
            .field("value", &self.get())
            .finish_non_exhaustive()
    }
}

/// What one successful tick produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub delta: i32,
    /// Pulses per minute; `None` on the first tick, which only starts the clock.
    pub rate: Option<f32>,
    pub total: u32,
}

/// Pulses per minute for `delta` pulses over `elapsed_us` microseconds.
pub fn pulses_per_minute(delta: i32, elapsed_us: u64) -> Option<f32> {
    if elapsed_us == 0 {
        return None;
    }
    Some((f64::from(delta) * MICROS_PER_MINUTE / elapsed_us as f64) as f32)
}

/// Polls a storage once per update interval and publishes rate and total.
pub struct PulseCounterSensor<S, C> {
    name: String,
    storage: S,
    clock: C,
    count_mode: CountMode,
    filter: Duration,
    update_interval: Duration,
    total: Arc<TotalPulses>,
    rate_sink: Option<Box<dyn Sink<f32>>>,
    last_time_us: Option<u64>,
}

impl<S: PulseCounterStorage, C: Clock> PulseCounterSensor<S, C> {
    /// Bind a validated configuration to the storage chosen for it.
    pub fn new(config: &PulseCounterConfig, mut storage: S, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        if storage.backend() != config.backend() {
            return Err(ConfigError::BackendMismatch {
                configured: config.backend(),
                storage: storage.backend(),
            });
        }

        let count_mode = config.count_mode();
        storage.set_edge_modes(count_mode.rising_edge, count_mode.falling_edge);
        storage.set_filter_us(config.filter_us());

        Ok(Self {
            name: config.name().to_string(),
            storage,
            clock,
            count_mode,
            filter: config.internal_filter(),
            update_interval: config.update_interval(),
            total: Arc::new(TotalPulses::default()),
            rate_sink: None,
            last_time_us: None,
        })
    }

    pub fn with_rate_sink(mut self, sink: impl Sink<f32> + 'static) -> Self {
        self.rate_sink = Some(Box::new(sink));
        self
    }

    pub fn with_total_sink(self, sink: impl Sink<u32> + 'static) -> Self {
        self.total.set_sink(Box::new(sink));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Bring up the counting hardware. A failure here is fatal to the component.
    #[tracing::instrument(level = "trace", skip_all, fields(name = %self.name))]
    pub fn setup(&mut self) -> Result<(), StorageError> {
        log::debug!("Setting up pulse counter '{}'...", self.name);
        self.storage.setup().inspect_err(|e| {
            log::error!("Pulse counter '{}' failed to set up: {}", self.name, e);
        })
    }

    /// One poll tick. Returns `None` when the storage read failed.
    #[tracing::instrument(level = "trace", skip_all, fields(name = %self.name))]
    pub fn update(&mut self) -> Option<Measurement> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running().map(|client| {
            client.span(tracy_client::span_location!("PulseCounterSensor::update"), 0)
        });

        let read = self.storage.pulse_counter_read();
        if !read.success {
            log::warn!(
                "'{}': Reading pulse counter failed, skipping this update",
                self.name
            );
            return None;
        }

        let now = self.clock.now_micros();
        let rate = self
            .last_time_us
            .and_then(|last| pulses_per_minute(read.delta, now.saturating_sub(last)));
        if let Some(rate) = rate {
            log::debug!("'{}': Retrieved counter: {:.2} pulses/min", self.name, rate);
            if let Some(sink) = self.rate_sink.as_mut() {
                sink.publish(rate);
            }
        }

        let total = self.total.add(read.delta);
        tracing::trace!(delta = read.delta, total, "pulse counter tick");
        self.last_time_us = Some(now);

        Some(Measurement {
            delta: read.delta,
            rate,
            total,
        })
    }

    /// Rebase the running total and publish it.
    pub fn set_total_pulses(&self, pulses: u32) {
        log::debug!("'{}': Setting total to {} pulses", self.name, pulses);
        self.total.set(pulses);
    }

    pub fn total_pulses(&self) -> u32 {
        self.total.get()
    }

    /// Shared handle to the running total, for rebasing from another context.
    pub fn total_handle(&self) -> Arc<TotalPulses> {
        Arc::clone(&self.total)
    }

    pub fn dump_config(&self) {
        log::info!("Pulse Counter '{}'", self.name);
        log::info!("  Backend: {}", self.storage.backend());
        log::info!("  Internal filter: {:?}", self.filter);
        log::info!(
            "  Count mode: rising {}, falling {}",
            self.count_mode.rising_edge,
            self.count_mode.falling_edge
        );
        self.storage.dump_config();
        log::info!("  Update Interval: {:?}", self.update_interval);
        log::info!("  Total sensor: {}", self.total.has_sink());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_mode::EdgeMode;
    use crate::sim::ManualClock;
    use crate::storage::{Backend, PulseRead};
    use std::collections::VecDeque;

    /// Storage replaying a fixed sequence of reads.
    struct Scripted {
        reads: VecDeque<PulseRead>,
        modes: Option<(EdgeMode, EdgeMode)>,
        filter_us: Option<u32>,
    }

    impl Scripted {
        fn new(reads: &[PulseRead]) -> Self {
            Self {
                reads: reads.iter().copied().collect(),
                modes: None,
                filter_us: None,
            }
        }
    }

    impl PulseCounterStorage for Scripted {
        fn backend(&self) -> Backend {
            Backend::Basic
        }

        fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode) {
            self.modes = Some((rising, falling));
        }

        fn set_filter_us(&mut self, filter_us: u32) {
            self.filter_us = Some(filter_us);
        }

        fn setup(&mut self) -> Result<(), StorageError> {
            Ok(())
        }

        fn pulse_counter_read(&mut self) -> PulseRead {
            self.reads.pop_front().unwrap_or(PulseRead::ok(0))
        }
    }

    fn config() -> PulseCounterConfig {
        PulseCounterConfig::builder("flow")
            .backend(Backend::Basic)
            .falling_edge(EdgeMode::Decrement)
            .build()
            .unwrap()
    }

    fn sensor(reads: &[PulseRead]) -> (ManualClock, PulseCounterSensor<Scripted, ManualClock>) {
        let clock = ManualClock::new();
        let sensor =
            PulseCounterSensor::new(&config(), Scripted::new(reads), clock.clone()).unwrap();
        (clock, sensor)
    }

    #[test]
    fn test_new_configures_storage() {
        let (_clock, sensor) = sensor(&[]);
        assert_eq!(
            sensor.storage().modes,
            Some((EdgeMode::Increment, EdgeMode::Decrement))
        );
        assert_eq!(sensor.storage().filter_us, Some(13));
    }

    #[test]
    fn test_backend_mismatch_is_rejected() {
        let config = PulseCounterConfig::builder("flow").build().unwrap();
        let result = PulseCounterSensor::new(&config, Scripted::new(&[]), ManualClock::new());
        assert!(matches!(
            result,
            Err(ConfigError::BackendMismatch {
                configured: Backend::Hardware,
                storage: Backend::Basic
            })
        ));
    }

    #[test]
    fn test_pulses_per_minute() {
        assert_eq!(pulses_per_minute(30, 30_000_000), Some(60.0));
        assert_eq!(pulses_per_minute(-6, 60_000_000), Some(-6.0));
        assert_eq!(pulses_per_minute(5, 0), None);
    }

    #[test]
    fn test_first_tick_only_starts_clock() {
        let (_clock, mut sensor) = sensor(&[PulseRead::ok(4)]);
        let measurement = sensor.update().unwrap();
        assert_eq!(measurement.rate, None);
        assert_eq!(measurement.total, 4);
    }

    #[test]
    fn test_rate_uses_actual_elapsed_time() {
        let (clock, mut sensor) = sensor(&[PulseRead::ok(0), PulseRead::ok(30)]);
        sensor.update();
        // Nominal interval is 60 s, but the tick came after 30 s.
        clock.advance(Duration::from_secs(30));
        assert_eq!(sensor.update().unwrap().rate, Some(60.0));
    }

    #[test]
    fn test_total_accumulates_signed_deltas() {
        let (clock, mut sensor) = sensor(&[PulseRead::ok(5), PulseRead::ok(0), PulseRead::ok(-2)]);
        sensor.set_total_pulses(100);
        for _ in 0..3 {
            clock.advance(Duration::from_secs(60));
            sensor.update();
        }
        assert_eq!(sensor.total_pulses(), 103);
    }

    #[test]
    fn test_total_wraps_at_u32() {
        let (_clock, mut sensor) = sensor(&[PulseRead::ok(3), PulseRead::ok(-5)]);
        sensor.set_total_pulses(u32::MAX);
        assert_eq!(sensor.update().unwrap().total, 2);
        assert_eq!(sensor.update().unwrap().total, u32::MAX - 2);
    }

    #[test]
    fn test_failed_read_skips_tick() {
        let (clock, mut sensor) = sensor(&[
            PulseRead::ok(0),
            PulseRead::failed(40),
            PulseRead::ok(20),
        ]);
        sensor.update();
        clock.advance(Duration::from_secs(60));
        assert_eq!(sensor.update(), None);
        assert_eq!(sensor.total_pulses(), 0);

        // The rate spans both periods since the last good tick.
        clock.advance(Duration::from_secs(60));
        let measurement = sensor.update().unwrap();
        assert_eq!(measurement.rate, Some(10.0));
        assert_eq!(measurement.total, 20);
    }

    #[test]
    fn test_publishes_to_sinks() {
        let rates = Arc::new(Mutex::new(Vec::new()));
        let totals = Arc::new(Mutex::new(Vec::new()));
        let (clock, sensor) = sensor(&[PulseRead::ok(2), PulseRead::ok(6)]);
        let rate_log = Arc::clone(&rates);
        let total_log = Arc::clone(&totals);
        let mut sensor = sensor
            .with_rate_sink(move |v: f32| rate_log.lock().unwrap().push(v))
            .with_total_sink(move |v: u32| total_log.lock().unwrap().push(v));

        sensor.update();
        clock.advance(Duration::from_secs(60));
        sensor.update();
        sensor.set_total_pulses(1_000);

        assert_eq!(*rates.lock().unwrap(), vec![6.0]);
        assert_eq!(*totals.lock().unwrap(), vec![2, 8, 1_000]);
    }
}
