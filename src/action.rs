use std::sync::Arc;

use crate::hal::Clock;
use crate::sensor::{PulseCounterSensor, TotalPulses};
use crate::storage::PulseCounterStorage;

/// Where the new total comes from.
pub enum TotalValue {
    Static(u32),
    /// Evaluated every time the action plays.
    Computed(Box<dyn Fn() -> u32 + Send + Sync>),
}

impl TotalValue {
    fn value(&self) -> u32 {
        match self {
            TotalValue::Static(value) => *value,
            TotalValue::Computed(compute) => compute(),
        }
    }
}

impl std::fmt::Debug for TotalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotalValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            TotalValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Rebases a sensor's running total without touching its storage.
///
/// The action only holds the shared total, so it can be played from any
/// thread while the sensor keeps polling.
#[derive(Debug)]
pub struct SetTotalPulsesAction {
    total: Arc<TotalPulses>,
    value: TotalValue,
}

impl SetTotalPulsesAction {
    pub fn new<S, C>(sensor: &PulseCounterSensor<S, C>, value: u32) -> Self
    where
        S: PulseCounterStorage,
        C: Clock,
    {
        Self::for_total(sensor.total_handle(), TotalValue::Static(value))
    }

    pub fn computed<S, C, F>(sensor: &PulseCounterSensor<S, C>, compute: F) -> Self
    where
        S: PulseCounterStorage,
        C: Clock,
        F: Fn() -> u32 + Send + Sync + 'static,
    {
        Self::for_total(sensor.total_handle(), TotalValue::Computed(Box::new(compute)))
    }

    pub fn for_total(total: Arc<TotalPulses>, value: TotalValue) -> Self {
        Self { total, value }
    }

    /// Set the total and publish it. Returns the value that was set.
    pub fn play(&self) -> u32 {
        let value = self.value.value();
        log::debug!("Setting total pulses to {}", value);
        self.total.set(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ManualClock;
    use crate::storage::{Backend, PulseRead, StorageError};
    use crate::{EdgeMode, PulseCounterConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use std::thread;

    struct Steady(i32);

    impl PulseCounterStorage for Steady {
        fn backend(&self) -> Backend {
            Backend::Hardware
        }
        fn set_edge_modes(&mut self, _rising: EdgeMode, _falling: EdgeMode) {}
        fn set_filter_us(&mut self, _filter_us: u32) {}
        fn setup(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
        fn pulse_counter_read(&mut self) -> PulseRead {
            PulseRead::ok(self.0)
        }
    }

    fn sensor(delta: i32) -> PulseCounterSensor<Steady, ManualClock> {
        let config = PulseCounterConfig::builder("energy").build().unwrap();
        PulseCounterSensor::new(&config, Steady(delta), ManualClock::new()).unwrap()
    }

    #[test]
    fn test_static_value() {
        let mut sensor = sensor(3);
        sensor.update();
        let action = SetTotalPulsesAction::new(&sensor, 500);
        assert_eq!(action.play(), 500);
        assert_eq!(sensor.total_pulses(), 500);
        sensor.update();
        assert_eq!(sensor.total_pulses(), 503);
    }

    #[test]
    fn test_computed_value_is_evaluated_on_play() {
        let sensor = sensor(0);
        let source = Arc::new(AtomicU32::new(1));
        let reader = Arc::clone(&source);
        let action =
            SetTotalPulsesAction::computed(&sensor, move || reader.load(Ordering::Relaxed));
        action.play();
        assert_eq!(sensor.total_pulses(), 1);
        source.store(42, Ordering::Relaxed);
        action.play();
        assert_eq!(sensor.total_pulses(), 42);
    }

    #[test]
    fn test_rebase_races_with_tick() {
        const DELTA: i32 = 7;
        for _ in 0..200 {
            let mut sensor = sensor(DELTA);
            sensor.set_total_pulses(1_000);
            let action = SetTotalPulsesAction::new(&sensor, 500);
            let barrier = Arc::new(Barrier::new(2));

            let start = Arc::clone(&barrier);
            let rebase = thread::spawn(move || {
                start.wait();
                action.play();
            });
            barrier.wait();
            sensor.update();
            rebase.join().unwrap();

            let total = sensor.total_pulses();
            // Either the tick landed first and was overwritten, or it was applied on top.
            assert!(total == 500 || total == 507, "total {total}");
        }
    }

    #[test]
    fn test_publishes_rebased_total() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sensor = sensor(0).with_total_sink(move |v: u32| log.lock().unwrap().push(v));
        SetTotalPulsesAction::new(&sensor, 12).play();
        assert_eq!(*seen.lock().unwrap(), vec![12]);
    }
}
