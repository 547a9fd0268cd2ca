use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::DEFAULT_FILTER_US;
use crate::count_mode::EdgeMode;
use crate::edge_filter::EdgeFilter;
use crate::hal::{EdgeHandler, InterruptPin, Level};
use crate::storage::{Backend, PulseCounterStorage, PulseRead, StorageError};

/// State shared between the pin interrupt and the polling loop.
///
/// The interrupt is the only writer of `last_edge_us` and the only producer on
/// `counter`; the polling loop only swaps `counter` back to zero.
#[derive(Debug)]
pub struct EdgeCounter {
    counter: AtomicI32,
    last_edge_us: AtomicU32,
    has_edge: AtomicBool,
    filter_us: AtomicU32,
    rising_step: AtomicI32,
    falling_step: AtomicI32,
}

impl EdgeCounter {
    fn new() -> Self {
        Self {
            counter: AtomicI32::new(0),
            last_edge_us: AtomicU32::new(0),
            has_edge: AtomicBool::new(false),
            filter_us: AtomicU32::new(DEFAULT_FILTER_US),
            rising_step: AtomicI32::new(EdgeMode::Increment.step()),
            falling_step: AtomicI32::new(EdgeMode::Disable.step()),
        }
    }

    /// Take everything counted so far and start again from zero.
    pub fn take(&self) -> i32 {
        self.counter.swap(0, Ordering::AcqRel)
    }
}

impl EdgeHandler for EdgeCounter {
    fn on_edge(&self, level: Level, timestamp_us: u32) {
        let filter_us = self.filter_us.load(Ordering::Relaxed);
        if self.has_edge.load(Ordering::Relaxed)
            && !EdgeFilter::gap_passes(
                filter_us,
                self.last_edge_us.load(Ordering::Relaxed),
                timestamp_us,
            )
        {
            return;
        }
        self.last_edge_us.store(timestamp_us, Ordering::Relaxed);
        self.has_edge.store(true, Ordering::Relaxed);

        let step = match level {
            Level::High => self.rising_step.load(Ordering::Relaxed),
            Level::Low => self.falling_step.load(Ordering::Relaxed),
        };
        if step != 0 {
            self.counter.fetch_add(step, Ordering::Release);
        }
    }
}

/// Software backend: counts in the pin's edge interrupt.
pub struct BasicPulseCounterStorage<P> {
    pin: P,
    edges: Arc<EdgeCounter>,
    rising_edge: EdgeMode,
    falling_edge: EdgeMode,
}

impl<P: InterruptPin> BasicPulseCounterStorage<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            edges: Arc::new(EdgeCounter::new()),
            rising_edge: EdgeMode::Increment,
            falling_edge: EdgeMode::Disable,
        }
    }

    /// Handle to the interrupt-side state, for platforms that dispatch interrupts themselves.
    pub fn edge_counter(&self) -> Arc<EdgeCounter> {
        Arc::clone(&self.edges)
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P: InterruptPin> PulseCounterStorage for BasicPulseCounterStorage<P> {
    fn backend(&self) -> Backend {
        Backend::Basic
    }

    fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode) {
        self.rising_edge = rising;
        self.falling_edge = falling;
        self.edges.rising_step.store(rising.step(), Ordering::Relaxed);
        self.edges.falling_step.store(falling.step(), Ordering::Relaxed);
    }

    fn set_filter_us(&mut self, filter_us: u32) {
        self.edges.filter_us.store(filter_us, Ordering::Relaxed);
    }

    fn setup(&mut self) -> Result<(), StorageError> {
        log::debug!("Setting up interrupt pulse counter on GPIO{}", self.pin.number());
        self.pin.setup()?;
        self.pin.attach_any_edge(self.edge_counter())?;
        Ok(())
    }

    fn pulse_counter_read(&mut self) -> PulseRead {
        PulseRead::ok(self.edges.take())
    }

    fn dump_config(&self) {
        log::info!("  Pin: GPIO{}", self.pin.number());
        log::info!("  Rising Edge: {}", self.rising_edge);
        log::info!("  Falling Edge: {}", self.falling_edge);
        log::info!(
            "  Filtering pulses shorter than {} µs",
            self.edges.filter_us.load(Ordering::Relaxed)
        );
    }
}
