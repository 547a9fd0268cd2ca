use std::time::Duration;

/// Debounce filter over edge timestamps.
///
/// An edge is accepted when no edge has been accepted yet, or when at least
/// `filter_us` microseconds passed since the last accepted one. Timestamps are
/// the free-running 32-bit microsecond counter and may wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeFilter {
    filter_us: u32,
    last_accepted_us: Option<u32>,
}

impl EdgeFilter {
    pub fn new(filter: Duration) -> Self {
        Self::from_micros(duration_to_micros(filter))
    }

    pub fn from_micros(filter_us: u32) -> Self {
        Self {
            filter_us,
            last_accepted_us: None,
        }
    }

    pub fn filter_us(&self) -> u32 {
        self.filter_us
    }

    pub fn last_accepted_us(&self) -> Option<u32> {
        self.last_accepted_us
    }

    /// Whether an edge at `now_us` is far enough from one accepted at `last_us`.
    pub fn gap_passes(filter_us: u32, last_us: u32, now_us: u32) -> bool {
        now_us.wrapping_sub(last_us) >= filter_us
    }

    /// Feed one edge; returns true if it is accepted.
    pub fn accept(&mut self, timestamp_us: u32) -> bool {
        if let Some(last) = self.last_accepted_us {
            if !Self::gap_passes(self.filter_us, last, timestamp_us) {
                return false;
            }
        }
        self.last_accepted_us = Some(timestamp_us);
        true
    }

    pub fn reset(&mut self) {
        self.last_accepted_us = None;
    }
}

/// Saturating conversion to the 32-bit microsecond domain used by the counters.
pub fn duration_to_micros(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}
