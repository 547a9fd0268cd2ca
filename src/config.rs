use std::time::Duration;

use crate::count_mode::{CountMode, EdgeMode};
use crate::edge_filter::duration_to_micros;
use crate::storage::Backend;

pub const DEFAULT_FILTER_US: u32 = 13;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Can't set both count modes to DISABLE! This means no counting occurs at all!")]
    BothEdgesDisabled,

    #[error("Maximum internal filter value when using the {backend} backend is {max_us}us, got {filter_us}us")]
    FilterTooLarge {
        backend: Backend,
        filter_us: u32,
        max_us: u32,
    },

    #[error("Update interval must be longer than zero")]
    ZeroUpdateInterval,

    #[error("Configured for the {configured} backend but the storage is {storage}")]
    BackendMismatch { configured: Backend, storage: Backend },
}

/// Validated settings of one pulse counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseCounterConfig {
    name: String,
    backend: Backend,
    count_mode: CountMode,
    internal_filter: Duration,
    update_interval: Duration,
}

impl PulseCounterConfig {
    pub fn builder(name: &str) -> PulseCounterConfigBuilder {
        PulseCounterConfigBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn count_mode(&self) -> CountMode {
        self.count_mode
    }

    pub fn internal_filter(&self) -> Duration {
        self.internal_filter
    }

    pub fn filter_us(&self) -> u32 {
        duration_to_micros(self.internal_filter)
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count_mode.is_disabled() {
            return Err(ConfigError::BothEdgesDisabled);
        }
        if let Some(max_us) = self.backend.max_filter_us() {
            let filter_us = self.filter_us();
            if filter_us > max_us {
                return Err(ConfigError::FilterTooLarge {
                    backend: self.backend,
                    filter_us,
                    max_us,
                });
            }
        }
        if self.update_interval.is_zero() {
            return Err(ConfigError::ZeroUpdateInterval);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PulseCounterConfigBuilder {
    config: PulseCounterConfig,
}

impl PulseCounterConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: PulseCounterConfig {
                name: name.to_string(),
                backend: Backend::Hardware,
                count_mode: CountMode::default(),
                internal_filter: Duration::from_micros(u64::from(DEFAULT_FILTER_US)),
                update_interval: DEFAULT_UPDATE_INTERVAL,
            },
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn rising_edge(mut self, mode: EdgeMode) -> Self {
        self.config.count_mode.rising_edge = mode;
        self
    }

    pub fn falling_edge(mut self, mode: EdgeMode) -> Self {
        self.config.count_mode.falling_edge = mode;
        self
    }

    pub fn count_mode(mut self, count_mode: CountMode) -> Self {
        self.config.count_mode = count_mode;
        self
    }

    pub fn internal_filter(mut self, filter: Duration) -> Self {
        self.config.internal_filter = filter;
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.update_interval = interval;
        self
    }

    pub fn build(self) -> Result<PulseCounterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
