use polars::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sink::Sink;

pub const SAMPLE_COLUMN_NAME: &str = "sample";
pub const MEASUREMENT_COLUMN_NAME: &str = "measurement";
pub const VALUE_COLUMN_NAME: &str = "value";

pub const RATE_MEASUREMENT: &str = "rate";
pub const TOTAL_MEASUREMENT: &str = "total";

#[derive(Debug, Clone, Copy)]
struct Entry {
    measurement: &'static str,
    value: f64,
}

/// Records everything a sensor publishes, for inspection as a `DataFrame`.
#[derive(Debug, Clone, Default)]
pub struct MeasurementLog {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, measurement: &'static str, value: f64) {
        self.entries().push(Entry { measurement, value });
    }

    pub fn rate_sink(&self) -> impl Sink<f32> + 'static {
        let recorder = self.clone();
        move |rate: f32| recorder.record(RATE_MEASUREMENT, f64::from(rate))
    }

    pub fn total_sink(&self) -> impl Sink<u32> + 'static {
        let recorder = self.clone();
        move |total: u32| recorder.record(TOTAL_MEASUREMENT, f64::from(total))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// One row per publication, in publication order.
    pub fn to_dataframe(&self) -> Result<DataFrame, PolarsError> {
        let entries = self.entries();
        let samples: Vec<u32> = (0..entries.len() as u32).collect();
        let measurements: Vec<&str> = entries.iter().map(|e| e.measurement).collect();
        let values: Vec<f64> = entries.iter().map(|e| e.value).collect();

        df!(
            SAMPLE_COLUMN_NAME => samples,
            MEASUREMENT_COLUMN_NAME => measurements,
            VALUE_COLUMN_NAME => values
        )
    }

    /// Count, mean, min and max of the published rates.
    pub fn rate_summary(&self) -> Result<DataFrame, PolarsError> {
        self.to_dataframe()?
            .lazy()
            .filter(col(MEASUREMENT_COLUMN_NAME).eq(lit(RATE_MEASUREMENT)))
            .select([
                col(VALUE_COLUMN_NAME).count().alias("count"),
                col(VALUE_COLUMN_NAME).mean().alias("mean"),
                col(VALUE_COLUMN_NAME).min().alias("min"),
                col(VALUE_COLUMN_NAME).max().alias("max"),
            ])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_publications_in_order() {
        let log = MeasurementLog::new();
        let mut rates = log.rate_sink();
        let mut totals = log.total_sink();
        totals.publish(3);
        rates.publish(12.5);
        totals.publish(8);

        let df = log.to_dataframe().unwrap();
        assert_eq!(df.height(), 3);
        let measurements: Vec<&str> = df
            .column(MEASUREMENT_COLUMN_NAME)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(measurements, vec!["total", "rate", "total"]);
        let values: Vec<f64> = df
            .column(VALUE_COLUMN_NAME)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(values, vec![3.0, 12.5, 8.0]);
    }

    #[test]
    fn test_rate_summary() {
        let log = MeasurementLog::new();
        let mut rates = log.rate_sink();
        let mut totals = log.total_sink();
        for rate in [10.0, 20.0, 30.0] {
            rates.publish(rate);
        }
        totals.publish(1_000);

        let summary = log.rate_summary().unwrap();
        assert_eq!(summary.height(), 1);
        let mean = summary.column("mean").unwrap().f64().unwrap().get(0);
        let max = summary.column("max").unwrap().f64().unwrap().get(0);
        assert_eq!(mean, Some(20.0));
        assert_eq!(max, Some(30.0));
    }

    #[test]
    fn test_empty_log() {
        let log = MeasurementLog::new();
        assert!(log.is_empty());
        assert_eq!(log.to_dataframe().unwrap().height(), 0);
    }
}
