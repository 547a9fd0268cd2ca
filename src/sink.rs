/// Consumer of published measurements.
pub trait Sink<T>: Send {
    fn publish(&mut self, value: T);
}

impl<T, F> Sink<T> for F
where
    F: FnMut(T) + Send,
{
    fn publish(&mut self, value: T) {
        self(value);
    }
}

/// Publishes by logging, rates with two decimals and totals as whole pulses.
#[derive(Debug, Clone)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Sink<f32> for LogSink {
    fn publish(&mut self, value: f32) {
        log::info!("'{}': Retrieved counter: {:.2} pulses/min", self.name, value);
    }
}

impl Sink<u32> for LogSink {
    fn publish(&mut self, value: u32) {
        log::info!("'{}': Total : {} pulses", self.name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn publish_all<S: Sink<u32>>(sink: &mut S, values: &[u32]) {
        for &v in values {
            sink.publish(v);
        }
    }

    #[test]
    fn test_closure_is_a_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut sink = move |v: u32| recorder.lock().unwrap().push(v);
        publish_all(&mut sink, &[1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_log_sink_accepts_both_measurements() {
        let mut sink = LogSink::new("flow");
        Sink::<f32>::publish(&mut sink, 12.5);
        publish_all(&mut sink, &[7]);
    }
}
