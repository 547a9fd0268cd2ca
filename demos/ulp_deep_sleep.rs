// ULP deep sleep example
//
// This example shows the coprocessor backend counting across a deep sleep:
// the main CPU boots, reads once, sleeps while the ULP keeps sampling, and on
// wake-up the first read reports the pulses that arrived during the sleep.

use pulse_counter::sim::{ManualClock, SimulatedPcnt, SimulatedPin, SimulatedUlp};
use pulse_counter::{
    Backend, LogSink, PulseCounterConfig, PulseCounterSensor, Storage, UlpPulseCounterStorage,
};
use std::time::Duration;

type SimStorage = Storage<SimulatedPin, SimulatedPcnt, SimulatedUlp>;

fn boot(
    config: &PulseCounterConfig,
    ulp: &SimulatedUlp,
    clock: &ManualClock,
) -> Result<PulseCounterSensor<SimStorage, ManualClock>, Box<dyn std::error::Error>> {
    let storage: SimStorage = UlpPulseCounterStorage::new(ulp.clone(), 25).into();
    let mut sensor = PulseCounterSensor::new(config, storage, clock.clone())?
        .with_rate_sink(LogSink::new(config.name()))
        .with_total_sink(LogSink::new(config.name()));
    sensor.setup()?;
    Ok(sensor)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = PulseCounterConfig::builder("anemometer")
        .backend(Backend::Ulp)
        .update_interval(Duration::from_secs(60))
        .build()?;

    let ulp = SimulatedUlp::new();
    let clock = ManualClock::new();

    println!("1. First boot: loading the ULP program");
    let mut sensor = boot(&config, &ulp, &clock)?;
    sensor.dump_config();
    sensor.update();

    // 10 pulses, each 100 ms high and 100 ms low at the 20 ms wakeup period.
    ulp.pulse_train(10, 5, 5);
    clock.advance(Duration::from_secs(60));
    if let Some(m) = sensor.update() {
        println!("   awake:  delta {} total {}", m.delta, m.total);
    }

    println!("2. Entering deep sleep, the ULP keeps counting");
    drop(sensor);
    ulp.pulse_train(25, 5, 5);
    ulp.set_woke_from_deep_sleep(true);

    println!("3. Woke up: the program was left running");
    let mut sensor = boot(&config, &ulp, &clock)?;
    // The first tick after boot has no time baseline, so only the total moves.
    if let Some(m) = sensor.update() {
        println!(
            "   after wake: {} pulses arrived during sleep, total {}",
            m.delta, m.total
        );
    }
    println!("   (the running total lives in main memory and restarts at zero)");

    Ok(())
}
