// Simulated flow meter example
//
// This example feeds a square wave into one of the three counting backends and
// prints what the pulse counter publishes every update interval.

use clap::{Parser, ValueEnum};
use pulse_counter::sim::{ManualClock, SimulatedPcnt, SimulatedPin, SimulatedUlp};
use pulse_counter::{
    Backend, BasicPulseCounterStorage, EdgeMode, HwPulseCounterStorage, Level, MeasurementLog,
    PulseCounterConfig, PulseCounterSensor, SetTotalPulsesAction, Storage, UlpPulseCounterStorage,
};
use std::time::Duration;

type SimStorage = Storage<SimulatedPin, SimulatedPcnt, SimulatedUlp>;

#[derive(Parser)]
#[command(name = "flow_meter")]
#[command(version = "1.0")]
#[command(about = "Measure a simulated pulse train with the pulse counter")]
#[command(
    long_about = "Drives a square wave into a simulated GPIO interrupt, PCNT unit or ULP \
                  coprocessor and prints the pulse rate and total after every update interval."
)]
struct Args {
    /// Counting backend
    #[arg(short, long, value_enum, default_value_t = BackendArg::Pcnt)]
    backend: BackendArg,

    /// Pulse frequency in Hz
    #[arg(short, long, default_value_t = 2.0)]
    frequency: f64,

    /// Number of updates to run
    #[arg(short = 'n', long, default_value_t = 5)]
    updates: u32,

    /// Update interval in seconds
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    /// Internal filter in microseconds
    #[arg(long, default_value_t = 13)]
    filter_us: u64,

    /// Count falling edges too
    #[arg(long)]
    both_edges: bool,

    /// Add contact bounce after every rising edge
    #[arg(long)]
    bounce: bool,

    /// Rebase the total to this value halfway through
    #[arg(long)]
    rebase: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    /// Edge interrupt counting in software
    Basic,
    /// PCNT hardware unit
    Pcnt,
    /// ULP coprocessor
    Ulp,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Basic => Backend::Basic,
            BackendArg::Pcnt => Backend::Hardware,
            BackendArg::Ulp => Backend::Ulp,
        }
    }
}

enum SimulatedHardware {
    Pin(SimulatedPin),
    Pcnt(SimulatedPcnt),
    Ulp(SimulatedUlp),
}

/// Square wave generator that keeps its phase across update intervals.
struct SquareWave {
    period_us: u64,
    next_edge_us: u64,
    next_level: Level,
    bounce: bool,
}

impl SquareWave {
    fn new(frequency: f64, bounce: bool) -> Self {
        Self {
            period_us: (1_000_000.0 / frequency).max(2.0) as u64,
            next_edge_us: 0,
            next_level: Level::High,
            bounce,
        }
    }

    fn level_at(&self, t_us: u64) -> Level {
        Level::from(t_us % self.period_us < self.period_us / 2)
    }

    /// Emit every edge before `end_us` into the hardware.
    fn run_until(&mut self, hardware: &SimulatedHardware, end_us: u64) {
        if let SimulatedHardware::Ulp(ulp) = hardware {
            let wakeup_us = ulp
                .wakeup_period()
                .map_or(20_000, |p| p.as_micros() as u64);
            while self.next_edge_us < end_us {
                ulp.sample(self.level_at(self.next_edge_us));
                self.next_edge_us += wakeup_us;
            }
            return;
        }

        while self.next_edge_us < end_us {
            let t = self.next_edge_us as u32;
            let level = self.next_level;
            match hardware {
                SimulatedHardware::Pin(pin) => {
                    pin.set_level(level, t);
                    if self.bounce && level == Level::High {
                        pin.set_level(Level::Low, t.wrapping_add(2));
                        pin.set_level(Level::High, t.wrapping_add(4));
                    }
                }
                SimulatedHardware::Pcnt(pcnt) => {
                    pcnt.drive(level, t);
                    if self.bounce && level == Level::High {
                        pcnt.drive(Level::Low, t.wrapping_add(2));
                        pcnt.drive(Level::High, t.wrapping_add(4));
                    }
                }
                // The coprocessor samples levels instead of seeing edges.
                SimulatedHardware::Ulp(_) => {}
            }
            self.next_level = level.toggled();
            self.next_edge_us += self.period_us / 2;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let backend = Backend::from(args.backend);

    let config = PulseCounterConfig::builder("flow_meter")
        .backend(backend)
        .falling_edge(if args.both_edges {
            EdgeMode::Increment
        } else {
            EdgeMode::Disable
        })
        .internal_filter(Duration::from_micros(args.filter_us))
        .update_interval(Duration::from_secs(args.interval))
        .build()?;

    let (hardware, storage): (SimulatedHardware, SimStorage) = match backend {
        Backend::Basic => {
            let pin = SimulatedPin::new(4);
            (
                SimulatedHardware::Pin(pin.clone()),
                BasicPulseCounterStorage::new(pin).into(),
            )
        }
        Backend::Hardware => {
            let pcnt = SimulatedPcnt::new();
            (
                SimulatedHardware::Pcnt(pcnt.clone()),
                HwPulseCounterStorage::new(pcnt, 4).into(),
            )
        }
        Backend::Ulp => {
            let ulp = SimulatedUlp::new();
            (
                SimulatedHardware::Ulp(ulp.clone()),
                UlpPulseCounterStorage::new(ulp, 4).into(),
            )
        }
    };

    let clock = ManualClock::new();
    let measurements = MeasurementLog::new();
    let mut sensor = PulseCounterSensor::new(&config, storage, clock.clone())?
        .with_rate_sink(measurements.rate_sink())
        .with_total_sink(measurements.total_sink());
    sensor.setup()?;
    sensor.dump_config();

    println!("Pulse Counter Simulation");
    println!("========================");
    println!("Backend: {}", backend);
    println!(
        "Signal: {:.2} Hz{}",
        args.frequency,
        if args.bounce { " with bounce" } else { "" }
    );
    println!("Update interval: {}s\n", args.interval);

    let rebase = args
        .rebase
        .map(|value| SetTotalPulsesAction::new(&sensor, value));
    let mut wave = SquareWave::new(args.frequency, args.bounce);
    let interval_us = config.update_interval().as_micros() as u64;

    // The first update only starts the clock.
    sensor.update();
    for update in 1..=args.updates {
        wave.run_until(&hardware, u64::from(update) * interval_us);
        clock.advance(config.update_interval());

        if update == args.updates / 2 + 1 {
            if let Some(action) = rebase.as_ref() {
                let value = action.play();
                println!("[{:>3}] total rebased to {}", update, value);
            }
        }

        match sensor.update() {
            Some(m) => println!(
                "[{:>3}] delta {:>5} | rate {:>9.2} pulses/min | total {}",
                update,
                m.delta,
                m.rate.unwrap_or_default(),
                m.total
            ),
            None => println!("[{:>3}] read failed, skipping", update),
        }
    }

    println!("\nPublished values:");
    println!("{}", measurements.to_dataframe()?);
    println!("\nRate summary:");
    println!("{}", measurements.rate_summary()?);

    Ok(())
}
