use crate::basic_storage::BasicPulseCounterStorage;
use crate::count_mode::EdgeMode;
use crate::hal::{
    InterruptPin, PcntError, PinError, PulseCounterUnit, UlpCoprocessor, UlpError,
};
use crate::hw_storage::HwPulseCounterStorage;
use crate::ulp_storage::UlpPulseCounterStorage;

/// Which counting backend a storage is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Interrupt handler counting in software.
    Basic,
    /// PCNT peripheral counting in silicon.
    Hardware,
    /// ULP coprocessor counting while the main CPU sleeps.
    Ulp,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Basic => "basic",
            Backend::Hardware => "pcnt",
            Backend::Ulp => "ulp",
        }
    }

    /// Largest filter the backend can realise, if it is bounded.
    pub fn max_filter_us(&self) -> Option<u32> {
        match self {
            Backend::Hardware => Some(crate::hw_storage::PCNT_MAX_FILTER_US),
            Backend::Basic | Backend::Ulp => None,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one poll of a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRead {
    /// Pulses counted since the previous read.
    pub delta: i32,
    /// False on a transient failure; the caller must treat the period as zero-delta.
    pub success: bool,
}

impl PulseRead {
    pub fn ok(delta: i32) -> Self {
        Self {
            delta,
            success: true,
        }
    }

    pub fn failed(delta: i32) -> Self {
        Self {
            delta,
            success: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Pin error: {0}")]
    Pin(#[from] PinError),

    #[error("Pulse counter peripheral error: {0}")]
    Pcnt(#[from] PcntError),

    #[error("ULP coprocessor error: {0}")]
    Ulp(#[from] UlpError),

    #[error("GPIO{pin} used for pulse counting must be an RTC IO")]
    NotRtcIo { pin: u8 },
}

/// Common interface of the counting backends.
///
/// Edge modes and the filter are set before `setup`; after that only
/// `pulse_counter_read` is called, strictly sequentially, from the polling loop.
pub trait PulseCounterStorage {
    fn backend(&self) -> Backend;

    fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode);

    fn set_filter_us(&mut self, filter_us: u32);

    fn setup(&mut self) -> Result<(), StorageError>;

    /// Pulses since the previous successful read. Never blocks.
    fn pulse_counter_read(&mut self) -> PulseRead;

    fn dump_config(&self) {}
}

/// The storage chosen at startup, held for the lifetime of the sensor.
pub enum Storage<P, U, C> {
    Basic(BasicPulseCounterStorage<P>),
    Hardware(HwPulseCounterStorage<U>),
    Ulp(UlpPulseCounterStorage<C>),
}

impl<P, U, C> From<BasicPulseCounterStorage<P>> for Storage<P, U, C> {
    fn from(storage: BasicPulseCounterStorage<P>) -> Self {
        Self::Basic(storage)
    }
}

impl<P, U, C> From<HwPulseCounterStorage<U>> for Storage<P, U, C> {
    fn from(storage: HwPulseCounterStorage<U>) -> Self {
        Self::Hardware(storage)
    }
}

impl<P, U, C> From<UlpPulseCounterStorage<C>> for Storage<P, U, C> {
    fn from(storage: UlpPulseCounterStorage<C>) -> Self {
        Self::Ulp(storage)
    }
}

impl<P, U, C> PulseCounterStorage for Storage<P, U, C>
where
    P: InterruptPin,
    U: PulseCounterUnit,
    C: UlpCoprocessor,
{
    fn backend(&self) -> Backend {
        match self {
            Storage::Basic(s) => s.backend(),
            Storage::Hardware(s) => s.backend(),
            Storage::Ulp(s) => s.backend(),
        }
    }

    fn set_edge_modes(&mut self, rising: EdgeMode, falling: EdgeMode) {
        match self {
            Storage::Basic(s) => s.set_edge_modes(rising, falling),
            Storage::Hardware(s) => s.set_edge_modes(rising, falling),
            Storage::Ulp(s) => s.set_edge_modes(rising, falling),
        }
    }

    fn set_filter_us(&mut self, filter_us: u32) {
        match self {
            Storage::Basic(s) => s.set_filter_us(filter_us),
            Storage::Hardware(s) => s.set_filter_us(filter_us),
            Storage::Ulp(s) => s.set_filter_us(filter_us),
        }
    }

    fn setup(&mut self) -> Result<(), StorageError> {
        match self {
            Storage::Basic(s) => s.setup(),
            Storage::Hardware(s) => s.setup(),
            Storage::Ulp(s) => s.setup(),
        }
    }

    fn pulse_counter_read(&mut self) -> PulseRead {
        match self {
            Storage::Basic(s) => s.pulse_counter_read(),
            Storage::Hardware(s) => s.pulse_counter_read(),
            Storage::Ulp(s) => s.pulse_counter_read(),
        }
    }

    fn dump_config(&self) {
        match self {
            Storage::Basic(s) => s.dump_config(),
            Storage::Hardware(s) => s.dump_config(),
            Storage::Ulp(s) => s.dump_config(),
        }
    }
}
