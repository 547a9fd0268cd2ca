use crate::hal::Level;

/// What a single transition on the input does to the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    Disable,
    Increment,
    Decrement,
}

impl EdgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeMode::Disable => "disable",
            EdgeMode::Increment => "increment",
            EdgeMode::Decrement => "decrement",
        }
    }

    /// Signed amount an accepted edge adds to the raw count.
    pub fn step(self) -> i32 {
        match self {
            EdgeMode::Disable => 0,
            EdgeMode::Increment => 1,
            EdgeMode::Decrement => -1,
        }
    }

    /// The step as the 16-bit word the coprocessor program adds to its edge counter.
    pub fn as_ulp_word(self) -> u16 {
        match self {
            EdgeMode::Disable => 0,
            EdgeMode::Increment => 1,
            EdgeMode::Decrement => u16::MAX,
        }
    }
}

impl std::fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge modes for the rising and the falling transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMode {
    pub rising_edge: EdgeMode,
    pub falling_edge: EdgeMode,
}

impl CountMode {
    pub fn new(rising_edge: EdgeMode, falling_edge: EdgeMode) -> Self {
        Self {
            rising_edge,
            falling_edge,
        }
    }

    /// True when no transition can ever change the count.
    pub fn is_disabled(&self) -> bool {
        self.rising_edge == EdgeMode::Disable && self.falling_edge == EdgeMode::Disable
    }

    /// Mode for the transition that left the input at `level`.
    pub fn mode_for(&self, level: Level) -> EdgeMode {
        match level {
            Level::High => self.rising_edge,
            Level::Low => self.falling_edge,
        }
    }
}

impl Default for CountMode {
    fn default() -> Self {
        Self::new(EdgeMode::Increment, EdgeMode::Disable)
    }
}
