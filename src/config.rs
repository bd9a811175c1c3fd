//! Host controller tunables
//!
//! Defaults reproduce the timings the SD Host Controller Simplified
//! Specification and common SDHCI v3 parts expect. Boards with slow
//! regulators or sluggish cards can stretch them.

/// Identification-phase bus clock (400 kHz)
pub const SD_FREQ_SETUP_HZ: u32 = 400_000;

/// Maximum number of tuning rounds before giving up
pub const MAX_TUNING_COUNT: u32 = 40;

/// Deadline for software resets and internal clock stabilisation (ms)
pub const RESET_TIMEOUT_MS: u64 = 1000;

/// Data timeout counter value programmed at init (TMCLK * 2^27)
pub const DEFAULT_DATA_TIMEOUT: u32 = 0xe;

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Bus clock used during card identification (Hz)
    pub setup_clock_hz: u32,
    /// Deadline for software reset bits to self-clear (ms)
    pub reset_timeout_ms: u64,
    /// Deadline for the internal clock to report stable (ms)
    pub clock_stable_timeout_ms: u64,
    /// Value for the data timeout counter field
    pub data_timeout: u32,
    /// Delay after every SD clock gate/ungate (ms)
    pub clock_settle_ms: u64,
    /// Delay for the signalling regulator to settle (ms)
    pub regulator_settle_ms: u64,
    /// 1 ms polls allowed for the bus to go idle before a frequency change
    pub bus_idle_poll_limit: u32,
    /// 1 ms polls allowed for command/data inhibit before issuing a command.
    /// `None` waits forever.
    pub inhibit_poll_limit: Option<u32>,
    /// Maximum SEND_TUNING_BLOCK submissions in one tuning run
    pub max_tuning_count: u32,
    /// Deadline for a single tuning round to complete (ms)
    pub tuning_round_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            setup_clock_hz: SD_FREQ_SETUP_HZ,
            reset_timeout_ms: RESET_TIMEOUT_MS,
            clock_stable_timeout_ms: RESET_TIMEOUT_MS,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            clock_settle_ms: 2,
            regulator_settle_ms: 5,
            bus_idle_poll_limit: 1000,
            inhibit_poll_limit: Some(5000),
            max_tuning_count: MAX_TUNING_COUNT,
            tuning_round_timeout_ms: 1000,
        }
    }
}
