//! Time and delay functions
//!
//! The controller never reads a clock source directly. The embedder supplies
//! a [`Timer`] (TSC, generic timer, a host clock in tests...) and the driver
//! builds deadlines and polling loops on top of it.

/// Monotonic time source and delay provider
pub trait Timer: Send + Sync {
    /// Monotonic time in microseconds
    fn now_us(&self) -> u64;

    /// Sleep or spin for approximately `us` microseconds
    fn delay_us(&self, us: u64);

    /// Sleep or spin for approximately `ms` milliseconds
    #[inline]
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms * 1000);
    }
}

/// A deadline-based timeout for polling loops
///
/// # Example
///
/// ```ignore
/// let timeout = Timeout::from_ms(timer, 1000);  // 1 second timeout
/// while !timeout.is_expired() {
///     if check_condition() {
///         return Ok(());
///     }
///     core::hint::spin_loop();
/// }
/// return Err(SdhciError::Timeout);
/// ```
#[derive(Clone, Copy)]
pub struct Timeout<'a> {
    timer: &'a dyn Timer,
    deadline: u64,
}

impl<'a> Timeout<'a> {
    /// Create a timeout that expires after `us` microseconds
    #[inline]
    pub fn from_us(timer: &'a dyn Timer, us: u64) -> Self {
        Self {
            timer,
            deadline: timer.now_us().saturating_add(us),
        }
    }

    /// Create a timeout that expires after `ms` milliseconds
    #[inline]
    pub fn from_ms(timer: &'a dyn Timer, ms: u64) -> Self {
        Self::from_us(timer, ms.saturating_mul(1000))
    }

    /// Check if the timeout has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.timer.now_us() > self.deadline
    }

    /// Microseconds left before expiry (0 once expired)
    #[inline]
    pub fn remaining_us(&self) -> u64 {
        self.deadline.saturating_sub(self.timer.now_us())
    }
}

/// Wait for a condition with timeout
///
/// Busy-polls `condition` until it returns true or `timeout_ms` elapses.
/// The condition is checked once more after expiry so a late transition is
/// not reported as a timeout.
///
/// # Returns
///
/// `true` if the condition was met, `false` on timeout
pub fn wait_for<F>(timer: &dyn Timer, timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let timeout = Timeout::from_ms(timer, timeout_ms);
    while !timeout.is_expired() {
        if condition() {
            return true;
        }
        core::hint::spin_loop();
    }
    condition()
}

/// Poll a condition with a fixed sleep between attempts
///
/// Checks `condition` up to `limit` times (forever when `limit` is `None`),
/// sleeping `interval_ms` after every failed check.
///
/// # Returns
///
/// `true` if the condition was met, `false` once the attempt limit is reached
pub fn poll_every<F>(timer: &dyn Timer, interval_ms: u64, limit: Option<u32>, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let mut attempts: u32 = 0;
    loop {
        if condition() {
            return true;
        }
        if let Some(limit) = limit {
            attempts += 1;
            if attempts > limit {
                return false;
            }
        }
        timer.delay_ms(interval_ms);
    }
}
