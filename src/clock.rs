//! SD clock divider calculation
//!
//! SDHCI v3.00 uses a 10-bit divided clock mode: the SD clock is
//! `base / (2 * d)` for a divider `d` in `1..=1023`, and `d == 0` passes the
//! base clock through undivided.

use crate::regs::HOST_CONTROL1;
use tock_registers::fields::FieldValue;

/// Largest divider the 10-bit frequency select field can hold
pub const MAX_DIVIDER: u32 = 0x3ff;

/// Compute the divider for `target_rate` from `base_clock`.
///
/// Returns the smallest `d` with `base_clock / (2 * d) <= target_rate`, or 0
/// when the base clock is already slow enough. `target_rate` must be
/// non-zero when it is below `base_clock`.
pub fn divider(base_clock: u32, target_rate: u32) -> u32 {
    if target_rate >= base_clock {
        // A divider of 0 means "don't divide the clock"
        return 0;
    }

    let base = base_clock as u64;
    let target = target_rate as u64;
    let mut result = base / (2 * target);
    if result * target * 2 < base {
        result += 1;
    }
    result as u32
}

/// Frequency select field values for a divider (low 8 bits, upper 2 bits)
pub fn divider_fields(divider: u32) -> FieldValue<u32, HOST_CONTROL1::Register> {
    HOST_CONTROL1::FREQ_SELECT.val(divider & 0xff)
        + HOST_CONTROL1::FREQ_SELECT_HI.val((divider >> 8) & 0x3)
}
