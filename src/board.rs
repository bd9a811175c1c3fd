//! Board-specific hooks
//!
//! Platforms that wrap a standard SDHCI block often need to tell the core a
//! few things the registers can't: the real base clock when the capability
//! field reads zero, which quirks apply, and how to pulse the card's reset
//! line. Every hook has a default so a plain controller needs nothing.

use crate::caps::Quirks;

/// Board hook set supplied at bind time
pub trait Board: Send + Sync {
    /// Base clock in Hz, consulted only if the capabilities field is zero
    fn base_clock(&self) -> u32 {
        0
    }

    /// Quirks for this controller instance
    fn quirks(&self) -> Quirks {
        Quirks::empty()
    }

    /// Pulse the card hardware reset line (no-op when the board has none)
    fn hw_reset(&self) {}

    /// Translate a CPU address into a bus address the controller can DMA to.
    ///
    /// The default assumes identity-mapped memory, as in firmware payloads.
    fn virt_to_phys(&self, addr: usize) -> u64 {
        addr as u64
    }
}

/// Board with no hooks: standard controller, identity-mapped memory
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericBoard;

impl Board for GenericBoard {}
