//! Memory-Mapped I/O (MMIO) Register Window
//!
//! Production backend for [`RegisterIo`]: volatile 32-bit accesses to the
//! controller's register window through tock-registers cells. In debug
//! builds every access is bounds-checked against the window size.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdhci::mmio::MmioRegion;
//! use sdhci::regs::REGISTER_BLOCK_SIZE;
//!
//! let mmio = unsafe { MmioRegion::new(bar0, REGISTER_BLOCK_SIZE) }.ok_or(SdhciError::Internal)?;
//! let version = mmio.read32(0xFC);
//! ```

use crate::regs::RegisterIo;
use core::ptr::NonNull;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, WriteOnly};

/// A memory-mapped SDHCI register window.
#[derive(Clone, Copy)]
pub struct MmioRegion {
    /// Base address of the register window
    base: NonNull<u8>,
    /// Size of the window in bytes (used for bounds checking)
    #[cfg(debug_assertions)]
    size: usize,
}

// SAFETY: MmioRegion only contains a pointer to device MMIO space. The window
// is mapped before construction and stays valid while the controller is
// bound. Individual 32-bit accesses are atomic on the bus; sequencing of
// multi-register updates is the controller's job (it holds its device lock).
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Create a register window from a base address and size.
    ///
    /// Returns `None` if `base` is null.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `base` is a virtual address mapped (uncached) onto the controller
    /// - The region `[base, base + size)` belongs to the device
    /// - The mapping outlives every copy of this struct
    pub unsafe fn new(base: u64, #[allow(unused_variables)] size: usize) -> Option<Self> {
        let base = NonNull::new(base as *mut u8)?;
        Some(Self {
            base,
            #[cfg(debug_assertions)]
            size,
        })
    }

    /// Get the base address of this window.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    /// Check if an access at the given offset and size is within bounds.
    #[cfg(debug_assertions)]
    #[inline]
    fn check_bounds(&self, offset: usize, access_size: usize) {
        let end = offset.saturating_add(access_size);
        assert!(
            end <= self.size,
            "MMIO access out of bounds: offset={:#x}, access_size={}, region_size={:#x}",
            offset,
            access_size,
            self.size
        );
    }

    /// Read a 32-bit register at the given offset.
    #[inline]
    pub fn read32(&self, offset: usize) -> u32 {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 4);

        // SAFETY: the window is valid per `new`, and the offset is in bounds.
        let reg = unsafe { &*(self.base.as_ptr().add(offset) as *const ReadOnly<u32>) };
        reg.get()
    }

    /// Write a 32-bit register at the given offset.
    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 4);

        // SAFETY: the window is valid per `new`, and the offset is in bounds.
        let reg = unsafe { &*(self.base.as_ptr().add(offset) as *const WriteOnly<u32>) };
        reg.set(value);
    }
}

impl RegisterIo for MmioRegion {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        MmioRegion::read32(self, offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        MmioRegion::write32(self, offset, value)
    }
}

impl core::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        #[cfg(debug_assertions)]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .field("size", &format_args!("{:#x}", self.size))
                .finish()
        }
        #[cfg(not(debug_assertions))]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .finish()
        }
    }
}
