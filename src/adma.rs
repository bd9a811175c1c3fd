//! ADMA2 descriptor table
//!
//! The 64-bit ADMA2 engine walks a chain of 12-byte descriptors, each naming
//! one physically contiguous piece of the transfer. The chain is rebuilt for
//! every DMA-backed request; the last entry carries the END attribute.

use crate::dma::PhysSegment;
use crate::error::{Result, SdhciError};
use alloc::vec;
use alloc::vec::Vec;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Largest transfer a single descriptor can describe (64 KiB)
pub const ADMA2_DESC_MAX_LENGTH: usize = 0x10000;

/// Descriptor slots in the table; 32 MiB for a fully discontiguous buffer
pub const DMA_DESC_COUNT: usize = 8192;

const ATTR_VALID: u16 = 1 << 0;
const ATTR_END: u16 = 1 << 1;
const ATTR_INT: u16 = 1 << 2;
const ATTR_ACT_TRAN: u16 = 1 << 5;

/// ADMA2 64-bit descriptor (12 bytes)
#[repr(C, packed)]
#[derive(Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AdmaDescriptor {
    /// Valid, End, Int and Act bits
    attr: u16,
    /// Byte count; 0 encodes 65536
    length: u16,
    /// Bus address of the data
    address: u64,
}

const _: () = assert!(core::mem::size_of::<AdmaDescriptor>() == 12);

impl AdmaDescriptor {
    /// A valid "transfer data" descriptor
    pub fn transfer(address: u64, len: usize) -> Self {
        Self {
            attr: ATTR_VALID | ATTR_ACT_TRAN,
            length: (len & 0xffff) as u16,
            address,
        }
    }

    pub fn set_end(&mut self) {
        self.attr |= ATTR_END;
    }

    pub fn set_interrupt(&mut self) {
        self.attr |= ATTR_INT;
    }

    pub fn is_valid(&self) -> bool {
        self.attr & ATTR_VALID != 0
    }

    pub fn is_end(&self) -> bool {
        self.attr & ATTR_END != 0
    }

    pub fn interrupts(&self) -> bool {
        self.attr & ATTR_INT != 0
    }

    /// Raw attribute word
    pub fn attr(&self) -> u16 {
        self.attr
    }

    /// Bytes described by this entry
    pub fn length(&self) -> usize {
        match self.length {
            0 => ADMA2_DESC_MAX_LENGTH,
            n => n as usize,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }
}

impl core::fmt::Debug for AdmaDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (attr, length, address) = (self.attr, self.length, self.address);
        f.debug_struct("AdmaDescriptor")
            .field("attr", &format_args!("{:#06x}", attr))
            .field("length", &format_args!("{:#06x}", length))
            .field("address", &format_args!("{:#x}", address))
            .finish()
    }
}

/// Fill `table` from `segments` and terminate the chain.
///
/// One descriptor is emitted per segment; a zero-length segment ends the
/// input early.
///
/// # Errors
///
/// `NotSupported` if a segment exceeds [`ADMA2_DESC_MAX_LENGTH`], if the
/// segments need more entries than `table` holds, or if there are none.
///
/// # Returns
///
/// Number of descriptors written
pub fn build_chain<I>(table: &mut [AdmaDescriptor], segments: I) -> Result<usize>
where
    I: IntoIterator<Item = PhysSegment>,
{
    let mut count = 0;
    for seg in segments {
        if seg.len == 0 {
            break;
        }
        if seg.len > ADMA2_DESC_MAX_LENGTH {
            log::trace!("SDHCI: chunk size {} > {} is unsupported", seg.len, ADMA2_DESC_MAX_LENGTH);
            return Err(SdhciError::NotSupported);
        }
        let Some(desc) = table.get_mut(count) else {
            log::trace!("SDHCI: transfer with more than {} chunks is unsupported", table.len());
            return Err(SdhciError::NotSupported);
        };
        *desc = AdmaDescriptor::transfer(seg.addr, seg.len);
        count += 1;
    }

    match count.checked_sub(1) {
        Some(last) => {
            table[last].set_end();
            Ok(count)
        }
        None => {
            log::trace!("SDHCI: empty descriptor list");
            Err(SdhciError::NotSupported)
        }
    }
}

/// Limit `segments` to the first `len` bytes, trimming the segment that
/// crosses the end
pub fn clip_segments<I>(segments: I, len: usize) -> impl Iterator<Item = PhysSegment>
where
    I: IntoIterator<Item = PhysSegment>,
{
    segments.into_iter().scan(len, |remaining, seg| {
        if *remaining == 0 {
            return None;
        }
        let len = seg.len.min(*remaining);
        *remaining -= len;
        Some(PhysSegment { addr: seg.addr, len })
    })
}

/// Descriptor table memory handed to the controller
///
/// Backed by `u64` words so the table is 8-byte aligned as ADMA2 64-bit
/// requires.
pub struct DescriptorTable {
    backing: Vec<u64>,
}

impl DescriptorTable {
    /// Allocate room for [`DMA_DESC_COUNT`] descriptors
    pub fn new() -> Self {
        let bytes = DMA_DESC_COUNT * core::mem::size_of::<AdmaDescriptor>();
        Self {
            backing: vec![0u64; bytes / core::mem::size_of::<u64>()],
        }
    }

    /// CPU address of the first descriptor
    pub fn as_ptr(&self) -> *const u8 {
        self.backing.as_ptr() as *const u8
    }

    /// All descriptor slots
    pub fn entries(&self) -> &[AdmaDescriptor] {
        <[AdmaDescriptor]>::ref_from_bytes(self.backing.as_bytes()).unwrap_or(&[])
    }

    fn entries_mut(&mut self) -> Result<&mut [AdmaDescriptor]> {
        <[AdmaDescriptor]>::mut_from_bytes(self.backing.as_mut_bytes())
            .map_err(|_| SdhciError::Internal)
    }

    /// Rebuild the chain for a `len` byte transfer; see [`build_chain`]
    ///
    /// Segments past `len` are dropped. The chain must describe exactly
    /// `len` bytes.
    pub fn build<I>(&mut self, segments: I, len: usize) -> Result<usize>
    where
        I: IntoIterator<Item = PhysSegment>,
    {
        let count = build_chain(self.entries_mut()?, clip_segments(segments, len))?;

        let total: usize = self.entries()[..count].iter().map(|d| d.length()).sum();
        if total != len {
            log::trace!("SDHCI: buffer segments cover {} of {} bytes", total, len);
            return Err(SdhciError::NotSupported);
        }

        if log::log_enabled!(log::Level::Trace) {
            for desc in &self.entries()[..count] {
                log::trace!("SDHCI: {:?}", desc);
            }
        }
        Ok(count)
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
