//! DMA-capable data buffers
//!
//! A [`DmaBuffer`] is the caller-owned memory behind a data-phase request.
//! The controller maps it, does cache maintenance around the transfer, walks
//! its physical segments to build ADMA2 descriptors, and copies words in and
//! out of it on the PIO path.

use crate::error::Result;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

/// A physically contiguous piece of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysSegment {
    /// Bus address of the first byte
    pub addr: u64,
    /// Length in bytes
    pub len: usize,
}

/// Memory the controller can transfer into or out of
pub trait DmaBuffer: Send {
    /// Buffer length in bytes
    fn len(&self) -> usize;

    /// Whether the buffer holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pin the buffer and resolve its physical pages
    fn map(&mut self) -> Result<()>;

    /// Write back dirty cache lines covering `[offset, offset + len)`
    fn cache_flush(&mut self, offset: usize, len: usize);

    /// Write back and invalidate cache lines covering `[offset, offset + len)`
    fn cache_flush_invalidate(&mut self, offset: usize, len: usize);

    /// Physical segments of the mapped buffer, none longer than `max_chunk`
    fn segments(&self, max_chunk: usize) -> Box<dyn Iterator<Item = PhysSegment> + '_>;

    /// Copy `src` into the buffer at `offset`; returns bytes copied
    fn copy_to(&mut self, offset: usize, src: &[u8]) -> usize;

    /// Copy from the buffer at `offset` into `dst`; returns bytes copied
    fn copy_from(&self, offset: usize, dst: &mut [u8]) -> usize;
}

/// Heap buffer on identity-mapped, cache-coherent memory
///
/// This is the firmware-payload case: the heap is physically contiguous and
/// addresses translate 1:1, so the whole buffer is one physical range split
/// into `max_chunk` pieces.
pub struct HeapBuffer {
    data: Vec<u8>,
}

impl HeapBuffer {
    /// Zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    /// Buffer holding a copy of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl DmaBuffer for HeapBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn map(&mut self) -> Result<()> {
        Ok(())
    }

    fn cache_flush(&mut self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }

    fn cache_flush_invalidate(&mut self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }

    fn segments(&self, max_chunk: usize) -> Box<dyn Iterator<Item = PhysSegment> + '_> {
        let base = self.data.as_ptr() as u64;
        let len = self.data.len();
        let step = max_chunk.max(1);
        Box::new((0..len).step_by(step).map(move |start| PhysSegment {
            addr: base + start as u64,
            len: step.min(len - start),
        }))
    }

    fn copy_to(&mut self, offset: usize, src: &[u8]) -> usize {
        let Some(dst) = self.data.get_mut(offset..) else {
            return 0;
        };
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    fn copy_from(&self, offset: usize, dst: &mut [u8]) -> usize {
        let Some(src) = self.data.get(offset..) else {
            return 0;
        };
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }
}
