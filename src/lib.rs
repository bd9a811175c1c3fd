//! SDHCI - interrupt-driven SD Host Controller Interface driver core
//!
//! This library drives an SDHCI v3.00 controller on behalf of an SD/MMC
//! storage stack: controller reset and capability discovery, bus clock,
//! voltage, width and timing configuration, ADMA2 scatter-gather or PIO
//! data transfers completed from the interrupt path, sampling clock tuning
//! and error recovery.
//!
//! Hardware and platform access goes through small collaborator traits
//! ([`RegisterIo`], [`Interrupt`], [`Board`], [`Timer`], [`DmaBuffer`]) so the
//! core runs the same in firmware, in a kernel driver or against a
//! simulator.

#![cfg_attr(not(test), no_std)]

// Descriptor tables, boxed collaborators and completion callbacks
extern crate alloc;

pub mod adma;
pub mod board;
pub mod caps;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dma;
pub mod error;
pub mod irq;
pub mod mmio;
pub mod regs;
pub mod request;
pub mod time;

#[cfg(test)]
mod testing;

pub use board::{Board, GenericBoard};
pub use caps::{Capabilities, Quirks};
pub use config::HostConfig;
pub use controller::{BusWidth, Resources, SdhciController, SignalVoltage, Timing};
pub use dma::{DmaBuffer, HeapBuffer, PhysSegment};
pub use error::{Result, SdhciError};
pub use irq::Interrupt;
pub use mmio::MmioRegion;
pub use regs::RegisterIo;
pub use request::{Command, Completion, DataDirection, Rejected, Request, Response};
pub use time::Timer;
