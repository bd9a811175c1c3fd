//! Controller capability and quirk bitsets

use crate::regs::CAPABILITIES;
use bitflags::bitflags;
use tock_registers::LocalRegisterCopy;

bitflags! {
    /// Features advertised by the controller, decoded once at bind time
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// 8-bit data bus
        const BUS_WIDTH_8 = 1 << 0;
        /// ADMA2 scatter-gather DMA
        const ADMA2 = 1 << 1;
        /// 64-bit system addressing
        const ADDR_64BIT = 1 << 2;
        /// 3.3V bus power
        const VOLTAGE_330 = 1 << 3;
        /// 3.0V bus power
        const VOLTAGE_300 = 1 << 4;
    }
}

bitflags! {
    /// Board/controller deviations from standard register behaviour
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Quirks: u32 {
        /// Never use DMA even if ADMA2 is advertised
        const NO_DMA = 1 << 0;
        /// 136-bit responses are reported without the CRC byte shifted out
        const STRIP_RESPONSE_CRC = 1 << 1;
    }
}

impl Capabilities {
    /// Decode the capabilities register
    pub fn from_register(caps0: LocalRegisterCopy<u32, CAPABILITIES::Register>) -> Self {
        let mut caps = Capabilities::empty();
        caps.set(Self::BUS_WIDTH_8, caps0.is_set(CAPABILITIES::SUPPORT_8BIT));
        caps.set(Self::ADMA2, caps0.is_set(CAPABILITIES::SUPPORT_ADMA2));
        caps.set(Self::ADDR_64BIT, caps0.is_set(CAPABILITIES::SUPPORT_64BIT));
        caps.set(Self::VOLTAGE_330, caps0.is_set(CAPABILITIES::SUPPORT_3V3));
        caps.set(Self::VOLTAGE_300, caps0.is_set(CAPABILITIES::SUPPORT_3V0));
        caps
    }
}

/// Whether transfers go through the ADMA2 64-bit engine
pub fn supports_adma2_64bit(caps: Capabilities, quirks: Quirks) -> bool {
    caps.contains(Capabilities::ADMA2 | Capabilities::ADDR_64BIT) && !quirks.contains(Quirks::NO_DMA)
}
