//! SDHCI Register Definitions using tock-registers
//!
//! The controller is programmed through the 32-bit register words of the
//! SD Host Controller Simplified Specification v3.00 map. Several 8/16-bit
//! registers share a word (host control + power control, clock control +
//! timeout + software reset, auto-CMD error + host control 2), so the
//! bitfields below describe whole words and every access is 32 bits wide.
//!
//! All bit manipulation goes through the named fields here; nothing outside
//! this module builds raw masks.

use alloc::boxed::Box;
use core::marker::PhantomData;
use tock_registers::fields::{Field, FieldValue};
use tock_registers::{register_bitfields, LocalRegisterCopy, RegisterLongName};

// Word layouts

register_bitfields! [
    u32,
    /// 0x04: block size (low half) and block count (high half)
    pub BLOCK [
        SIZE OFFSET(0) NUMBITS(12) [],
        COUNT OFFSET(16) NUMBITS(16) []
    ],

    /// 0x0C: transfer mode (low half) and command (high half)
    pub COMMAND [
        DMA_ENABLE OFFSET(0) NUMBITS(1) [],
        BLOCK_COUNT_ENABLE OFFSET(1) NUMBITS(1) [],
        /// Controller issues CMD12 after the last block
        AUTO_CMD12 OFFSET(2) NUMBITS(1) [],
        /// Card to host when set
        READ OFFSET(4) NUMBITS(1) [],
        MULTI_BLOCK OFFSET(5) NUMBITS(1) [],
        RESPONSE_TYPE OFFSET(16) NUMBITS(2) [
            None = 0,
            Long136 = 1,
            Short48 = 2,
            Short48Busy = 3
        ],
        CRC_CHECK OFFSET(19) NUMBITS(1) [],
        INDEX_CHECK OFFSET(20) NUMBITS(1) [],
        DATA_PRESENT OFFSET(21) NUMBITS(1) [],
        CMD_TYPE OFFSET(22) NUMBITS(2) [
            Normal = 0,
            Suspend = 1,
            Resume = 2,
            Abort = 3
        ],
        INDEX OFFSET(24) NUMBITS(6) []
    ],

    /// 0x24: present state
    pub PRESENT_STATE [
        /// CMD line in use, no new command may be issued
        CMD_INHIBIT OFFSET(0) NUMBITS(1) [],
        /// DAT lines in use
        DAT_INHIBIT OFFSET(1) NUMBITS(1) []
    ],

    /// 0x28: host control 1, power control, block gap and wakeup control
    pub HOST_CONTROL0 [
        DATA_WIDTH_4BIT OFFSET(1) NUMBITS(1) [],
        HIGH_SPEED OFFSET(2) NUMBITS(1) [],
        DMA_SELECT OFFSET(3) NUMBITS(2) [
            SDMA = 0,
            ADMA1 = 1,
            ADMA32 = 2,
            ADMA64 = 3
        ],
        /// Overrides DATA_WIDTH_4BIT
        DATA_WIDTH_8BIT OFFSET(5) NUMBITS(1) [],
        BUS_POWER OFFSET(8) NUMBITS(1) [],
        BUS_VOLTAGE OFFSET(9) NUMBITS(3) [
            V1_8 = 5,
            V3_0 = 6,
            V3_3 = 7
        ]
    ],

    /// 0x2C: clock control, timeout control and software reset
    pub HOST_CONTROL1 [
        INTERNAL_CLK_EN OFFSET(0) NUMBITS(1) [],
        INTERNAL_CLK_STABLE OFFSET(1) NUMBITS(1) [],
        SD_CLK_EN OFFSET(2) NUMBITS(1) [],
        PROG_CLK_MODE OFFSET(5) NUMBITS(1) [],
        /// Divider bits 9:8
        FREQ_SELECT_HI OFFSET(6) NUMBITS(2) [],
        /// Divider bits 7:0
        FREQ_SELECT OFFSET(8) NUMBITS(8) [],
        /// Data timeout is TMCLK * 2^(13 + value)
        DATA_TIMEOUT OFFSET(16) NUMBITS(4) [],
        /// The reset bits self-clear once the reset is done
        RESET_ALL OFFSET(24) NUMBITS(1) [],
        RESET_CMD OFFSET(25) NUMBITS(1) [],
        RESET_DAT OFFSET(26) NUMBITS(1) []
    ],

    /// 0x30 status (write 1 to clear), 0x34 status enable, 0x38 signal enable
    pub INTERRUPT [
        CMD_CPLT OFFSET(0) NUMBITS(1) [],
        XFER_CPLT OFFSET(1) NUMBITS(1) [],
        BUFF_WRITE_READY OFFSET(4) NUMBITS(1) [],
        BUFF_READ_READY OFFSET(5) NUMBITS(1) [],
        /// Set whenever any bit in 16..=26 is set
        ERR OFFSET(15) NUMBITS(1) [],
        ERR_CMD_TIMEOUT OFFSET(16) NUMBITS(1) [],
        ERR_CMD_CRC OFFSET(17) NUMBITS(1) [],
        ERR_CMD_END_BIT OFFSET(18) NUMBITS(1) [],
        ERR_CMD_INDEX OFFSET(19) NUMBITS(1) [],
        ERR_DAT_TIMEOUT OFFSET(20) NUMBITS(1) [],
        ERR_DAT_CRC OFFSET(21) NUMBITS(1) [],
        ERR_DAT_END_BIT OFFSET(22) NUMBITS(1) [],
        ERR_CURRENT_LIMIT OFFSET(23) NUMBITS(1) [],
        ERR_AUTO_CMD OFFSET(24) NUMBITS(1) [],
        ERR_ADMA OFFSET(25) NUMBITS(1) [],
        ERR_TUNING OFFSET(26) NUMBITS(1) []
    ],

    /// 0x3C: auto CMD error status (low half) and host control 2 (high half)
    pub HOST_CONTROL2 [
        UHS_MODE OFFSET(16) NUMBITS(3) [
            SDR12 = 0,
            SDR25 = 1,
            SDR50 = 2,
            SDR104 = 3,
            DDR50 = 4,
            HS400 = 5
        ],
        SIGNALING_1V8 OFFSET(19) NUMBITS(1) [],
        /// Set by the driver, cleared by the controller when tuning ends
        EXEC_TUNING OFFSET(22) NUMBITS(1) [],
        /// Controller is sampling with the tuned clock
        CLOCK_SELECT OFFSET(23) NUMBITS(1) []
    ],

    /// 0x40: capabilities (low word)
    pub CAPABILITIES [
        /// In MHz; 0 means "ask the platform"
        BASE_CLK_FREQ OFFSET(8) NUMBITS(8) [],
        SUPPORT_8BIT OFFSET(18) NUMBITS(1) [],
        SUPPORT_ADMA2 OFFSET(19) NUMBITS(1) [],
        SUPPORT_3V3 OFFSET(24) NUMBITS(1) [],
        SUPPORT_3V0 OFFSET(25) NUMBITS(1) [],
        SUPPORT_64BIT OFFSET(28) NUMBITS(1) []
    ],

    /// 0x54: ADMA error status
    pub ADMA_ERROR [
        /// Engine state when the error hit (0 stop, 1 fetch, 3 transfer)
        STATE OFFSET(0) NUMBITS(2) [],
        LENGTH_MISMATCH OFFSET(2) NUMBITS(1) []
    ],

    /// 0xFC: slot interrupt status and host controller version
    pub HOST_VERSION [
        /// 2 for v3.00
        SPEC_VERSION OFFSET(16) NUMBITS(8) []
    ]
];

/// SDHCI Specification Version 3.00
pub const SDHCI_SPEC_300: u32 = 2;

/// Size of the register window in bytes
pub const REGISTER_BLOCK_SIZE: usize = 0x100;

// ============================================================================
// Register Map
// ============================================================================

/// A named 32-bit register word at a fixed offset
///
/// `R` ties the offset to its bitfield definition so only matching fields
/// can be applied to it. Plain data registers use `()`.
pub struct Reg<R: RegisterLongName = ()> {
    offset: usize,
    _marker: PhantomData<R>,
}

impl<R: RegisterLongName> Clone for Reg<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: RegisterLongName> Copy for Reg<R> {}

impl<R: RegisterLongName> Reg<R> {
    /// Name the register word at `offset`
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Byte offset from the start of the register window
    pub const fn offset(self) -> usize {
        self.offset
    }
}

/// SDMA System Address / Argument 2 (0x00)
pub const ARG2: Reg = Reg::at(0x00);
/// Block Size / Block Count (0x04)
pub const BLKCNTSIZ: Reg<BLOCK::Register> = Reg::at(0x04);
/// Argument 1 (0x08)
pub const ARG1: Reg = Reg::at(0x08);
/// Transfer Mode / Command (0x0C)
pub const CMD: Reg<COMMAND::Register> = Reg::at(0x0C);
/// Response registers 0..3 (0x10-0x1C)
pub const RESP: [Reg; 4] = [Reg::at(0x10), Reg::at(0x14), Reg::at(0x18), Reg::at(0x1C)];
/// Buffer Data Port (0x20)
pub const DATA: Reg = Reg::at(0x20);
/// Present State (0x24)
pub const STATE: Reg<PRESENT_STATE::Register> = Reg::at(0x24);
/// Host Control 1 / Power Control (0x28)
pub const CTRL0: Reg<HOST_CONTROL0::Register> = Reg::at(0x28);
/// Clock Control / Timeout Control / Software Reset (0x2C)
pub const CTRL1: Reg<HOST_CONTROL1::Register> = Reg::at(0x2C);
/// Interrupt Status, write 1 to clear (0x30)
pub const IRQ: Reg<INTERRUPT::Register> = Reg::at(0x30);
/// Interrupt Status Enable (0x34)
pub const IRQ_EN: Reg<INTERRUPT::Register> = Reg::at(0x34);
/// Interrupt Signal Enable (0x38)
pub const IRQ_SIGNAL: Reg<INTERRUPT::Register> = Reg::at(0x38);
/// Auto CMD Error Status / Host Control 2 (0x3C)
pub const CTRL2: Reg<HOST_CONTROL2::Register> = Reg::at(0x3C);
/// Capabilities (0x40)
pub const CAPS0: Reg<CAPABILITIES::Register> = Reg::at(0x40);
/// Capabilities 1 (0x44)
pub const CAPS1: Reg = Reg::at(0x44);
/// ADMA Error Status (0x54)
pub const ADMA_ERR: Reg<ADMA_ERROR::Register> = Reg::at(0x54);
/// ADMA System Address, low word (0x58)
pub const ADMA_ADDR_LO: Reg = Reg::at(0x58);
/// ADMA System Address, high word (0x5C)
pub const ADMA_ADDR_HI: Reg = Reg::at(0x5C);
/// Slot Interrupt Status / Host Controller Version (0xFC)
pub const SLOT_VERSION: Reg<HOST_VERSION::Register> = Reg::at(0xFC);

// ============================================================================
// Register Access
// ============================================================================

/// Raw 32-bit access to a controller register window
///
/// Implemented by [`crate::mmio::MmioRegion`] for real hardware and by
/// simulators in tests.
pub trait RegisterIo: Send + Sync {
    /// Read the 32-bit word at byte `offset`
    fn read32(&self, offset: usize) -> u32;

    /// Write the 32-bit word at byte `offset`
    fn write32(&self, offset: usize, value: u32);
}

/// Typed accessor over the SDHCI register window
pub struct Registers {
    io: Box<dyn RegisterIo>,
}

impl Registers {
    pub fn new(io: Box<dyn RegisterIo>) -> Self {
        Self { io }
    }

    /// Read the raw register word
    #[inline]
    pub fn get<R: RegisterLongName>(&self, reg: Reg<R>) -> u32 {
        self.io.read32(reg.offset())
    }

    /// Write the raw register word
    #[inline]
    pub fn set<R: RegisterLongName>(&self, reg: Reg<R>, value: u32) {
        self.io.write32(reg.offset(), value);
    }

    /// Snapshot the register for field decoding
    #[inline]
    pub fn read<R: RegisterLongName>(&self, reg: Reg<R>) -> LocalRegisterCopy<u32, R> {
        LocalRegisterCopy::new(self.get(reg))
    }

    /// Read a single field
    #[inline]
    pub fn read_field<R: RegisterLongName>(&self, reg: Reg<R>, field: Field<u32, R>) -> u32 {
        field.read(self.get(reg))
    }

    /// Check whether a field is non-zero
    #[inline]
    pub fn is_set<R: RegisterLongName>(&self, reg: Reg<R>, field: Field<u32, R>) -> bool {
        field.is_set(self.get(reg))
    }

    /// Overwrite the register with the given fields (others become zero)
    #[inline]
    pub fn write<R: RegisterLongName>(&self, reg: Reg<R>, value: FieldValue<u32, R>) {
        self.set(reg, value.value);
    }

    /// Read-modify-write the given fields, preserving the rest
    ///
    /// Not for write-1-to-clear registers such as [`IRQ`].
    #[inline]
    pub fn modify<R: RegisterLongName>(&self, reg: Reg<R>, value: FieldValue<u32, R>) {
        let current = self.get(reg);
        self.set(reg, value.modify(current));
    }
}
