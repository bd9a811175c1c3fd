//! Interrupt source and interrupt bit classes

use crate::error::Result;
use crate::regs::INTERRUPT;

/// Hardware interrupt line for one controller
pub trait Interrupt: Send + Sync {
    /// Block until the line fires
    ///
    /// An error ends the interrupt loop (line torn down, handle closed...).
    fn wait(&self) -> Result<()>;

    /// Re-arm the line after one event has been handled
    fn complete(&self);
}

/// Any of these in the status register means the transaction failed
pub const ERROR_INTERRUPTS: u32 = INTERRUPT::ERR::SET.value
    | INTERRUPT::ERR_CMD_TIMEOUT::SET.value
    | INTERRUPT::ERR_CMD_CRC::SET.value
    | INTERRUPT::ERR_CMD_END_BIT::SET.value
    | INTERRUPT::ERR_CMD_INDEX::SET.value
    | INTERRUPT::ERR_DAT_TIMEOUT::SET.value
    | INTERRUPT::ERR_DAT_CRC::SET.value
    | INTERRUPT::ERR_DAT_END_BIT::SET.value
    | INTERRUPT::ERR_CURRENT_LIMIT::SET.value
    | INTERRUPT::ERR_AUTO_CMD::SET.value
    | INTERRUPT::ERR_ADMA::SET.value
    | INTERRUPT::ERR_TUNING::SET.value;

/// Interrupts that advance a transaction normally
pub const NORMAL_INTERRUPTS: u32 = INTERRUPT::CMD_CPLT::SET.value
    | INTERRUPT::XFER_CPLT::SET.value
    | INTERRUPT::BUFF_READ_READY::SET.value
    | INTERRUPT::BUFF_WRITE_READY::SET.value;

/// Whether a status snapshot carries any error bit
#[inline]
pub fn has_error(status: u32) -> bool {
    status & ERROR_INTERRUPTS != 0
}
