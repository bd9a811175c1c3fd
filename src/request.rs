//! SD/MMC commands and transaction requests
//!
//! A [`Request`] moves into the controller on submission and comes back to
//! the caller through its completion callback, together with the decoded
//! response and the data buffer.

use crate::dma::DmaBuffer;
use crate::error::{Result, SdhciError};
use crate::regs::COMMAND;
use alloc::boxed::Box;
use core::fmt;
use tock_registers::fields::FieldValue;

/// SEND_TUNING_BLOCK (MMC CMD21)
pub const MMC_SEND_TUNING_BLOCK: u8 = 21;

/// Largest block the block size register can describe in SDHCI v3
pub const MAX_BLOCK_SIZE: u16 = 2048;

/// Response format expected from the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// No response
    None,
    /// R1 - Normal response
    R1,
    /// R1b - Normal response with busy
    R1b,
    /// R2 - CID/CSD response (136 bits)
    R2,
    /// R3 - OCR response (no CRC)
    R3,
    /// R6 - RCA response (SD)
    R6,
    /// R7 - Card interface condition (SD)
    R7,
}

impl Response {
    /// 136-bit response spread over all four response registers
    pub fn is_long(self) -> bool {
        self == Response::R2
    }

    /// 48-bit response, with or without busy signalling
    pub fn is_short(self) -> bool {
        !matches!(self, Response::None | Response::R2)
    }

    /// Card holds DAT0 low until it is ready
    pub fn has_busy(self) -> bool {
        self == Response::R1b
    }

    fn fields(self) -> FieldValue<u32, COMMAND::Register> {
        match self {
            Response::None => COMMAND::RESPONSE_TYPE::None,
            Response::R1 | Response::R6 | Response::R7 => {
                COMMAND::RESPONSE_TYPE::Short48 + COMMAND::CRC_CHECK::SET + COMMAND::INDEX_CHECK::SET
            }
            Response::R1b => {
                COMMAND::RESPONSE_TYPE::Short48Busy
                    + COMMAND::CRC_CHECK::SET
                    + COMMAND::INDEX_CHECK::SET
            }
            Response::R2 => COMMAND::RESPONSE_TYPE::Long136 + COMMAND::CRC_CHECK::SET,
            Response::R3 => COMMAND::RESPONSE_TYPE::Short48,
        }
    }
}

/// Data phase direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// Card to host
    Read,
    /// Host to card
    Write,
}

/// An SD/MMC command and its transfer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Command index (0-63)
    pub index: u8,
    /// Expected response
    pub response: Response,
    /// Data phase, if any
    pub data: Option<DataDirection>,
    /// More than one block; the controller appends CMD12 automatically
    pub multi_block: bool,
    /// Abort command, may be issued while the data lines are busy
    pub abort: bool,
}

impl Command {
    /// GO_IDLE_STATE - Resets all cards to idle state
    pub const GO_IDLE_STATE: Command = Command::new(0, Response::None);
    /// ALL_SEND_CID - Asks all cards to send their CID
    pub const ALL_SEND_CID: Command = Command::new(2, Response::R2);
    /// SEND_RELATIVE_ADDR (SD) - Ask card to publish new RCA
    pub const SEND_RELATIVE_ADDR: Command = Command::new(3, Response::R6);
    /// SELECT/DESELECT_CARD
    pub const SELECT_CARD: Command = Command::new(7, Response::R1b);
    /// SEND_IF_COND - Sends SD interface condition
    pub const SEND_IF_COND: Command = Command::new(8, Response::R7);
    /// SEND_CSD - Asks card to send its CSD
    pub const SEND_CSD: Command = Command::new(9, Response::R2);
    /// STOP_TRANSMISSION - Forces card to stop transmission
    pub const STOP_TRANSMISSION: Command = Command::new(12, Response::R1b).abort();
    /// SEND_STATUS - Addressed card sends its status register
    pub const SEND_STATUS: Command = Command::new(13, Response::R1);
    /// READ_SINGLE_BLOCK
    pub const READ_SINGLE_BLOCK: Command = Command::new(17, Response::R1).read();
    /// READ_MULTIPLE_BLOCK
    pub const READ_MULTIPLE_BLOCK: Command = Command::new(18, Response::R1).read().multi_block();
    /// SEND_TUNING_BLOCK - Tuning pattern read, the data is discarded
    pub const SEND_TUNING_BLOCK: Command = Command::new(MMC_SEND_TUNING_BLOCK, Response::R1).read();
    /// WRITE_BLOCK
    pub const WRITE_BLOCK: Command = Command::new(24, Response::R1).write();
    /// WRITE_MULTIPLE_BLOCK
    pub const WRITE_MULTIPLE_BLOCK: Command = Command::new(25, Response::R1).write().multi_block();
    /// APP_CMD - Next command is application specific
    pub const APP_CMD: Command = Command::new(55, Response::R1);

    /// A command without a data phase
    pub const fn new(index: u8, response: Response) -> Self {
        Self {
            index,
            response,
            data: None,
            multi_block: false,
            abort: false,
        }
    }

    /// Add a card-to-host data phase
    pub const fn read(self) -> Self {
        Self {
            data: Some(DataDirection::Read),
            ..self
        }
    }

    /// Add a host-to-card data phase
    pub const fn write(self) -> Self {
        Self {
            data: Some(DataDirection::Write),
            ..self
        }
    }

    /// Mark as a multi-block transfer
    pub const fn multi_block(self) -> Self {
        Self {
            multi_block: true,
            ..self
        }
    }

    /// Mark as an abort command
    pub const fn abort(self) -> Self {
        Self {
            abort: true,
            ..self
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_read(&self) -> bool {
        self.data == Some(DataDirection::Read)
    }

    pub fn is_tuning_block(&self) -> bool {
        self.index == MMC_SEND_TUNING_BLOCK
    }

    /// Busy commands must also wait for the DAT inhibit, unless they abort
    pub fn waits_for_data_line(&self) -> bool {
        self.response.has_busy() && !self.abort
    }

    /// Transfer mode and command fields for this command
    pub(crate) fn fields(&self) -> FieldValue<u32, COMMAND::Register> {
        let mut value = COMMAND::INDEX.val(self.index as u32 & 0x3f) + self.response.fields();
        if let Some(direction) = self.data {
            value += COMMAND::DATA_PRESENT::SET;
            if direction == DataDirection::Read {
                value += COMMAND::READ::SET;
            }
        }
        if self.multi_block {
            value += COMMAND::MULTI_BLOCK::SET + COMMAND::BLOCK_COUNT_ENABLE::SET;
        }
        if self.abort {
            value += COMMAND::CMD_TYPE::Abort;
        }
        value
    }
}

/// Outcome delivered to the completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// `Ok` or the failure kind
    pub status: Result<()>,
    /// Bytes moved over the data lines
    pub actual: usize,
}

/// Completion callback; receives the request back
pub type CompletionFn = Box<dyn FnOnce(Request, Completion) + Send>;

/// One command/data transaction
pub struct Request {
    /// Command and transfer flags
    pub command: Command,
    /// Argument register value
    pub arg: u32,
    /// Decoded response, filled in after the command phase
    pub response: [u32; 4],
    /// Bytes per block
    pub block_size: u16,
    /// Blocks to transfer
    pub block_count: u16,
    /// Data buffer, absent for commands without a data phase
    pub buffer: Option<Box<dyn DmaBuffer>>,
    pub(crate) block_index: u16,
    pub(crate) transferred: usize,
    completion: Option<CompletionFn>,
}

impl Request {
    pub fn new(command: Command, arg: u32) -> Self {
        Self {
            command,
            arg,
            response: [0; 4],
            block_size: 0,
            block_count: 0,
            buffer: None,
            block_index: 0,
            transferred: 0,
            completion: None,
        }
    }

    /// Set the block geometry of the data phase
    pub fn with_blocks(mut self, block_size: u16, block_count: u16) -> Self {
        self.block_size = block_size;
        self.block_count = block_count;
        self
    }

    /// Attach the data buffer
    pub fn with_buffer(mut self, buffer: Box<dyn DmaBuffer>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Set the completion callback.
    ///
    /// The callback runs on the interrupt thread with the controller's device
    /// lock held. It must not call back into the controller (`submit` or a
    /// bus configuration operation) synchronously or it will deadlock; hand
    /// follow-up work to another context instead.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Request, Completion) + Send + 'static,
    {
        self.completion = Some(Box::new(f));
        self
    }

    /// Blocks already moved by the PIO data phase
    pub fn block_index(&self) -> u16 {
        self.block_index
    }

    /// Total data phase length in bytes
    pub fn transfer_len(&self) -> usize {
        self.block_size as usize * self.block_count as usize
    }

    /// Detach the buffer, e.g. to read back data after completion
    pub fn take_buffer(&mut self) -> Option<Box<dyn DmaBuffer>> {
        self.buffer.take()
    }

    pub(crate) fn take_completion(&mut self) -> Option<CompletionFn> {
        self.completion.take()
    }

    pub(crate) fn reset_progress(&mut self) {
        self.block_index = 0;
        self.transferred = 0;
    }

    /// Check the request is well formed before it touches hardware
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.command.has_data() || self.command.is_tuning_block() {
            return Ok(());
        }
        let Some(buffer) = self.buffer.as_ref() else {
            log::debug!("SDHCI: CMD{} has a data phase but no buffer", self.command.index);
            return Err(SdhciError::InvalidArgument);
        };
        if self.block_size == 0
            || self.block_size % 4 != 0
            || self.block_size > MAX_BLOCK_SIZE
            || self.block_count == 0
        {
            log::debug!(
                "SDHCI: CMD{} bad geometry {} x {}",
                self.command.index,
                self.block_count,
                self.block_size
            );
            return Err(SdhciError::InvalidArgument);
        }
        if buffer.len() < self.transfer_len() {
            log::debug!(
                "SDHCI: CMD{} buffer of {} bytes < {} byte transfer",
                self.command.index,
                buffer.len(),
                self.transfer_len()
            );
            return Err(SdhciError::InvalidArgument);
        }
        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("arg", &format_args!("{:#010x}", self.arg))
            .field("response", &self.response)
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("block_index", &self.block_index)
            .field("buffer_len", &self.buffer.as_ref().map(|b| b.len()))
            .finish()
    }
}

/// A submission the controller refused; the request is handed back
pub struct Rejected {
    pub error: SdhciError,
    pub request: Request,
}

impl Rejected {
    pub(crate) fn new(error: SdhciError, request: Request) -> Self {
        Self { error, request }
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("command", &self.request.command.index)
            .finish()
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CMD{} rejected: {}", self.request.command.index, self.error)
    }
}
