//! Interrupt-driven transfer automaton and error recovery
//!
//! Every handler runs with the device lock held. A request leaves the
//! controller only through [`SdhciController::complete`].

use super::{SdhciController, State};
use crate::caps::Quirks;
use crate::error::{Result, SdhciError};
use crate::irq::{has_error, ERROR_INTERRUPTS};
use crate::regs::*;
use crate::request::Completion;

impl SdhciController {
    /// Service interrupts until the line reports an error
    ///
    /// Meant to run on a dedicated thread for the lifetime of the controller.
    pub fn run_interrupt_loop(&self) {
        loop {
            if let Err(e) = self.irq.wait() {
                log::error!("SDHCI: interrupt wait failed: {}", e);
                break;
            }
            self.service_interrupt();
            self.irq.complete();
        }
    }

    /// Acknowledge and process one interrupt event
    pub fn service_interrupt(&self) {
        let irq = self.regs.read(IRQ);
        log::trace!(
            "SDHCI: irq {:#010x} en {:#010x}",
            irq.get(),
            self.regs.get(IRQ_EN)
        );

        // Acknowledge what we stashed; status bits are write-1-to-clear
        self.regs.set(IRQ, irq.get());

        let mut state = self.state.lock();

        // An error anywhere in the word fails the request outright
        if has_error(irq.get()) {
            log::debug!(
                "SDHCI: error interrupt {:#010x} (CMD{:?})",
                irq.get() & ERROR_INTERRUPTS,
                state.req.as_ref().map(|req| req.command.index)
            );
            if irq.is_set(INTERRUPT::ERR_ADMA) {
                let adma = self.regs.read(ADMA_ERR);
                log::debug!(
                    "SDHCI: ADMA error state {} length mismatch {} ADMAADDR0 {:#x} ADMAADDR1 {:#x}",
                    adma.read(ADMA_ERROR::STATE),
                    adma.is_set(ADMA_ERROR::LENGTH_MISMATCH),
                    self.regs.get(ADMA_ADDR_LO),
                    self.regs.get(ADMA_ADDR_HI)
                );
            }
            self.error_recovery(&mut state);
            return;
        }

        if irq.is_set(INTERRUPT::CMD_CPLT) {
            self.command_complete(&mut state);
        }
        if irq.is_set(INTERRUPT::BUFF_READ_READY) {
            self.read_ready(&mut state);
        }
        if irq.is_set(INTERRUPT::BUFF_WRITE_READY) {
            self.write_ready(&mut state);
        }
        if irq.is_set(INTERRUPT::XFER_CPLT) {
            self.transfer_complete(&mut state);
        }
    }

    /// Command phase done: latch the response and arm the data phase
    fn command_complete(&self, state: &mut State) {
        let dma = state.descs.is_some();
        let Some(req) = state.req.as_mut() else {
            log::trace!("SDHCI: spurious CMD_CPLT interrupt");
            return;
        };

        let regs = &self.regs;
        let response = req.command.response;
        if response.is_long() {
            let raw: [u32; 4] = core::array::from_fn(|i| regs.get(RESP[i]));
            req.response = if self.quirks.contains(Quirks::STRIP_RESPONSE_CRC) {
                [
                    (raw[3] << 8) | (raw[2] >> 24),
                    (raw[2] << 8) | (raw[1] >> 24),
                    (raw[1] << 8) | (raw[0] >> 24),
                    raw[0] << 8,
                ]
            } else {
                raw
            };
        } else if response.is_short() {
            req.response[0] = regs.get(RESP[0]);
            req.response[1] = regs.get(RESP[1]);
        }

        let command = req.command;
        if !command.has_data() {
            self.complete(state, Ok(()), 0);
            return;
        }

        let next = if dma {
            INTERRUPT::XFER_CPLT::SET
        } else if command.is_read() {
            INTERRUPT::BUFF_READ_READY::SET
        } else {
            INTERRUPT::BUFF_WRITE_READY::SET
        };
        regs.set(IRQ_EN, ERROR_INTERRUPTS | next.value);
    }

    /// PIO read: drain one block from the data port
    fn read_ready(&self, state: &mut State) {
        let Some(req) = state.req.as_mut() else {
            log::trace!("SDHCI: spurious BUFF_READ_READY interrupt");
            return;
        };

        // The tuning pattern is consumed by the controller, never by us
        if !req.command.is_tuning_block() {
            let block_size = req.block_size as usize;
            let base = req.block_index as usize * block_size;
            for offset in (0..block_size).step_by(4) {
                let word = self.regs.get(DATA).to_le_bytes();
                if let Some(buffer) = req.buffer.as_mut() {
                    buffer.copy_to(base + offset, &word);
                }
                req.transferred += word.len();
            }
            req.block_index += 1;
        }

        if req.block_index == req.block_count {
            let actual = req.transferred;
            self.complete(state, Ok(()), actual);
        }
    }

    /// PIO write: fill one block into the data port
    fn write_ready(&self, state: &mut State) {
        let Some(req) = state.req.as_mut() else {
            log::trace!("SDHCI: spurious BUFF_WRITE_READY interrupt");
            return;
        };

        let block_size = req.block_size as usize;
        let base = req.block_index as usize * block_size;
        for offset in (0..block_size).step_by(4) {
            let mut word = [0u8; 4];
            if let Some(buffer) = req.buffer.as_ref() {
                buffer.copy_from(base + offset, &mut word);
            }
            self.regs.set(DATA, u32::from_le_bytes(word));
            req.transferred += word.len();
        }
        req.block_index += 1;

        if req.block_index == req.block_count {
            let actual = req.transferred;
            self.complete(state, Ok(()), actual);
        }
    }

    /// DMA data phase done; the engine moved every byte
    fn transfer_complete(&self, state: &mut State) {
        let Some(req) = state.req.as_mut() else {
            log::trace!("SDHCI: spurious XFER_CPLT interrupt");
            return;
        };
        req.block_index = req.block_count;
        req.transferred = req.transfer_len();
        let actual = req.transferred;
        self.complete(state, Ok(()), actual);
    }

    /// Reset the CMD and DAT state machines and fail the in-flight request
    ///
    /// A reset that does not clear is counted, not escalated; the request
    /// still completes.
    fn error_recovery(&self, state: &mut State) {
        for (line, reset) in [
            ("CMD", HOST_CONTROL1::RESET_CMD::SET),
            ("DAT", HOST_CONTROL1::RESET_DAT::SET),
        ] {
            self.regs.modify(CTRL1, reset);
            if !self.wait_for_reset(reset) {
                state.recovery_faults += 1;
                log::warn!("SDHCI: {} line reset timed out", line);
            }
        }

        // Only the line resets are done; a data phase is not aborted on the card
        if state.req.is_some() {
            self.complete(state, Err(SdhciError::Io), 0);
        }
    }

    /// Finish the in-flight request and hand it back through its callback
    ///
    /// The callback runs here, with the device lock still held.
    pub(super) fn complete(&self, state: &mut State, status: Result<()>, actual: usize) {
        self.regs.set(IRQ_EN, 0);

        let Some(mut req) = state.req.take() else {
            return;
        };
        log::trace!(
            "SDHCI: CMD{} complete {:?} ({} bytes)",
            req.command.index,
            status,
            actual
        );
        if let Some(callback) = req.take_completion() {
            callback(req, Completion { status, actual });
        }
    }
}
