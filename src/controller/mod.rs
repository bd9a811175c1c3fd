//! SDHCI host controller core
//!
//! [`SdhciController`] owns the register window, the interrupt line, the
//! board hooks and the single in-flight [`Request`]. All device state lives
//! behind one lock shared by the submission path, the bus configuration
//! operations and the interrupt loop.
//!
//! # Usage
//!
//! ```ignore
//! let ctrl = Arc::new(SdhciController::new(resources, HostConfig::default())?);
//! let irq_ctrl = ctrl.clone();
//! spawn(move || irq_ctrl.run_interrupt_loop());
//!
//! ctrl.set_bus_width(BusWidth::Four)?;
//! ctrl.set_bus_frequency(25_000_000)?;
//! ctrl.submit(Request::new(Command::SEND_STATUS, rca << 16).on_complete(|req, done| {
//!     // ...
//! }))?;
//! ```

mod transfer;
mod tuning;


use crate::adma::{clip_segments, DescriptorTable, ADMA2_DESC_MAX_LENGTH};
use crate::board::Board;
use crate::caps::{supports_adma2_64bit, Capabilities, Quirks};
use crate::clock::{self, MAX_DIVIDER};
use crate::config::HostConfig;
use crate::error::{Result, SdhciError};
use crate::irq::{Interrupt, ERROR_INTERRUPTS, NORMAL_INTERRUPTS};
use crate::regs::*;
use crate::request::{Rejected, Request};
use crate::time::{poll_every, wait_for, Timer};
use alloc::boxed::Box;
use spin::Mutex;
use tock_registers::fields::FieldValue;

/// Collaborators handed over at bind time
pub struct Resources {
    /// Mapped register window
    pub regs: Box<dyn RegisterIo>,
    /// Controller interrupt line
    pub irq: Box<dyn Interrupt>,
    /// Board hooks
    pub board: Box<dyn Board>,
    /// Time source
    pub timer: Box<dyn Timer>,
}

/// Card signalling voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVoltage {
    V330,
    V180,
}

impl TryFrom<u32> for SignalVoltage {
    type Error = SdhciError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(SignalVoltage::V330),
            1 => Ok(SignalVoltage::V180),
            _ => Err(SdhciError::InvalidArgument),
        }
    }
}

/// Data bus width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

impl TryFrom<u32> for BusWidth {
    type Error = SdhciError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(BusWidth::One),
            1 => Ok(BusWidth::Four),
            2 => Ok(BusWidth::Eight),
            _ => Err(SdhciError::InvalidArgument),
        }
    }
}

/// Bus timing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Legacy,
    Hs,
    HsDdr,
    Hs200,
    Hs400,
}

impl TryFrom<u32> for Timing {
    type Error = SdhciError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Timing::Legacy),
            1 => Ok(Timing::Hs),
            2 => Ok(Timing::HsDdr),
            3 => Ok(Timing::Hs200),
            4 => Ok(Timing::Hs400),
            _ => Err(SdhciError::InvalidArgument),
        }
    }
}

/// Mutable device state, only touched with the lock held
struct State {
    /// The in-flight request
    req: Option<Request>,
    /// ADMA2 descriptor table, present when DMA is in use
    descs: Option<DescriptorTable>,
    /// Software resets that did not clear during error recovery
    recovery_faults: u32,
}

/// SDHCI v3 host controller
pub struct SdhciController {
    regs: Registers,
    irq: Box<dyn Interrupt>,
    board: Box<dyn Board>,
    timer: Box<dyn Timer>,
    config: HostConfig,
    caps: Capabilities,
    quirks: Quirks,
    /// Base clock frequency (Hz)
    base_clock: u32,
    /// SDHCI specification version field
    version: u32,
    state: Mutex<State>,
}

impl SdhciController {
    /// Discover the controller and bring it to an idle, powered state
    pub fn new(resources: Resources, config: HostConfig) -> Result<Self> {
        let Resources {
            regs,
            irq,
            board,
            timer,
        } = resources;
        let regs = Registers::new(regs);

        let version = regs.read_field(SLOT_VERSION, HOST_VERSION::SPEC_VERSION);
        if version != SDHCI_SPEC_300 {
            log::error!(
                "SDHCI: controller version is {}, only version {} is supported",
                version,
                SDHCI_SPEC_300
            );
            return Err(SdhciError::NotSupported);
        }
        log::debug!("SDHCI: controller version {}", version);

        let caps0 = regs.read(CAPS0);
        let mut base_clock = caps0.read(CAPABILITIES::BASE_CLK_FREQ) * 1_000_000;
        if base_clock == 0 {
            base_clock = board.base_clock();
        }
        if base_clock == 0 {
            log::error!("SDHCI: base clock is 0");
            return Err(SdhciError::Internal);
        }

        let quirks = board.quirks();
        let caps = Capabilities::from_register(caps0);

        log::info!(
            "SDHCI: base clock {} MHz, caps {:?}, quirks {:?}",
            base_clock / 1_000_000,
            caps,
            quirks
        );
        log::debug!("SDHCI: capabilities: {:#010x}", caps0.get());
        log::debug!("SDHCI: capabilities_1: {:#010x}", regs.get(CAPS1));

        let ctrl = Self {
            regs,
            irq,
            board,
            timer,
            config,
            caps,
            quirks,
            base_clock,
            version,
            state: Mutex::new(State {
                req: None,
                descs: None,
                recovery_faults: 0,
            }),
        };
        ctrl.initialize()?;
        Ok(ctrl)
    }

    /// Reset the controller, program the setup clock and power the bus
    fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        let regs = &self.regs;

        // Reset both the CMD and DAT sides and stop all clocks
        regs.modify(
            CTRL1,
            HOST_CONTROL1::RESET_ALL::SET
                + HOST_CONTROL1::INTERNAL_CLK_EN::CLEAR
                + HOST_CONTROL1::SD_CLK_EN::CLEAR,
        );
        if !self.wait_for_reset(
            HOST_CONTROL1::RESET_ALL::SET + HOST_CONTROL1::RESET_CMD::SET + HOST_CONTROL1::RESET_DAT::SET,
        ) {
            log::error!("SDHCI: reset timeout");
            return Err(SdhciError::Timeout);
        }

        if supports_adma2_64bit(self.caps, self.quirks) {
            state.descs = Some(DescriptorTable::new());
            regs.modify(CTRL0, HOST_CONTROL0::DMA_SELECT::ADMA64);
            log::debug!("SDHCI: using ADMA2 (64-bit)");
        } else {
            log::debug!("SDHCI: using PIO");
        }

        let divider = clock::divider(self.base_clock, self.config.setup_clock_hz);
        regs.modify(
            CTRL1,
            HOST_CONTROL1::INTERNAL_CLK_EN::SET
                + clock::divider_fields(divider)
                + HOST_CONTROL1::DATA_TIMEOUT.val(self.config.data_timeout),
        );

        if !wait_for(self.timer.as_ref(), self.config.clock_stable_timeout_ms, || {
            regs.is_set(CTRL1, HOST_CONTROL1::INTERNAL_CLK_STABLE)
        }) {
            log::error!("SDHCI: clock did not stabilize in time");
            return Err(SdhciError::Timeout);
        }

        self.settle_clock();
        regs.modify(CTRL1, HOST_CONTROL1::SD_CLK_EN::SET);
        self.settle_clock();

        // Cycle bus power at the highest voltage the host supports
        regs.modify(CTRL0, HOST_CONTROL0::BUS_POWER::CLEAR);
        let voltage = if self.caps.contains(Capabilities::VOLTAGE_330) {
            HOST_CONTROL0::BUS_VOLTAGE::V3_3
        } else if self.caps.contains(Capabilities::VOLTAGE_300) {
            HOST_CONTROL0::BUS_VOLTAGE::V3_0
        } else {
            HOST_CONTROL0::BUS_VOLTAGE::V1_8
        };
        regs.modify(CTRL0, voltage);
        regs.modify(CTRL0, HOST_CONTROL0::BUS_POWER::SET);

        regs.set(IRQ_EN, 0);
        regs.set(IRQ, 0xffff_ffff);

        log::info!(
            "SDHCI: controller ready, setup clock {} Hz (divider {})",
            self.config.setup_clock_hz,
            divider
        );
        Ok(())
    }

    /// Wait for the given software reset bits to self-clear
    fn wait_for_reset(&self, mask: FieldValue<u32, HOST_CONTROL1::Register>) -> bool {
        wait_for(self.timer.as_ref(), self.config.reset_timeout_ms, || {
            self.regs.get(CTRL1) & mask.mask() == 0
        })
    }

    fn settle_clock(&self) {
        self.timer.delay_ms(self.config.clock_settle_ms);
    }

    fn gate_clock(&self) {
        self.regs.modify(CTRL1, HOST_CONTROL1::SD_CLK_EN::CLEAR);
        self.settle_clock();
    }

    fn ungate_clock(&self) {
        self.regs.modify(CTRL1, HOST_CONTROL1::SD_CLK_EN::SET);
        self.settle_clock();
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    /// Base clock in Hz
    pub fn base_clock(&self) -> u32 {
        self.base_clock
    }

    /// Specification version field (2 = SDHCI v3.00)
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether data phases go through the ADMA2 engine
    pub fn dma_enabled(&self) -> bool {
        self.state.lock().descs.is_some()
    }

    /// No request is in flight
    pub fn is_idle(&self) -> bool {
        self.state.lock().req.is_none()
    }

    /// Error recoveries whose software reset did not clear in time
    pub fn recovery_faults(&self) -> u32 {
        self.state.lock().recovery_faults
    }

    #[cfg(test)]
    fn lock_held(&self) -> bool {
        self.state.is_locked()
    }

    /// Switch the signalling voltage
    pub fn set_signal_voltage(&self, voltage: SignalVoltage) -> Result<()> {
        let _state = self.state.lock();
        let regs = &self.regs;

        self.gate_clock();

        let want_1v8 = voltage == SignalVoltage::V180;
        if want_1v8 {
            regs.modify(CTRL2, HOST_CONTROL2::SIGNALING_1V8::SET);
        } else {
            regs.modify(CTRL2, HOST_CONTROL2::SIGNALING_1V8::CLEAR);
        }
        // The regulator output should be stable within 5ms
        self.timer.delay_ms(self.config.regulator_settle_ms);

        if regs.is_set(CTRL2, HOST_CONTROL2::SIGNALING_1V8) != want_1v8 {
            log::debug!("SDHCI: {:?} regulator output did not become stable", voltage);
            return Err(SdhciError::Internal);
        }

        let expected = HOST_CONTROL0::BUS_POWER::SET
            + if want_1v8 {
                HOST_CONTROL0::BUS_VOLTAGE::V1_8
            } else {
                HOST_CONTROL0::BUS_VOLTAGE::V3_3
            };
        let ctrl0 = regs.get(CTRL0);
        if ctrl0 & expected.value != expected.value {
            log::debug!(
                "SDHCI: after voltage switch ctrl0={:#010x}, expected={:#010x}",
                ctrl0,
                expected.value
            );
            return Err(SdhciError::Internal);
        }

        self.ungate_clock();
        log::debug!("SDHCI: signal voltage {:?}", voltage);
        Ok(())
    }

    /// Set the data bus width
    pub fn set_bus_width(&self, width: BusWidth) -> Result<()> {
        let _state = self.state.lock();

        if width == BusWidth::Eight && !self.caps.contains(Capabilities::BUS_WIDTH_8) {
            return Err(SdhciError::NotSupported);
        }

        let fields = match width {
            BusWidth::One => HOST_CONTROL0::DATA_WIDTH_8BIT::CLEAR + HOST_CONTROL0::DATA_WIDTH_4BIT::CLEAR,
            BusWidth::Four => HOST_CONTROL0::DATA_WIDTH_8BIT::CLEAR + HOST_CONTROL0::DATA_WIDTH_4BIT::SET,
            BusWidth::Eight => HOST_CONTROL0::DATA_WIDTH_8BIT::SET,
        };
        self.regs.modify(CTRL0, fields);
        log::debug!("SDHCI: bus width {:?}", width);
        Ok(())
    }

    /// Reprogram the SD clock divider for `freq` Hz
    pub fn set_bus_frequency(&self, freq: u32) -> Result<()> {
        if freq == 0 {
            return Err(SdhciError::InvalidArgument);
        }
        let divider = clock::divider(self.base_clock, freq);
        if divider > MAX_DIVIDER {
            log::debug!("SDHCI: {} Hz needs divider {} > {}", freq, divider, MAX_DIVIDER);
            return Err(SdhciError::NotSupported);
        }

        let _state = self.state.lock();
        let regs = &self.regs;

        if !poll_every(self.timer.as_ref(), 1, Some(self.config.bus_idle_poll_limit), || {
            !regs.is_set(STATE, PRESENT_STATE::CMD_INHIBIT) && !regs.is_set(STATE, PRESENT_STATE::DAT_INHIBIT)
        }) {
            log::warn!("SDHCI: bus busy, cannot change clock");
            return Err(SdhciError::Timeout);
        }

        self.gate_clock();

        regs.modify(
            CTRL1,
            HOST_CONTROL1::PROG_CLK_MODE::CLEAR + clock::divider_fields(divider),
        );
        self.settle_clock();

        self.ungate_clock();

        log::debug!("SDHCI: bus clock {} Hz (divider {})", freq, divider);
        Ok(())
    }

    /// Select high-speed and UHS timing
    pub fn set_timing(&self, timing: Timing) -> Result<()> {
        let _state = self.state.lock();
        let regs = &self.regs;

        if timing == Timing::Legacy {
            regs.modify(CTRL0, HOST_CONTROL0::HIGH_SPEED::CLEAR);
        } else {
            regs.modify(CTRL0, HOST_CONTROL0::HIGH_SPEED::SET);
        }

        // UHS mode may only change with the SD clock stopped
        self.gate_clock();

        let mode = match timing {
            Timing::Hs200 => HOST_CONTROL2::UHS_MODE::SDR104,
            Timing::Hs400 => HOST_CONTROL2::UHS_MODE::HS400,
            Timing::HsDdr => HOST_CONTROL2::UHS_MODE::DDR50,
            Timing::Legacy | Timing::Hs => HOST_CONTROL2::UHS_MODE::SDR12,
        };
        regs.modify(CTRL2, mode);

        self.ungate_clock();
        log::debug!("SDHCI: timing {:?}", timing);
        Ok(())
    }

    /// Pulse the card reset line through the board hook
    pub fn hardware_reset(&self) {
        let _state = self.state.lock();
        self.board.hw_reset();
    }

    /// Start a transaction
    ///
    /// Only one request may be in flight; a second submission fails with
    /// [`SdhciError::Busy`] and must be retried once the first completes.
    /// On any error the request is handed back unchanged in [`Rejected`] and
    /// its callback is not invoked.
    pub fn submit(&self, mut request: Request) -> core::result::Result<(), Rejected> {
        let mut state = self.state.lock();

        if state.req.is_some() {
            return Err(Rejected::new(SdhciError::Busy, request));
        }

        match self.start_request(&mut state, &mut request) {
            Ok(command) => {
                request.reset_progress();
                state.req = Some(request);
                // And we're off
                self.regs.write(CMD, command);
                Ok(())
            }
            Err(error) => {
                log::debug!("SDHCI: CMD{} not started: {}", request.command.index, error);
                Err(Rejected::new(error, request))
            }
        }
    }

    /// Program everything but the command register for `req`
    ///
    /// Returns the transfer mode/command word that starts the transaction.
    fn start_request(
        &self,
        state: &mut State,
        req: &mut Request,
    ) -> Result<FieldValue<u32, COMMAND::Register>> {
        let regs = &self.regs;
        let command = req.command;

        req.validate()?;

        log::trace!(
            "SDHCI: start CMD{} arg {:#010x} blkcnt {} blksiz {}",
            command.index,
            req.arg,
            req.block_count,
            req.block_size
        );

        // Busy-type commands must also wait for the DAT inhibit, except
        // aborts which may be issued with the data lines active
        let wait_data = command.waits_for_data_line();
        if !poll_every(self.timer.as_ref(), 1, self.config.inhibit_poll_limit, || {
            !regs.is_set(STATE, PRESENT_STATE::CMD_INHIBIT)
                && !(wait_data && regs.is_set(STATE, PRESENT_STATE::DAT_INHIBIT))
        }) {
            log::warn!("SDHCI: CMD{} inhibit did not clear", command.index);
            return Err(SdhciError::Timeout);
        }

        let mut fields = command.fields();

        // validate() guarantees a buffer for every non-tuning data phase
        let len = req.transfer_len();
        if let Some(buffer) = req.buffer.as_mut().filter(|_| command.has_data()) {
            buffer.map()?;
            if command.is_read() {
                buffer.cache_flush_invalidate(0, len);
            } else {
                buffer.cache_flush(0, len);
            }

            if let Some(descs) = state.descs.as_mut() {
                descs.build(buffer.segments(ADMA2_DESC_MAX_LENGTH), len)?;
                let table = self.board.virt_to_phys(descs.as_ptr() as usize);
                regs.set(ADMA_ADDR_LO, table as u32);
                regs.set(ADMA_ADDR_HI, (table >> 32) as u32);
                log::trace!("SDHCI: descs at {:#x}", table);
                fields += COMMAND::DMA_ENABLE::SET;
            } else {
                let mut segments = clip_segments(buffer.segments(usize::MAX), len);
                let (Some(segment), None) = (segments.next(), segments.next()) else {
                    log::debug!("SDHCI: PIO transfer needs one contiguous segment");
                    return Err(SdhciError::NotSupported);
                };
                regs.set(ARG2, segment.addr as u32);
            }

            if command.multi_block {
                fields += COMMAND::AUTO_CMD12::SET;
            }
        }

        regs.write(
            BLKCNTSIZ,
            BLOCK::SIZE.val(req.block_size as u32) + BLOCK::COUNT.val(req.block_count as u32),
        );
        regs.set(ARG1, req.arg);

        // The tuning block is only ever seen as buffer-read-ready
        let first = if command.is_tuning_block() {
            INTERRUPT::BUFF_READ_READY::SET.value
        } else {
            INTERRUPT::CMD_CPLT::SET.value
        };
        regs.set(IRQ_SIGNAL, ERROR_INTERRUPTS | NORMAL_INTERRUPTS);
        regs.set(IRQ_EN, ERROR_INTERRUPTS | first);
        // Clear anything stale before the transaction starts
        regs.set(IRQ, regs.get(IRQ_EN));

        Ok(fields)
    }
}
