//! Simulated SDHCI hardware for unit tests
//!
//! [`FakeHardware`] models just enough of a v3.00 controller for the driver
//! to run against it: write-1-to-clear interrupt status, self-clearing
//! software resets, an internal clock that stabilises immediately, a data
//! port backed by queues, and an optional tuning engine. Interrupts are
//! raised explicitly by the test (or by the tuning engine) and delivered
//! through the same object acting as the interrupt line.

use crate::board::Board;
use crate::caps::Quirks;
use crate::config::HostConfig;
use crate::controller::{Resources, SdhciController};
use crate::dma::{DmaBuffer, PhysSegment};
use crate::error::{Result, SdhciError};
use crate::irq::Interrupt;
use crate::regs::*;
use crate::request::MMC_SEND_TUNING_BLOCK;
use crate::time::Timer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Host clock
pub struct StdTimer;

impl Timer for StdTimer {
    fn now_us(&self) -> u64 {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

const WORDS: usize = REGISTER_BLOCK_SIZE / 4;

/// Plain memory behind a register window, no side effects
pub struct RegisterFile {
    words: Mutex<Vec<u32>>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            words: Mutex::new(vec![0; WORDS]),
        }
    }
}

impl RegisterIo for RegisterFile {
    fn read32(&self, offset: usize) -> u32 {
        self.words.lock().unwrap()[offset / 4]
    }

    fn write32(&self, offset: usize, value: u32) {
        self.words.lock().unwrap()[offset / 4] = value;
    }
}

/// Capabilities of the default simulated controller: 50 MHz base clock,
/// 8-bit bus, ADMA2, 64-bit addressing, 3.3V
pub const DEFAULT_CAPS0: u32 = (50 << 8) | (1 << 18) | (1 << 19) | (1 << 24) | (1 << 28);

struct HwState {
    regs: Vec<u32>,
    /// Words returned by successive data port reads
    data_in: VecDeque<u32>,
    /// Words written to the data port
    data_out: Vec<u32>,
    /// Every command register write
    commands: Vec<u32>,
    /// Software reset bits never clear
    sticky_reset: bool,
    /// Tuning engine: `Some(None)` never converges, `Some(Some(n))`
    /// converges on the n-th tuning block
    tuning: Option<Option<u32>>,
    pending: usize,
    shutdown: bool,
}

/// Simulated controller register window and interrupt line
pub struct FakeHardware {
    state: Mutex<HwState>,
    line: Condvar,
    completions: AtomicUsize,
}

impl FakeHardware {
    pub fn new() -> Arc<Self> {
        Self::with_caps(DEFAULT_CAPS0)
    }

    pub fn with_caps(caps0: u32) -> Arc<Self> {
        let mut regs = vec![0; WORDS];
        regs[CAPS0.offset() / 4] = caps0;
        regs[SLOT_VERSION.offset() / 4] = SDHCI_SPEC_300 << 16;
        Arc::new(Self {
            state: Mutex::new(HwState {
                regs,
                data_in: VecDeque::new(),
                data_out: Vec::new(),
                commands: Vec::new(),
                sticky_reset: false,
                tuning: None,
                pending: 0,
                shutdown: false,
            }),
            line: Condvar::new(),
            completions: AtomicUsize::new(0),
        })
    }

    /// Raw register value, bypassing side effects
    pub fn peek<R: tock_registers::RegisterLongName>(&self, reg: Reg<R>) -> u32 {
        self.state.lock().unwrap().regs[reg.offset() / 4]
    }

    /// Raw register store, bypassing side effects
    pub fn poke<R: tock_registers::RegisterLongName>(&self, reg: Reg<R>, value: u32) {
        self.state.lock().unwrap().regs[reg.offset() / 4] = value;
    }

    /// Latch interrupt status bits and fire the line
    pub fn raise(&self, bits: u32) {
        let mut state = self.state.lock().unwrap();
        Self::raise_locked(&mut state, bits);
        self.line.notify_all();
    }

    fn raise_locked(state: &mut HwState, bits: u32) {
        state.regs[IRQ.offset() / 4] |= bits;
        state.pending += 1;
    }

    pub fn push_data(&self, words: &[u32]) {
        self.state.lock().unwrap().data_in.extend(words.iter().copied());
    }

    pub fn data_written(&self) -> Vec<u32> {
        self.state.lock().unwrap().data_out.clone()
    }

    pub fn commands(&self) -> Vec<u32> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn last_command(&self) -> Option<u32> {
        self.state.lock().unwrap().commands.last().copied()
    }

    pub fn set_sticky_reset(&self, sticky: bool) {
        self.state.lock().unwrap().sticky_reset = sticky;
    }

    /// Answer every tuning block with buffer-read-ready; `converge_after`
    /// picks the round on which tuning succeeds (`None` never does)
    pub fn enable_tuning(&self, converge_after: Option<u32>) {
        self.state.lock().unwrap().tuning = Some(converge_after);
    }

    /// Make the interrupt line fail its next wait
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.line.notify_all();
    }

    /// Interrupt events completed by the driver
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    fn run_tuning_block(state: &mut HwState) {
        let Some(converge_after) = state.tuning else {
            return;
        };
        if let Some(rounds) = converge_after {
            let ctrl2 = &mut state.regs[CTRL2.offset() / 4];
            if rounds <= 1 {
                *ctrl2 &= !HOST_CONTROL2::EXEC_TUNING::SET.value;
                *ctrl2 |= HOST_CONTROL2::CLOCK_SELECT::SET.value;
            }
            state.tuning = Some(Some(rounds.saturating_sub(1)));
        }
        Self::raise_locked(state, INTERRUPT::BUFF_READ_READY::SET.value);
    }
}

impl RegisterIo for Arc<FakeHardware> {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock().unwrap();
        if offset == DATA.offset() {
            return state.data_in.pop_front().unwrap_or(0);
        }
        state.regs[offset / 4]
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock().unwrap();
        let index = offset / 4;
        match offset {
            o if o == IRQ.offset() => state.regs[index] &= !value,
            o if o == DATA.offset() => state.data_out.push(value),
            o if o == CTRL1.offset() => {
                let mut value = value;
                if !state.sticky_reset {
                    value &= !(HOST_CONTROL1::RESET_ALL::SET
                        + HOST_CONTROL1::RESET_CMD::SET
                        + HOST_CONTROL1::RESET_DAT::SET)
                        .value;
                }
                if HOST_CONTROL1::INTERNAL_CLK_EN.is_set(value) {
                    value |= HOST_CONTROL1::INTERNAL_CLK_STABLE::SET.value;
                } else {
                    value &= !HOST_CONTROL1::INTERNAL_CLK_STABLE::SET.value;
                }
                state.regs[index] = value;
            }
            o if o == CMD.offset() => {
                state.regs[index] = value;
                state.commands.push(value);
                if COMMAND::INDEX.read(value) == MMC_SEND_TUNING_BLOCK as u32 {
                    FakeHardware::run_tuning_block(&mut state);
                    self.line.notify_all();
                }
            }
            _ => state.regs[index] = value,
        }
    }
}

impl Interrupt for Arc<FakeHardware> {
    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return Err(SdhciError::Io);
            }
            if state.pending > 0 {
                state.pending -= 1;
                return Ok(());
            }
            state = self.line.wait(state).unwrap();
        }
    }

    fn complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Board with configurable clock and quirks that counts reset pulses
pub struct FakeBoard {
    pub base_clock: u32,
    pub quirks: Quirks,
    pub resets: Arc<AtomicUsize>,
}

impl Default for FakeBoard {
    fn default() -> Self {
        Self {
            base_clock: 0,
            quirks: Quirks::empty(),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeBoard {
    pub fn with_quirks(quirks: Quirks) -> Self {
        Self {
            quirks,
            ..Self::default()
        }
    }
}

impl Board for FakeBoard {
    fn base_clock(&self) -> u32 {
        self.base_clock
    }

    fn quirks(&self) -> Quirks {
        self.quirks
    }

    fn hw_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cache maintenance seen by a [`TestBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Map,
    Flush(usize),
    FlushInvalidate(usize),
}

/// DMA buffer whose bytes and cache operations stay visible to the test
/// after the request has moved into the controller
pub struct TestBuffer {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub ops: Arc<Mutex<Vec<CacheOp>>>,
    segments: Vec<PhysSegment>,
}

impl TestBuffer {
    /// One contiguous segment at a fixed bus address
    pub fn new(len: usize) -> Self {
        Self::with_segments(
            len,
            vec![PhysSegment {
                addr: 0x8000_0000,
                len,
            }],
        )
    }

    pub fn with_segments(len: usize, segments: Vec<PhysSegment>) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; len])),
            ops: Arc::new(Mutex::new(Vec::new())),
            segments,
        }
    }

    pub fn filled(bytes: &[u8]) -> Self {
        let buffer = Self::new(bytes.len());
        buffer.data.lock().unwrap().copy_from_slice(bytes);
        buffer
    }
}

impl DmaBuffer for TestBuffer {
    fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn map(&mut self) -> Result<()> {
        self.ops.lock().unwrap().push(CacheOp::Map);
        Ok(())
    }

    fn cache_flush(&mut self, _offset: usize, len: usize) {
        self.ops.lock().unwrap().push(CacheOp::Flush(len));
    }

    fn cache_flush_invalidate(&mut self, _offset: usize, len: usize) {
        self.ops.lock().unwrap().push(CacheOp::FlushInvalidate(len));
    }

    fn segments(&self, _max_chunk: usize) -> Box<dyn Iterator<Item = PhysSegment> + '_> {
        Box::new(self.segments.iter().copied())
    }

    fn copy_to(&mut self, offset: usize, src: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        let Some(dst) = data.get_mut(offset..) else {
            return 0;
        };
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    fn copy_from(&self, offset: usize, dst: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        let Some(src) = data.get(offset..) else {
            return 0;
        };
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }
}

/// Configuration with the settle delays removed
pub fn fast_config() -> HostConfig {
    HostConfig {
        clock_settle_ms: 0,
        regulator_settle_ms: 0,
        reset_timeout_ms: 20,
        clock_stable_timeout_ms: 20,
        ..HostConfig::default()
    }
}

pub fn resources(hw: &Arc<FakeHardware>, board: FakeBoard) -> Resources {
    Resources {
        regs: Box::new(hw.clone()),
        irq: Box::new(hw.clone()),
        board: Box::new(board),
        timer: Box::new(StdTimer),
    }
}

/// Bring up a controller on the simulated hardware
pub fn controller(hw: &Arc<FakeHardware>, board: FakeBoard) -> SdhciController {
    SdhciController::new(resources(hw, board), fast_config()).expect("controller init")
}
