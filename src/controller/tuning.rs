//! Sampling clock tuning (HS200/SDR104)

use super::SdhciController;
use crate::error::{Result, SdhciError};
use crate::regs::*;
use crate::request::{Command, Request};
use crate::time::{wait_for, Timeout};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

impl SdhciController {
    /// Run the tuning procedure
    ///
    /// Sets Execute Tuning and issues SEND_TUNING_BLOCK until the controller
    /// clears it or the round limit is reached. Succeeds only when the
    /// controller ends up on the tuned sampling clock.
    ///
    /// Each round completes through the interrupt loop, which must be
    /// running on another thread.
    pub fn perform_tuning(&self) -> Result<()> {
        let block_size = {
            let _state = self.state.lock();
            self.regs.modify(CTRL2, HOST_CONTROL2::EXEC_TUNING::SET);
            if self.regs.is_set(CTRL0, HOST_CONTROL0::DATA_WIDTH_8BIT) {
                128
            } else {
                64
            }
        };

        let mut rounds = 0;
        while rounds < self.config.max_tuning_count {
            self.tuning_round(block_size)?;
            rounds += 1;
            if !self.regs.is_set(CTRL2, HOST_CONTROL2::EXEC_TUNING) {
                break;
            }
        }

        let ctrl2 = self.regs.read(CTRL2);
        if ctrl2.is_set(HOST_CONTROL2::EXEC_TUNING) || !ctrl2.is_set(HOST_CONTROL2::CLOCK_SELECT) {
            log::error!("SDHCI: tuning failed {:#010x}", ctrl2.get());
            return Err(SdhciError::Io);
        }

        log::debug!("SDHCI: tuned after {} rounds", rounds);
        Ok(())
    }

    /// Issue one tuning block and wait for it to complete
    fn tuning_round(&self, block_size: u16) -> Result<()> {
        let deadline = Timeout::from_ms(self.timer.as_ref(), self.config.tuning_round_timeout_ms);
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        let mut request = Request::new(Command::SEND_TUNING_BLOCK, 0)
            .with_blocks(block_size, 0)
            .on_complete(move |_, completion| {
                if let Err(e) = completion.status {
                    log::debug!("SDHCI: tuning round failed: {}", e);
                }
                flag.store(true, Ordering::Release);
            });

        loop {
            match self.submit(request) {
                Ok(()) => break,
                Err(rejected) if rejected.error == SdhciError::Busy => {
                    if deadline.is_expired() {
                        return Err(SdhciError::Timeout);
                    }
                    request = rejected.into_request();
                    self.timer.delay_ms(1);
                }
                Err(rejected) => {
                    log::warn!("SDHCI: tuning round not started: {}", rejected.error);
                    return Err(rejected.error);
                }
            }
        }

        let remaining_ms = deadline.remaining_us() / 1000;
        if wait_for(self.timer.as_ref(), remaining_ms, || done.load(Ordering::Acquire)) {
            return Ok(());
        }

        // Take the stuck round back so the controller stays usable
        let mut state = self.state.lock();
        if done.load(Ordering::Acquire) {
            return Ok(());
        }
        log::warn!("SDHCI: tuning round timed out");
        self.complete(&mut state, Err(SdhciError::Timeout), 0);
        Err(SdhciError::Timeout)
    }
}
