use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, error, info, warn};

use crate::frame::{build_test_frame, check_echo, format_hex, EchoCheck, Frame, FrameCounter, FRAME_LEN};
use crate::spi::SpiDevice;
use crate::types::{LoopbackError, RunConfig, RunSummary, StopReason};

#[cfg(feature = "hardware")]
use crate::spi::{open_channel, HardwareSpi};
#[cfg(feature = "hardware")]
use crate::types::ChannelConfig;

/// Earlier frames kept around to recognise a lagging echo.
const ECHO_HISTORY: usize = 4;

/// Drives one SPI channel with incrementing test frames.
///
/// The tester owns the channel. It is released exactly once, either by
/// `shutdown`/`run` or when the tester is dropped.
pub struct LoopbackTester<D: SpiDevice> {
    device: Option<D>,
    counter: FrameCounter,
    run_config: RunConfig,
    history: VecDeque<Frame>,
}

#[cfg(feature = "hardware")]
impl LoopbackTester<HardwareSpi> {
    /// Open the hardware channel described by `config`.
    pub fn configure(config: &ChannelConfig, run_config: RunConfig) -> Result<Self, LoopbackError> {
        let device = open_channel(config)?;
        Ok(Self::with_device(device, run_config))
    }
}

impl<D: SpiDevice> LoopbackTester<D> {
    pub fn with_device(device: D, run_config: RunConfig) -> Self {
        Self {
            device: Some(device),
            counter: FrameCounter::new(),
            run_config,
            history: VecDeque::with_capacity(ECHO_HISTORY),
        }
    }

    /// Counter value the next frame will use
    pub fn counter(&self) -> u8 {
        self.counter.value()
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Build the next frame, transfer it and return (sent, received).
    pub fn step(&mut self) -> Result<(Frame, Frame), LoopbackError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| LoopbackError::TransferError("SPI channel already closed".to_string()))?;

        let sent = build_test_frame(self.counter.advance());
        let mut received = [0u8; FRAME_LEN];
        device.transfer(&mut received, &sent)?;

        match check_echo(&sent, &self.history, &received) {
            EchoCheck::Mismatch => warn!("Response does not match any recent frame"),
            check => debug!("Response check: {:?}", check),
        }

        if self.history.len() == ECHO_HISTORY {
            self.history.pop_back();
        }
        self.history.push_front(sent);

        Ok((sent, received))
    }

    /// Transfer, print and pause until `stop` is set or the iteration limit is hit.
    ///
    /// `stop` is only checked between iterations; a transfer in flight always completes.
    pub fn run_loop<W: Write>(&mut self, out: &mut W, stop: &AtomicBool) -> Result<RunSummary, LoopbackError> {
        let mut iterations: u64 = 0;
        let interval = self.run_config.interval();

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(RunSummary { iterations, reason: StopReason::Interrupted });
            }
            if self.run_config.iterations.is_some_and(|limit| iterations >= limit) {
                return Ok(RunSummary { iterations, reason: StopReason::IterationLimit });
            }

            let (sent, received) = self.step()?;
            iterations += 1;

            writeln!(out, "Sent data: {}", format_hex(&sent))?;
            writeln!(out, "Received data: {}", format_hex(&received))?;
            writeln!(out)?;
            out.flush()?;

            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }
    }

    /// Release the channel. Later calls are no-ops.
    pub fn shutdown(&mut self) -> Result<(), LoopbackError> {
        match self.device.take() {
            Some(mut device) => {
                info!("Shutting down SPI channel");
                device.close()
            }
            None => Ok(()),
        }
    }

    /// Run the loop, then release the channel whatever the outcome.
    pub fn run<W: Write>(mut self, out: &mut W, stop: &AtomicBool) -> Result<RunSummary, LoopbackError> {
        let result = self.run_loop(out, stop);

        match &result {
            Ok(summary) => {
                info!("Loop finished after {} iterations ({:?})", summary.iterations, summary.reason);
                if summary.reason == StopReason::Interrupted {
                    writeln!(out, "\nSPI test stopped by user")?;
                }
            }
            Err(e) => error!("Loop aborted: {}", e),
        }

        let closed = self.shutdown();
        if closed.is_ok() {
            writeln!(out, "SPI connection closed")?;
        }

        let summary = result?;
        closed?;
        Ok(summary)
    }
}

impl<D: SpiDevice> Drop for LoopbackTester<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to close SPI channel: {}", e);
        }
    }
}
