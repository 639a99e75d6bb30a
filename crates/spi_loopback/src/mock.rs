//! Devices that stand in for real hardware.
//!
//! `EchoDevice` behaves like MOSI wired straight to MISO. `SlaveModel` mimics the
//! RP2040 slave firmware: DMA into a receive ring, shift out of a transmit ring,
//! with the next outgoing slot picked when chip select is released.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::frame::{Frame, FRAME_LEN};
use crate::spi::SpiDevice;
use crate::types::LoopbackError;

/// Messages each slave ring can hold.
pub const RING_CAPACITY: usize = 32;

/// Counters shared between a mock device and the test that created it.
#[derive(Debug, Default)]
pub struct DeviceStats {
    transfers: AtomicUsize,
    closes: AtomicUsize,
}

impl DeviceStats {
    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Returns whatever was written.
pub struct EchoDevice {
    stats: Arc<DeviceStats>,
    fail_on: Option<usize>,
}

impl EchoDevice {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(DeviceStats::default()),
            fail_on: None,
        }
    }

    /// Make the n-th transfer (1-based) fail with a transfer error.
    pub fn failing_on(mut self, transfer: usize) -> Self {
        self.fail_on = Some(transfer);
        self
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for EchoDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiDevice for EchoDevice {
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), LoopbackError> {
        let count = self.stats.transfers.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(count) {
            return Err(LoopbackError::TransferError(format!(
                "mock transfer {} failed",
                count
            )));
        }
        if read.len() != write.len() {
            return Err(LoopbackError::TransferError(format!(
                "buffer length mismatch: read {} write {}",
                read.len(),
                write.len()
            )));
        }
        read.copy_from_slice(write);
        Ok(())
    }

    fn close(&mut self) -> Result<(), LoopbackError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        info!("Mock echo device closed");
        Ok(())
    }
}

/// Where the TX DMA reads from during the next transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxSource {
    Zeros,
    Slot(usize),
}

/// Buffering model of the RP2040 SPI slave.
///
/// Both rings are fixed arrays indexed the way the firmware indexes them. The
/// TX DMA is pointed at a slot when chip select rises and reads it during the
/// next transfer, so a message queued into that slot in between still goes out.
#[derive(Debug)]
pub struct SlaveModel {
    rx_ring: [Frame; RING_CAPACITY],
    rx_writing: usize,
    rx_stored: usize,
    tx_ring: [Frame; RING_CAPACITY],
    tx_reading: usize,
    tx_stored: usize,
    tx_source: TxSource,
}

impl SlaveModel {
    pub fn new() -> Self {
        Self {
            rx_ring: [[0u8; FRAME_LEN]; RING_CAPACITY],
            rx_writing: 0,
            rx_stored: 0,
            tx_ring: [[0u8; FRAME_LEN]; RING_CAPACITY],
            tx_reading: 0,
            tx_stored: 0,
            tx_source: TxSource::Zeros,
        }
    }

    /// Take the oldest received message.
    pub fn get_rx(&mut self) -> Option<Frame> {
        if self.rx_stored == 0 {
            return None;
        }
        let index = (self.rx_writing + RING_CAPACITY - self.rx_stored) % RING_CAPACITY;
        self.rx_stored -= 1;
        Some(self.rx_ring[index])
    }

    /// Queue a message for transmission. Dropped when the ring is full.
    pub fn queue_tx(&mut self, message: &Frame) -> bool {
        if self.tx_stored >= RING_CAPACITY {
            debug!("TX ring full, dropping message");
            return false;
        }
        let index = (self.tx_reading + self.tx_stored) % RING_CAPACITY;
        self.tx_ring[index] = *message;
        self.tx_stored += 1;
        true
    }

    pub fn rx_pending(&self) -> usize {
        self.rx_stored
    }

    pub fn tx_pending(&self) -> usize {
        self.tx_stored
    }

    /// One chip-select cycle: shift `incoming` in, return what was shifted out.
    pub fn clock_message(&mut self, incoming: &Frame) -> Frame {
        let outgoing = match self.tx_source {
            TxSource::Zeros => [0u8; FRAME_LEN],
            TxSource::Slot(index) => self.tx_ring[index],
        };
        self.rx_ring[self.rx_writing] = *incoming;
        self.release_chip_select();
        outgoing
    }

    /// Repoint both DMA channels for the next transfer.
    fn release_chip_select(&mut self) {
        // Full: the write slot stays put and the next message lands on the oldest unread one.
        if self.rx_stored < RING_CAPACITY {
            self.rx_writing = (self.rx_writing + 1) % RING_CAPACITY;
            self.rx_stored += 1;
        }

        if self.tx_stored > 0 {
            self.tx_reading = (self.tx_reading + 1) % RING_CAPACITY;
            self.tx_source = TxSource::Slot(self.tx_reading);
            self.tx_stored -= 1;
        } else {
            self.tx_source = TxSource::Zeros;
        }
    }
}

impl Default for SlaveModel {
    fn default() -> Self {
        Self::new()
    }
}

/// `SlaveModel` on the far end of the bus, optionally running the echo firmware loop.
pub struct SlaveDevice {
    model: SlaveModel,
    echo: bool,
    stats: Arc<DeviceStats>,
}

impl SlaveDevice {
    /// A slave whose firmware queues every received message back out.
    pub fn echoing() -> Self {
        Self {
            model: SlaveModel::new(),
            echo: true,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    /// A slave with no firmware loop; use `model_mut` to drive it.
    pub fn idle() -> Self {
        Self {
            echo: false,
            ..Self::echoing()
        }
    }

    pub fn model_mut(&mut self) -> &mut SlaveModel {
        &mut self.model
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl SpiDevice for SlaveDevice {
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), LoopbackError> {
        let incoming: Frame = write.try_into().map_err(|_| {
            LoopbackError::TransferError(format!(
                "slave expects {}-byte messages, got {}",
                FRAME_LEN,
                write.len()
            ))
        })?;
        if read.len() != FRAME_LEN {
            return Err(LoopbackError::TransferError(format!(
                "slave expects {}-byte messages, read buffer is {}",
                FRAME_LEN,
                read.len()
            )));
        }

        self.stats.transfers.fetch_add(1, Ordering::SeqCst);
        read.copy_from_slice(&self.model.clock_message(&incoming));

        if self.echo {
            while let Some(message) = self.model.get_rx() {
                self.model.queue_tx(&message);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), LoopbackError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        info!("Mock slave device closed");
        Ok(())
    }
}
