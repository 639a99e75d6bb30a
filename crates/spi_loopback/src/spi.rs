use crate::types::LoopbackError;

// SPI abstraction trait
pub trait SpiDevice: Send {
    /// Full-duplex transfer; blocks until the hardware is done.
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), LoopbackError>;

    /// Release the underlying channel. Called once by the tester on every exit path.
    fn close(&mut self) -> Result<(), LoopbackError> {
        Ok(())
    }
}

#[cfg(feature = "hardware")]
pub use self::hardware::{open_channel, HardwareSpi};

#[cfg(feature = "hardware")]
mod hardware {
    use super::*;
    use crate::types::ChannelConfig;
    use log::{error, info};
    use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect, Spi};

    /// An open spidev channel. Dropping the inner `Spi` closes the file descriptor.
    pub struct HardwareSpi {
        spi: Option<Spi>,
    }

    impl SpiDevice for HardwareSpi {
        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), LoopbackError> {
            let spi = self
                .spi
                .as_ref()
                .ok_or_else(|| LoopbackError::TransferError("SPI channel already closed".to_string()))?;
            spi.transfer(read, write)
                .map(|_| ())
                .map_err(|e| LoopbackError::TransferError(e.to_string()))
        }

        fn close(&mut self) -> Result<(), LoopbackError> {
            if self.spi.take().is_some() {
                info!("SPI channel released");
            }
            Ok(())
        }
    }

    fn bus_from_index(index: u8) -> Result<Bus, LoopbackError> {
        Ok(match index {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            3 => Bus::Spi3,
            4 => Bus::Spi4,
            5 => Bus::Spi5,
            6 => Bus::Spi6,
            other => {
                return Err(LoopbackError::ConfigurationError(format!("Invalid SPI bus: {}", other)))
            }
        })
    }

    fn slave_select_from_index(index: u8) -> Result<SlaveSelect, LoopbackError> {
        Ok(match index {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            3 => SlaveSelect::Ss3,
            4 => SlaveSelect::Ss4,
            5 => SlaveSelect::Ss5,
            6 => SlaveSelect::Ss6,
            7 => SlaveSelect::Ss7,
            8 => SlaveSelect::Ss8,
            9 => SlaveSelect::Ss9,
            10 => SlaveSelect::Ss10,
            11 => SlaveSelect::Ss11,
            12 => SlaveSelect::Ss12,
            13 => SlaveSelect::Ss13,
            14 => SlaveSelect::Ss14,
            15 => SlaveSelect::Ss15,
            other => {
                return Err(LoopbackError::ConfigurationError(format!("Invalid chip select: {}", other)))
            }
        })
    }

    fn mode_from_index(index: u8) -> Result<Mode, LoopbackError> {
        Ok(match index {
            0 => Mode::Mode0,
            1 => Mode::Mode1,
            2 => Mode::Mode2,
            3 => Mode::Mode3,
            other => {
                return Err(LoopbackError::ConfigurationError(format!("Invalid SPI mode: {}", other)))
            }
        })
    }

    /// Open /dev/spidevB.C with the given parameters.
    pub fn open_channel(config: &ChannelConfig) -> Result<HardwareSpi, LoopbackError> {
        config.validate()?;
        let bus = bus_from_index(config.bus)?;
        let slave_select = slave_select_from_index(config.chip_select)?;
        let mode = mode_from_index(config.mode)?;

        info!(
            "Initializing SPI bus {} CS {} with speed: {} Hz, Mode: {:?}",
            config.bus, config.chip_select, config.speed_hz, mode
        );

        let spi = Spi::new(bus, slave_select, config.speed_hz, mode).map_err(|e| {
            error!("SPI initialization error: {}", e);
            error!("Make sure the SPI interface is enabled and the user has permission to access it.");
            match e {
                rppal::spi::Error::Io(io) => LoopbackError::DeviceUnavailable(format!(
                    "/dev/spidev{}.{}: {}",
                    config.bus, config.chip_select, io
                )),
                other => LoopbackError::from(other),
            }
        })?;

        spi.set_bits_per_word(config.bits_per_word).map_err(|e| {
            LoopbackError::ConfigurationError(format!(
                "{} bits per word rejected: {}",
                config.bits_per_word, e
            ))
        })?;
        let bit_order = if config.lsb_first {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        };
        spi.set_bit_order(bit_order).map_err(|e| {
            LoopbackError::ConfigurationError(format!("Bit order {:?} rejected: {}", bit_order, e))
        })?;

        info!("SPI initialization successful");
        Ok(HardwareSpi { spi: Some(spi) })
    }
}
