use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::info;

use spi_loopback::mock::{EchoDevice, SlaveDevice};
use spi_loopback::{LoopbackTester, RunSummary, SpiDevice, TesterConfig};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum MockKind {
    /// MOSI wired to MISO
    Echo,
    /// RP2040 slave firmware queueing every message back
    Slave,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Send incrementing frames over SPI and print what comes back", long_about = None)]
struct Args {
    /// TOML file with [channel] and [run] tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// SPI bus index
    #[arg(long)]
    bus: Option<u8>,

    /// Chip select index
    #[arg(long)]
    chip_select: Option<u8>,

    /// Clock speed in Hz
    #[arg(long)]
    speed: Option<u32>,

    /// SPI mode (0-3). Mode 0 does not work with the RP2040 in slave mode.
    #[arg(long)]
    mode: Option<u8>,

    /// Shift out the least significant bit first (true/false)
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    lsb_first: Option<bool>,

    /// Pause between transfers in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many transfers
    #[arg(long)]
    iterations: Option<u64>,

    /// Run against a simulated device instead of hardware
    #[arg(long, value_enum)]
    mock: Option<MockKind>,
}

impl Args {
    fn into_config(self) -> Result<(TesterConfig, Option<MockKind>)> {
        let mut config = match &self.config {
            Some(path) => TesterConfig::load(path)?,
            None => TesterConfig::default(),
        };

        let channel = &mut config.channel;
        if let Some(bus) = self.bus {
            channel.bus = bus;
        }
        if let Some(cs) = self.chip_select {
            channel.chip_select = cs;
        }
        if let Some(speed) = self.speed {
            channel.speed_hz = speed;
        }
        if let Some(mode) = self.mode {
            channel.mode = mode;
        }
        if let Some(lsb_first) = self.lsb_first {
            channel.lsb_first = lsb_first;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.run.interval_ms = interval_ms;
        }
        if self.iterations.is_some() {
            config.run.iterations = self.iterations;
        }

        config.channel.validate()?;
        Ok((config, self.mock))
    }
}

fn run_tester<D: SpiDevice>(tester: LoopbackTester<D>, stop: &AtomicBool) -> Result<RunSummary> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    tester.run(&mut out, stop).context("SPI loopback test failed")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, mock) = Args::parse().into_config()?;
    info!("Channel config: {:?}", config.channel);
    info!("Run config: {:?}", config.run);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let summary = match mock {
        Some(MockKind::Echo) => {
            info!("Using mock echo device");
            run_tester(LoopbackTester::with_device(EchoDevice::new(), config.run), &stop)?
        }
        Some(MockKind::Slave) => {
            info!("Using mock RP2040 slave device");
            run_tester(LoopbackTester::with_device(SlaveDevice::echoing(), config.run), &stop)?
        }
        None => run_hardware(&config, &stop)?,
    };

    info!("Completed {} transfers", summary.iterations);
    Ok(())
}

#[cfg(feature = "hardware")]
fn run_hardware(config: &TesterConfig, stop: &AtomicBool) -> Result<RunSummary> {
    let tester = LoopbackTester::configure(&config.channel, config.run.clone())
        .context("Failed to open SPI channel")?;
    run_tester(tester, stop)
}

#[cfg(not(feature = "hardware"))]
fn run_hardware(_config: &TesterConfig, _stop: &AtomicBool) -> Result<RunSummary> {
    anyhow::bail!("built without the `hardware` feature; use --mock echo or --mock slave")
}

#[cfg(test)]
mod tests {
    use super::*;
    use spi_loopback::LoopbackError;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<(TesterConfig, Option<MockKind>)> {
        let mut argv = vec!["spi_loopback_bin"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).expect("arguments should parse").into_config()
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_flags_gives_fixed_configuration() {
        let (config, mock) = parse(&[]).unwrap();
        assert_eq!(config, TesterConfig::default());
        assert_eq!(config.channel.speed_hz, 1_000_000);
        assert_eq!(config.channel.mode, 1);
        assert!(!config.channel.lsb_first);
        assert_eq!(config.run.interval_ms, 100);
        assert_eq!(config.run.iterations, None);
        assert_eq!(mock, None);
    }

    #[test]
    fn flags_override_config_file() {
        let file = config_file(
            "[channel]\nbus = 1\nspeed_hz = 500000\nmode = 3\nlsb_first = true\n\n[run]\ninterval_ms = 20\niterations = 7\n",
        );
        let path = file.path().to_str().unwrap();

        let (config, _) = parse(&[
            "--config", path,
            "--speed", "2000000",
            "--mode", "0",
            "--lsb-first", "false",
            "--interval-ms", "0",
            "--iterations", "3",
        ])
        .unwrap();

        assert_eq!(config.channel.bus, 1);
        assert_eq!(config.channel.speed_hz, 2_000_000);
        assert_eq!(config.channel.mode, 0);
        assert!(!config.channel.lsb_first);
        assert_eq!(config.run.interval_ms, 0);
        assert_eq!(config.run.iterations, Some(3));
    }

    #[test]
    fn config_file_values_survive_without_flags() {
        let file = config_file("[channel]\nlsb_first = true\nchip_select = 1\n\n[run]\niterations = 7\n");
        let (config, _) = parse(&["--config", file.path().to_str().unwrap()]).unwrap();
        assert!(config.channel.lsb_first);
        assert_eq!(config.channel.chip_select, 1);
        assert_eq!(config.run.iterations, Some(7));
        assert_eq!(config.run.interval_ms, 100);
    }

    #[test]
    fn invalid_channel_is_rejected_before_any_device_is_opened() {
        for args in [&["--mode", "4"][..], &["--speed", "1000"][..], &["--bus", "9"][..]] {
            let err = parse(args).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<LoopbackError>(), Some(LoopbackError::ConfigurationError(_))),
                "{:?} gave {:?}",
                args,
                err
            );
        }
    }

    #[test]
    fn invalid_file_value_is_rejected_too() {
        let file = config_file("[channel]\nbits_per_word = 16\n");
        let err = parse(&["--config", file.path().to_str().unwrap()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoopbackError>(),
            Some(LoopbackError::ConfigurationError(_))
        ));
    }

    #[test]
    fn mock_kind_is_parsed() {
        let (_, mock) = parse(&["--mock", "slave"]).unwrap();
        assert_eq!(mock, Some(MockKind::Slave));
        let (_, mock) = parse(&["--mock", "echo"]).unwrap();
        assert_eq!(mock, Some(MockKind::Echo));
        assert!(Args::try_parse_from(["spi_loopback_bin", "--mock", "loop"]).is_err());
    }
}
