use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serial_telemetry::config::{DEFAULT_BAUD, DEFAULT_CAPACITY};
use serial_telemetry::poll::{MAX_POLL_MS, MIN_POLL_MS};
use serial_telemetry::ConnectionConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "serial-telemetry",
    about = "Serial link monitor for temperature/humidity telemetry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Connect, print received lines and samples, send stdin lines
    Monitor(MonitorOpts),
    /// List serial ports
    Ports,
    /// Decode telemetry lines from stdin without a device
    Decode(DecodeOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Stop instead of retrying when the port fails
    #[arg(long, default_value_t = false)]
    pub no_reconnect: bool,
}

impl SerialOpts {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.dev, self.baud).auto_reconnect(!self.no_reconnect)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Samples kept in the rolling window
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,
    /// Send READ every N milliseconds (50-5000)
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "200",
        value_parser = clap::value_parser!(u64).range(MIN_POLL_MS..=MAX_POLL_MS)
    )]
    pub poll_ms: Option<u64>,
    /// Set PWM duty (0-255) once connected
    #[arg(long)]
    pub pwm: Option<u8>,
    /// Extra command line to send once connected (repeatable)
    #[arg(long)]
    pub send: Vec<String>,
    /// Print samples as JSON objects instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,
    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,
    /// Write the session log here on exit
    #[arg(long)]
    pub save_log: Option<PathBuf>,
    /// Screen refresh interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,
}

impl MonitorOpts {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_ms.map(Duration::from_millis)
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.duration
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[derive(Args, Debug, Clone)]
pub struct DecodeOpts {
    /// Print JSON objects instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
