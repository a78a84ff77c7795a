use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use lineproto_router::{Address, DeliveryMode, Router, RouterConfig, Timing};
use lineproto_transport::{SerialConfig, DEFAULT_BAUD_RATE};

use crate::exit::{router_error, CliError, CliResult, USAGE};
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a node: relay traffic and print packets addressed to it.
    Serve(ServeArgs),
    /// Send a single packet.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    /// A serving node reports route and link events; one-shot commands only
    /// report problems.
    pub fn default_log_level(&self) -> LogLevel {
        match self {
            Command::Serve(_) => LogLevel::Info,
            Command::Send(_) | Command::Version(_) => LogLevel::Warn,
        }
    }
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that brings up a node.
#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Serial devices, one per link.
    #[arg(required = true, num_args = 1..)]
    pub devices: Vec<PathBuf>,
    /// This node's address (e.g. 0x01 or 1).
    #[arg(long, short = 'a', value_parser = parse_address)]
    pub address: Address,
    /// Packets are dropped once their hop counter reaches this value.
    #[arg(long, default_value_t = 8)]
    pub max_hop: u8,
    /// Line speed for every device.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Minimum gap between keepalive probes (e.g. 25s, 500ms).
    #[arg(long, default_value = "25s")]
    pub keepalive_interval: String,
}

impl NodeArgs {
    pub fn router_config(&self, delivery: DeliveryMode) -> CliResult<RouterConfig> {
        let timing = Timing {
            keepalive_interval: parse_duration(&self.keepalive_interval)?,
            ..Timing::default()
        };
        Ok(RouterConfig::new(self.address, self.max_hop)
            .with_delivery(delivery)
            .with_timing(timing))
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud,
            ..SerialConfig::default()
        }
    }

    /// Open every device and build the router.
    pub fn open(&self, delivery: DeliveryMode) -> CliResult<Router> {
        let config = self.router_config(delivery)?;
        Router::open(config, self.devices.as_slice(), &self.serial_config())
            .map_err(|err| router_error("open failed", err))
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Also accept packets for this broadcast address (repeatable).
    #[arg(long = "broadcast", value_name = "ADDRESS", value_parser = parse_address)]
    pub broadcast: Vec<Address>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print stats and the route table at this interval (e.g. 10s).
    #[arg(long, value_name = "DURATION")]
    pub stats_interval: Option<String>,
    /// Print stats and the route table on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Destination address.
    #[arg(long, value_parser = parse_address)]
    pub to: Address,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex-encoded payload (e.g. deadbeef).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Wait for one packet back from the destination and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Keep relaying for this long after sending (e.g. 2s).
    #[arg(long, value_name = "DURATION")]
    pub linger: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `0x1f`-style hex or plain decimal into an address.
pub fn parse_address(input: &str) -> Result<Address, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse::<u8>(),
    };
    parsed
        .map(Address::new)
        .map_err(|err| format!("invalid address {input:?}: {err}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
