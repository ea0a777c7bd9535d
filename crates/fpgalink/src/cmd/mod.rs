use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use fpgalink_pipeline::{PackagerStrategy, SimBehavior};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream JSON-lines instructions through the accelerator and print results.
    Run(Box<RunArgs>),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(*args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-lines instruction file. Reads stdin when omitted or "-".
    pub input: Option<PathBuf>,

    /// JSON configuration file. Flags override its values.
    #[arg(long, short = 'c', value_name = "FILE", env = "FPGALINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial device path.
    #[arg(long, short = 'd', value_name = "PATH", env = "FPGALINK_DEVICE")]
    pub device: Option<String>,

    /// Serial baud rate.
    #[arg(long, short = 'b', env = "FPGALINK_BAUD")]
    pub baud: Option<u32>,

    /// Packaging strategy.
    #[arg(long, value_name = "STRATEGY", env = "FPGALINK_PACKAGER")]
    pub packager: Option<StrategyArg>,

    /// Most instructions packed into one batched frame.
    #[arg(long, value_name = "N")]
    pub batch_window: Option<usize>,

    /// How long a partial batch waits for more instructions (e.g. 5ms, 0).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub batch_linger: Option<Duration>,

    /// How long to wait for each response (e.g. 1s, 250ms).
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = parse_duration,
        env = "FPGALINK_RESPONSE_TIMEOUT"
    )]
    pub response_timeout: Option<Duration>,

    /// Write attempts per frame before the link is declared wedged.
    #[arg(long, value_name = "N")]
    pub write_attempts: Option<u32>,

    /// Delay before the first write retry; doubles on each further retry.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub retry_backoff: Option<Duration>,

    /// Keep reading past BUSY responses until a final status or the timeout.
    #[arg(long)]
    pub await_busy: bool,

    /// Send command frames without the trailing CRC-8.
    #[arg(long)]
    pub no_checksum: bool,

    /// Capacity of each inter-stage queue.
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Report a failed device open as an error instead of exiting immediately.
    #[arg(long)]
    pub no_exit_on_fail: bool,

    /// Run against the built-in board simulator instead of a serial device.
    #[arg(long, env = "FPGALINK_SIMULATE")]
    pub simulate: bool,

    /// How the simulator answers (with --simulate).
    #[arg(long, value_name = "BEHAVIOR", default_value = "respond")]
    pub sim_behavior: SimMode,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Simple,
    Batching,
}

impl From<StrategyArg> for PackagerStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Simple => PackagerStrategy::Simple,
            StrategyArg::Batching => PackagerStrategy::Batching,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SimMode {
    Respond,
    Silent,
    Corrupt,
    Busy,
    Reject,
    WrongSeq,
    Late,
}

impl From<SimMode> for SimBehavior {
    fn from(mode: SimMode) -> Self {
        match mode {
            SimMode::Respond => SimBehavior::Respond,
            SimMode::Silent => SimBehavior::Silent,
            SimMode::Corrupt => SimBehavior::Corrupt,
            SimMode::Busy => SimBehavior::Busy,
            SimMode::Reject => SimBehavior::Reject,
            SimMode::WrongSeq => SimBehavior::WrongSeq,
            SimMode::Late => SimBehavior::Late,
        }
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or bare seconds. Zero is accepted; callers that need a
/// positive value get it checked by config validation.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
