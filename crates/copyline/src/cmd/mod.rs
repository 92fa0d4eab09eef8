use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use copyline_bridge::BridgeConfig;

use crate::exit::{bridge_error, CliResult};
use crate::output::OutputFormat;

pub mod config;
pub mod inspect;
pub mod plan;
pub mod selftest;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an OUTSIDE and an INSIDE bridge over an in-memory cable.
    Selftest(SelftestArgs),
    /// Decode one frame given as hex.
    Inspect(InspectArgs),
    /// Show the HEAD/DATA/TAIL packet plan for a payload size.
    Plan(PlanArgs),
    /// Print the effective bridge configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    match command {
        Command::Selftest(args) => selftest::run(args, format, load_config(config)?),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Plan(args) => plan::run(args, format),
        Command::Config(args) => config::run(args, format, load_config(config)?),
        Command::Version(args) => version::run(args, format),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::from_json_file(path)
            .map_err(|err| bridge_error(&format!("failed loading {}", path.display()), err)),
        None => Ok(BridgeConfig::default()),
    }
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    /// Payload size in bytes for each transfer.
    #[arg(long, default_value = "4096", value_parser = clap::value_parser!(u32).range(1..))]
    pub size: u32,
    /// Relay this command from OUTSIDE to INSIDE after the transfers.
    #[arg(long)]
    pub command: Option<String>,
    /// Number of transfers. 0 runs until interrupted.
    #[arg(long, default_value = "1")]
    pub rounds: u32,
    /// How long to wait for each delivery (e.g. 10s, 500ms, 2m; bare numbers are ms).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Frame bytes as hex. Whitespace and a leading 0x are ignored.
    pub frame: String,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Payload size in bytes.
    #[arg(long)]
    pub size: u64,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `10s` or `2m`. A bare number is milliseconds, like the
/// `*_ms` fields of the bridge config.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;
    let millis = match unit {
        "" | "ms" => Some(value),
        "s" => value.checked_mul(1_000),
        "m" => value.checked_mul(60_000),
        other => return Err(format!("unknown duration unit {other:?} (use ms, s or m)")),
    }
    .ok_or_else(|| format!("duration {input:?} is too large"))?;

    if millis == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(millis))
}
