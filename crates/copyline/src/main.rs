mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "copyline", version, about = "USB copy-line bridge CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Bridge configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "COPYLINE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selftest_subcommand() {
        let cli = Cli::try_parse_from([
            "copyline",
            "selftest",
            "--size",
            "4096",
            "--command",
            "echo hi",
        ])
        .expect("selftest args should parse");

        match cli.command {
            Command::Selftest(args) => {
                assert_eq!(args.size, 4096);
                assert_eq!(args.command.as_deref(), Some("echo hi"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "copyline",
            "plan",
            "--size",
            "10",
            "--format",
            "json",
            "--config",
            "/etc/copyline.json",
        ])
        .expect("global flags should parse after subcommand");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/copyline.json")));
    }

    #[test]
    fn selftest_timeout_is_parsed_at_the_command_line() {
        let cli = Cli::try_parse_from(["copyline", "selftest", "--timeout", "2m"])
            .expect("timeout should parse");
        match cli.command {
            Command::Selftest(args) => {
                assert_eq!(args.timeout, std::time::Duration::from_secs(120))
            }
            other => panic!("unexpected command {other:?}"),
        }

        let err = Cli::try_parse_from(["copyline", "selftest", "--timeout", "5h"])
            .expect_err("hours are not accepted");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn inspect_requires_frame() {
        let err = Cli::try_parse_from(["copyline", "inspect"]).expect_err("frame is required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }
}
