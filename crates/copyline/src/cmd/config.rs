use copyline_bridge::BridgeConfig;
use serde::Serialize;

use crate::cmd::ConfigArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_report, Field, OutputFormat};

#[derive(Serialize)]
struct ConfigOutput<'a> {
    schema_id: &'static str,
    #[serde(flatten)]
    config: &'a BridgeConfig,
}

fn fields(config: &BridgeConfig) -> Vec<Field> {
    vec![
        ("initial_mode", config.initial_mode.to_string()),
        ("ack_timeout_ms", config.ack_timeout_ms.to_string()),
        ("cycle_interval_ms", config.cycle_interval_ms.to_string()),
        ("command_timeout_ms", config.command_timeout_ms.to_string()),
        (
            "max_command_timeout_ms",
            config.max_command_timeout_ms.to_string(),
        ),
        ("read_buffer_size", config.read_buffer_size().to_string()),
        ("inbox_capacity", config.inbox_capacity().to_string()),
        ("restart_on_fault", config.restart_on_fault.to_string()),
    ]
}

pub fn run(_args: ConfigArgs, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    let output = ConfigOutput {
        schema_id: "copyline.cli.v1/bridge-config",
        config: &config,
    };
    print_report(&output, &fields(&config), format);
    Ok(SUCCESS)
}
