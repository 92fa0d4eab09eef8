use copyline_frame::{CONTENT_MAX_LEN, MAX_FRAME_SIZE, MIN_FRAME_SIZE, VERSION_1};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_report, Field, OutputFormat};

#[derive(Serialize)]
struct VersionOutput {
    schema_id: &'static str,
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    features: Vec<&'static str>,
    os: &'static str,
    arch: &'static str,
    protocol_version: u8,
    min_frame_size: usize,
    max_frame_size: usize,
    max_content_length: usize,
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("copyline {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let output = VersionOutput {
        schema_id: "copyline.cli.v1/version",
        name: "copyline",
        version: env!("CARGO_PKG_VERSION"),
        target: env!("COPYLINE_BUILD_TARGET"),
        profile: env!("COPYLINE_BUILD_PROFILE"),
        features: env!("COPYLINE_BUILD_FEATURES")
            .split(',')
            .filter(|f| !f.is_empty())
            .collect(),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        protocol_version: VERSION_1,
        min_frame_size: MIN_FRAME_SIZE,
        max_frame_size: MAX_FRAME_SIZE,
        max_content_length: CONTENT_MAX_LEN,
    };
    let fields: Vec<Field> = vec![
        ("name", output.name.to_string()),
        ("version", output.version.to_string()),
        ("target", output.target.to_string()),
        ("profile", output.profile.to_string()),
        ("features", output.features.join(", ")),
        ("platform", format!("{}/{}", output.os, output.arch)),
        ("protocol_version", output.protocol_version.to_string()),
        (
            "frame_size",
            format!("{}..={}", output.min_frame_size, output.max_frame_size),
        ),
        ("max_content_length", output.max_content_length.to_string()),
    ];
    print_report(&output, &fields, format);

    Ok(SUCCESS)
}
