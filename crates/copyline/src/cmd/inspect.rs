use copyline_frame::{decode_packet, Packet, PacketType};
use serde::Serialize;

use crate::cmd::InspectArgs;
use crate::exit::{protocol_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{content_preview, owner_name, print_report, Field, OutputFormat};

#[derive(Debug, Serialize)]
struct PacketReport {
    schema_id: &'static str,
    version: u8,
    owner: &'static str,
    packet_type: &'static str,
    type_code: u8,
    message_id: String,
    total_count: u32,
    index: u32,
    total_length: u32,
    content_length: usize,
    frame_length: usize,
    content: String,
    content_hex: String,
}

impl PacketReport {
    fn new(packet: &Packet) -> Self {
        Self {
            schema_id: "copyline.cli.v1/packet",
            version: packet.version,
            owner: owner_name(packet.owner),
            packet_type: packet.packet_type.name(),
            type_code: packet.packet_type as u8,
            message_id: packet.message_id.to_string(),
            total_count: packet.total_count,
            index: packet.index,
            total_length: packet.total_length,
            content_length: packet.content_length(),
            frame_length: packet.wire_size(),
            content: describe_content(packet),
            content_hex: hex::encode(&packet.content),
        }
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            ("version", self.version.to_string()),
            ("owner", self.owner.to_string()),
            ("type", format!("{} ({})", self.packet_type, self.type_code)),
            ("message_id", self.message_id.clone()),
            ("index", format!("{}/{}", self.index, self.total_count)),
            ("total_length", self.total_length.to_string()),
            ("content_length", self.content_length.to_string()),
            ("frame_length", self.frame_length.to_string()),
            ("content", self.content.clone()),
        ]
    }
}

/// TAIL carries a digest, everything else is shown as text when it is text.
fn describe_content(packet: &Packet) -> String {
    match packet.packet_type {
        PacketType::Tail => format!("sha256:{}", hex::encode(&packet.content)),
        _ if packet.content.is_empty() => String::new(),
        _ => content_preview(&packet.content),
    }
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = parse_hex(&args.frame)?;
    let packet = decode_packet(&frame).map_err(|err| protocol_error("decode failed", err))?;

    let report = PacketReport::new(&packet);
    print_report(&report, &report.fields(), format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    hex::decode(cleaned).map_err(|err| CliError::new(USAGE, format!("frame is not valid hex: {err}")))
}
