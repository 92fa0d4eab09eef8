use copyline_frame::{ProtocolError, CONTENT_MAX_LEN, DIGEST_LEN, MIN_FRAME_SIZE};
use serde::Serialize;

use crate::cmd::PlanArgs;
use crate::exit::{protocol_error, CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat};

/// Data packets listed in full before the table collapses the middle.
const TABLE_ROWS: usize = 8;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PlannedPacket {
    pub packet_type: &'static str,
    pub index: u32,
    pub content_length: usize,
    pub frame_length: usize,
}

#[derive(Debug, Serialize)]
pub struct Plan {
    pub payload_size: u64,
    pub total_count: u32,
    pub wire_bytes: u64,
    pub packets: Vec<PlannedPacket>,
}

/// Packet layout `split` produces for a payload of `size` bytes.
pub fn layout(size: u64) -> Result<Plan, ProtocolError> {
    let too_large = || ProtocolError::PayloadTooLarge(usize::try_from(size).unwrap_or(usize::MAX));
    if size > u64::from(u32::MAX) {
        return Err(too_large());
    }

    let chunk = CONTENT_MAX_LEN as u64;
    let data_count = size.div_ceil(chunk);
    let total_count = u32::try_from(data_count + 2).map_err(|_| too_large())?;

    let mut packets = Vec::with_capacity(data_count as usize + 2);
    packets.push(PlannedPacket {
        packet_type: "HEAD",
        index: 1,
        content_length: 0,
        frame_length: MIN_FRAME_SIZE,
    });
    let mut remaining = size;
    for i in 0..data_count {
        let len = remaining.min(chunk) as usize;
        remaining -= len as u64;
        packets.push(PlannedPacket {
            packet_type: "DATA",
            index: i as u32 + 2,
            content_length: len,
            frame_length: MIN_FRAME_SIZE + len,
        });
    }
    packets.push(PlannedPacket {
        packet_type: "TAIL",
        index: total_count,
        content_length: DIGEST_LEN,
        frame_length: MIN_FRAME_SIZE + DIGEST_LEN,
    });

    let wire_bytes = packets.iter().map(|p| p.frame_length as u64).sum();
    Ok(Plan {
        payload_size: size,
        total_count,
        wire_bytes,
        packets,
    })
}

pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = layout(args.size).map_err(|err| protocol_error("plan failed", err))?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let last = plan.packets.len() - 1;
    for (i, packet) in plan.packets.iter().enumerate() {
        // keep HEAD, the first few DATA, the last DATA and TAIL
        if i > TABLE_ROWS && i + 1 < last {
            if i == TABLE_ROWS + 1 {
                rows.push(vec!["...".into(), String::new(), String::new(), String::new()]);
            }
            continue;
        }
        rows.push(vec![
            packet.packet_type.to_string(),
            packet.index.to_string(),
            packet.content_length.to_string(),
            packet.frame_length.to_string(),
        ]);
    }
    rows.push(vec![
        "TOTAL".into(),
        plan.total_count.to_string(),
        plan.payload_size.to_string(),
        plan.wire_bytes.to_string(),
    ]);

    print_rows(&plan, &["TYPE", "INDEX", "CONTENT", "FRAME"], rows, format);
    Ok(SUCCESS)
}
