//! CRC-32 (IEEE, reflected polynomial 0xEDB88320) over byte ranges.

/// Size of the CRC trailer in bytes.
pub const CRC_SIZE: usize = 4;

/// Compute the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Split a frame into body and little-endian CRC trailer.
///
/// Returns `(embedded, computed)`; `None` when the frame is shorter than
/// the trailer.
pub fn check_trailer(frame: &[u8]) -> Option<(u32, u32)> {
    if frame.len() < CRC_SIZE {
        return None;
    }
    let (body, trailer) = frame.split_at(frame.len() - CRC_SIZE);
    let embedded = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Some((embedded, crc32(body)))
}
