use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies every packet of one logical message.
///
/// Generated ids are 16 ASCII digits: a 13-digit UTC millisecond timestamp
/// followed by a 3-digit per-millisecond sequence number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId(pub [u8; 16]);

const TIMESTAMP_MODULUS: u64 = 10_000_000_000_000;
const MAX_SEQUENCE: u16 = 999;

struct IdState {
    last_ms: u64,
    sequence: u16,
}

static GENERATOR: Mutex<IdState> = Mutex::new(IdState {
    last_ms: 0,
    sequence: 0,
});

impl MessageId {
    /// Generate a fresh, process-wide unique id.
    pub fn generate() -> Self {
        let mut state = GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = now_millis();

        if now <= state.last_ms {
            // Same millisecond or clock stepped back: stamps never go backwards.
            now = state.last_ms;
            if state.sequence >= MAX_SEQUENCE {
                now += 1;
                state.sequence = 0;
            } else {
                state.sequence += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        Self::from_parts(now, state.sequence)
    }

    /// Build an id from a millisecond timestamp and sequence number.
    pub fn from_parts(millis: u64, sequence: u16) -> Self {
        let text = format!(
            "{:013}{:03}",
            millis % TIMESTAMP_MODULUS,
            sequence.min(MAX_SEQUENCE)
        );
        let mut id = [0u8; 16];
        id.copy_from_slice(text.as_bytes());
        Self(id)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for MessageId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(u8::is_ascii_graphic) {
            // ascii_graphic guarantees valid UTF-8
            f.write_str(std::str::from_utf8(&self.0).map_err(|_| fmt::Error)?)
        } else {
            for byte in &self.0 {
                write!(f, "{byte:02x}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_are_sixteen_digits() {
        let id = MessageId::generate();
        assert_eq!(id.as_bytes().len(), 16);
        assert!(id.as_bytes().iter().all(u8::is_ascii_digit));
    }

    #[test]
    fn generated_ids_are_unique_and_increasing() {
        let ids: Vec<MessageId> = (0..2_500).map(|_| MessageId::generate()).collect();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn exhausted_sequence_runs_ahead_of_a_stepped_back_clock() {
        let ahead = now_millis() + 3_000;
        {
            let mut state = GENERATOR.lock().unwrap();
            // Other tests may have pushed the stamp further already.
            state.last_ms = state.last_ms.max(ahead);
            state.sequence = MAX_SEQUENCE;
        }

        let started = std::time::Instant::now();
        let id = MessageId::generate();
        assert!(started.elapsed() < std::time::Duration::from_millis(100));

        let stamp: u64 = id.to_string()[..13].parse().unwrap();
        assert!(stamp > ahead);
    }

    #[test]
    fn from_parts_layout() {
        let id = MessageId::from_parts(1_693_567_201_456, 7);
        assert_eq!(id.to_string(), "1693567201456007");
    }

    #[test]
    fn non_ascii_ids_display_as_hex() {
        let id = MessageId([0xFF; 16]);
        assert_eq!(id.to_string(), "ff".repeat(16));
    }
}
