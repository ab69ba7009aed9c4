//! Wall-clock helpers. The wire header truncates milliseconds to 32
//! bits, so callers that need the full value (latency accounting) use
//! [`now_us`] and only truncate right before encoding a packet.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_micros() as u64
}

pub fn now_ms() -> u64 {
    now_us() / 1_000
}

/// Truncates to the low 32 bits for the wire header field.
pub fn now_ms_truncated() -> u32 {
    now_ms() as u32
}
