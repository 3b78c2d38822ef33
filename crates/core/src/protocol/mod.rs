//! Wire protocol for the relay connection
//!
//! Packets are JSON text, one per length-prefixed frame.

pub mod framing;
pub mod packet;

pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use packet::{MessageBody, Packet};

/// Current wall-clock time in milliseconds, as carried in packet `time`
/// fields and message history keys.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
