//! # SSE Stream Encoder
//!
//! Frames one message as one Server-Sent Events event: `data: <payload>\n\n`.
//!
//! A blank line ends an SSE event, so a payload containing `\n`, `\r\n` or `\r`
//! must not be written raw. Each line of the payload is emitted as its own
//! `data:` field instead; a compliant client joins consecutive `data:` fields
//! with `\n`, which restores the payload with normalized line endings and can
//! never observe a premature frame boundary.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::message::Message;

const DATA_PREFIX: &[u8] = b"data: ";
const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// # SSE Encoder
///
/// Pure, stateless encoder. Cheap to copy into every delivery task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SseEncoder;

impl SseEncoder {
    /// Encodes `message` into a single SSE frame.
    pub fn encode(&self, message: &Message) -> Bytes {
        self.encode_payload(&message.payload)
    }

    /// Encodes a raw payload into a single SSE frame.
    pub fn encode_payload(&self, payload: &str) -> Bytes {
        let lines = split_lines(payload);
        let mut buf = BytesMut::with_capacity(payload.len() + lines.len() * (DATA_PREFIX.len() + 1) + 1);

        for line in lines {
            buf.put_slice(DATA_PREFIX);
            buf.put_slice(line.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.freeze()
    }

    /// An SSE comment frame, ignored by clients, used to keep idle connections
    /// alive and to surface dead peers on write.
    pub fn keep_alive(&self) -> Bytes {
        Bytes::from_static(KEEP_ALIVE_FRAME)
    }
}

/// Splits on `\r\n`, `\n` and lone `\r`. Always yields at least one line.
fn split_lines(payload: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = payload.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&payload[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&payload[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    lines.push(&payload[start..]);
    lines
}
