//! Incremental framing of the streaming wire protocol.
//!
//! Records are `magic (4 bytes) | payload length (u32 BE) | payload`. `DATA`
//! records carry a format descriptor followed by interleaved PCM; `INFO`
//! records carry a status code and an ASCII message. Transports deliver bytes
//! in arbitrary slices, so the reader buffers partial records and yields only
//! complete ones. Unknown magics are skipped, not fatal.

use super::StreamFormat;
use tracing::debug;

pub const DATA_MAGIC: [u8; 4] = *b"DATA";
pub const INFO_MAGIC: [u8; 4] = *b"INFO";

const HEADER_LEN: usize = 8;
/// Format descriptor bytes at the head of a `DATA` payload: sample rate
/// (u32 LE), channel count (u8), bit depth (u8), reserved (u16 LE).
const DATA_PREFIX_LEN: usize = 8;
const INFO_PREFIX_LEN: usize = 4;

/// One complete wire record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// A chunk of interleaved PCM with its declared format.
    Data { format: StreamFormat, pcm: &'a [u8] },
    /// Out-of-band status: code `0` is informational, anything else reports
    /// an error terminating the stream.
    Info { code: u32, message: String },
}

/// Accumulates transport deliveries and yields complete records.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: Vec<u8>,
    pos: usize,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer another transport delivery. Consumed bytes from earlier records
    /// are compacted away here, so cost stays proportional to the delivery.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed by a complete record.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Next complete record, or `None` until more bytes arrive.
    pub fn next_record(&mut self) -> Option<Record<'_>> {
        loop {
            let head = self.pos;
            if self.buf.len() - head < HEADER_LEN {
                return None;
            }

            let magic = [
                self.buf[head],
                self.buf[head + 1],
                self.buf[head + 2],
                self.buf[head + 3],
            ];
            let len = u32::from_be_bytes([
                self.buf[head + 4],
                self.buf[head + 5],
                self.buf[head + 6],
                self.buf[head + 7],
            ]) as usize;
            if self.buf.len() - head < HEADER_LEN + len {
                return None;
            }

            let payload_start = head + HEADER_LEN;
            self.pos = payload_start + len;

            match magic {
                DATA_MAGIC => {
                    if len < DATA_PREFIX_LEN {
                        debug!(len, "truncated DATA record skipped");
                        continue;
                    }
                    let p = payload_start;
                    let format = StreamFormat {
                        sample_rate: u32::from_le_bytes([
                            self.buf[p],
                            self.buf[p + 1],
                            self.buf[p + 2],
                            self.buf[p + 3],
                        ]),
                        channels: self.buf[p + 4],
                        bits: self.buf[p + 5],
                    };
                    let pcm = &self.buf[p + DATA_PREFIX_LEN..self.pos];
                    return Some(Record::Data { format, pcm });
                }
                INFO_MAGIC => {
                    if len < INFO_PREFIX_LEN {
                        debug!(len, "truncated INFO record skipped");
                        continue;
                    }
                    let p = payload_start;
                    let code = u32::from_le_bytes([
                        self.buf[p],
                        self.buf[p + 1],
                        self.buf[p + 2],
                        self.buf[p + 3],
                    ]);
                    let message =
                        String::from_utf8_lossy(&self.buf[p + INFO_PREFIX_LEN..self.pos])
                            .into_owned();
                    return Some(Record::Info { code, message });
                }
                other => {
                    debug!(magic = ?other, len, "unknown wire record skipped");
                    continue;
                }
            }
        }
    }
}

/// Frame a `DATA` record from a format and raw PCM payload.
pub fn encode_data(format: StreamFormat, pcm: &[u8]) -> Vec<u8> {
    let len = DATA_PREFIX_LEN + pcm.len();
    let mut out = Vec::with_capacity(HEADER_LEN + len);
    out.extend_from_slice(&DATA_MAGIC);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.push(format.channels);
    out.push(format.bits);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Frame an `INFO` record from a status code and message.
pub fn encode_info(code: u32, message: &str) -> Vec<u8> {
    let len = INFO_PREFIX_LEN + message.len();
    let mut out = Vec::with_capacity(HEADER_LEN + len);
    out.extend_from_slice(&INFO_MAGIC);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}
