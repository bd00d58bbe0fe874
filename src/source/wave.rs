//! RIFF/WAVE container decoding for static sources.
//!
//! PCM-only (format tag 1) at 8, 16, or 24 bits. Anything else surfaces a
//! descriptive failure instead of a fault, and a failed load never disturbs
//! whatever the engine was analyzing before.

use super::clip::AudioClip;
use super::deinterleave;
use crate::error::EngineError;
use tracing::debug;

const RIFF_MAGIC: [u8; 4] = *b"RIFF";
const WAVE_MAGIC: [u8; 4] = *b"WAVE";
const FMT_CHUNK: [u8; 4] = *b"fmt ";
const DATA_CHUNK: [u8; 4] = *b"data";

const PCM_FORMAT_TAG: u16 = 1;
const MIN_SAMPLE_RATE: u32 = 1_000;

fn u16_le(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}

fn u32_le(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

/// Decode a WAV file into per-channel normalized samples.
pub fn decode(bytes: &[u8]) -> Result<AudioClip, EngineError> {
    let fail = |message: String| Err(EngineError::Format(message));

    if bytes.len() < 12 || bytes[..4] != RIFF_MAGIC {
        return fail("invalid RIFF header".into());
    }
    if bytes[8..12] != WAVE_MAGIC {
        return fail("invalid WAVE header".into());
    }

    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut bits = 0u16;
    let mut have_fmt = false;

    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let chunk: [u8; 4] = bytes[pos..pos + 4].try_into().expect("4-byte slice");
        let size = u32_le(bytes, pos + 4) as usize;
        pos += 8;
        if pos + size > bytes.len() {
            return fail("file is too short for its chunk table".into());
        }

        match chunk {
            FMT_CHUNK => {
                if size < 16 {
                    return fail("fmt chunk is too small".into());
                }
                let format_tag = u16_le(bytes, pos);
                if format_tag != PCM_FORMAT_TAG {
                    return fail(format!("unsupported WAV format tag {format_tag} (PCM only)"));
                }
                channels = u16_le(bytes, pos + 2);
                if channels < 1 {
                    return fail(format!("invalid channel count {channels}"));
                }
                sample_rate = u32_le(bytes, pos + 4);
                if sample_rate < MIN_SAMPLE_RATE {
                    return fail(format!("invalid sample rate {sample_rate} (>= 1 kHz)"));
                }
                bits = u16_le(bytes, pos + 14);
                if !matches!(bits, 8 | 16 | 24) {
                    return fail(format!("invalid bit depth {bits} (8, 16, 24 only)"));
                }
                have_fmt = true;
            }
            DATA_CHUNK => {
                // fmt must precede data.
                if !have_fmt {
                    return fail("data chunk before fmt chunk".into());
                }
                let frame = channels as usize * bits as usize / 8;
                let usable = size - size % frame;
                let data = deinterleave(&bytes[pos..pos + usable], channels as usize, bits as u8);
                debug!(
                    sample_rate,
                    channels,
                    bits,
                    samples = data[0].len(),
                    "decoded WAV clip"
                );
                return Ok(AudioClip::new(sample_rate, bits, data));
            }
            _ => {}
        }
        pos += size;
    }

    fail("no data chunk found".into())
}
