//! G.711 mu-law codec
//!
//! One byte per sample, stateless, so a stream can be decoded starting at
//! any byte boundary. That is what lets the wire go without framing.

use bytes::Bytes;

use crate::codec::{AudioCodec, CodecStats};

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Compress one linear sample
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Expand one mu-law byte
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let value = !byte;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if value & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// mu-law codec with reusable buffers
pub struct MuLawCodec {
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    stats: CodecStats,
}

impl MuLawCodec {
    pub fn new() -> Self {
        Self {
            encode_buffer: Vec::with_capacity(crate::constants::CAPTURE_CHUNK_SAMPLES),
            stats: CodecStats::default(),
        }
    }

    pub fn stats(&self) -> &CodecStats {
        &self.stats
    }
}

impl Default for MuLawCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCodec for MuLawCodec {
    fn encode(&mut self, pcm: &[i16]) -> Bytes {
        self.encode_buffer.clear();
        self.encode_buffer
            .extend(pcm.iter().map(|&sample| linear_to_ulaw(sample)));

        self.stats.chunks_encoded += 1;
        self.stats.bytes_produced += self.encode_buffer.len() as u64;

        Bytes::copy_from_slice(&self.encode_buffer)
    }

    fn decode(&mut self, data: &[u8], out: &mut Vec<i16>) -> usize {
        out.clear();
        out.extend(data.iter().map(|&byte| ulaw_to_linear(byte)));

        self.stats.chunks_decoded += 1;
        self.stats.samples_produced += out.len() as u64;

        out.len()
    }
}
