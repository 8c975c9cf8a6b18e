//! Audio codec boundary
//!
//! Both ends agree on the codec out of band; the wire carries no negotiation.

pub mod mulaw;

pub use mulaw::MuLawCodec;

use bytes::Bytes;

/// Transform between PCM samples and the wire encoding
///
/// Every byte string is a valid stream, so neither direction can fail.
pub trait AudioCodec: Send {
    /// Encode a chunk of signed 16-bit mono samples
    fn encode(&mut self, pcm: &[i16]) -> Bytes;

    /// Decode `data` into `out` (cleared first), returning the sample count
    fn decode(&mut self, data: &[u8], out: &mut Vec<i16>) -> usize;
}

/// The codec both sides of the stream use
pub fn stream_codec() -> Box<dyn AudioCodec> {
    Box::new(MuLawCodec::new())
}

/// Codec statistics
#[derive(Debug, Clone, Default)]
pub struct CodecStats {
    pub chunks_encoded: u64,
    pub chunks_decoded: u64,
    pub bytes_produced: u64,
    pub samples_produced: u64,
}
