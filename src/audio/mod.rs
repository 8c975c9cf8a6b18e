//! Audio subsystem module
//!
//! The streaming core only sees blocking PCM sources and sinks. Devices open
//! them at the fixed stream format; dropping a source or sink releases it.

pub mod alert;
pub mod capture;
pub mod convert;
pub mod device;
pub mod playback;
pub mod synthetic;

pub use alert::{AlertSound, SilentAlert, ToneAlert};
pub use capture::CpalCaptureDevice;
pub use device::{list_devices, AudioDeviceInfo};
pub use playback::CpalPlaybackDevice;
pub use synthetic::{ChannelCapture, RecordingPlayback, ToneCapture};

use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;

/// Sample rate and channel layout of a PCM stream (samples are always i16)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Format shared by monitor and listener
    pub const STREAM: AudioFormat = AudioFormat {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
    };

    /// Duration of `samples` interleaved samples in this format
    pub fn duration_of(&self, samples: usize) -> std::time::Duration {
        let frames = samples as u64 / self.channels.max(1) as u64;
        std::time::Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }
}

/// Blocking source of captured samples
pub trait PcmSource: Send {
    /// Fill `buf` with up to `buf.len()` samples, returning how many were written.
    /// Zero means nothing arrived yet; the caller should just read again.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError>;
}

/// Blocking sink for samples to play
pub trait PcmSink: Send {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError>;
}

/// Something that can open a capture stream
pub trait CaptureDevice: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn PcmSource>, AudioError>;
}

/// Something that can open a playback stream
pub trait PlaybackDevice: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn PcmSink>, AudioError>;
}
