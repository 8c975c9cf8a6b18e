//! Non-hardware sources and sinks
//!
//! A paced test tone for running the monitor without a microphone, a capture
//! fed through a channel, and a playback that records what it was given.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioFormat, CaptureDevice, PcmSink, PcmSource, PlaybackDevice};
use crate::error::AudioError;

/// Sine tone paced to real time
pub struct ToneCapture {
    frequency: f32,
    amplitude: f32,
}

impl ToneCapture {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl Default for ToneCapture {
    fn default() -> Self {
        Self::new(440.0, 0.3)
    }
}

impl CaptureDevice for ToneCapture {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn PcmSource>, AudioError> {
        Ok(Box::new(ToneSource {
            format,
            step: self.frequency * std::f32::consts::TAU / format.sample_rate as f32,
            amplitude: self.amplitude * i16::MAX as f32,
            phase: 0.0,
            started: Instant::now(),
            produced: 0,
        }))
    }
}

struct ToneSource {
    format: AudioFormat,
    step: f32,
    amplitude: f32,
    phase: f32,
    started: Instant,
    produced: usize,
}

impl PcmSource for ToneSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        for frame in buf.chunks_mut(self.format.channels.max(1) as usize) {
            let value = (self.phase.sin() * self.amplitude) as i16;
            frame.fill(value);
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
        self.produced += buf.len();

        // Block like a device would until this chunk's worth of time has passed
        let due = self.format.duration_of(self.produced);
        let elapsed = self.started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
        Ok(buf.len())
    }
}

/// Capture whose samples are pushed through a channel
///
/// Each pushed chunk is returned by its own `read` calls, never merged with
/// the next one. Dropping every sender makes reads fail with `Closed`.
#[derive(Clone)]
pub struct ChannelCapture {
    chunks: Receiver<Vec<i16>>,
    wait: Duration,
}

impl ChannelCapture {
    pub fn new() -> (Self, Sender<Vec<i16>>) {
        let (tx, rx) = unbounded();
        (
            Self {
                chunks: rx,
                wait: Duration::from_millis(50),
            },
            tx,
        )
    }
}

impl CaptureDevice for ChannelCapture {
    fn open(&self, _format: AudioFormat) -> Result<Box<dyn PcmSource>, AudioError> {
        Ok(Box::new(ChannelSource {
            chunks: self.chunks.clone(),
            wait: self.wait,
            pending: VecDeque::new(),
        }))
    }
}

struct ChannelSource {
    chunks: Receiver<Vec<i16>>,
    wait: Duration,
    pending: VecDeque<i16>,
}

impl PcmSource for ChannelSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        if self.pending.is_empty() {
            match self.chunks.recv_timeout(self.wait) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Closed),
            }
        }

        let count = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }
}

/// Playback that keeps every written sample
#[derive(Clone, Default)]
pub struct RecordingPlayback {
    samples: Arc<Mutex<Vec<i16>>>,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.samples.lock().clone()
    }
}

impl PlaybackDevice for RecordingPlayback {
    fn open(&self, _format: AudioFormat) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(RecordingSink {
            samples: self.samples.clone(),
        }))
    }
}

struct RecordingSink {
    samples: Arc<Mutex<Vec<i16>>>,
}

impl PcmSink for RecordingSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        self.samples.lock().extend_from_slice(samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_capture_keeps_chunks_apart() {
        let (capture, feed) = ChannelCapture::new();
        let mut source = capture.open(AudioFormat::STREAM).unwrap();

        feed.send(vec![1, 2, 3]).unwrap();
        feed.send(vec![4, 5]).unwrap();

        let mut buf = [0i16; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);

        // Nothing queued: times out with zero
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        drop(feed);
        assert!(matches!(source.read(&mut buf), Err(AudioError::Closed)));
    }

    #[test]
    fn test_tone_is_paced() {
        let mut source = ToneCapture::default().open(AudioFormat::STREAM).unwrap();
        let mut buf = vec![0i16; 1103];

        let start = Instant::now();
        for _ in 0..2 {
            assert_eq!(source.read(&mut buf).unwrap(), buf.len());
        }
        // Two reads of ~100 ms each
        assert!(start.elapsed() >= Duration::from_millis(180));
        assert!(buf.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_recording_playback() {
        let playback = RecordingPlayback::new();
        let mut sink = playback.open(AudioFormat::STREAM).unwrap();
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        assert_eq!(playback.samples(), vec![1, 2, 3]);
    }
}
