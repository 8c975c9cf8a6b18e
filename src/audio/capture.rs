//! Microphone capture through cpal
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host). Its callback converts to the stream format and hands chunks to the
//! blocking reader through a bounded channel.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::convert::{downmix_to_mono, LinearResampler};
use crate::audio::device::find_input_device;
use crate::audio::{AudioFormat, CaptureDevice, PcmSource};
use crate::error::AudioError;

/// How long `read` waits for the callback before returning zero
const READ_WAIT: Duration = Duration::from_millis(100);

/// Callback chunks buffered between the device and the reader
const CHUNK_QUEUE_DEPTH: usize = 64;

/// Capture from the default or a named input device
pub struct CpalCaptureDevice {
    device_id: Option<String>,
}

impl CpalCaptureDevice {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn PcmSource>, AudioError> {
        Ok(Box::new(CpalSource::start(self.device_id.clone(), format)?))
    }
}

/// Running capture stream
pub struct CpalSource {
    chunks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSource {
    fn start(device_id: Option<String>, format: AudioFormat) -> Result<Self, AudioError> {
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CHUNK_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("monitor-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(device_id.as_deref(), format, chunk_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut source = Self {
            chunks: chunk_rx,
            pending: VecDeque::new(),
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(source),
            Ok(Err(e)) => {
                source.stop();
                Err(e)
            }
            Err(_) => {
                source.stop();
                Err(AudioError::StreamError("capture thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl PcmSource for CpalSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        if self.pending.is_empty() {
            match self.chunks.recv_timeout(READ_WAIT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Closed),
            }
        }
        // Take whatever else is already queued, without waiting
        while self.pending.len() < buf.len() {
            match self.chunks.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }

        let count = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_id: Option<&str>,
    format: AudioFormat,
    chunk_tx: Sender<Vec<i16>>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_input_device(device_id)?;
    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    let sample_format = default_config.sample_format();
    let config: StreamConfig = default_config.into();

    tracing::info!(
        "Capturing from {} at {} Hz, {} channel(s), {:?} -> {} Hz mono",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        sample_format,
        format.sample_rate
    );

    match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, format, chunk_tx),
        SampleFormat::F64 => build_input::<f64>(&device, &config, format, chunk_tx),
        SampleFormat::I16 => build_input::<i16>(&device, &config, format, chunk_tx),
        SampleFormat::I32 => build_input::<i32>(&device, &config, format, chunk_tx),
        SampleFormat::U16 => build_input::<u16>(&device, &config, format, chunk_tx),
        SampleFormat::U8 => build_input::<u8>(&device, &config, format, chunk_tx),
        SampleFormat::I8 => build_input::<i8>(&device, &config, format, chunk_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: AudioFormat,
    chunk_tx: Sender<Vec<i16>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut resampler = LinearResampler::new(config.sample_rate.0, format.sample_rate);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let chunk = resampler.process(&mono);
                if !chunk.is_empty() {
                    // Full queue means the reader stalled; drop rather than block the callback
                    let _ = chunk_tx.try_send(chunk);
                }
            },
            |err| {
                tracing::error!("Capture stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
