//! Speaker playback through cpal
//!
//! `write` resamples to the device rate and queues; the output callback
//! drains the queue and plays silence when it runs dry.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::convert::LinearResampler;
use crate::audio::device::find_output_device;
use crate::audio::{AudioFormat, PcmSink, PlaybackDevice};
use crate::error::AudioError;

type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

/// Play on the default or a named output device
pub struct CpalPlaybackDevice {
    device_id: Option<String>,
}

impl CpalPlaybackDevice {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(CpalSink::start(self.device_id.clone(), format)?))
    }
}

/// Running playback stream
pub struct CpalSink {
    queue: SampleQueue,
    resampler: LinearResampler,
    /// Queue bound in device samples; older audio is dropped past this
    max_queued: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSink {
    fn start(device_id: Option<String>, format: AudioFormat) -> Result<Self, AudioError> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = bounded::<Result<u32, AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let queue_for_stream = queue.clone();

        let handle = thread::Builder::new()
            .name("listen-playback".to_string())
            .spawn(move || {
                let (stream, device_rate) = match build_stream(device_id.as_deref(), queue_for_stream) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(device_rate));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut sink = Self {
            queue,
            resampler: LinearResampler::new(format.sample_rate, format.sample_rate),
            max_queued: format.sample_rate as usize,
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(device_rate)) => {
                sink.resampler = LinearResampler::new(format.sample_rate, device_rate);
                sink.max_queued = device_rate as usize;
                Ok(sink)
            }
            Ok(Err(e)) => {
                sink.stop();
                Err(e)
            }
            Err(_) => {
                sink.stop();
                Err(AudioError::StreamError("playback thread exited".to_string()))
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

impl PcmSink for CpalSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::Closed);
        }
        let resampled = self.resampler.process(samples);

        let mut queue = self.queue.lock();
        queue.extend(resampled);
        let excess = queue.len().saturating_sub(self.max_queued);
        if excess > 0 {
            queue.drain(..excess);
        }
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(device_id: Option<&str>, queue: SampleQueue) -> Result<(cpal::Stream, u32), AudioError> {
    let device = find_output_device(device_id)?;
    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    let sample_format = default_config.sample_format();
    let config: StreamConfig = default_config.into();

    tracing::info!(
        "Playing on {} at {} Hz, {} channel(s), {:?}",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, queue),
        SampleFormat::F64 => build_output::<f64>(&device, &config, queue),
        SampleFormat::I16 => build_output::<i16>(&device, &config, queue),
        SampleFormat::I32 => build_output::<i32>(&device, &config, queue),
        SampleFormat::U16 => build_output::<u16>(&device, &config, queue),
        SampleFormat::U8 => build_output::<u8>(&device, &config, queue),
        SampleFormat::I8 => build_output::<i8>(&device, &config, queue),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }?;
    Ok((stream, config.sample_rate.0))
}

fn build_output<T>(device: &cpal::Device, config: &StreamConfig, queue: SampleQueue) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock();
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(queue.pop_front().unwrap_or(0));
                    for slot in frame.iter_mut() {
                        *slot = value;
                    }
                }
            },
            |err| {
                tracing::error!("Playback stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
