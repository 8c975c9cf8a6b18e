//! Audible alert played when the listener gives up

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::{AudioFormat, PlaybackDevice};

/// Fire-and-forget alert sound
pub trait AlertSound: Send + Sync {
    fn play(&self);
}

/// Three short beeps climbing by fifths
pub struct ToneAlert {
    device: Arc<dyn PlaybackDevice>,
}

const BEEP_FREQUENCIES: [f32; 3] = [440.0, 660.0, 990.0];
const BEEP_LENGTH: Duration = Duration::from_millis(150);
const BEEP_GAP: Duration = Duration::from_millis(50);
const BEEP_AMPLITUDE: f32 = 0.4;

impl ToneAlert {
    pub fn new(device: Arc<dyn PlaybackDevice>) -> Self {
        Self { device }
    }

    /// PCM for the whole alert in `format`'s rate, mono
    pub fn render(format: AudioFormat) -> Vec<i16> {
        let rate = format.sample_rate as f32;
        let beep_samples = (rate * BEEP_LENGTH.as_secs_f32()) as usize;
        let gap_samples = (rate * BEEP_GAP.as_secs_f32()) as usize;
        let amplitude = BEEP_AMPLITUDE * i16::MAX as f32;

        let mut samples = Vec::with_capacity(BEEP_FREQUENCIES.len() * (beep_samples + gap_samples));
        for frequency in BEEP_FREQUENCIES {
            let step = frequency * std::f32::consts::TAU / rate;
            for i in 0..beep_samples {
                // Short linear fade at both ends avoids clicks
                let edge = (i.min(beep_samples - i) as f32 / 64.0).min(1.0);
                samples.push(((i as f32 * step).sin() * amplitude * edge) as i16);
            }
            samples.extend(std::iter::repeat(0).take(gap_samples));
        }
        samples
    }
}

impl AlertSound for ToneAlert {
    fn play(&self) {
        let device = self.device.clone();
        let spawned = thread::Builder::new()
            .name("listen-alert".to_string())
            .spawn(move || {
                let format = AudioFormat::STREAM;
                let samples = Self::render(format);
                match device.open(format) {
                    Ok(mut sink) => {
                        if let Err(e) = sink.write(&samples) {
                            tracing::error!("Failed to play alert sound: {}", e);
                            return;
                        }
                        tracing::info!("Playing alert sound");
                        // Keep the sink open until the queued audio has drained
                        thread::sleep(format.duration_of(samples.len()) + Duration::from_millis(100));
                    }
                    Err(e) => tracing::error!("Failed to play alert sound: {}", e),
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to start alert thread: {}", e);
        }
    }
}

/// Alert that only logs, for hosts without an output device
pub struct SilentAlert;

impl AlertSound for SilentAlert {
    fn play(&self) {
        tracing::warn!("Alert requested (silent)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingPlayback;
    use std::time::Instant;

    #[test]
    fn test_render_length() {
        let samples = ToneAlert::render(AudioFormat::STREAM);
        let expected = 3 * ((11025.0 * 0.15) as usize + (11025.0 * 0.05) as usize);
        assert_eq!(samples.len(), expected);
        assert!(samples.iter().any(|&s| s.unsigned_abs() > 10_000));
    }

    #[test]
    fn test_play_writes_to_device() {
        let playback = RecordingPlayback::new();
        let alert = ToneAlert::new(Arc::new(playback.clone()));
        alert.play();

        let deadline = Instant::now() + Duration::from_secs(2);
        while playback.samples().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(playback.samples().len(), ToneAlert::render(AudioFormat::STREAM).len());
    }
}
