//! Sample format conversion between device streams and the wire format

use cpal::{FromSample, Sample};

/// Average interleaved frames down to mono i16
pub fn downmix_to_mono<T>(data: &[T], channels: usize) -> Vec<i16>
where
    T: Sample,
    i16: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| i16::from_sample(s)).collect();
    }

    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i16::from_sample(s) as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Streaming linear-interpolation resampler for mono i16
///
/// Keeps the last input sample and the fractional read position between
/// calls so chunk boundaries do not click.
pub struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Read position; 0 is `previous`, 1 is the first sample of the next input
    position: f64,
    previous: i16,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            position: 1.0,
            previous: 0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        let len = input.len();
        let mut output = Vec::with_capacity((len as f64 / self.step) as usize + 1);
        let sample_at = |index: usize, previous: i16| {
            if index == 0 {
                previous
            } else {
                input[index - 1]
            }
        };

        while self.position < len as f64 {
            let index = self.position.floor() as usize;
            let frac = self.position - index as f64;
            let a = sample_at(index, self.previous) as f64;
            let b = sample_at(index + 1, self.previous) as f64;
            output.push((a + (b - a) * frac).round() as i16);
            self.position += self.step;
        }

        self.position -= len as f64;
        if let Some(&last) = input.last() {
            self.previous = last;
        }
        output
    }
}
