//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Device description for listings and the status API
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    /// `input:<name>` or `output:<name>`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [8000u32, 11025, 16000, 22050, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Input device by id (`input:<name>` or a bare name), or the default input
pub fn find_input_device(id: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match id {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(id) => {
            let name = id.strip_prefix("input:").unwrap_or(id);
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name).ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
        }
    }
}

/// Output device by id (`output:<name>` or a bare name), or the default output
pub fn find_output_device(id: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match id {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(id) => {
            let name = id.strip_prefix("output:").unwrap_or(id);
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name).ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
        }
    }
}

fn find_by_name(mut devices: impl Iterator<Item = cpal::Device>, name: &str) -> Option<cpal::Device> {
    devices.find(|device| device.name().map(|n| n == name).unwrap_or(false))
}
