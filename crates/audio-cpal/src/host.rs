//! Probing, sessions and enumeration over cpal hosts

use std::collections::HashMap;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{HostId, SampleFormat, SupportedBufferSize, SupportedStreamConfigRange};

use unison_audio_core::{
    Backend, BackendFault, BackendResult, ErrorKind, Mix, NativeCode, NativeDevice, NativeError,
    NativeStream, NegotiatedFormat, Processor, SampleEncoding, ServiceCaps, Session,
    SessionConfig, System, SystemInfo,
};

use crate::config::{summarize, unique_id, ConfigRange};
use crate::owner::Stragglers;
use crate::stream::CpalStream;
use crate::{CpalBackend, Platform, SERVICE_CAPS};

pub(crate) fn encoding(format: SampleFormat) -> Option<SampleEncoding> {
    match format {
        SampleFormat::U8 => Some(SampleEncoding::UInt8),
        SampleFormat::I16 => Some(SampleEncoding::Int16),
        SampleFormat::I32 => Some(SampleEncoding::Int32),
        SampleFormat::F32 => Some(SampleEncoding::Float32),
        _ => None,
    }
}

pub(crate) fn sample_format(encoding: SampleEncoding) -> Option<SampleFormat> {
    match encoding {
        SampleEncoding::UInt8 => Some(SampleFormat::U8),
        SampleEncoding::Int16 => Some(SampleFormat::I16),
        SampleEncoding::Int32 => Some(SampleFormat::I32),
        SampleEncoding::Float32 => Some(SampleFormat::F32),
        SampleEncoding::Int24 => None,
    }
}

fn config_range(range: &SupportedStreamConfigRange) -> ConfigRange {
    let buffer_frames = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } => Some((*min, *max)),
        SupportedBufferSize::Unknown => None,
    };

    ConfigRange {
        channels: range.channels(),
        min_rate: range.min_sample_rate().0,
        max_rate: range.max_sample_rate().0,
        encoding: encoding(range.sample_format()),
        buffer_frames,
    }
}

/// The device's default config, output side first
fn preferred_mix(device: &cpal::Device) -> Option<Mix> {
    device
        .default_output_config()
        .or_else(|_| device.default_input_config())
        .ok()
        .and_then(|config| {
            let encoding = encoding(config.sample_format())?;
            Some(Mix::new(config.sample_rate().0, encoding))
        })
}

fn host_id(name: &str) -> Option<HostId> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| id.name() == name)
}

pub(crate) fn open_host(id: HostId) -> BackendResult<cpal::Host> {
    cpal::host_from_id(id).map_err(|e| {
        BackendFault::classified(ErrorKind::BackendError, format!("{}: {e}", id.name()))
    })
}

/// Finds a device by the id [`CpalSession::enumerate_devices`] gave it
pub(crate) fn find_device(host: &cpal::Host, id: &str) -> BackendResult<cpal::Device> {
    let devices = host
        .devices()
        .map_err(|e| BackendFault::classified(ErrorKind::BackendError, e.to_string()))?;

    let mut seen = HashMap::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        if unique_id(&name, &mut seen) == id {
            return Ok(device);
        }
    }

    Err(BackendFault::classified(
        ErrorKind::DeviceNotFound,
        format!("device {id} is no longer present"),
    ))
}

impl<P: Platform> Backend for CpalBackend<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> BackendResult<Vec<SystemInfo>> {
        let available = cpal::available_hosts();
        let systems: Vec<SystemInfo> = P::bindings()
            .iter()
            .filter(|binding| available.iter().any(|id| id.name() == binding.host))
            .map(|binding| SystemInfo::new(binding.system.clone(), binding.setup))
            .collect();

        tracing::debug!(backend = %self.name, count = systems.len(), "Probed cpal hosts");
        Ok(systems)
    }

    fn connect(&self, system: &System, config: &SessionConfig) -> BackendResult<Box<dyn Session>> {
        let binding = P::binding(system).ok_or_else(|| {
            BackendFault::classified(
                ErrorKind::UnknownSystem,
                format!("{system} not served by {}", self.name),
            )
        })?;
        let host = host_id(binding.host).ok_or_else(|| {
            BackendFault::classified(
                ErrorKind::BackendError,
                format!("host {} is not available", binding.host),
            )
        })?;
        open_host(host)?;

        Ok(Box::new(CpalSession {
            host,
            start_timeout: config.start_timeout,
            stragglers: Stragglers::default(),
        }))
    }

    fn translate_error(&self, system: &System, code: NativeCode) -> NativeError {
        P::translate(system, code)
    }
}

struct CpalSession {
    host: HostId,
    start_timeout: Duration,
    /// Owner threads of timed-out opens, joined when the session goes away
    stragglers: Stragglers,
}

impl CpalSession {
    fn describe(
        device: &cpal::Device,
        seen: &mut HashMap<String, usize>,
        defaults: &(Option<String>, Option<String>),
    ) -> BackendResult<NativeDevice> {
        let name = device
            .name()
            .map_err(|e| BackendFault::classified(ErrorKind::BackendError, e.to_string()))?;
        let id = unique_id(&name, seen);

        // Hosts without a direction report an error instead of an empty set
        let inputs: Vec<ConfigRange> = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| config_range(&c)).collect())
            .unwrap_or_default();
        let outputs: Vec<ConfigRange> = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| config_range(&c)).collect())
            .unwrap_or_default();

        Ok(NativeDevice {
            default_input: id == name && defaults.0.as_deref() == Some(name.as_str()),
            default_output: id == name && defaults.1.as_deref() == Some(name.as_str()),
            mix: preferred_mix(device),
            // cpal has no channel names; the core numbers them
            input_names: Vec::new(),
            output_names: Vec::new(),
            capabilities: summarize(&inputs, &outputs),
            id,
            name,
        })
    }
}

impl Session for CpalSession {
    fn capabilities(&self) -> ServiceCaps {
        SERVICE_CAPS
    }

    fn enumerate_devices(&mut self) -> BackendResult<Vec<BackendResult<NativeDevice>>> {
        let host = open_host(self.host)?;
        let defaults = (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.default_output_device().and_then(|d| d.name().ok()),
        );
        let devices = host
            .devices()
            .map_err(|e| BackendFault::classified(ErrorKind::EnumerationError, e.to_string()))?;

        let mut seen = HashMap::new();
        Ok(devices
            .map(|device| Self::describe(&device, &mut seen, &defaults))
            .collect())
    }

    fn open_stream(
        &mut self,
        device: &str,
        format: &NegotiatedFormat,
        processor: Processor,
    ) -> BackendResult<Box<dyn NativeStream>> {
        let offset = [format.input_mask, format.output_mask]
            .iter()
            .any(|mask| !mask.is_empty() && !mask.contains(0));
        if offset {
            return Err(BackendFault::classified(
                ErrorKind::UnsupportedFormat,
                "channels must start at the first device channel",
            ));
        }
        let sample_format = sample_format(format.encoding).ok_or_else(|| {
            BackendFault::classified(
                ErrorKind::UnsupportedFormat,
                format!("{} has no cpal sample format", format.encoding),
            )
        })?;

        self.stragglers.reap();
        let stream = CpalStream::open(
            self.host,
            device,
            *format,
            sample_format,
            processor,
            self.start_timeout,
            &mut self.stragglers,
        )?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_mapping() {
        for encoding in SampleEncoding::ALL {
            match sample_format(encoding) {
                Some(format) => assert_eq!(super::encoding(format), Some(encoding)),
                None => assert_eq!(encoding, SampleEncoding::Int24),
            }
        }
        assert_eq!(super::encoding(SampleFormat::F64), None);
    }
}
