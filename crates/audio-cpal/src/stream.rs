//! cpal streams driven from a dedicated owner thread
//!
//! cpal streams may not leave the thread that built them on every host, so
//! each [`CpalStream`] parks its native streams on an [`Owner`] thread. Full
//! duplex runs an input and an output stream joined by a
//! [`duplex`](crate::duplex) ring; the processor lives in the output callback.

use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, HostId, SampleFormat, SampleRate, StreamConfig, StreamInstant};

use unison_audio_core::{
    BackendFault, BackendResult, Direction, ErrorKind, Latency, NativeIo, NativeStream,
    NegotiatedFormat, Processor,
};

use crate::duplex;
use crate::host::{find_device, open_host};
use crate::owner::{Owner, Playback, Stragglers};

fn fault(kind: ErrorKind, message: impl Into<String>) -> BackendFault {
    BackendFault::classified(kind, message)
}

fn build_fault(err: cpal::BuildStreamError) -> BackendFault {
    let kind = match &err {
        cpal::BuildStreamError::DeviceNotAvailable => ErrorKind::DeviceNotFound,
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => ErrorKind::UnsupportedFormat,
        _ => ErrorKind::OpenError,
    };
    fault(kind, err.to_string())
}

/// Stream time relative to the first callback
#[derive(Default)]
struct Clock {
    origin: Option<StreamInstant>,
}

impl Clock {
    fn elapsed(&mut self, now: StreamInstant) -> Option<Duration> {
        let origin = *self.origin.get_or_insert(now);
        now.duration_since(&origin)
    }
}

/// Native streams owned by the stream thread; input is started first
struct Streams {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
}

impl Playback for Streams {
    fn play(&self) -> BackendResult<()> {
        for stream in self.input.iter().chain(&self.output) {
            stream.play().map_err(|e| {
                let kind = match e {
                    cpal::PlayStreamError::DeviceNotAvailable => ErrorKind::DeviceNotFound,
                    _ => ErrorKind::BackendError,
                };
                fault(kind, e.to_string())
            })?;
        }
        Ok(())
    }

    fn pause(&self) -> BackendResult<()> {
        for stream in self.output.iter().chain(&self.input) {
            stream.pause().map_err(|e| {
                let kind = match e {
                    cpal::PauseStreamError::DeviceNotAvailable => ErrorKind::DeviceNotFound,
                    _ => ErrorKind::BackendError,
                };
                fault(kind, e.to_string())
            })?;
        }
        Ok(())
    }
}

fn stream_config(format: &NegotiatedFormat, direction: Direction) -> BackendResult<StreamConfig> {
    let channels = u16::try_from(format.channels(direction))
        .map_err(|_| fault(ErrorKind::UnsupportedFormat, "too many channels"))?;
    Ok(StreamConfig {
        channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Fixed(format.buffer_frames),
    })
}

fn error_callback(device: &str) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let device = device.to_string();
    move |err| tracing::error!(device = %device, "Audio stream error: {}", err)
}

fn build(
    host: HostId,
    name: &str,
    format: &NegotiatedFormat,
    sample_format: SampleFormat,
    mut processor: Processor,
) -> BackendResult<Streams> {
    let host = open_host(host)?;
    let device = find_device(&host, name)?;
    let in_frame = format.frame_bytes(Direction::Input);
    let out_frame = format.frame_bytes(Direction::Output);

    if format.is_duplex() {
        return build_duplex(&device, name, format, sample_format, processor);
    }

    if in_frame > 0 {
        let mut clock = Clock::default();
        let input = device
            .build_input_stream_raw(
                &stream_config(format, Direction::Input)?,
                sample_format,
                move |data: &cpal::Data, info: &cpal::InputCallbackInfo| {
                    let bytes = data.bytes();
                    processor.process(NativeIo {
                        frames: bytes.len() / in_frame,
                        time: clock.elapsed(info.timestamp().callback),
                        input: Some(bytes),
                        output: None,
                    });
                },
                error_callback(name),
                None,
            )
            .map_err(build_fault)?;
        return Ok(Streams {
            input: Some(input),
            output: None,
        });
    }

    let mut clock = Clock::default();
    let output = device
        .build_output_stream_raw(
            &stream_config(format, Direction::Output)?,
            sample_format,
            move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
                let time = clock.elapsed(info.timestamp().callback);
                let bytes = data.bytes_mut();
                processor.process(NativeIo {
                    frames: bytes.len() / out_frame,
                    time,
                    input: None,
                    output: Some(bytes),
                });
            },
            error_callback(name),
            None,
        )
        .map_err(build_fault)?;
    Ok(Streams {
        input: None,
        output: Some(output),
    })
}

fn build_duplex(
    device: &cpal::Device,
    name: &str,
    format: &NegotiatedFormat,
    sample_format: SampleFormat,
    processor: Processor,
) -> BackendResult<Streams> {
    let (mut ring_in, mut ring_out) = duplex::bridge(processor);

    let input = device
        .build_input_stream_raw(
            &stream_config(format, Direction::Input)?,
            sample_format,
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| ring_in.push(data.bytes()),
            error_callback(name),
            None,
        )
        .map_err(build_fault)?;

    let mut clock = Clock::default();
    let output = device
        .build_output_stream_raw(
            &stream_config(format, Direction::Output)?,
            sample_format,
            move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
                let start = clock.elapsed(info.timestamp().callback);
                ring_out.render(data.bytes_mut(), start);
            },
            error_callback(name),
            None,
        )
        .map_err(build_fault)?;

    Ok(Streams {
        input: Some(input),
        output: Some(output),
    })
}

pub(crate) struct CpalStream {
    format: NegotiatedFormat,
    owner: Owner,
}

impl CpalStream {
    /// Builds the native streams on a new owner thread. A build slower than
    /// `timeout` leaves its thread in `stragglers`.
    pub(crate) fn open(
        host: HostId,
        device: &str,
        format: NegotiatedFormat,
        sample_format: SampleFormat,
        processor: Processor,
        timeout: Duration,
        stragglers: &mut Stragglers,
    ) -> BackendResult<Self> {
        let name = device.to_string();
        let owner = Owner::spawn(
            &format!("cpal-{device}"),
            timeout,
            move || build(host, &name, &format, sample_format, processor),
            stragglers,
        )?;
        Ok(Self { format, owner })
    }
}

impl NativeStream for CpalStream {
    fn start(&mut self) -> BackendResult<()> {
        self.owner.play()
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.owner.pause()
    }

    fn latency(&self) -> BackendResult<Latency> {
        let period = self.format.buffer_frames;
        let has = |direction| self.format.channels(direction) > 0;
        Ok(Latency {
            input_frames: if has(Direction::Input) { period } else { 0 },
            output_frames: match (has(Direction::Input), has(Direction::Output)) {
                (true, true) => period * 2,
                (false, true) => period,
                _ => 0,
            },
        })
    }
}
