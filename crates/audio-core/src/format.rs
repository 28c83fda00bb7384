//! Sample encodings, channel selections and format negotiation
//!
//! A [`FormatRequest`] is what the caller asks for; [`Capabilities`] is what a
//! device reports. [`negotiate`] checks one against the other and produces the
//! [`NegotiatedFormat`] a backend opens its stream with.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, ErrorKind, Result};
use crate::system::ServiceCaps;

/// Encoding of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    UInt8,
    Int16,
    Int24,
    Int32,
    Float32,
}

/// Properties of a [`SampleEncoding`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleAttributes {
    /// Size of one sample in bytes
    pub size: usize,
    pub is_float: bool,
    pub is_signed: bool,
    /// Number of native words making up one sample
    pub count: usize,
}

impl SampleEncoding {
    pub const ALL: [SampleEncoding; 5] = [
        SampleEncoding::UInt8,
        SampleEncoding::Int16,
        SampleEncoding::Int24,
        SampleEncoding::Int32,
        SampleEncoding::Float32,
    ];

    pub fn attributes(self) -> SampleAttributes {
        let size = match self {
            Self::UInt8 => 1,
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int32 | Self::Float32 => 4,
        };

        SampleAttributes {
            size,
            is_float: self == Self::Float32,
            is_signed: self != Self::UInt8,
            count: if self == Self::Int24 { 3 } else { 1 },
        }
    }

    pub fn size(self) -> usize {
        self.attributes().size
    }

    /// Byte pattern of silence for this encoding
    pub fn silence(self) -> u8 {
        match self {
            Self::UInt8 => 0x80,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UInt8 => "UInt8",
            Self::Int16 => "Int16",
            Self::Int24 => "Int24",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selection of device channels, one bit per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(pub u64);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);

    /// The first `count` channels of a device
    pub fn first(count: u32) -> Self {
        match count {
            0 => Self::NONE,
            64.. => Self(u64::MAX),
            n => Self((1u64 << n) - 1),
        }
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, channel: u32) -> bool {
        channel < 64 && self.0 & (1 << channel) != 0
    }

    /// Number of device channels spanned, i.e. highest selected channel + 1
    pub fn span(self) -> u32 {
        64 - self.0.leading_zeros()
    }

    /// Whether the mask selects exactly the first N channels
    pub fn is_contiguous(self) -> bool {
        self == Self::first(self.count())
    }

    pub fn channels(self) -> impl Iterator<Item = u32> {
        (0..64).filter(move |&c| self.contains(c))
    }
}

/// Inclusive range of channel counts a device accepts in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelRange {
    pub min: u16,
    pub max: u16,
}

impl ChannelRange {
    pub const NONE: ChannelRange = ChannelRange { min: 0, max: 0 };

    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn up_to(max: u16) -> Self {
        Self {
            min: max.min(1),
            max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max == 0
    }

    pub fn contains(&self, count: u32) -> bool {
        u32::from(self.min) <= count && count <= u32::from(self.max)
    }
}

/// Rate and encoding a device runs at when nothing else is asked of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mix {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
}

impl Mix {
    pub fn new(sample_rate: u32, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            encoding,
        }
    }
}

/// Buffer sizes in frames a device accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSizeRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl BufferSizeRange {
    /// Builds a range, swapping inverted bounds and pulling `default` inside
    pub fn new(min: u32, max: u32, default: u32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            default: default.max(min).min(max),
        }
    }

    /// Whether the bounds are ordered and enclose the default
    pub fn is_valid(&self) -> bool {
        self.min <= self.max && (self.min..=self.max).contains(&self.default)
    }

    /// Resolves a request: `0` picks the default, anything else is clamped
    pub fn resolve(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default
        } else {
            requested.max(self.min).min(self.max)
        }
    }
}

impl Default for BufferSizeRange {
    fn default() -> Self {
        Self::new(64, 8192, 512)
    }
}

/// Buffer layouts a device can hand over natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub interleaved: bool,
    pub non_interleaved: bool,
}

impl Access {
    pub const INTERLEAVED: Access = Access {
        interleaved: true,
        non_interleaved: false,
    };
    pub const BOTH: Access = Access {
        interleaved: true,
        non_interleaved: true,
    };

    pub fn supports(&self, interleaved: bool) -> bool {
        if interleaved {
            self.interleaved
        } else {
            self.non_interleaved
        }
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::INTERLEAVED
    }
}

/// What a device reports it can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub sample_rates: BTreeSet<u32>,
    pub encodings: BTreeSet<SampleEncoding>,
    pub input_channels: ChannelRange,
    pub output_channels: ChannelRange,
    pub buffer_frames: BufferSizeRange,
    pub access: Access,
}

impl Capabilities {
    pub fn supports_rate(&self, rate: u32) -> bool {
        self.sample_rates.contains(&rate)
    }

    pub fn supports_encoding(&self, encoding: SampleEncoding) -> bool {
        self.encodings.contains(&encoding)
    }
}

/// Direction of audio flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Stream format requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRequest {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub input_mask: ChannelMask,
    pub output_mask: ChannelMask,
    /// Requested buffer size in frames, `0` for the device default
    pub buffer_frames: u32,
    /// Whether the callback wants interleaved buffers
    pub interleaved: bool,
}

impl FormatRequest {
    /// Playback on the first `channels` output channels
    pub fn output(sample_rate: u32, encoding: SampleEncoding, channels: u32) -> Self {
        Self {
            sample_rate,
            encoding,
            input_mask: ChannelMask::NONE,
            output_mask: ChannelMask::first(channels),
            buffer_frames: 0,
            interleaved: true,
        }
    }

    /// Capture from the first `channels` input channels
    pub fn input(sample_rate: u32, encoding: SampleEncoding, channels: u32) -> Self {
        Self {
            sample_rate,
            encoding,
            input_mask: ChannelMask::first(channels),
            output_mask: ChannelMask::NONE,
            buffer_frames: 0,
            interleaved: true,
        }
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn with_input_mask(mut self, mask: ChannelMask) -> Self {
        self.input_mask = mask;
        self
    }

    pub fn with_output_mask(mut self, mask: ChannelMask) -> Self {
        self.output_mask = mask;
        self
    }

    pub fn non_interleaved(mut self) -> Self {
        self.interleaved = false;
        self
    }
}

/// Format a stream is opened with, after validation against a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub input_mask: ChannelMask,
    pub output_mask: ChannelMask,
    pub input_channels: usize,
    pub output_channels: usize,
    pub buffer_frames: u32,
    /// Layout handed to the callback
    pub interleaved: bool,
    /// Layout the backend exchanges with the driver
    pub native_interleaved: bool,
}

impl NegotiatedFormat {
    pub fn channels(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    pub fn is_duplex(&self) -> bool {
        self.input_channels > 0 && self.output_channels > 0
    }

    /// Bytes per frame in one direction
    pub fn frame_bytes(&self, direction: Direction) -> usize {
        self.channels(direction) * self.encoding.size()
    }
}

/// Stream latency in frames per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Latency {
    pub input_frames: u32,
    pub output_frames: u32,
}

impl Latency {
    pub fn input_millis(&self, sample_rate: u32) -> f64 {
        frames_to_millis(self.input_frames, sample_rate)
    }

    pub fn output_millis(&self, sample_rate: u32) -> f64 {
        frames_to_millis(self.output_frames, sample_rate)
    }
}

fn frames_to_millis(frames: u32, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    f64::from(frames) * 1000.0 / f64::from(sample_rate)
}

fn unsupported(message: String) -> AudioError {
    AudioError::new(ErrorKind::UnsupportedFormat, message)
}

fn check_direction(
    direction: Direction,
    mask: ChannelMask,
    range: &ChannelRange,
    service: ServiceCaps,
) -> Result<()> {
    if mask.is_empty() {
        return Ok(());
    }

    let count = mask.count();
    if !range.contains(count) {
        return Err(unsupported(format!(
            "{direction:?} channel count {count} outside {}..={}",
            range.min, range.max
        )));
    }
    if mask.span() > u32::from(range.max) {
        return Err(unsupported(format!(
            "{direction:?} channel mask {:#x} selects channels beyond {}",
            mask.0, range.max
        )));
    }
    if !service.contains(ServiceCaps::CHANNEL_MASK) && !mask.is_contiguous() {
        return Err(unsupported(format!(
            "{direction:?} channel mask {:#x} is not contiguous and the service has no channel mask support",
            mask.0
        )));
    }
    Ok(())
}

/// Validates `request` against a device's capabilities.
///
/// Never partially succeeds: either every field is acceptable and a complete
/// [`NegotiatedFormat`] is returned, or the call fails with
/// [`ErrorKind::UnsupportedFormat`].
pub fn negotiate(
    request: &FormatRequest,
    caps: &Capabilities,
    service: ServiceCaps,
) -> Result<NegotiatedFormat> {
    if !caps.supports_rate(request.sample_rate) {
        return Err(unsupported(format!(
            "sample rate {} Hz not in {:?}",
            request.sample_rate, caps.sample_rates
        )));
    }
    if !caps.supports_encoding(request.encoding) {
        return Err(unsupported(format!(
            "encoding {} not in {:?}",
            request.encoding, caps.encodings
        )));
    }
    if request.input_mask.is_empty() && request.output_mask.is_empty() {
        return Err(unsupported("no input or output channels selected".into()));
    }

    check_direction(
        Direction::Input,
        request.input_mask,
        &caps.input_channels,
        service,
    )?;
    check_direction(
        Direction::Output,
        request.output_mask,
        &caps.output_channels,
        service,
    )?;

    let duplex = !request.input_mask.is_empty() && !request.output_mask.is_empty();
    if duplex && !service.contains(ServiceCaps::FULL_DUPLEX) {
        return Err(unsupported("service does not support full duplex".into()));
    }

    let native_interleaved = if caps.access.supports(request.interleaved) {
        request.interleaved
    } else if caps.access.supports(!request.interleaved) {
        !request.interleaved
    } else {
        return Err(unsupported("device reports no buffer access mode".into()));
    };

    let buffer_frames = caps.buffer_frames.resolve(request.buffer_frames);
    if request.buffer_frames != 0 && buffer_frames != request.buffer_frames {
        tracing::debug!(
            requested = request.buffer_frames,
            negotiated = buffer_frames,
            "Buffer size clamped to device range"
        );
    }

    Ok(NegotiatedFormat {
        sample_rate: request.sample_rate,
        encoding: request.encoding,
        input_mask: request.input_mask,
        output_mask: request.output_mask,
        input_channels: request.input_mask.count() as usize,
        output_channels: request.output_mask.count() as usize,
        buffer_frames,
        interleaved: request.interleaved,
        native_interleaved,
    })
}
