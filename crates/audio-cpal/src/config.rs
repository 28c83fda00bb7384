//! Folding cpal's supported-config ranges into device capabilities

use std::collections::{BTreeSet, HashMap};

use unison_audio_core::{Access, BufferSizeRange, Capabilities, ChannelRange, SampleEncoding};

/// Rates advertised when a device reports a continuous range
pub const STANDARD_RATES: [u32; 8] = [
    8_000, 11_025, 16_000, 22_050, 44_100, 48_000, 88_200, 96_000,
];

const DEFAULT_BUFFER_FRAMES: u32 = 512;

/// One supported configuration as reported by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRange {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    /// `None` for sample formats with no matching encoding
    pub encoding: Option<SampleEncoding>,
    /// `None` when the host does not know its buffer limits
    pub buffer_frames: Option<(u32, u32)>,
}

fn max_channels(ranges: &[ConfigRange]) -> u16 {
    ranges
        .iter()
        .filter(|r| r.encoding.is_some())
        .map(|r| r.channels)
        .max()
        .unwrap_or(0)
}

/// Capabilities of a device from its input and output config ranges.
///
/// Rates are the standard rates inside any usable range; configs in a sample
/// format without a matching encoding are ignored.
pub fn summarize(inputs: &[ConfigRange], outputs: &[ConfigRange]) -> Capabilities {
    let usable = || inputs.iter().chain(outputs).filter(|r| r.encoding.is_some());

    let sample_rates: BTreeSet<u32> = STANDARD_RATES
        .into_iter()
        .filter(|rate| usable().any(|r| r.min_rate <= *rate && *rate <= r.max_rate))
        .collect();
    let encodings: BTreeSet<SampleEncoding> = usable().filter_map(|r| r.encoding).collect();

    let bounds: Vec<(u32, u32)> = usable().filter_map(|r| r.buffer_frames).collect();
    let buffer_frames = match (
        bounds.iter().map(|b| b.0).min(),
        bounds.iter().map(|b| b.1).max(),
    ) {
        (Some(min), Some(max)) if min <= max => {
            BufferSizeRange::new(min, max, DEFAULT_BUFFER_FRAMES)
        }
        _ => BufferSizeRange::default(),
    };

    Capabilities {
        sample_rates,
        encodings,
        input_channels: ChannelRange::up_to(max_channels(inputs)),
        output_channels: ChannelRange::up_to(max_channels(outputs)),
        buffer_frames,
        access: Access::INTERLEAVED,
    }
}

/// Device id from its display name; repeated names get a `#n` suffix in
/// enumeration order
pub fn unique_id(name: &str, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(name.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        name.to_string()
    } else {
        format!("{name}#{count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(channels: u16, min_rate: u32, max_rate: u32, encoding: SampleEncoding) -> ConfigRange {
        ConfigRange {
            channels,
            min_rate,
            max_rate,
            encoding: Some(encoding),
            buffer_frames: Some((64, 2048)),
        }
    }

    #[test]
    fn test_summarize_output_device() {
        let outputs = [
            range(2, 44_100, 48_000, SampleEncoding::Float32),
            range(6, 48_000, 48_000, SampleEncoding::Int16),
        ];
        let caps = summarize(&[], &outputs);

        assert_eq!(caps.sample_rates, [44_100, 48_000].into_iter().collect());
        assert!(caps.supports_encoding(SampleEncoding::Int16));
        assert!(caps.supports_encoding(SampleEncoding::Float32));
        assert_eq!(caps.output_channels, ChannelRange::new(1, 6));
        assert!(caps.input_channels.is_empty());
        assert_eq!(caps.buffer_frames, BufferSizeRange::new(64, 2048, 512));
    }

    #[test]
    fn test_unusable_formats_are_ignored() {
        let inputs = [ConfigRange {
            channels: 4,
            min_rate: 8_000,
            max_rate: 192_000,
            encoding: None,
            buffer_frames: None,
        }];
        let caps = summarize(&inputs, &[]);
        assert!(caps.sample_rates.is_empty());
        assert!(caps.input_channels.is_empty());
        assert_eq!(caps.buffer_frames, BufferSizeRange::default());
    }

    #[test]
    fn test_unique_ids() {
        let mut seen = HashMap::new();
        assert_eq!(unique_id("USB Audio", &mut seen), "USB Audio");
        assert_eq!(unique_id("Speakers", &mut seen), "Speakers");
        assert_eq!(unique_id("USB Audio", &mut seen), "USB Audio#2");
        assert_eq!(unique_id("USB Audio", &mut seen), "USB Audio#3");
    }
}
