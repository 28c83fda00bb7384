use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::format::{Capabilities, Direction, Mix};

/// Which device directions a device list should include
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFlags(u8);

impl DeviceFlags {
    pub const INPUT: DeviceFlags = DeviceFlags(1 << 0);
    pub const OUTPUT: DeviceFlags = DeviceFlags(1 << 1);
    pub const ALL: DeviceFlags = DeviceFlags(Self::INPUT.0 | Self::OUTPUT.0);

    pub const fn contains(self, other: DeviceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether a device with these channel counts belongs in the list
    pub(crate) fn admits(self, input_channels: u16, output_channels: u16) -> bool {
        (self.contains(Self::INPUT) && input_channels > 0)
            || (self.contains(Self::OUTPUT) && output_channels > 0)
    }
}

impl std::ops::BitOr for DeviceFlags {
    type Output = DeviceFlags;

    fn bitor(self, rhs: DeviceFlags) -> DeviceFlags {
        DeviceFlags(self.0 | rhs.0)
    }
}

impl From<Direction> for DeviceFlags {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Input => Self::INPUT,
            Direction::Output => Self::OUTPUT,
        }
    }
}

/// Opaque device identifier, valid only for the device list that produced it.
///
/// Besides the backend's native id it records which service and which
/// enumeration it came from, so a lookup against any other snapshot is
/// detected instead of resolving to a different physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub(crate) owner: u64,
    pub(crate) generation: u64,
    pub(crate) native: Arc<str>,
}

impl DeviceId {
    /// The backend-specific id string
    pub fn native(&self) -> &str {
        &self.native
    }

    /// Enumeration this id belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.native)
    }
}

/// One device in a [`DeviceList`](crate::DeviceList) snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    #[serde(serialize_with = "serialize_id")]
    pub id: DeviceId,
    pub name: String,
    pub input_channels: u16,
    pub output_channels: u16,
    pub default_input: bool,
    pub default_output: bool,
    /// Format the device runs at when left alone, if the backend knows it
    pub mix: Option<Mix>,
    /// One name per input channel
    pub input_names: Vec<String>,
    /// One name per output channel
    pub output_names: Vec<String>,
    pub capabilities: Capabilities,
}

impl DeviceEntry {
    pub fn is_default(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.default_input,
            Direction::Output => self.default_output,
        }
    }

    pub fn channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    pub fn channel_name(&self, direction: Direction, index: usize) -> Option<&str> {
        let names = match direction {
            Direction::Input => &self.input_names,
            Direction::Output => &self.output_names,
        };
        names.get(index).map(String::as_str)
    }
}

fn serialize_id<S: serde::Serializer>(id: &DeviceId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(id.native())
}
