use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one native audio system (a backend family such as ALSA).
///
/// Systems carry no resources; they are keys into a
/// [`PlatformRegistry`](crate::PlatformRegistry).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct System(Cow<'static, str>);

impl System {
    pub const ALSA: System = System::from_static("ALSA");
    pub const ASIO: System = System::from_static("ASIO");
    pub const JACK: System = System::from_static("JACK");
    pub const WASAPI: System = System::from_static("WASAPI");
    pub const PULSE_AUDIO: System = System::from_static("PulseAudio");
    pub const DIRECT_SOUND: System = System::from_static("DirectSound");
    pub const CORE_AUDIO: System = System::from_static("CoreAudio");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for System {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Audience a system is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Setup {
    /// Low-latency, driver-level access (ASIO, JACK)
    ProAudio,
    /// The operating system's native mixer path (WASAPI, ALSA, CoreAudio)
    SystemAudio,
    /// Shared, high-level desktop sound servers (PulseAudio, DirectSound)
    ConsumerAudio,
}

/// A system as reported by a backend probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub system: System,
    pub setup: Setup,
}

impl SystemInfo {
    pub fn new(system: System, setup: Setup) -> Self {
        Self { system, setup }
    }
}

/// Features a service supports, as a small bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceCaps(u32);

impl ServiceCaps {
    pub const NONE: ServiceCaps = ServiceCaps(0);
    /// Buffers carry a stream timestamp
    pub const TIME: ServiceCaps = ServiceCaps(1 << 0);
    /// Latency can be queried
    pub const LATENCY: ServiceCaps = ServiceCaps(1 << 1);
    /// One stream may carry input and output at once
    pub const FULL_DUPLEX: ServiceCaps = ServiceCaps(1 << 2);
    /// Arbitrary channel masks, not just the first N channels
    pub const CHANNEL_MASK: ServiceCaps = ServiceCaps(1 << 3);
    /// Under- and overruns are reported
    pub const XRUN_DETECTION: ServiceCaps = ServiceCaps(1 << 4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ServiceCaps) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: ServiceCaps) -> ServiceCaps {
        ServiceCaps(self.0 | other.0)
    }
}

impl std::ops::BitOr for ServiceCaps {
    type Output = ServiceCaps;

    fn bitor(self, rhs: ServiceCaps) -> ServiceCaps {
        self.union(rhs)
    }
}

impl fmt::Display for ServiceCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ServiceCaps, &str); 5] = [
            (ServiceCaps::TIME, "Time"),
            (ServiceCaps::LATENCY, "Latency"),
            (ServiceCaps::FULL_DUPLEX, "FullDuplex"),
            (ServiceCaps::CHANNEL_MASK, "ChannelMask"),
            (ServiceCaps::XRUN_DETECTION, "XRunDetection"),
        ];

        let mut names = NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .peekable();

        if names.peek().is_none() {
            return f.write_str("None");
        }

        for (i, name) in names.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_systems_compare_by_name() {
        assert_eq!(System::ALSA, System::new("ALSA"));
        assert_ne!(System::ALSA, System::JACK);
        assert_eq!(System::PULSE_AUDIO.to_string(), "PulseAudio");
    }

    #[test]
    fn test_system_serializes_as_plain_string() {
        let json = serde_json::to_string(&System::WASAPI).unwrap();
        assert_eq!(json, "\"WASAPI\"");
        let back: System = serde_json::from_str("\"ASIO\"").unwrap();
        assert_eq!(back, System::ASIO);
    }

    #[test]
    fn test_service_caps_display() {
        assert_eq!(ServiceCaps::NONE.to_string(), "None");
        let caps = ServiceCaps::LATENCY | ServiceCaps::FULL_DUPLEX;
        assert_eq!(caps.to_string(), "Latency, FullDuplex");
        assert!(caps.contains(ServiceCaps::LATENCY));
        assert!(!caps.contains(ServiceCaps::CHANNEL_MASK));
    }
}
