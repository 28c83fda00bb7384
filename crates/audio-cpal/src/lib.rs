//! cpal hosts as unison audio systems
//!
//! Each platform crate describes which cpal hosts it knows and how to read
//! their native status codes by implementing [`Platform`]; [`CpalBackend`]
//! does the rest. Without the `cpal` feature the backend still builds but
//! fails to probe, so a registry simply omits it.

use std::marker::PhantomData;

use unison_audio_core::{NativeCode, NativeError, ServiceCaps, Setup, System};

mod config;
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
mod duplex;
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
mod owner;

#[cfg(feature = "cpal")]
mod host;
#[cfg(feature = "cpal")]
mod stream;

#[cfg(not(feature = "cpal"))]
mod stub;

pub use config::{summarize, unique_id, ConfigRange, STANDARD_RATES};

/// A cpal host and the system it is exposed as
#[derive(Debug, Clone)]
pub struct HostBinding {
    /// `cpal::HostId::name()` of the host
    pub host: &'static str,
    pub system: System,
    pub setup: Setup,
}

impl HostBinding {
    pub const fn new(host: &'static str, system: System, setup: Setup) -> Self {
        Self {
            host,
            system,
            setup,
        }
    }
}

/// Operating-system specific knowledge used by [`CpalBackend`]
pub trait Platform: Send + Sync + 'static {
    const NAME: &'static str;

    /// Hosts in detection order
    fn bindings() -> &'static [HostBinding];

    /// Native error table of `system`; total over all codes
    fn translate(system: &System, code: NativeCode) -> NativeError;

    fn binding(system: &System) -> Option<&'static HostBinding> {
        Self::bindings().iter().find(|b| &b.system == system)
    }
}

/// Features every cpal-backed service offers. Full duplex is emulated with a
/// ring buffer between the input and output streams.
pub const SERVICE_CAPS: ServiceCaps = ServiceCaps::TIME
    .union(ServiceCaps::LATENCY)
    .union(ServiceCaps::FULL_DUPLEX)
    .union(ServiceCaps::XRUN_DETECTION);

/// Backend over the cpal hosts bound by `P`
pub struct CpalBackend<P> {
    name: String,
    _platform: PhantomData<fn() -> P>,
}

impl<P: Platform> CpalBackend<P> {
    pub fn new() -> Self {
        Self {
            name: format!("cpal-{}", P::NAME),
            _platform: PhantomData,
        }
    }
}

impl<P: Platform> Default for CpalBackend<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for CpalBackend<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalBackend").field("name", &self.name).finish()
    }
}
