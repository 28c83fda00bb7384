//! ALSA and JACK for unison, through cpal
//!
//! The PulseAudio status table is here too for sessions that report
//! `pa_error_code` values; cpal has no PulseAudio host to bind.
//!
//! ```no_run
//! use unison_audio_core::{PlatformRegistry, RegistryConfig};
//!
//! let registry = PlatformRegistry::initialize(
//!     RegistryConfig::default(),
//!     vec![unison_audio_linux::backend()],
//! )?;
//! println!("{:?}", registry.systems());
//! # Ok::<(), unison_audio_core::AudioError>(())
//! ```

mod errors;

use unison_audio_core::{Backend, NativeCode, NativeError, Setup, System};
use unison_audio_cpal::{CpalBackend, HostBinding, Platform};

pub use errors::{alsa, jack, pulse};

pub struct Linux;

impl Platform for Linux {
    const NAME: &'static str = "linux";

    fn bindings() -> &'static [HostBinding] {
        const BINDINGS: &[HostBinding] = &[
            HostBinding::new("JACK", System::JACK, Setup::ProAudio),
            HostBinding::new("ALSA", System::ALSA, Setup::SystemAudio),
        ];
        BINDINGS
    }

    fn translate(system: &System, code: NativeCode) -> NativeError {
        errors::translate(system, code)
    }
}

/// Backend serving every Linux system cpal can reach
pub fn backend() -> Box<dyn Backend> {
    Box::new(CpalBackend::<Linux>::new())
}
