//! WASAPI and ASIO for unison, through cpal
//!
//! ASIO is only reachable when cpal itself is built with its `asio` feature;
//! otherwise the system is simply not probed.

mod errors;

use unison_audio_core::{Backend, NativeCode, NativeError, Setup, System};
use unison_audio_cpal::{CpalBackend, HostBinding, Platform};

pub use errors::{asio, dsound, wasapi};

pub struct Windows;

impl Platform for Windows {
    const NAME: &'static str = "windows";

    fn bindings() -> &'static [HostBinding] {
        const BINDINGS: &[HostBinding] = &[
            HostBinding::new("ASIO", System::ASIO, Setup::ProAudio),
            HostBinding::new("WASAPI", System::WASAPI, Setup::SystemAudio),
        ];
        BINDINGS
    }

    fn translate(system: &System, code: NativeCode) -> NativeError {
        let error = errors::translate(system, code);
        tracing::trace!(%system, code, kind = %error.kind, "Translated native status");
        error
    }
}

pub fn backend() -> Box<dyn Backend> {
    Box::new(CpalBackend::<Windows>::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings() {
        assert_eq!(Windows::binding(&System::WASAPI).map(|b| b.setup), Some(Setup::SystemAudio));
        assert_eq!(Windows::binding(&System::ASIO).map(|b| b.setup), Some(Setup::ProAudio));
        assert!(Windows::binding(&System::ALSA).is_none());
        assert_eq!(backend().name(), "cpal-windows");
    }
}
