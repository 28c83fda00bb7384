//! Core Audio for unison, through cpal

mod errors;

use unison_audio_core::{Backend, NativeCode, NativeError, Setup, System};
use unison_audio_cpal::{CpalBackend, HostBinding, Platform};

pub use errors::status;

pub struct MacOs;

impl Platform for MacOs {
    const NAME: &'static str = "macos";

    fn bindings() -> &'static [HostBinding] {
        const BINDINGS: &[HostBinding] = &[HostBinding::new(
            "CoreAudio",
            System::CORE_AUDIO,
            Setup::SystemAudio,
        )];
        BINDINGS
    }

    fn translate(system: &System, code: NativeCode) -> NativeError {
        let error = errors::translate(code);
        tracing::trace!(%system, code, kind = %error.kind, "Translated native status");
        error
    }
}

pub fn backend() -> Box<dyn Backend> {
    Box::new(CpalBackend::<MacOs>::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unison_audio_core::ErrorKind;

    #[test]
    fn test_core_audio_binding() {
        let binding = MacOs::binding(&System::CORE_AUDIO);
        assert_eq!(binding.map(|b| b.host), Some("CoreAudio"));

        let backend = backend();
        assert_eq!(backend.name(), "cpal-macos");
        assert_eq!(
            backend
                .translate_error(&System::CORE_AUDIO, status::PERMISSIONS)
                .kind,
            ErrorKind::DeviceBusy
        );
    }
}
