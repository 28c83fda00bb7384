use unison_audio_core::{
    Backend, BackendFault, BackendResult, ErrorKind, NativeCode, NativeError, Session,
    SessionConfig, System, SystemInfo,
};

use crate::{CpalBackend, Platform};

fn unavailable() -> BackendFault {
    BackendFault::classified(
        ErrorKind::BackendError,
        "cpal support not available in this build",
    )
}

impl<P: Platform> Backend for CpalBackend<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> BackendResult<Vec<SystemInfo>> {
        Err(unavailable())
    }

    fn connect(&self, _system: &System, _config: &SessionConfig) -> BackendResult<Box<dyn Session>> {
        Err(unavailable())
    }

    fn translate_error(&self, system: &System, code: NativeCode) -> NativeError {
        P::translate(system, code)
    }
}
