//! Adapter interface implemented once per native audio subsystem
//!
//! The registry only ever talks to [`Backend`], [`Session`] and
//! [`NativeStream`]; nothing caller-facing branches on the concrete backend.
//! Adapters report failures as [`BackendFault`]s, which the core translates
//! with [`Backend::translate_error`] before they reach the caller.

use crate::buffer::Processor;
use crate::config::SessionConfig;
use crate::error::{AudioError, BackendFault, NativeCode, NativeError};
use crate::format::{Capabilities, Latency, Mix, NegotiatedFormat};
use crate::system::{ServiceCaps, System, SystemInfo};

/// Result type used across the adapter boundary
pub type BackendResult<T> = std::result::Result<T, BackendFault>;

/// A compiled-in backend, possibly serving several systems
pub trait Backend: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Detects which systems are usable on this machine. An error means the
    /// backend failed to load.
    fn probe(&self) -> BackendResult<Vec<SystemInfo>>;

    /// Opens a session for one of the probed systems
    fn connect(&self, system: &System, config: &SessionConfig) -> BackendResult<Box<dyn Session>>;

    /// Maps a native status code of `system` to the shared taxonomy.
    /// Must be total: unknown codes map to `BackendError`.
    fn translate_error(&self, system: &System, code: NativeCode) -> NativeError;
}

/// Backend-specific session state behind a [`Service`](crate::Service)
pub trait Session: Send {
    fn capabilities(&self) -> ServiceCaps;

    /// Enumerates devices in native order.
    ///
    /// An outer error fails the whole enumeration; an inner error marks a
    /// single device whose query failed and is skipped.
    fn enumerate_devices(&mut self) -> BackendResult<Vec<BackendResult<NativeDevice>>>;

    /// Opens a stream on `device`. The returned stream owns `processor` and
    /// drives it from its real-time context while started.
    fn open_stream(
        &mut self,
        device: &str,
        format: &NegotiatedFormat,
        processor: Processor,
    ) -> BackendResult<Box<dyn NativeStream>>;
}

/// A device as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDevice {
    pub id: String,
    pub name: String,
    pub default_input: bool,
    pub default_output: bool,
    /// Rate and encoding the device currently prefers
    pub mix: Option<Mix>,
    /// Channel names in channel order. Missing or empty names are filled in
    /// as "Input 1", "Output 2" and so on.
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub capabilities: Capabilities,
}

/// Native half of a [`Stream`](crate::Stream).
///
/// Dropping it must release every native resource and join any thread it
/// started before returning.
pub trait NativeStream: Send {
    fn start(&mut self) -> BackendResult<()>;

    fn stop(&mut self) -> BackendResult<()>;

    fn latency(&self) -> BackendResult<Latency>;
}

/// Translates a fault into the caller-facing error
pub(crate) fn translate(backend: &dyn Backend, system: &System, fault: BackendFault) -> AudioError {
    match fault {
        BackendFault::Native(code) => {
            let native = backend.translate_error(system, code);
            AudioError::new(native.kind, native.text)
                .with_system(system)
                .with_code(code)
        }
        BackendFault::Classified { kind, message } => {
            AudioError::new(kind, message).with_system(system)
        }
    }
}
