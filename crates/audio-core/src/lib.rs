//! One API over many native audio systems.
//!
//! A [`PlatformRegistry`] probes the compiled-in [`Backend`]s once per
//! process. Each available [`System`] yields a [`Service`], which enumerates
//! devices into an immutable [`DeviceList`] and opens real-time [`Stream`]s.
//!
//! ```no_run
//! use unison_audio_core::{DeviceFlags, PlatformRegistry, RegistryConfig};
//!
//! # fn backends() -> Vec<Box<dyn unison_audio_core::Backend>> { Vec::new() }
//! let registry = PlatformRegistry::initialize(RegistryConfig::default(), backends())?;
//! for system in registry.systems() {
//!     let mut service = registry.get_service(system)?;
//!     let devices = service.open_device_list(DeviceFlags::ALL)?;
//!     for device in &devices {
//!         println!("{system}: {}", device.name);
//!     }
//!     devices.release();
//! }
//! registry.terminate();
//! # Ok::<(), unison_audio_core::AudioError>(())
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod backend;
mod buffer;
mod config;
mod device;
mod device_list;
mod diagnostics;
mod error;
mod format;
pub mod mock;
mod registry;
pub mod rt;
mod service;
mod stream;
mod system;

pub use backend::{Backend, BackendResult, NativeDevice, NativeStream, Session};
pub use buffer::{
    Frames, FramesMut, NativeIo, Processor, StreamBuffer, StreamCallback, XRunCallback,
};
pub use config::{RegistryConfig, SessionConfig};
pub use device::{DeviceEntry, DeviceFlags, DeviceId};
pub use device_list::DeviceList;
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticsSink};
pub use error::{AudioError, BackendFault, ErrorKind, NativeCode, NativeError, Result};
pub use format::{
    negotiate, Access, BufferSizeRange, Capabilities, ChannelMask, ChannelRange, Direction,
    FormatRequest, Latency, Mix, NegotiatedFormat, SampleAttributes, SampleEncoding,
};
pub use registry::PlatformRegistry;
pub use service::Service;
pub use stream::{Stream, StreamParams, StreamState};
pub use system::{ServiceCaps, Setup, System, SystemInfo};

/// Locks a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
