use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backend::{translate, Backend, NativeStream};
use crate::buffer::{Gate, StreamBuffer, StreamCallback, XRunCallback};
use crate::device::DeviceId;
use crate::diagnostics::Diagnostics;
use crate::error::{AudioError, ErrorKind, Result};
use crate::format::{FormatRequest, Latency, NegotiatedFormat};
use crate::lock;
use crate::registry::RegistryShared;
use crate::system::System;

/// Lifecycle state of a [`Stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamState {
    Created,
    Running,
    Stopped,
    /// Terminal
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Format, callback and optional xrun handler for
/// [`Service::open_stream`](crate::Service::open_stream)
pub struct StreamParams {
    pub(crate) format: FormatRequest,
    pub(crate) callback: StreamCallback,
    pub(crate) on_xrun: Option<XRunCallback>,
}

impl StreamParams {
    pub fn new<F>(format: FormatRequest, callback: F) -> Self
    where
        F: FnMut(&mut StreamBuffer<'_>) + Send + 'static,
    {
        Self {
            format,
            callback: Box::new(callback),
            on_xrun: None,
        }
    }

    pub fn with_xrun<F>(mut self, on_xrun: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.on_xrun = Some(Box::new(on_xrun));
        self
    }

    pub fn format(&self) -> &FormatRequest {
        &self.format
    }
}

impl fmt::Debug for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamParams")
            .field("format", &self.format)
            .field("on_xrun", &self.on_xrun.is_some())
            .finish_non_exhaustive()
    }
}

/// Control-side state of a stream, shared with the owning service so that
/// releasing the service can stop it
pub(crate) struct StreamCore {
    pub(crate) state: StreamState,
    native: Option<Box<dyn NativeStream>>,
    gate: Arc<Gate>,
    latency: Latency,
    disposed: bool,
    system: System,
    backend: Arc<dyn Backend>,
    registry: Arc<RegistryShared>,
    diagnostics: Diagnostics,
}

impl StreamCore {
    pub(crate) fn new(
        native: Box<dyn NativeStream>,
        gate: Arc<Gate>,
        latency: Latency,
        system: System,
        backend: Arc<dyn Backend>,
        registry: Arc<RegistryShared>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            state: StreamState::Created,
            native: Some(native),
            gate,
            latency,
            disposed: false,
            system,
            backend,
            registry,
            diagnostics,
        }
    }

    fn closed(&self, operation: &str) -> AudioError {
        AudioError::new(ErrorKind::StreamClosed, format!("cannot {operation} a closed stream"))
            .with_system(&self.system)
    }

    fn fail(&self, fault: crate::error::BackendFault) -> AudioError {
        translate(self.backend.as_ref(), &self.system, fault)
    }

    fn native(&mut self, operation: &str) -> Result<&mut Box<dyn NativeStream>> {
        self.native.as_mut().ok_or_else(|| {
            AudioError::new(ErrorKind::StreamClosed, format!("cannot {operation} a closed stream"))
                .with_system(&self.system)
        })
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            StreamState::Closed => return Err(self.closed("start")),
            StreamState::Running => return Ok(()),
            StreamState::Created | StreamState::Stopped => {}
        }
        if self.disposed {
            return Err(AudioError::new(
                ErrorKind::Disposed,
                "the service that opened this stream was released",
            )
            .with_system(&self.system));
        }

        self.gate.open();
        let started = self.native("start")?.start();
        if let Err(fault) = started {
            self.gate.close();
            return Err(self.fail(fault));
        }

        match self.native("start")?.latency() {
            Ok(latency) => self.latency = latency,
            Err(fault) => {
                let err = self.fail(fault);
                self.diagnostics
                    .warn(Some(&self.system), format!("Keeping previous latency: {err}"));
            }
        }

        self.state = StreamState::Running;
        self.registry.stream_started();
        tracing::debug!(system = %self.system, "Stream started");
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        match self.state {
            StreamState::Closed => return Err(self.closed("stop")),
            StreamState::Created | StreamState::Stopped => return Ok(()),
            StreamState::Running => {}
        }

        // No callback begins after this returns
        self.gate.close();
        self.state = StreamState::Stopped;
        self.registry.stream_stopped();

        let stopped = self.native("stop")?.stop();
        tracing::debug!(system = %self.system, "Stream stopped");
        stopped.map_err(|fault| self.fail(fault))
    }

    fn close(&mut self) -> Result<()> {
        if self.state == StreamState::Closed {
            return Err(self.closed("close"));
        }

        let stopped = self.stop();
        self.gate.close();
        // Dropping the native stream joins its threads and frees its buffers
        self.native = None;
        self.state = StreamState::Closed;
        tracing::debug!(system = %self.system, "Stream closed");
        stopped
    }

    fn latency(&self) -> Result<Latency> {
        if self.state == StreamState::Closed {
            return Err(self.closed("query latency of"));
        }
        Ok(self.latency)
    }

    /// Called when the owning service is released
    pub(crate) fn dispose(&mut self) {
        if self.state == StreamState::Running {
            self.diagnostics.warn(
                Some(&self.system),
                "Service released with a running stream, stopping it",
            );
            if let Err(e) = self.stop() {
                self.diagnostics
                    .warn(Some(&self.system), format!("Failed to stop stream: {e}"));
            }
        }
        self.disposed = true;
    }
}

/// An open real-time connection to one device.
///
/// Control operations are synchronous and must be serialized by the caller.
/// Dropping a stream closes it.
pub struct Stream {
    core: Arc<Mutex<StreamCore>>,
    system: System,
    device: DeviceId,
    format: NegotiatedFormat,
}

impl Stream {
    pub(crate) fn new(
        core: Arc<Mutex<StreamCore>>,
        system: System,
        device: DeviceId,
        format: NegotiatedFormat,
    ) -> Self {
        Self {
            core,
            system,
            device,
            format,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        lock(&self.core).start()
    }

    /// Stops the stream; no callback is invoked after this returns
    pub fn stop(&mut self) -> Result<()> {
        lock(&self.core).stop()
    }

    /// Stops if running, then releases native resources. Waits for any
    /// in-flight callback to complete.
    pub fn close(&mut self) -> Result<()> {
        lock(&self.core).close()
    }

    pub fn latency(&self) -> Result<Latency> {
        lock(&self.core).latency()
    }

    pub fn state(&self) -> StreamState {
        lock(&self.core).state
    }

    /// Negotiated buffer size in frames
    pub fn frames(&self) -> u32 {
        self.format.buffer_frames
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn system(&self) -> &System {
        &self.system
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("system", &self.system)
            .field("device", &self.device)
            .field("state", &self.state())
            .field("format", &self.format)
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let mut core = lock(&self.core);
        if core.state != StreamState::Closed {
            if let Err(e) = core.close() {
                tracing::warn!(system = %self.system, "Error closing dropped stream: {e}");
            }
        }
    }
}
