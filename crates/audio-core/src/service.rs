use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::backend::{translate, Backend, Session};
use crate::buffer::{Gate, Processor};
use crate::device::{DeviceEntry, DeviceFlags, DeviceId};
use crate::device_list::{DeviceList, Miss, Snapshot};
use crate::diagnostics::Diagnostics;
use crate::error::{AudioError, ErrorKind, Result};
use crate::format::{self, BufferSizeRange, Direction, FormatRequest, Mix};
use crate::lock;
use crate::registry::RegistryShared;
use crate::stream::{Stream, StreamCore, StreamParams};
use crate::system::{ServiceCaps, Setup, System, SystemInfo};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Session with one system: enumerates its devices and opens streams.
///
/// Owned by the caller that requested it. Releasing it (or dropping it) stops
/// any stream it opened that is still running; every later operation fails
/// with `Disposed`.
pub struct Service {
    info: SystemInfo,
    caps: ServiceCaps,
    backend: Arc<dyn Backend>,
    session: Option<Box<dyn Session>>,
    registry: Arc<RegistryShared>,
    diagnostics: Diagnostics,
    retries: u32,
    owner: u64,
    generation: u64,
    latest: Option<Arc<Snapshot>>,
    streams: Vec<Weak<Mutex<StreamCore>>>,
}

impl Service {
    pub(crate) fn new(
        info: SystemInfo,
        backend: Arc<dyn Backend>,
        session: Box<dyn Session>,
        registry: Arc<RegistryShared>,
        diagnostics: Diagnostics,
        retries: u32,
    ) -> Self {
        let caps = session.capabilities();
        tracing::debug!(system = %info.system, %caps, "Service created");

        Self {
            info,
            caps,
            backend,
            session: Some(session),
            registry,
            diagnostics,
            retries,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            latest: None,
            streams: Vec::new(),
        }
    }

    pub fn system(&self) -> &System {
        &self.info.system
    }

    pub fn setup(&self) -> Setup {
        self.info.setup
    }

    pub fn capabilities(&self) -> ServiceCaps {
        self.caps
    }

    pub fn is_released(&self) -> bool {
        self.session.is_none()
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> AudioError {
        AudioError::new(kind, message).with_system(&self.info.system)
    }

    fn session(&mut self) -> Result<&mut Box<dyn Session>> {
        if !self.registry.is_open() {
            return Err(self.error(ErrorKind::RegistryClosed, "the platform registry was released"));
        }
        let system = &self.info.system;
        self.session.as_mut().ok_or_else(|| {
            AudioError::new(ErrorKind::Disposed, "service was released").with_system(system)
        })
    }

    fn check_usable(&self) -> Result<()> {
        if self.session.is_none() {
            return Err(self.error(ErrorKind::Disposed, "service was released"));
        }
        if !self.registry.is_open() {
            return Err(self.error(ErrorKind::RegistryClosed, "the platform registry was released"));
        }
        Ok(())
    }

    /// Enumerates devices into a new [`DeviceList`].
    ///
    /// Devices whose individual query fails are skipped with a diagnostic. A
    /// failed or inconsistent enumeration is retried before failing with
    /// `EnumerationError`.
    pub fn open_device_list(&mut self, flags: DeviceFlags) -> Result<DeviceList> {
        self.check_usable()?;

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tracing::debug!(system = %self.info.system, attempt, "Retrying device enumeration");
            }

            match self.enumerate(flags) {
                Ok(entries) => {
                    self.generation += 1;
                    let entries = entries
                        .into_iter()
                        .map(|mut entry| {
                            entry.id.generation = self.generation;
                            entry
                        })
                        .collect();
                    let snapshot = Arc::new(Snapshot::new(self.owner, self.generation, entries));
                    self.latest = Some(Arc::clone(&snapshot));
                    return Ok(DeviceList::new(self.info.system.clone(), snapshot));
                }
                Err(e) if e.kind() == ErrorKind::RegistryClosed => return Err(e),
                Err(e) => {
                    self.diagnostics.warn(
                        Some(&self.info.system),
                        format!("Device enumeration attempt {} failed: {e}", attempt + 1),
                    );
                    last_error = Some(e);
                }
            }
        }

        let mut err = self.error(
            ErrorKind::EnumerationError,
            match &last_error {
                Some(e) => format!("device enumeration failed: {}", e.message()),
                None => "device enumeration failed".to_string(),
            },
        );
        if let Some(code) = last_error.as_ref().and_then(AudioError::code) {
            err = err.with_code(code);
        }
        Err(err)
    }

    fn enumerate(&mut self, flags: DeviceFlags) -> Result<Vec<DeviceEntry>> {
        let owner = self.owner;
        let backend = Arc::clone(&self.backend);
        let system = self.info.system.clone();
        let devices = self
            .session()?
            .enumerate_devices()
            .map_err(|fault| translate(backend.as_ref(), &system, fault))?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(devices.len());
        for device in devices {
            let device = match device {
                Ok(device) => device,
                Err(fault) => {
                    let err = translate(backend.as_ref(), &system, fault);
                    self.diagnostics
                        .warn(Some(&system), format!("Skipping device: {err}"));
                    continue;
                }
            };

            if !seen.insert(device.id.clone()) {
                return Err(self.error(
                    ErrorKind::EnumerationError,
                    format!("device id {} reported twice", device.id),
                ));
            }

            let range = device.capabilities.buffer_frames;
            if !range.is_valid() {
                self.diagnostics.warn(
                    Some(&system),
                    format!(
                        "Skipping device {}: invalid buffer size range {}..={} (default {})",
                        device.id, range.min, range.max, range.default
                    ),
                );
                continue;
            }

            let input_channels = device.capabilities.input_channels.max;
            let output_channels = device.capabilities.output_channels.max;
            if !flags.admits(input_channels, output_channels) {
                continue;
            }

            entries.push(DeviceEntry {
                id: DeviceId {
                    owner,
                    generation: 0,
                    native: Arc::from(device.id),
                },
                name: device.name,
                input_channels,
                output_channels,
                default_input: device.default_input,
                default_output: device.default_output,
                mix: device.mix,
                input_names: channel_names(Direction::Input, device.input_names, input_channels),
                output_names: channel_names(
                    Direction::Output,
                    device.output_names,
                    output_channels,
                ),
                capabilities: device.capabilities,
            });
        }

        Ok(entries)
    }

    /// Preferred mix of a device of the most recent device list
    pub fn mix(&self, id: &DeviceId) -> Result<Option<Mix>> {
        self.check_usable()?;
        Ok(self.resolve(id)?.mix)
    }

    /// Name of channel `index` of a device of the most recent device list
    pub fn channel_name(
        &self,
        id: &DeviceId,
        direction: Direction,
        index: usize,
    ) -> Result<String> {
        self.check_usable()?;
        let entry = self.resolve(id)?;
        entry
            .channel_name(direction, index)
            .map(str::to_string)
            .ok_or_else(|| {
                self.error(
                    ErrorKind::IndexOutOfRange,
                    format!(
                        "{direction:?} channel {index} out of range, {} has {}",
                        entry.name,
                        entry.channels(direction)
                    ),
                )
            })
    }

    fn resolve(&self, id: &DeviceId) -> Result<&DeviceEntry> {
        let Some(latest) = self.latest.as_ref() else {
            return Err(self.error(
                ErrorKind::DeviceNotFound,
                format!("no device list has been opened, cannot resolve {id}"),
            ));
        };

        latest.resolve(id).map_err(|miss| match miss {
            Miss::Stale => self.error(
                ErrorKind::StaleDeviceId,
                format!(
                    "device id {id} is from enumeration {}, latest is {}",
                    id.generation, latest.generation
                ),
            ),
            Miss::Unknown => self.error(
                ErrorKind::DeviceNotFound,
                format!("device {id} is not in the latest device list"),
            ),
        })
    }

    /// Buffer sizes the device accepts for `format`
    pub fn buffer_size(&self, id: &DeviceId, format: &FormatRequest) -> Result<BufferSizeRange> {
        self.check_usable()?;
        let entry = self.resolve(id)?;
        format::negotiate(format, &entry.capabilities, self.caps)
            .map_err(|e| e.with_system(&self.info.system))?;
        Ok(entry.capabilities.buffer_frames)
    }

    /// Opens a stream on a device of the most recent device list
    pub fn open_stream(&mut self, id: &DeviceId, params: StreamParams) -> Result<Stream> {
        self.check_usable()?;
        let entry = self.resolve(id)?;
        let format = format::negotiate(&params.format, &entry.capabilities, self.caps)
            .map_err(|e| e.with_system(&self.info.system))?;
        let id = entry.id.clone();

        let gate = Arc::new(Gate::default());
        let processor = Processor::new(format, Arc::clone(&gate), params.callback, params.on_xrun);

        let backend = Arc::clone(&self.backend);
        let system = self.info.system.clone();
        let native = self
            .session()?
            .open_stream(id.native(), &format, processor)
            .map_err(|fault| translate(backend.as_ref(), &system, fault))?;

        let latency = native
            .latency()
            .map_err(|fault| translate(backend.as_ref(), &system, fault))?;

        let core = Arc::new(Mutex::new(StreamCore::new(
            native,
            gate,
            latency,
            system.clone(),
            backend,
            Arc::clone(&self.registry),
            self.diagnostics.clone(),
        )));

        self.streams.retain(|stream| stream.strong_count() > 0);
        self.streams.push(Arc::downgrade(&core));

        tracing::debug!(
            system = %system,
            device = %id,
            rate = format.sample_rate,
            frames = format.buffer_frames,
            "Stream opened"
        );
        Ok(Stream::new(core, system, id, format))
    }

    /// Releases the session. Streams still running are stopped first; they
    /// can still be closed afterwards.
    pub fn release(&mut self) {
        if self.session.is_none() {
            return;
        }

        for stream in self.streams.drain(..) {
            if let Some(core) = stream.upgrade() {
                lock(&core).dispose();
            }
        }

        self.latest = None;
        self.session = None;
        tracing::debug!(system = %self.info.system, "Service released");
    }
}

/// Pads or truncates backend channel names to `count`, naming the gaps
fn channel_names(direction: Direction, mut names: Vec<String>, count: u16) -> Vec<String> {
    let count = usize::from(count);
    names.truncate(count);
    let label = match direction {
        Direction::Input => "Input",
        Direction::Output => "Output",
    };
    for (index, name) in names.iter_mut().enumerate() {
        if name.is_empty() {
            *name = format!("{label} {}", index + 1);
        }
    }
    let known = names.len();
    names.extend((known..count).map(|index| format!("{label} {}", index + 1)));
    names
}

impl Drop for Service {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("system", &self.info.system)
            .field("setup", &self.info.setup)
            .field("caps", &self.caps)
            .field("released", &self.is_released())
            .finish()
    }
}
