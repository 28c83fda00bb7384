//! In-process backend for tests and examples
//!
//! [`MockBackend`] serves any number of [`MockSystem`]s, each with a fixed
//! set of [`MockDevice`]s. Streams run on an
//! [`ExecutionContext`](crate::rt::ExecutionContext) ticking at the
//! negotiated buffer period. Failures are injected at runtime through the
//! system's [`MockControl`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{Backend, BackendResult, NativeDevice, NativeStream, Session};
use crate::buffer::{NativeIo, Processor};
use crate::config::SessionConfig;
use crate::error::{BackendFault, ErrorKind, NativeCode, NativeError};
use crate::format::{
    Access, BufferSizeRange, Capabilities, ChannelRange, Direction, Latency, Mix,
    NegotiatedFormat, SampleEncoding,
};
use crate::lock;
use crate::rt::{ContextConfig, ExecutionContext};
use crate::system::{ServiceCaps, Setup, System, SystemInfo};

/// Native status codes reported by the mock, errno style
pub mod codes {
    pub const EIO: i64 = -5;
    pub const EBUSY: i64 = -16;
    pub const ENODEV: i64 = -19;
    pub const EINVAL: i64 = -22;
    pub const ETIMEDOUT: i64 = -110;
}

/// Rates {44100, 48000}, Int16 and Float32, interleaved access only
pub fn standard_capabilities(inputs: u16, outputs: u16) -> Capabilities {
    Capabilities {
        sample_rates: [44_100, 48_000].into_iter().collect(),
        encodings: [SampleEncoding::Int16, SampleEncoding::Float32]
            .into_iter()
            .collect(),
        input_channels: ChannelRange::up_to(inputs),
        output_channels: ChannelRange::up_to(outputs),
        buffer_frames: BufferSizeRange::new(32, 4096, 256),
        access: Access::INTERLEAVED,
    }
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    id: String,
    name: String,
    capabilities: Capabilities,
    default_input: bool,
    default_output: bool,
    mix: Option<Mix>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    fail_query: bool,
}

impl MockDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities,
            default_input: false,
            default_output: false,
            mix: None,
            input_names: Vec::new(),
            output_names: Vec::new(),
            fail_query: false,
        }
    }

    pub fn output(id: impl Into<String>, name: impl Into<String>, channels: u16) -> Self {
        Self::new(id, name, standard_capabilities(0, channels))
    }

    pub fn input(id: impl Into<String>, name: impl Into<String>, channels: u16) -> Self {
        Self::new(id, name, standard_capabilities(channels, 0))
    }

    pub fn duplex(id: impl Into<String>, name: impl Into<String>, inputs: u16, outputs: u16) -> Self {
        Self::new(id, name, standard_capabilities(inputs, outputs))
    }

    pub fn default_input(mut self) -> Self {
        self.default_input = true;
        self
    }

    pub fn default_output(mut self) -> Self {
        self.default_output = true;
        self
    }

    pub fn with_mix(mut self, sample_rate: u32, encoding: SampleEncoding) -> Self {
        self.mix = Some(Mix::new(sample_rate, encoding));
        self
    }

    /// Names reported for the leading channels of `direction`
    pub fn with_channel_names<S: Into<String>>(
        mut self,
        direction: Direction,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        let names = names.into_iter().map(Into::into).collect();
        match direction {
            Direction::Input => self.input_names = names,
            Direction::Output => self.output_names = names,
        }
        self
    }

    /// Every query of this device fails, as if it vanished mid-enumeration
    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    fn native(&self) -> NativeDevice {
        NativeDevice {
            id: self.id.clone(),
            name: self.name.clone(),
            default_input: self.default_input,
            default_output: self.default_output,
            mix: self.mix,
            input_names: self.input_names.clone(),
            output_names: self.output_names.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Runtime knobs of one mock system, shared by every session of it
#[derive(Debug, Default)]
pub struct MockControl {
    enumeration_failures: AtomicU32,
    duplicate_glitches: AtomicU32,
    start_delay_ms: AtomicU64,
    xrun_every: AtomicU64,
    busy: Mutex<HashSet<String>>,
    unplugged: Mutex<HashSet<String>>,
}

impl MockControl {
    /// The next `count` enumerations fail as a whole
    pub fn fail_enumerations(&self, count: u32) {
        self.enumeration_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` enumerations report their first device twice
    pub fn glitch_duplicates(&self, count: u32) {
        self.duplicate_glitches.store(count, Ordering::SeqCst);
    }

    /// Delay before a started stream becomes ready
    pub fn set_start_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.start_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Streams started afterwards report an xrun every `ticks` periods; `0`
    /// disables
    pub fn inject_xruns(&self, ticks: u64) {
        self.xrun_every.store(ticks, Ordering::SeqCst);
    }

    pub fn unplug(&self, device: &str) {
        lock(&self.unplugged).insert(device.to_string());
    }

    pub fn replug(&self, device: &str) {
        lock(&self.unplugged).remove(device);
    }

    /// Whether a stream currently holds the device
    pub fn is_busy(&self, device: &str) -> bool {
        lock(&self.busy).contains(device)
    }

    pub fn open_streams(&self) -> usize {
        lock(&self.busy).len()
    }

    fn is_unplugged(&self, device: &str) -> bool {
        lock(&self.unplugged).contains(device)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug)]
pub struct MockSystem {
    info: SystemInfo,
    caps: ServiceCaps,
    devices: Vec<MockDevice>,
    control: Arc<MockControl>,
}

impl MockSystem {
    /// A system supporting every service capability
    pub fn new(name: impl Into<String>, setup: Setup) -> Self {
        Self {
            info: SystemInfo::new(System::new(name), setup),
            caps: ServiceCaps::TIME
                | ServiceCaps::LATENCY
                | ServiceCaps::FULL_DUPLEX
                | ServiceCaps::CHANNEL_MASK
                | ServiceCaps::XRUN_DETECTION,
            devices: Vec::new(),
            control: Arc::default(),
        }
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_caps(mut self, caps: ServiceCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn system(&self) -> &System {
        &self.info.system
    }

    pub fn control(&self) -> Arc<MockControl> {
        Arc::clone(&self.control)
    }
}

#[derive(Debug)]
pub struct MockBackend {
    name: String,
    systems: Vec<Arc<MockSystem>>,
    fail_probe: bool,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            systems: Vec::new(),
            fail_probe: false,
        }
    }

    pub fn with_system(mut self, system: MockSystem) -> Self {
        self.systems.push(Arc::new(system));
        self
    }

    /// Probing fails, as for a backend whose native library is missing
    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> BackendResult<Vec<SystemInfo>> {
        if self.fail_probe {
            return Err(BackendFault::Native(codes::ENODEV));
        }
        Ok(self.systems.iter().map(|s| s.info.clone()).collect())
    }

    fn connect(&self, system: &System, config: &SessionConfig) -> BackendResult<Box<dyn Session>> {
        let system = self
            .systems
            .iter()
            .find(|s| &s.info.system == system)
            .ok_or_else(|| {
                BackendFault::classified(ErrorKind::UnknownSystem, format!("{system} not served by {}", self.name))
            })?;

        Ok(Box::new(MockSession {
            system: Arc::clone(system),
            config: *config,
        }))
    }

    fn translate_error(&self, _system: &System, code: NativeCode) -> NativeError {
        match code {
            codes::EIO => NativeError::new(ErrorKind::BackendError, "input/output error"),
            codes::EBUSY => NativeError::new(ErrorKind::DeviceBusy, "device or resource busy"),
            codes::ENODEV => NativeError::new(ErrorKind::DeviceNotFound, "no such device"),
            codes::EINVAL => NativeError::new(ErrorKind::UnsupportedFormat, "invalid argument"),
            codes::ETIMEDOUT => NativeError::new(ErrorKind::BackendTimeout, "timed out"),
            _ => NativeError::unknown(code),
        }
    }
}

struct MockSession {
    system: Arc<MockSystem>,
    config: SessionConfig,
}

impl Session for MockSession {
    fn capabilities(&self) -> ServiceCaps {
        self.system.caps
    }

    fn enumerate_devices(&mut self) -> BackendResult<Vec<BackendResult<NativeDevice>>> {
        let control = &self.system.control;
        if take_one(&control.enumeration_failures) {
            return Err(BackendFault::Native(codes::EIO));
        }

        let mut devices: Vec<_> = self
            .system
            .devices
            .iter()
            .filter(|device| !control.is_unplugged(&device.id))
            .map(|device| {
                if device.fail_query {
                    Err(BackendFault::Native(codes::ENODEV))
                } else {
                    Ok(device.native())
                }
            })
            .collect();

        if take_one(&control.duplicate_glitches) {
            if let Some(Ok(first)) = devices.first().cloned() {
                devices.push(Ok(first));
            }
        }

        Ok(devices)
    }

    fn open_stream(
        &mut self,
        device: &str,
        format: &NegotiatedFormat,
        processor: Processor,
    ) -> BackendResult<Box<dyn NativeStream>> {
        let control = &self.system.control;
        let known = self
            .system
            .devices
            .iter()
            .any(|d| d.id == device && !d.fail_query);
        if !known || control.is_unplugged(device) {
            return Err(BackendFault::Native(codes::ENODEV));
        }

        if !lock(&control.busy).insert(device.to_string()) {
            return Err(BackendFault::Native(codes::EBUSY));
        }

        Ok(Box::new(MockStream {
            device: device.to_string(),
            system: Arc::clone(&self.system),
            format: *format,
            start_timeout: self.config.start_timeout,
            processor: Some(processor),
            running: None,
            abandoned: None,
        }))
    }
}

/// State owned by the mock's real-time thread
struct MockRt {
    processor: Processor,
    input: Vec<u8>,
    output: Vec<u8>,
    frames: usize,
    ticks: u64,
    xrun_every: u64,
    timed: bool,
}

impl MockRt {
    fn tick(&mut self) {
        let format = *self.processor.format();
        let elapsed = self.ticks * self.frames as u64;
        let time = self
            .timed
            .then(|| Duration::from_secs_f64(elapsed as f64 / f64::from(format.sample_rate)));

        self.ticks += 1;
        if self.xrun_every > 0 && self.ticks % self.xrun_every == 0 {
            self.processor.xrun();
        }

        self.processor.process(NativeIo {
            frames: self.frames,
            time,
            input: Some(&self.input),
            output: Some(&mut self.output),
        });
    }
}

struct MockStream {
    device: String,
    system: Arc<MockSystem>,
    format: NegotiatedFormat,
    start_timeout: Duration,
    processor: Option<Processor>,
    running: Option<ExecutionContext<MockRt>>,
    /// Context that missed its start deadline, joined before the next start
    abandoned: Option<ExecutionContext<MockRt>>,
}

impl MockStream {
    fn lost() -> BackendFault {
        BackendFault::classified(ErrorKind::BackendError, "stream lost its real-time state")
    }
}

impl NativeStream for MockStream {
    fn start(&mut self) -> BackendResult<()> {
        if self.running.is_some() {
            return Ok(());
        }
        if let Some(ctx) = self.abandoned.take() {
            self.processor = ctx.join().map(|rt| rt.processor);
        }
        let processor = self.processor.take().ok_or_else(Self::lost)?;

        let control = &self.system.control;
        let frames = self.format.buffer_frames.max(1) as usize;
        let rate = self.format.sample_rate.max(1);
        let silence = self.format.encoding.silence();
        let rt = MockRt {
            processor,
            input: vec![silence; frames * self.format.frame_bytes(Direction::Input)],
            output: vec![silence; frames * self.format.frame_bytes(Direction::Output)],
            frames,
            ticks: 0,
            xrun_every: control.xrun_every.load(Ordering::SeqCst),
            timed: self.system.caps.contains(ServiceCaps::TIME),
        };

        let delay = Duration::from_millis(control.start_delay_ms.load(Ordering::SeqCst));
        let period = Duration::from_secs_f64(frames as f64 / f64::from(rate));
        let config = ContextConfig::new(format!("mock-{}", self.device), period)
            .with_priority(frames as u32, rate);

        let mut ctx = ExecutionContext::spawn(
            config,
            rt,
            move |_| {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                Ok(())
            },
            MockRt::tick,
        )?;

        match ctx.wait_ready(self.start_timeout) {
            Ok(()) => {
                self.running = Some(ctx);
                Ok(())
            }
            Err(fault) => {
                self.abandoned = Some(ctx);
                Err(fault)
            }
        }
    }

    fn stop(&mut self) -> BackendResult<()> {
        if let Some(ctx) = self.running.take() {
            self.processor = ctx.join().map(|rt| rt.processor);
            if self.processor.is_none() {
                return Err(Self::lost());
            }
        }
        Ok(())
    }

    fn latency(&self) -> BackendResult<Latency> {
        let frames = self.format.buffer_frames;
        Ok(Latency {
            input_frames: if self.format.input_channels > 0 { frames } else { 0 },
            output_frames: if self.format.output_channels > 0 { frames * 2 } else { 0 },
        })
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        // Join before handing the device back
        drop(self.running.take());
        drop(self.abandoned.take());
        lock(&self.system.control.busy).remove(&self.device);
    }
}
