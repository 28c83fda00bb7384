#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use unison_audio_core::mock::{MockBackend, MockControl, MockDevice, MockSystem};
use unison_audio_core::{Backend, Diagnostic, PlatformRegistry, RegistryConfig, Setup};

// A registry is process-wide; tests in one binary take turns
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Fixture {
    pub registry: PlatformRegistry,
    pub a: Arc<MockControl>,
    pub b: Arc<MockControl>,
    pub diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

/// System "A" with two devices, "B" with one
pub fn mock_backend() -> (MockBackend, Arc<MockControl>, Arc<MockControl>) {
    let a = MockSystem::new("A", Setup::SystemAudio)
        .with_device(MockDevice::duplex("a0", "Built-in Audio", 2, 2).default_output())
        .with_device(MockDevice::input("a1", "USB Microphone", 1).default_input());
    let b = MockSystem::new("B", Setup::ProAudio)
        .with_device(MockDevice::output("b0", "Interface", 8));
    let (a_control, b_control) = (a.control(), b.control());

    let backend = MockBackend::new("mock").with_system(a).with_system(b);
    (backend, a_control, b_control)
}

pub fn fixture_with(config: RegistryConfig, extra: Vec<Box<dyn Backend>>) -> Fixture {
    let diagnostics = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&diagnostics);
    let config = config.with_diagnostics(move |d| sink.lock().unwrap().push(d.clone()));

    let (backend, a, b) = mock_backend();
    let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(backend)];
    backends.extend(extra);

    let registry = PlatformRegistry::initialize(config, backends).unwrap();
    Fixture {
        registry,
        a,
        b,
        diagnostics,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(RegistryConfig::default(), Vec::new())
}

/// Polls `condition` for up to two seconds
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
