use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{translate, Backend};
use crate::config::RegistryConfig;
use crate::diagnostics::{DiagnosticLevel, Diagnostics};
use crate::error::{AudioError, BackendFault, ErrorKind, Result};
use crate::service::Service;
use crate::system::{Setup, System, SystemInfo};

/// Set while a registry is alive; at most one per process
static LIVE: AtomicBool = AtomicBool::new(false);

/// Holds [`LIVE`] during initialization; gives it back unless kept
struct Claim {
    kept: bool,
}

impl Claim {
    fn take() -> Option<Self> {
        LIVE.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { kept: false })
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.kept {
            LIVE.store(false, Ordering::SeqCst);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// State outliving the registry, shared with every service and stream it
/// produced
#[derive(Debug)]
pub(crate) struct RegistryShared {
    open: AtomicBool,
    running_streams: AtomicUsize,
}

impl RegistryShared {
    pub(crate) fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            running_streams: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn stream_started(&self) {
        self.running_streams.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn stream_stopped(&self) {
        self.running_streams.fetch_sub(1, Ordering::SeqCst);
    }

    fn close(&self) -> usize {
        self.open.store(false, Ordering::SeqCst);
        self.running_streams.load(Ordering::SeqCst)
    }
}

struct Entry {
    info: SystemInfo,
    backend: Arc<dyn Backend>,
}

/// Process-wide set of available audio systems.
///
/// Created once with [`initialize`](Self::initialize) and torn down with
/// [`terminate`](Self::terminate) or by dropping it. `get_service` may be
/// called concurrently from several threads.
pub struct PlatformRegistry {
    entries: Vec<Entry>,
    systems: Vec<System>,
    config: RegistryConfig,
    shared: Arc<RegistryShared>,
    diagnostics: Diagnostics,
}

impl PlatformRegistry {
    /// Probes every backend and records the systems that loaded.
    ///
    /// Backends that fail to probe, or panic doing so, are omitted with a
    /// diagnostic. Systems
    /// named in `preferred_order` come first; the rest keep detection order.
    pub fn initialize(config: RegistryConfig, backends: Vec<Box<dyn Backend>>) -> Result<Self> {
        let Some(claim) = Claim::take() else {
            return Err(AudioError::new(
                ErrorKind::AlreadyInitialized,
                "a platform registry is already live in this process",
            ));
        };

        let diagnostics = Diagnostics::new(config.diagnostics.clone());
        let mut entries: Vec<Entry> = Vec::new();

        for backend in backends {
            let backend: Arc<dyn Backend> = Arc::from(backend);
            let infos = match panic::catch_unwind(AssertUnwindSafe(|| backend.probe())) {
                Ok(Ok(infos)) => infos,
                Ok(Err(fault)) => {
                    diagnostics.warn(
                        None,
                        format!("Backend {} failed to load: {}", backend.name(), describe(&fault)),
                    );
                    continue;
                }
                Err(payload) => {
                    diagnostics.warn(
                        None,
                        format!(
                            "Backend {} panicked while loading: {}",
                            backend.name(),
                            panic_message(payload.as_ref())
                        ),
                    );
                    continue;
                }
            };

            for info in infos {
                if entries.iter().any(|entry| entry.info.system == info.system) {
                    diagnostics.debug(
                        Some(&info.system),
                        format!("Already provided by another backend, ignoring {}", backend.name()),
                    );
                    continue;
                }
                diagnostics.emit(
                    DiagnosticLevel::Info,
                    Some(&info.system),
                    format!("Detected via {} ({:?})", backend.name(), info.setup),
                );
                entries.push(Entry {
                    info,
                    backend: Arc::clone(&backend),
                });
            }
        }

        let rank = |system: &System| {
            config
                .preferred_order
                .iter()
                .position(|preferred| preferred == system)
                .unwrap_or(usize::MAX)
        };
        entries.sort_by_key(|entry| rank(&entry.info.system));

        if entries.is_empty() {
            return Err(AudioError::new(
                ErrorKind::NoBackendsAvailable,
                "no audio backend could be loaded",
            ));
        }

        let systems = entries.iter().map(|entry| entry.info.system.clone()).collect();
        tracing::debug!(?systems, "Platform registry initialized");

        claim.keep();
        Ok(Self {
            entries,
            systems,
            config,
            shared: Arc::new(RegistryShared::new()),
            diagnostics,
        })
    }

    /// Available systems, in registry order
    pub fn systems(&self) -> &[System] {
        &self.systems
    }

    pub fn setup(&self, system: &System) -> Option<Setup> {
        self.entry(system).map(|entry| entry.info.setup)
    }

    /// First system, in registry order, of the given setup
    pub fn setup_to_system(&self, setup: Setup) -> Option<&System> {
        self.entries
            .iter()
            .find(|entry| entry.info.setup == setup)
            .map(|entry| &entry.info.system)
    }

    fn entry(&self, system: &System) -> Option<&Entry> {
        self.entries.iter().find(|entry| &entry.info.system == system)
    }

    /// Opens a new service for `system`
    pub fn get_service(&self, system: &System) -> Result<Service> {
        let entry = self.entry(system).ok_or_else(|| {
            AudioError::new(ErrorKind::UnknownSystem, format!("{system} is not available"))
        })?;

        let session = entry
            .backend
            .connect(system, &self.config.session())
            .map_err(|fault| translate(entry.backend.as_ref(), system, fault))?;

        Ok(Service::new(
            entry.info.clone(),
            Arc::clone(&entry.backend),
            session,
            Arc::clone(&self.shared),
            self.diagnostics.clone(),
            self.config.enumeration_retries,
        ))
    }

    /// Tears down the registry. Services still held become orphaned and fail
    /// with `RegistryClosed`.
    pub fn terminate(self) {}
}

fn describe(fault: &BackendFault) -> String {
    match fault {
        BackendFault::Native(code) => format!("native status {code}"),
        BackendFault::Classified { kind, message } => format!("{kind}: {message}"),
    }
}

impl Drop for PlatformRegistry {
    fn drop(&mut self) {
        let running = self.shared.close();
        if running > 0 {
            self.diagnostics.warn(
                None,
                format!("Registry released with {running} stream(s) still running; they are leaked"),
            );
        }
        tracing::debug!("Platform registry terminated");
        LIVE.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("systems", &self.systems)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockDevice, MockSystem};
    use std::sync::Mutex;

    // Registries are process-wide; tests in this binary take turns
    static SERIAL: Mutex<()> = Mutex::new(());

    fn backend() -> Box<dyn Backend> {
        Box::new(
            MockBackend::new("mock")
                .with_system(
                    MockSystem::new("A", Setup::SystemAudio)
                        .with_device(MockDevice::output("a0", "Speakers", 2)),
                )
                .with_system(MockSystem::new("B", Setup::ProAudio)),
        )
    }

    #[test]
    fn test_second_registry_is_rejected() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let registry = PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).unwrap();
        let err = PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);

        registry.terminate();
        let again = PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]);
        assert!(again.is_ok());
    }

    #[test]
    fn test_no_backends() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let failing: Box<dyn Backend> = Box::new(MockBackend::new("broken").failing_probe());
        let err = PlatformRegistry::initialize(RegistryConfig::default(), vec![failing]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBackendsAvailable);

        // A failed initialization does not hold the slot
        assert!(PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).is_ok());
    }

    struct Crashing;

    impl Backend for Crashing {
        fn name(&self) -> &str {
            "crashing"
        }

        fn probe(&self) -> crate::BackendResult<Vec<SystemInfo>> {
            panic!("driver crashed");
        }

        fn connect(
            &self,
            _: &System,
            _: &crate::SessionConfig,
        ) -> crate::BackendResult<Box<dyn crate::Session>> {
            Err(BackendFault::classified(ErrorKind::BackendError, "unreachable"))
        }

        fn translate_error(&self, _: &System, code: crate::NativeCode) -> crate::NativeError {
            crate::NativeError::unknown(code)
        }
    }

    #[test]
    fn test_panicking_backend_is_omitted() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let config = RegistryConfig::default()
            .with_diagnostics(move |d| sink.lock().unwrap().push(d.message.clone()));

        let crashing: Box<dyn Backend> = Box::new(Crashing);
        let registry = PlatformRegistry::initialize(config, vec![crashing, backend()]).unwrap();
        assert_eq!(registry.systems(), &[System::from("A"), System::from("B")]);
        assert!(messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("crashing panicked") && m.contains("driver crashed")));
        registry.terminate();

        let crashing: Box<dyn Backend> = Box::new(Crashing);
        let err = PlatformRegistry::initialize(RegistryConfig::default(), vec![crashing]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBackendsAvailable);
        assert!(PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).is_ok());
    }

    #[test]
    fn test_panic_during_initialize_releases_the_slot() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let config = RegistryConfig::default().with_diagnostics(|d| {
            if d.message.starts_with("Detected") {
                panic!("sink failed");
            }
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            PlatformRegistry::initialize(config, vec![backend()])
        }));
        assert!(result.is_err());
        assert!(PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).is_ok());
    }

    #[test]
    fn test_setup_lookup() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let registry = PlatformRegistry::initialize(RegistryConfig::default(), vec![backend()]).unwrap();
        assert_eq!(registry.setup_to_system(Setup::ProAudio), Some(&System::from("B")));
        assert_eq!(registry.setup_to_system(Setup::ConsumerAudio), None);
        assert_eq!(registry.setup(&System::from("A")), Some(Setup::SystemAudio));
    }

    #[test]
    fn test_registry_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<PlatformRegistry>();
    }
}
