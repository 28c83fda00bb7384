use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::system::System;

/// Severity of a [`Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A non-fatal event worth reporting to the host application: a backend that
/// failed to load, a device skipped during enumeration, a leaked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub system: Option<System>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            Some(system) => write!(f, "[{system}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Callback receiving every diagnostic
pub type DiagnosticsSink = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Fans diagnostics out to `tracing` and the optional user sink
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    sink: Option<DiagnosticsSink>,
}

impl Diagnostics {
    pub(crate) fn new(sink: Option<DiagnosticsSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(
        &self,
        level: DiagnosticLevel,
        system: Option<&System>,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            level,
            system: system.cloned(),
            message: message.into(),
        };

        let system = diagnostic.system.as_ref().map(System::name).unwrap_or("-");
        match level {
            DiagnosticLevel::Debug => tracing::debug!(system, "{}", diagnostic.message),
            DiagnosticLevel::Info => tracing::info!(system, "{}", diagnostic.message),
            DiagnosticLevel::Warn => tracing::warn!(system, "{}", diagnostic.message),
            DiagnosticLevel::Error => tracing::error!(system, "{}", diagnostic.message),
        }

        if let Some(sink) = &self.sink {
            sink(&diagnostic);
        }
    }

    pub(crate) fn warn(&self, system: Option<&System>, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Warn, system, message);
    }

    pub(crate) fn debug(&self, system: Option<&System>, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Debug, system, message);
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_receives_diagnostics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let diagnostics = Diagnostics::new(Some(Arc::new(move |d: &Diagnostic| {
            sink_seen.lock().unwrap().push(d.clone());
        })));

        diagnostics.warn(Some(&System::JACK), "server not running");
        diagnostics.debug(None, "probing");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].level, DiagnosticLevel::Warn);
        assert_eq!(seen[0].to_string(), "[JACK] server not running");
        assert_eq!(seen[1].to_string(), "probing");
    }

    #[test]
    fn test_without_sink_only_logs() {
        Diagnostics::default().warn(None, "nobody listening");
    }
}
