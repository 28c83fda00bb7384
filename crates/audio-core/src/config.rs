use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::system::System;

const DEFAULT_START_TIMEOUT_MS: u64 = 2000;
const DEFAULT_ENUMERATION_RETRIES: u32 = 1;

/// Options recognized by [`PlatformRegistry::initialize`](crate::PlatformRegistry::initialize)
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Systems listed here come first in registry order, in this order
    pub preferred_order: Vec<System>,
    /// Bounded wait for a stream to come up before `BackendTimeout`
    pub start_timeout_ms: u64,
    /// Extra attempts after a failed whole-list enumeration
    pub enumeration_retries: u32,
    #[serde(skip)]
    pub diagnostics: Option<DiagnosticsSink>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            preferred_order: Vec::new(),
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            enumeration_retries: DEFAULT_ENUMERATION_RETRIES,
            diagnostics: None,
        }
    }
}

impl RegistryConfig {
    /// Parses a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_preferred_order(mut self, order: impl IntoIterator<Item = System>) -> Self {
        self.preferred_order = order.into_iter().collect();
        self
    }

    pub fn with_diagnostics(mut self, sink: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        self.diagnostics = Some(std::sync::Arc::new(sink));
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_enumeration_retries(mut self, retries: u32) -> Self {
        self.enumeration_retries = retries;
        self
    }

    pub(crate) fn session(&self) -> SessionConfig {
        SessionConfig {
            start_timeout: Duration::from_millis(self.start_timeout_ms),
        }
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("preferred_order", &self.preferred_order)
            .field("start_timeout_ms", &self.start_timeout_ms)
            .field("enumeration_retries", &self.enumeration_retries)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

/// Settings handed to a backend when a service session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub start_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert!(config.preferred_order.is_empty());
        assert_eq!(config.start_timeout_ms, 2000);
        assert_eq!(config.enumeration_retries, 1);
        assert!(config.diagnostics.is_none());
        assert_eq!(config.session(), SessionConfig::default());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            RegistryConfig::from_json(r#"{ "preferred_order": ["JACK", "ALSA"] }"#).unwrap();
        assert_eq!(config.preferred_order, vec![System::JACK, System::ALSA]);
        assert_eq!(config.start_timeout_ms, 2000);
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(RegistryConfig::from_json(r#"{ "start_timeout_ms": "soon" }"#).is_err());
    }

    #[test]
    fn test_builders() {
        let config = RegistryConfig::default()
            .with_start_timeout(Duration::from_millis(150))
            .with_enumeration_retries(0)
            .with_diagnostics(|_| {});
        assert_eq!(config.session().start_timeout, Duration::from_millis(150));
        assert_eq!(config.enumeration_retries, 0);
        assert!(format!("{config:?}").contains("diagnostics: true"));
    }
}
