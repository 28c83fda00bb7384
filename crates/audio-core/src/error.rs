use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::system::System;

/// Code reported by a native audio subsystem (errno, HRESULT, OSStatus, ...)
pub type NativeCode = i64;

/// Uniform classification of every failure the abstraction layer can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoBackendsAvailable,
    AlreadyInitialized,
    UnknownSystem,
    RegistryClosed,
    Disposed,
    EnumerationError,
    IndexOutOfRange,
    UnknownId,
    StaleDeviceId,
    UnsupportedFormat,
    DeviceNotFound,
    DeviceBusy,
    OpenError,
    StreamClosed,
    BackendTimeout,
    BackendError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoBackendsAvailable => "no backends available",
            Self::AlreadyInitialized => "registry already initialized",
            Self::UnknownSystem => "unknown system",
            Self::RegistryClosed => "registry closed",
            Self::Disposed => "service disposed",
            Self::EnumerationError => "device enumeration failed",
            Self::IndexOutOfRange => "index out of range",
            Self::UnknownId => "unknown device id",
            Self::StaleDeviceId => "stale device id",
            Self::UnsupportedFormat => "unsupported format",
            Self::DeviceNotFound => "device not found",
            Self::DeviceBusy => "device busy",
            Self::OpenError => "failed to open stream",
            Self::StreamClosed => "stream closed",
            Self::BackendTimeout => "backend timed out",
            Self::BackendError => "backend error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible operation of the crate.
///
/// Carries the [`ErrorKind`], the native code when the failure originated in
/// a backend, the system it belongs to and a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{kind}: {message}{}", SystemPrefix(.system.as_ref()), CodeSuffix(.code.as_ref().copied()))]
pub struct AudioError {
    kind: ErrorKind,
    code: Option<NativeCode>,
    system: Option<System>,
    message: String,
}

impl AudioError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            system: None,
            message: message.into(),
        }
    }

    pub(crate) fn with_system(mut self, system: &System) -> Self {
        self.system = Some(system.clone());
        self
    }

    pub(crate) fn with_code(mut self, code: NativeCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Native code, present when the error was translated from a backend status
    pub fn code(&self) -> Option<NativeCode> {
        self.code
    }

    pub fn system(&self) -> Option<&System> {
        self.system.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

struct SystemPrefix<'a>(Option<&'a System>);

impl fmt::Display for SystemPrefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(system) => write!(f, "[{system}] "),
            None => Ok(()),
        }
    }
}

struct CodeSuffix(Option<NativeCode>);

impl fmt::Display for CodeSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, " (code {code})"),
            None => Ok(()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Failure reported by a backend adapter, before translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFault {
    /// Raw status code of the native subsystem
    Native(NativeCode),
    /// Failure the adapter already classified, e.g. from a wrapper library
    Classified { kind: ErrorKind, message: String },
}

impl BackendFault {
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Classified {
            kind,
            message: message.into(),
        }
    }
}

/// Result of translating a native code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub kind: ErrorKind,
    pub text: Cow<'static, str>,
}

impl NativeError {
    pub fn new(kind: ErrorKind, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Fallback for codes a translation table does not know
    pub fn unknown(code: NativeCode) -> Self {
        Self::new(
            ErrorKind::BackendError,
            format!("unrecognized native status {code}"),
        )
    }
}
