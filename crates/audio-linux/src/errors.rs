//! Native status codes of the Linux audio systems

use unison_audio_core::{ErrorKind, NativeCode, NativeError, System};

/// Negative errno values returned by alsa-lib
pub mod alsa {
    pub const EPERM: i64 = -1;
    pub const ENOENT: i64 = -2;
    pub const EINTR: i64 = -4;
    pub const EIO: i64 = -5;
    pub const EAGAIN: i64 = -11;
    pub const ENOMEM: i64 = -12;
    pub const EACCES: i64 = -13;
    pub const EBUSY: i64 = -16;
    pub const ENODEV: i64 = -19;
    pub const EINVAL: i64 = -22;
    pub const EPIPE: i64 = -32;
    pub const ENOSYS: i64 = -38;
    pub const ETIMEDOUT: i64 = -110;
    pub const ESTRPIPE: i64 = -86;
}

/// `jack_status_t` bits
pub mod jack {
    pub const FAILURE: i64 = 0x01;
    pub const INVALID_OPTION: i64 = 0x02;
    pub const NAME_NOT_UNIQUE: i64 = 0x04;
    pub const SERVER_FAILED: i64 = 0x10;
    pub const SERVER_ERROR: i64 = 0x20;
    pub const NO_SUCH_CLIENT: i64 = 0x40;
    pub const LOAD_FAILURE: i64 = 0x80;
    pub const INIT_FAILURE: i64 = 0x100;
    pub const SHM_FAILURE: i64 = 0x200;
    pub const VERSION_ERROR: i64 = 0x400;
    pub const BACKEND_ERROR: i64 = 0x800;
    pub const CLIENT_ZOMBIE: i64 = 0x1000;
}

/// `pa_error_code` values
pub mod pulse {
    pub const ACCESS: i64 = 1;
    pub const INVALID: i64 = 3;
    pub const EXIST: i64 = 4;
    pub const NOENTITY: i64 = 5;
    pub const CONNECTION_REFUSED: i64 = 6;
    pub const PROTOCOL: i64 = 7;
    pub const TIMEOUT: i64 = 8;
    pub const INTERNAL: i64 = 10;
    pub const CONNECTION_TERMINATED: i64 = 11;
    pub const KILLED: i64 = 12;
    pub const INVALID_SERVER: i64 = 13;
    pub const BAD_STATE: i64 = 15;
    pub const NOT_SUPPORTED: i64 = 19;
    pub const IO: i64 = 25;
    pub const BUSY: i64 = 26;
}

fn alsa_error(code: NativeCode) -> NativeError {
    let (kind, text) = match code {
        alsa::EBUSY | alsa::EAGAIN => (ErrorKind::DeviceBusy, "device or resource busy"),
        alsa::ENODEV | alsa::ENOENT => (ErrorKind::DeviceNotFound, "no such device"),
        alsa::EINVAL => (ErrorKind::UnsupportedFormat, "invalid argument"),
        alsa::ENOSYS => (ErrorKind::UnsupportedFormat, "operation not supported"),
        alsa::ETIMEDOUT => (ErrorKind::BackendTimeout, "timed out"),
        alsa::EPERM | alsa::EACCES => (ErrorKind::OpenError, "permission denied"),
        alsa::ENOMEM => (ErrorKind::OpenError, "out of memory"),
        alsa::EPIPE => (ErrorKind::BackendError, "broken pipe (xrun)"),
        alsa::ESTRPIPE => (ErrorKind::BackendError, "stream suspended"),
        alsa::EINTR => (ErrorKind::BackendError, "interrupted system call"),
        alsa::EIO => (ErrorKind::BackendError, "input/output error"),
        _ => return NativeError::unknown(code),
    };
    NativeError::new(kind, text)
}

fn pulse_error(code: NativeCode) -> NativeError {
    let (kind, text) = match code {
        pulse::BUSY | pulse::EXIST => (ErrorKind::DeviceBusy, "device or resource busy"),
        pulse::NOENTITY => (ErrorKind::DeviceNotFound, "no such entity"),
        pulse::INVALID | pulse::NOT_SUPPORTED => (ErrorKind::UnsupportedFormat, "invalid argument"),
        pulse::TIMEOUT => (ErrorKind::BackendTimeout, "timeout"),
        pulse::ACCESS => (ErrorKind::OpenError, "access failure"),
        pulse::CONNECTION_REFUSED | pulse::INVALID_SERVER => {
            (ErrorKind::OpenError, "connection refused")
        }
        pulse::BAD_STATE => (ErrorKind::OpenError, "bad state"),
        pulse::PROTOCOL => (ErrorKind::BackendError, "protocol error"),
        pulse::INTERNAL => (ErrorKind::BackendError, "internal error"),
        pulse::CONNECTION_TERMINATED | pulse::KILLED => {
            (ErrorKind::BackendError, "connection terminated")
        }
        pulse::IO => (ErrorKind::BackendError, "input/output error"),
        _ => return NativeError::unknown(code),
    };
    NativeError::new(kind, text)
}

/// Status words may carry several bits; the most specific one wins
fn jack_error(code: NativeCode) -> NativeError {
    const TABLE: &[(i64, ErrorKind, &str)] = &[
        (jack::SERVER_FAILED, ErrorKind::OpenError, "unable to connect to the JACK server"),
        (jack::SERVER_ERROR, ErrorKind::BackendError, "communication error with the JACK server"),
        (jack::NO_SUCH_CLIENT, ErrorKind::DeviceNotFound, "requested client does not exist"),
        (jack::NAME_NOT_UNIQUE, ErrorKind::DeviceBusy, "client name not unique"),
        (jack::INVALID_OPTION, ErrorKind::UnsupportedFormat, "invalid or unsupported option"),
        (jack::LOAD_FAILURE, ErrorKind::OpenError, "unable to load internal client"),
        (jack::INIT_FAILURE, ErrorKind::OpenError, "unable to initialize client"),
        (jack::SHM_FAILURE, ErrorKind::OpenError, "unable to access shared memory"),
        (jack::VERSION_ERROR, ErrorKind::OpenError, "client protocol version mismatch"),
        (jack::BACKEND_ERROR, ErrorKind::BackendError, "JACK backend error"),
        (jack::CLIENT_ZOMBIE, ErrorKind::BackendTimeout, "client was zombified"),
        (jack::FAILURE, ErrorKind::BackendError, "overall operation failed"),
    ];

    TABLE
        .iter()
        .find(|(bit, _, _)| code & bit != 0)
        .map(|(_, kind, text)| NativeError::new(*kind, *text))
        .unwrap_or_else(|| NativeError::unknown(code))
}

pub(crate) fn translate(system: &System, code: NativeCode) -> NativeError {
    let error = if *system == System::JACK {
        jack_error(code)
    } else if *system == System::PULSE_AUDIO {
        pulse_error(code)
    } else {
        alsa_error(code)
    };
    if error.kind == ErrorKind::BackendError {
        tracing::trace!(%system, code, "{}", error.text);
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alsa_codes() {
        let kind = |code| translate(&System::ALSA, code).kind;
        assert_eq!(kind(alsa::EBUSY), ErrorKind::DeviceBusy);
        assert_eq!(kind(alsa::ENODEV), ErrorKind::DeviceNotFound);
        assert_eq!(kind(alsa::EINVAL), ErrorKind::UnsupportedFormat);
        assert_eq!(kind(alsa::ETIMEDOUT), ErrorKind::BackendTimeout);
        assert_eq!(kind(alsa::EACCES), ErrorKind::OpenError);
        assert_eq!(kind(-9999), ErrorKind::BackendError);
    }

    #[test]
    fn test_pulse_codes() {
        let kind = |code| translate(&System::PULSE_AUDIO, code).kind;
        assert_eq!(kind(pulse::BUSY), ErrorKind::DeviceBusy);
        assert_eq!(kind(pulse::NOENTITY), ErrorKind::DeviceNotFound);
        assert_eq!(kind(pulse::CONNECTION_REFUSED), ErrorKind::OpenError);
        // same number, different system
        assert_eq!(kind(pulse::TIMEOUT), ErrorKind::BackendTimeout);
        assert_eq!(translate(&System::JACK, pulse::TIMEOUT).kind, ErrorKind::BackendError);
    }

    #[test]
    fn test_jack_status_bits() {
        let kind = |code| translate(&System::JACK, code).kind;
        assert_eq!(kind(jack::FAILURE | jack::SERVER_FAILED), ErrorKind::OpenError);
        assert_eq!(kind(jack::FAILURE | jack::NAME_NOT_UNIQUE), ErrorKind::DeviceBusy);
        assert_eq!(kind(jack::FAILURE), ErrorKind::BackendError);
        assert_eq!(kind(0), ErrorKind::BackendError);
    }
}
