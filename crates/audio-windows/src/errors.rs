//! Native status codes of the Windows audio systems

use unison_audio_core::{ErrorKind, NativeCode, NativeError, System};

/// Sign-extends a 32-bit HRESULT
const fn hresult(value: u32) -> i64 {
    value as i32 as i64
}

pub mod wasapi {
    use super::hresult;

    pub const E_NOTFOUND: i64 = hresult(0x8007_0490);
    pub const E_OUTOFMEMORY: i64 = hresult(0x8007_000E);
    pub const E_ACCESSDENIED: i64 = hresult(0x8007_0005);
    pub const AUDCLNT_E_NOT_INITIALIZED: i64 = hresult(0x8889_0001);
    pub const AUDCLNT_E_DEVICE_INVALIDATED: i64 = hresult(0x8889_0004);
    pub const AUDCLNT_E_UNSUPPORTED_FORMAT: i64 = hresult(0x8889_0008);
    pub const AUDCLNT_E_DEVICE_IN_USE: i64 = hresult(0x8889_000A);
    pub const AUDCLNT_E_SERVICE_NOT_RUNNING: i64 = hresult(0x8889_0010);
    pub const AUDCLNT_E_EXCLUSIVE_MODE_NOT_ALLOWED: i64 = hresult(0x8889_000E);
    pub const AUDCLNT_E_BUFFER_SIZE_ERROR: i64 = hresult(0x8889_0016);
    pub const AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED: i64 = hresult(0x8889_0019);
}

pub mod dsound {
    use super::hresult;

    pub const DSERR_ALLOCATED: i64 = hresult(0x8878_000A);
    pub const DSERR_BADFORMAT: i64 = hresult(0x8878_0064);
    pub const DSERR_NODRIVER: i64 = hresult(0x8878_0078);
}

/// `ASIOError` values
pub mod asio {
    pub const NOT_PRESENT: i64 = -1000;
    pub const HW_MALFUNCTION: i64 = -999;
    pub const INVALID_PARAMETER: i64 = -998;
    pub const INVALID_MODE: i64 = -997;
    pub const SP_NOT_ADVANCING: i64 = -996;
    pub const NO_CLOCK: i64 = -995;
    pub const NO_MEMORY: i64 = -994;
}

fn hresult_error(code: NativeCode) -> NativeError {
    let (kind, text) = match code {
        wasapi::AUDCLNT_E_DEVICE_IN_USE => (ErrorKind::DeviceBusy, "device already in use"),
        wasapi::AUDCLNT_E_EXCLUSIVE_MODE_NOT_ALLOWED => {
            (ErrorKind::DeviceBusy, "exclusive mode not allowed")
        }
        dsound::DSERR_ALLOCATED => (ErrorKind::DeviceBusy, "resource already allocated"),
        wasapi::AUDCLNT_E_UNSUPPORTED_FORMAT => (ErrorKind::UnsupportedFormat, "unsupported format"),
        wasapi::AUDCLNT_E_BUFFER_SIZE_ERROR | wasapi::AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED => {
            (ErrorKind::UnsupportedFormat, "invalid buffer size")
        }
        dsound::DSERR_BADFORMAT => (ErrorKind::UnsupportedFormat, "unsupported wave format"),
        wasapi::AUDCLNT_E_DEVICE_INVALIDATED => (ErrorKind::DeviceNotFound, "device invalidated"),
        wasapi::E_NOTFOUND => (ErrorKind::DeviceNotFound, "element not found"),
        dsound::DSERR_NODRIVER => (ErrorKind::DeviceNotFound, "no sound driver"),
        wasapi::AUDCLNT_E_SERVICE_NOT_RUNNING => (ErrorKind::OpenError, "audio service not running"),
        wasapi::E_ACCESSDENIED => (ErrorKind::OpenError, "access denied"),
        wasapi::E_OUTOFMEMORY => (ErrorKind::OpenError, "out of memory"),
        wasapi::AUDCLNT_E_NOT_INITIALIZED => (ErrorKind::BackendError, "client not initialized"),
        _ => return NativeError::unknown(code),
    };
    NativeError::new(kind, text)
}

fn asio_error(code: NativeCode) -> NativeError {
    let (kind, text) = match code {
        asio::NOT_PRESENT => (ErrorKind::DeviceNotFound, "hardware input or output is not present"),
        asio::HW_MALFUNCTION => (ErrorKind::BackendError, "hardware is malfunctioning"),
        asio::INVALID_PARAMETER => (ErrorKind::UnsupportedFormat, "invalid input parameter"),
        asio::INVALID_MODE => (ErrorKind::UnsupportedFormat, "hardware is in a bad mode"),
        asio::SP_NOT_ADVANCING => (ErrorKind::BackendTimeout, "sample clock is not advancing"),
        asio::NO_CLOCK => (ErrorKind::OpenError, "no clock source"),
        asio::NO_MEMORY => (ErrorKind::OpenError, "out of memory"),
        _ => return NativeError::unknown(code),
    };
    NativeError::new(kind, text)
}

pub(crate) fn translate(system: &System, code: NativeCode) -> NativeError {
    if *system == System::ASIO {
        asio_error(code)
    } else {
        hresult_error(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hresults_are_sign_extended() {
        assert!(wasapi::AUDCLNT_E_DEVICE_IN_USE < 0);
        assert_eq!(wasapi::AUDCLNT_E_DEVICE_IN_USE as u32, 0x8889_000A);
    }

    #[test]
    fn test_wasapi_codes() {
        let kind = |code| translate(&System::WASAPI, code).kind;
        assert_eq!(kind(wasapi::AUDCLNT_E_DEVICE_IN_USE), ErrorKind::DeviceBusy);
        assert_eq!(kind(wasapi::AUDCLNT_E_UNSUPPORTED_FORMAT), ErrorKind::UnsupportedFormat);
        assert_eq!(kind(wasapi::AUDCLNT_E_DEVICE_INVALIDATED), ErrorKind::DeviceNotFound);
        assert_eq!(kind(dsound::DSERR_ALLOCATED), ErrorKind::DeviceBusy);
        assert_eq!(kind(0x1234), ErrorKind::BackendError);
    }

    #[test]
    fn test_asio_codes() {
        let kind = |code| translate(&System::ASIO, code).kind;
        assert_eq!(kind(asio::NOT_PRESENT), ErrorKind::DeviceNotFound);
        assert_eq!(kind(asio::SP_NOT_ADVANCING), ErrorKind::BackendTimeout);
        assert_eq!(kind(wasapi::AUDCLNT_E_DEVICE_IN_USE), ErrorKind::BackendError);
    }
}
