//! `OSStatus` values of Core Audio

use unison_audio_core::{ErrorKind, NativeCode, NativeError};

/// Big-endian four character code
const fn fourcc(code: &[u8; 4]) -> i64 {
    u32::from_be_bytes(*code) as i64
}

pub mod status {
    use super::fourcc;

    pub const NOT_RUNNING: i64 = fourcc(b"stop");
    pub const UNSPECIFIED: i64 = fourcc(b"what");
    pub const UNKNOWN_PROPERTY: i64 = fourcc(b"who?");
    pub const BAD_PROPERTY_SIZE: i64 = fourcc(b"!siz");
    pub const ILLEGAL_OPERATION: i64 = fourcc(b"nope");
    pub const BAD_OBJECT: i64 = fourcc(b"!obj");
    pub const BAD_DEVICE: i64 = fourcc(b"!dev");
    pub const BAD_STREAM: i64 = fourcc(b"!str");
    pub const UNSUPPORTED_FORMAT: i64 = fourcc(b"!dat");
    pub const PERMISSIONS: i64 = fourcc(b"!hog");
    pub const PARAM_ERR: i64 = -50;
}

pub(crate) fn translate(code: NativeCode) -> NativeError {
    let (kind, text) = match code {
        status::BAD_DEVICE | status::BAD_OBJECT => (ErrorKind::DeviceNotFound, "no such device"),
        status::UNSUPPORTED_FORMAT => (ErrorKind::UnsupportedFormat, "unsupported stream format"),
        status::PARAM_ERR | status::BAD_PROPERTY_SIZE => {
            (ErrorKind::UnsupportedFormat, "invalid parameter")
        }
        status::PERMISSIONS => (ErrorKind::DeviceBusy, "device is hogged by another process"),
        status::NOT_RUNNING => (ErrorKind::OpenError, "hardware not running"),
        status::ILLEGAL_OPERATION => (ErrorKind::OpenError, "illegal operation"),
        status::BAD_STREAM => (ErrorKind::OpenError, "bad stream"),
        status::UNKNOWN_PROPERTY => (ErrorKind::BackendError, "unknown property"),
        status::UNSPECIFIED => (ErrorKind::BackendError, "unspecified hardware error"),
        _ => return NativeError::unknown(code),
    };
    NativeError::new(kind, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc() {
        assert_eq!(status::BAD_DEVICE, 0x2164_6576);
        assert_eq!(status::UNSUPPORTED_FORMAT, 0x2164_6174);
        assert_eq!(status::PERMISSIONS, 0x2168_6F67);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(translate(status::BAD_DEVICE).kind, ErrorKind::DeviceNotFound);
        assert_eq!(translate(status::PERMISSIONS).kind, ErrorKind::DeviceBusy);
        assert_eq!(translate(status::PARAM_ERR).kind, ErrorKind::UnsupportedFormat);
        assert_eq!(translate(status::NOT_RUNNING).kind, ErrorKind::OpenError);
        assert_eq!(translate(12345).kind, ErrorKind::BackendError);
    }
}
