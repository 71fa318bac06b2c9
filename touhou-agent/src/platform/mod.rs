//! Desktop backends for the [crate::device] traits

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "x11")]
pub mod xorg;

/// An error the display server reported asynchronously for one of our requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolError {
    pub error_code: u8,
    pub request_code: u8,
}

impl ProtocolError {
    const PRESENT: u32 = 1 << 16;

    fn pack(self) -> u32 { Self::PRESENT | (self.request_code as u32) << 8 | self.error_code as u32 }

    fn unpack(value: u32) -> Option<Self> {
        (value & Self::PRESENT != 0).then(|| Self { error_code: value as u8, request_code: (value >> 8) as u8 })
    }

    fn name(&self) -> &'static str {
        match self.error_code {
            1 => "BadRequest",
            2 => "BadValue",
            3 => "BadWindow",
            8 => "BadMatch",
            9 => "BadDrawable",
            10 => "BadAccess",
            11 => "BadAlloc",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} (code {}) in request {}", self.name(), self.error_code, self.request_code)
    }
}

/// Holds the first [ProtocolError] reported from an error callback until it is taken.
/// Later errors are dropped while one is pending.
pub struct ErrorLatch {
    slot: AtomicU32,
}

impl ErrorLatch {
    pub const fn new() -> Self { Self { slot: AtomicU32::new(0) } }

    pub fn record(
        &self,
        error: ProtocolError,
    ) {
        let _ = self.slot.compare_exchange(0, error.pack(), Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn take(&self) -> Option<ProtocolError> { ProtocolError::unpack(self.slot.swap(0, Ordering::SeqCst)) }
}

impl Default for ErrorLatch {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAD_MATCH_ON_GET_IMAGE: ProtocolError = ProtocolError { error_code: 8, request_code: 73 };

    #[test]
    fn test_latch_keeps_first_error_until_taken() {
        let latch = ErrorLatch::new();
        assert_eq!(latch.take(), None);

        latch.record(BAD_MATCH_ON_GET_IMAGE);
        latch.record(ProtocolError { error_code: 3, request_code: 42 });
        assert_eq!(latch.take(), Some(BAD_MATCH_ON_GET_IMAGE));
        assert_eq!(latch.take(), None);

        latch.record(ProtocolError { error_code: 0, request_code: 0 });
        assert_eq!(latch.take(), Some(ProtocolError { error_code: 0, request_code: 0 }));
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(BAD_MATCH_ON_GET_IMAGE.to_string(), "BadMatch (code 8) in request 73");
        assert_eq!(ProtocolError { error_code: 200, request_code: 1 }.to_string(), "unknown error (code 200) in request 1");
    }
}
