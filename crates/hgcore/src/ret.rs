//! # Status Codes
//!
//! Every engine entry point reports failure with one of these codes.
//! The numeric values follow Mercury's `hg_return_t`, so they can be logged
//! and compared against native tooling output.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HgReturn {
    Success = 0,
    /// Operation not permitted (e.g. a second response on one handle).
    Permission = 1,
    /// No such entry: unknown handle, address, request or registration.
    NoEntry = 2,
    Again = 4,
    NoMem = 5,
    /// Bad address or corrupted internal state.
    Fault = 7,
    Busy = 8,
    /// Entry already exists (e.g. duplicate registration).
    Exist = 9,
    InvalidArg = 11,
    /// Malformed payload.
    Protocol = 12,
    /// Value does not fit (e.g. transfer past the end of a region).
    Overflow = 13,
    MsgSize = 14,
    ProtoNoSupport = 15,
    OpNotSupported = 16,
    AddrNotAvail = 18,
    HostUnreach = 19,
    Timeout = 20,
    Canceled = 21,
    Other = 25,
}

impl HgReturn {
    /// Numeric code as reported by the native library.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == HgReturn::Success
    }

    /// Converts a status into a `Result`, mapping `Success` to `Ok(())`.
    pub fn check(self) -> HgResult<()> {
        match self {
            HgReturn::Success => Ok(()),
            other => Err(other),
        }
    }

    /// Collapses a `Result` back into a status code.
    pub fn from_result<T>(r: &HgResult<T>) -> Self {
        match r {
            Ok(_) => HgReturn::Success,
            Err(e) => *e,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Success => "HG_SUCCESS",
            Self::Permission => "HG_PERMISSION",
            Self::NoEntry => "HG_NOENTRY",
            Self::Again => "HG_AGAIN",
            Self::NoMem => "HG_NOMEM",
            Self::Fault => "HG_FAULT",
            Self::Busy => "HG_BUSY",
            Self::Exist => "HG_EXIST",
            Self::InvalidArg => "HG_INVALID_ARG",
            Self::Protocol => "HG_PROTOCOL_ERROR",
            Self::Overflow => "HG_OVERFLOW",
            Self::MsgSize => "HG_MSGSIZE",
            Self::ProtoNoSupport => "HG_PROTONOSUPPORT",
            Self::OpNotSupported => "HG_OPNOTSUPPORTED",
            Self::AddrNotAvail => "HG_ADDRNOTAVAIL",
            Self::HostUnreach => "HG_HOSTUNREACH",
            Self::Timeout => "HG_TIMEOUT",
            Self::Canceled => "HG_CANCELED",
            Self::Other => "HG_OTHER_ERROR",
        }
    }
}

impl fmt::Display for HgReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl std::error::Error for HgReturn {}

pub type HgResult<T> = std::result::Result<T, HgReturn>;
