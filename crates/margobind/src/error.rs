//! # Error Definitions
//!
//! Every failure surfaced to binding callers. Native status codes are
//! translated here, tagged with the name of the engine operation that
//! produced them.

use std::fmt;

use hgcore::HgResult;
use hgcore::HgReturn;
use hgcore::ProviderId;
use hgcore::RpcId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A native call returned a non-success status.
    Engine { code: HgReturn, op: &'static str },
    /// A timed forward or wait passed its deadline.
    Timeout { op: &'static str },
    /// A payload could not be encoded or decoded.
    Protocol(String),
    /// No handler is registered for the (RPC id, provider id) pair.
    HandlerNotFound { rpc_id: RpcId, provider_id: ProviderId },
    /// The caller passed something the binding cannot use as is.
    InvalidArgument(String),
}

impl Error {
    /// Native status carried by this error, for reporting back to the engine.
    pub fn code(&self) -> HgReturn {
        match self {
            Self::Engine { code, .. } => *code,
            Self::Timeout { .. } => HgReturn::Timeout,
            Self::Protocol(_) => HgReturn::Protocol,
            Self::HandlerNotFound { .. } => HgReturn::NoEntry,
            Self::InvalidArgument(_) => HgReturn::InvalidArg,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine { code, op } => write!(f, "{} failed: {}", op, code),
            Self::Timeout { op } => write!(f, "{} timed out", op),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::HandlerNotFound { rpc_id, provider_id } => {
                write!(f, "No handler for rpc {} on provider {}", rpc_id, provider_id)
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tags a native result with the operation that produced it.
pub(crate) trait Op<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> Op<T> for HgResult<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|code| match code {
            HgReturn::Timeout => Error::Timeout { op },
            code => Error::Engine { code, op },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_status_is_its_own_kind() {
        let r: HgResult<()> = Err(HgReturn::Timeout);
        assert_eq!(r.op("forward"), Err(Error::Timeout { op: "forward" }));
        let r: HgResult<()> = Err(HgReturn::Exist);
        let err = r.op("register").unwrap_err();
        assert_eq!(err.code(), HgReturn::Exist);
        assert_eq!(err.to_string(), "register failed: HG_EXIST (9)");
    }
}
