//! Owned endpoint addresses. Each [`Address`] is one engine address record,
//! freed when dropped; copies go through the engine's dup.

use std::fmt;

use hgcore::RawAddr;
use hgcore::RawInstance;

use crate::capsule::OpaqueRef;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;

pub struct Address {
    mid: RawInstance,
    raw: RawAddr,
}

impl Address {
    /// Takes ownership of a record the engine just handed out.
    pub(crate) fn owned(mid: RawInstance, raw: RawAddr) -> Self {
        Self { mid, raw }
    }

    /// Copies a record owned by someone else (e.g. a handle).
    pub(crate) fn dup(mid: RawInstance, raw: RawAddr) -> Result<Self> {
        let raw = hgcore::addr_dup(mid, raw).op("addr_dup")?;
        Ok(Self::owned(mid, raw))
    }

    pub(crate) fn raw(&self) -> RawAddr {
        self.raw
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::dup(self.mid, self.raw)
    }

    pub fn opaque(&self) -> OpaqueRef {
        OpaqueRef::address(self.raw)
    }

    pub fn to_uri(&self) -> Result<String> {
        hgcore::addr_to_string(self.mid, self.raw).op("addr_to_string")
    }

    /// Asks the engine behind this address to shut down. It must have
    /// enabled remote shutdown.
    pub fn shutdown(&self, gil: Gil<'_>) -> Result<()> {
        let (mid, raw) = (self.mid, self.raw);
        gil.allow_native(|| hgcore::shutdown_remote_instance(mid, raw))
            .op("shutdown_remote_instance")
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        hgcore::addr_cmp(self.mid, self.raw, other.raw).unwrap_or(false)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_uri() {
            Ok(uri) => f.write_str(&uri),
            Err(_) => write!(f, "<{}>", self.raw),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Drop for Address {
    fn drop(&mut self) {
        if let Err(code) = hgcore::addr_free(self.mid, self.raw) {
            tracing::warn!(addr = %self.raw, error = %code, "failed to free address");
        }
    }
}
