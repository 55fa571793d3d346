//! # Opaque References
//!
//! Engine objects handed to callers as tagged, uninterpretable values.
//! Callers may compare them and ask for their kind; only this crate can
//! turn one back into a raw engine identifier, and only for the right kind.

use hgcore::RawAddr;
use hgcore::RawBulk;
use hgcore::RawInstance;
use hgcore::RawRequest;

use crate::error::Error;
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Instance,
    Address,
    Bulk,
    Request,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpaqueRef {
    kind: Kind,
    raw: u64,
}

impl OpaqueRef {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    fn unwrap_kind(self, kind: Kind) -> Result<u64> {
        if self.kind != kind {
            return Err(Error::InvalidArgument(format!(
                "expected {:?} reference, got {:?}",
                kind, self.kind
            )));
        }
        Ok(self.raw)
    }
}

macro_rules! capsule_kind {
    ($raw:ty, $kind:ident, $wrap:ident, $unwrap:ident) => {
        impl OpaqueRef {
            pub(crate) fn $wrap(raw: $raw) -> Self {
                Self { kind: Kind::$kind, raw: raw.0 }
            }

            pub(crate) fn $unwrap(self) -> Result<$raw> {
                self.unwrap_kind(Kind::$kind).map(<$raw>::from_raw)
            }
        }
    };
}

trait FromRaw {
    fn from_raw(raw: u64) -> Self;
}

macro_rules! from_raw {
    ($($raw:ty),*) => {
        $(impl FromRaw for $raw {
            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }
        })*
    };
}

from_raw!(RawInstance, RawAddr, RawBulk, RawRequest);

capsule_kind!(RawInstance, Instance, instance, as_instance);
capsule_kind!(RawAddr, Address, address, as_address);
capsule_kind!(RawBulk, Bulk, bulk, as_bulk);
capsule_kind!(RawRequest, Request, request, as_request);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_checked_on_the_way_back() {
        let r = OpaqueRef::bulk(RawBulk(42));
        assert_eq!(r.kind(), Kind::Bulk);
        assert_eq!(r.as_bulk().unwrap(), RawBulk(42));
        assert!(matches!(r.as_address(), Err(Error::InvalidArgument(_))));
        assert_ne!(r, OpaqueRef::address(RawAddr(42)));
    }
}
