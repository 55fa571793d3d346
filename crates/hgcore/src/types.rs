//! # Raw Identifiers and Shared Enums
//!
//! Everything that crosses the engine boundary is a plain, copyable value.
//! Raw identifiers are pointer-sized tokens that index engine-owned tables;
//! holding one grants nothing by itself, the engine validates it on every call.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

static NEXT_RAW: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique raw value. Zero is reserved for "null".
pub(crate) fn next_raw() -> u64 {
    NEXT_RAW.fetch_add(1, Ordering::Relaxed)
}

macro_rules! define_raw {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }

            pub(crate) fn fresh() -> Self {
                Self(next_raw())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{:#x}"), self.0)
            }
        }
    };
}

define_raw!(
    /// An engine instance (`margo_instance_id`).
    RawInstance, "mid"
);
define_raw!(
    /// A resolved endpoint (`hg_addr_t`).
    RawAddr, "addr"
);
define_raw!(
    /// A per-call RPC handle (`hg_handle_t`).
    RawHandle, "handle"
);
define_raw!(
    /// A bulk descriptor (`hg_bulk_t`).
    RawBulk, "bulk"
);
define_raw!(
    /// A pending non-blocking operation (`margo_request`).
    RawRequest, "req"
);

/// Provider ids occupy the low 16 bits of an [`RpcId`].
pub type ProviderId = u16;

const PROVIDER_BITS: u32 = 16;
const PROVIDER_MASK: u64 = (1 << PROVIDER_BITS) - 1;

/// An RPC identifier: a stable 48-bit hash of the RPC name with the
/// provider id multiplexed into the low bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpcId(pub u64);

impl RpcId {
    /// Hashes an RPC name into a provider-less id (FNV-1a, folded to 48 bits).
    pub fn from_name(name: &str) -> Self {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in name.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let folded = (hash >> 48) ^ (hash & 0x0000_ffff_ffff_ffff);
        Self(folded << PROVIDER_BITS)
    }

    pub fn mux(base: RpcId, provider_id: ProviderId) -> Self {
        Self((base.0 & !PROVIDER_MASK) | u64::from(provider_id))
    }

    pub fn base(self) -> Self {
        Self(self.0 & !PROVIDER_MASK)
    }

    pub fn provider_id(self) -> ProviderId {
        (self.0 & PROVIDER_MASK) as ProviderId
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{}", self.0 >> PROVIDER_BITS, self.provider_id())
    }
}

/// Whether an instance accepts inbound RPCs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Client,
    Server,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::ReadOnly => 1,
            Self::WriteOnly => 2,
            Self::ReadWrite => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::ReadOnly),
            2 => Some(Self::WriteOnly),
            3 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// Direction of a bulk transfer, seen from the local side.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferOp {
    /// Local memory is written into the origin region.
    Push,
    /// Origin memory is read into the local region.
    Pull,
}

/// Severity of a log event. `External` defers filtering to the installed sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    External = 0,
    Trace = 1,
    Debug = 2,
    Info = 3,
    Warning = 4,
    Error = 5,
    Critical = 6,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::External => "external",
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Per-handle metadata (`struct hg_info`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandleInfo {
    pub id: RpcId,
    pub provider_id: ProviderId,
    /// Target address for client handles, origin address for server handles.
    /// Borrowed from the handle: it must not be freed by the caller.
    pub addr: RawAddr,
    pub instance: RawInstance,
}
