//! # Bulk Transfers
//!
//! [`Buffer`] describes caller memory with an explicit layout; only a buffer
//! occupying one contiguous region can be exposed. [`Bulk`] owns one engine
//! reference to a bulk descriptor and serializes to the engine's opaque
//! descriptor bytes, so it can travel inside RPC payloads.

use std::fmt;
use std::sync::Arc;

use hgcore::AccessMode;
use hgcore::Segment;
use hgcore::SharedMemory;
use hgcore::TransferOp;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;

use crate::address::Address;
use crate::capsule::OpaqueRef;
use crate::engine::Engine;
use crate::error::Error;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::request::Request;
use crate::serialization;

/// A view of shared memory: `shape` elements of `item_size` bytes laid out
/// with byte `strides`, starting at `offset`.
#[derive(Clone)]
pub struct Buffer {
    memory: SharedMemory,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<isize>,
    item_size: usize,
}

impl Buffer {
    /// A one-dimensional byte buffer owning `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::shared(Arc::new(RwLock::new(bytes)))
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// A one-dimensional view of all of `memory`.
    pub fn shared(memory: SharedMemory) -> Self {
        let len = memory.read().len();
        Self {
            memory,
            offset: 0,
            shape: vec![len],
            strides: vec![1],
            item_size: 1,
        }
    }

    /// An arbitrary view. Not validated until it is exposed.
    pub fn strided(
        memory: SharedMemory,
        offset: usize,
        shape: Vec<usize>,
        strides: Vec<isize>,
        item_size: usize,
    ) -> Self {
        Self { memory, offset, shape, strides, item_size }
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Size of the viewed elements in bytes.
    pub fn len(&self) -> usize {
        self.shape.iter().product::<usize>() * self.item_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the elements fill one gap-free region, in either row-major
    /// or column-major order. Strides of unit-length dimensions are ignored.
    pub fn is_contiguous(&self) -> bool {
        if self.shape.len() != self.strides.len() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        let dims = || self.shape.iter().zip(&self.strides);
        packed(dims().rev(), self.item_size) || packed(dims(), self.item_size)
    }

    /// Copies the viewed bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        let memory = self.memory.read();
        memory
            .get(self.offset..self.offset + self.len())
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    fn segment(&self) -> Result<Segment> {
        if !self.is_contiguous() {
            return Err(Error::InvalidArgument("buffer is not contiguous".to_string()));
        }
        let len = self.len();
        let available = self.memory.read().len();
        if self.offset.checked_add(len).is_none_or(|end| end > available) {
            return Err(Error::InvalidArgument(format!(
                "buffer view [{}, +{}) exceeds {} bytes of memory",
                self.offset, len, available
            )));
        }
        Ok(Segment { memory: self.memory.clone(), offset: self.offset, len })
    }
}

/// Whether `dims`, innermost first, are laid out back to back.
fn packed<'a>(dims: impl Iterator<Item = (&'a usize, &'a isize)>, item_size: usize) -> bool {
    let mut expected = item_size as isize;
    for (&n, &stride) in dims {
        if n != 1 && stride != expected {
            return false;
        }
        expected *= n as isize;
    }
    true
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("item_size", &self.item_size)
            .finish()
    }
}

pub struct Bulk {
    raw: OpaqueRef,
}

impl Bulk {
    fn owned(raw: hgcore::RawBulk) -> Self {
        Self { raw: OpaqueRef::bulk(raw) }
    }

    pub fn opaque(&self) -> OpaqueRef {
        self.raw
    }

    pub fn size(&self) -> Result<usize> {
        hgcore::bulk_size(self.raw.as_bulk()?).op("bulk_size")
    }

    pub fn access(&self) -> Result<AccessMode> {
        hgcore::bulk_access(self.raw.as_bulk()?).op("bulk_access")
    }

    pub fn try_clone(&self) -> Result<Self> {
        hgcore::bulk_ref_incr(self.raw.as_bulk()?).op("bulk_ref_incr")?;
        Ok(Self { raw: self.raw })
    }

    /// Opaque descriptor bytes. `eager` inlines the contents of readable
    /// descriptors.
    pub fn to_bytes(&self, eager: bool) -> Result<Vec<u8>> {
        hgcore::bulk_serialize(self.raw.as_bulk()?, eager).op("bulk_serialize")
    }

    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self> {
        let raw = hgcore::bulk_deserialize(engine.mid(), bytes).op("bulk_deserialize")?;
        Ok(Self::owned(raw))
    }

    /// Serializes with inline contents.
    pub fn eager(&self) -> Eager<'_> {
        Eager(self)
    }

    fn serialize_with<S: Serializer>(&self, eager: bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes(eager).map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl Serialize for Bulk {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.serialize_with(false, serializer)
    }
}

/// A [`Bulk`] that serializes eagerly.
pub struct Eager<'a>(&'a Bulk);

impl Serialize for Eager<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize_with(true, serializer)
    }
}

impl<'de> Deserialize<'de> for Bulk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let mid = serialization::current()
            .ok_or_else(|| D::Error::custom("no current engine to attach a bulk descriptor to"))?;
        let raw = hgcore::bulk_deserialize(mid, &bytes)
            .map_err(|code| D::Error::custom(format!("invalid bulk descriptor: {}", code)))?;
        Ok(Self::owned(raw))
    }
}

impl Drop for Bulk {
    fn drop(&mut self) {
        let freed = self.raw.as_bulk().and_then(|raw| hgcore::bulk_free(raw).op("bulk_free"));
        if let Err(e) = freed {
            tracing::warn!(error = %e, "failed to free bulk descriptor");
        }
    }
}

impl fmt::Debug for Bulk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bulk").field(&self.raw).finish()
    }
}

impl Engine {
    /// Exposes `buffer` for transfers. The buffer must be contiguous.
    pub fn create_bulk(&self, buffer: &Buffer, access: AccessMode) -> Result<Bulk> {
        let segment = buffer.segment()?;
        let raw = hgcore::bulk_create(self.mid(), vec![segment], access).op("bulk_create")?;
        Ok(Bulk::owned(raw))
    }

    /// Moves `size` bytes between `origin` (owned by `origin_addr`) and `local`.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &self,
        gil: Gil<'_>,
        op: TransferOp,
        origin_addr: &Address,
        origin: &Bulk,
        origin_offset: usize,
        local: &Bulk,
        local_offset: usize,
        size: usize,
    ) -> Result<()> {
        let (mid, addr) = (self.mid(), origin_addr.raw());
        let (origin, local) = (origin.raw.as_bulk()?, local.raw.as_bulk()?);
        gil.allow_native(|| {
            hgcore::bulk_transfer(mid, op, addr, origin, origin_offset, local, local_offset, size)
        })
        .op("bulk_transfer")
    }

    /// Non-blocking [`transfer`](Self::transfer).
    #[allow(clippy::too_many_arguments)]
    pub fn itransfer(
        &self,
        op: TransferOp,
        origin_addr: &Address,
        origin: &Bulk,
        origin_offset: usize,
        local: &Bulk,
        local_offset: usize,
        size: usize,
    ) -> Result<Request> {
        let req = hgcore::bulk_itransfer(
            self.mid(),
            op,
            origin_addr.raw(),
            origin.raw.as_bulk()?,
            origin_offset,
            local.raw.as_bulk()?,
            local_offset,
            size,
        )
        .op("bulk_itransfer")?;
        Ok(Request::new(req, "bulk_transfer"))
    }
}
