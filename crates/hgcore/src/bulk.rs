//! # Bulk Regions and Descriptors
//!
//! A bulk descriptor exposes one or more memory segments for remote reads
//! or writes. Creating one registers a *region* on the fabric under a
//! process-unique key; serializing a descriptor produces bytes naming that
//! key, its owner's URI and its layout, so that any instance can
//! deserialize it and target the region in a transfer.
//!
//! ## Serialized layout
//!
//! ```text
//! "HGBK" | flags:u8 | access:u8 | key:u64 | size:u64 | owner:bytes
//!        | nsegs:u64 | seg_len:u64 * nsegs | [eager data:bytes]
//! ```
//!
//! Bit 0 of `flags` marks inline (eager) data, present only for readable
//! descriptors. A pull from a deserialized eager descriptor reads the inline
//! copy instead of the region.

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::addr;
use crate::eventual::Eventual;
use crate::instance;
use crate::log;
use crate::proc::Reader;
use crate::proc::Writer;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::rpc;
use crate::rpc::Pending;
use crate::types::AccessMode;
use crate::types::LogLevel;
use crate::types::RawAddr;
use crate::types::RawBulk;
use crate::types::RawInstance;
use crate::types::RawRequest;
use crate::types::TransferOp;

const MAGIC: &[u8; 4] = b"HGBK";
const FLAG_EAGER: u8 = 1;

/// Memory shared between its owner and the engine.
pub type SharedMemory = Arc<RwLock<Vec<u8>>>;

/// A contiguous window of a [`SharedMemory`].
#[derive(Clone, Debug)]
pub struct Segment {
    pub memory: SharedMemory,
    pub offset: usize,
    pub len: usize,
}

struct Region {
    owner: String,
    access: AccessMode,
    segments: Vec<Segment>,
    size: usize,
}

impl Region {
    /// Visits the pieces of `[offset, offset + len)` segment by segment.
    fn walk(
        &self,
        mut offset: usize,
        mut len: usize,
        mut f: impl FnMut(&Segment, usize, usize) -> HgResult<()>,
    ) -> HgResult<()> {
        for seg in &self.segments {
            if len == 0 {
                break;
            }
            if offset >= seg.len {
                offset -= seg.len;
                continue;
            }
            let n = (seg.len - offset).min(len);
            f(seg, seg.offset + offset, n)?;
            offset = 0;
            len -= n;
        }
        Ok(())
    }

    // The owner may resize its memory after registration, so every access
    // re-checks the window under the memory lock.

    fn read(&self, offset: usize, len: usize) -> HgResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        self.walk(offset, len, |seg, at, n| {
            let memory = seg.memory.read();
            out.extend_from_slice(memory.get(at..at + n).ok_or(HgReturn::Overflow)?);
            Ok(())
        })?;
        Ok(out)
    }

    fn write(&self, offset: usize, data: &[u8]) -> HgResult<()> {
        self.walk(offset, data.len(), |seg, at, n| {
            if seg.memory.read().len() < at + n { Err(HgReturn::Overflow) } else { Ok(()) }
        })?;
        let mut cursor = 0;
        self.walk(offset, data.len(), |seg, at, n| {
            let mut memory = seg.memory.write();
            let window = memory.get_mut(at..at + n).ok_or(HgReturn::Overflow)?;
            window.copy_from_slice(&data[cursor..cursor + n]);
            cursor += n;
            Ok(())
        })
    }
}

enum Target {
    /// Created here: owns the region registration.
    Local(Arc<Region>),
    /// Deserialized: names a region by key.
    Remote {
        key: u64,
        owner: String,
        access: AccessMode,
        seg_lens: Vec<u64>,
        size: usize,
        eager: Option<Arc<Vec<u8>>>,
    },
}

struct BulkRecord {
    instance: RawInstance,
    key: u64,
    target: Target,
    refs: AtomicUsize,
}

impl BulkRecord {
    fn access(&self) -> AccessMode {
        match &self.target {
            Target::Local(r) => r.access,
            Target::Remote { access, .. } => *access,
        }
    }

    fn size(&self) -> usize {
        match &self.target {
            Target::Local(r) => r.size,
            Target::Remote { size, .. } => *size,
        }
    }

    fn owner(&self) -> &str {
        match &self.target {
            Target::Local(r) => &r.owner,
            Target::Remote { owner, .. } => owner,
        }
    }
}

static REGIONS: LazyLock<DashMap<u64, Arc<Region>>> = LazyLock::new(DashMap::new);
static BULKS: LazyLock<DashMap<RawBulk, Arc<BulkRecord>>> = LazyLock::new(DashMap::new);

fn record(b: RawBulk) -> HgResult<Arc<BulkRecord>> {
    BULKS.get(&b).map(|e| e.value().clone()).ok_or(HgReturn::NoEntry)
}

fn insert(rec: BulkRecord) -> RawBulk {
    let b = RawBulk::fresh();
    BULKS.insert(b, Arc::new(rec));
    b
}

/// Exposes `segments` for transfers (`margo_bulk_create`).
pub fn bulk_create(mid: RawInstance, segments: Vec<Segment>, access: AccessMode) -> HgResult<RawBulk> {
    let inst = instance::get(mid)?;
    if segments.is_empty() {
        return Err(HgReturn::InvalidArg);
    }
    let mut size = 0usize;
    for seg in &segments {
        let end = seg.offset.checked_add(seg.len).ok_or(HgReturn::Overflow)?;
        if end > seg.memory.read().len() {
            return Err(HgReturn::InvalidArg);
        }
        size = size.checked_add(seg.len).ok_or(HgReturn::Overflow)?;
    }
    let region = Arc::new(Region {
        owner: inst.uri.clone(),
        access,
        segments,
        size,
    });
    let key = crate::types::next_raw();
    REGIONS.insert(key, region.clone());
    Ok(insert(BulkRecord {
        instance: mid,
        key,
        target: Target::Local(region),
        refs: AtomicUsize::new(1),
    }))
}

pub fn bulk_ref_incr(b: RawBulk) -> HgResult<()> {
    let rec = BULKS.get(&b).ok_or(HgReturn::NoEntry)?;
    rec.refs.fetch_add(1, Ordering::AcqRel);
    Ok(())
}

/// Drops a reference; at zero the descriptor is freed and, for a locally
/// created one, its region is withdrawn from the fabric.
pub fn bulk_free(b: RawBulk) -> HgResult<()> {
    let mut found = false;
    let removed = BULKS.remove_if(&b, |_, rec| {
        found = true;
        rec.refs.fetch_sub(1, Ordering::AcqRel) == 1
    });
    if !found {
        return Err(HgReturn::NoEntry);
    }
    if let Some((_, rec)) = removed {
        if let Target::Local(_) = rec.target {
            REGIONS.remove(&rec.key);
        }
    }
    Ok(())
}

pub fn bulk_size(b: RawBulk) -> HgResult<usize> {
    Ok(record(b)?.size())
}

pub fn bulk_access(b: RawBulk) -> HgResult<AccessMode> {
    Ok(record(b)?.access())
}

pub fn bulk_ref_count(b: RawBulk) -> HgResult<usize> {
    Ok(record(b)?.refs.load(Ordering::Acquire))
}

/// Serializes a descriptor for out-of-band exchange. With `eager`, the
/// contents of a readable descriptor travel inline.
pub fn bulk_serialize(b: RawBulk, eager: bool) -> HgResult<Vec<u8>> {
    let rec = record(b)?;
    let (seg_lens, inline): (Vec<u64>, Option<Vec<u8>>) = match &rec.target {
        Target::Local(region) => {
            let lens = region.segments.iter().map(|s| s.len as u64).collect();
            let data = if eager && region.access.readable() {
                Some(region.read(0, region.size)?)
            } else {
                None
            };
            (lens, data)
        }
        Target::Remote { seg_lens, eager: data, access, .. } => {
            let data = if eager && access.readable() {
                match data {
                    Some(d) => Some(d.as_ref().clone()),
                    None => REGIONS.get(&rec.key).map(|r| r.read(0, r.size)).transpose()?,
                }
            } else {
                None
            };
            (seg_lens.clone(), data)
        }
    };

    let mut w = Writer::with_capacity(64 + inline.as_ref().map_or(0, Vec::len));
    w.raw(MAGIC);
    w.u8(if inline.is_some() { FLAG_EAGER } else { 0 });
    w.u8(rec.access().to_byte());
    w.u64(rec.key);
    w.u64(rec.size() as u64);
    w.bytes(rec.owner().as_bytes());
    w.u64(seg_lens.len() as u64);
    for len in &seg_lens {
        w.u64(*len);
    }
    if let Some(data) = &inline {
        w.bytes(data);
    }
    Ok(w.finish())
}

/// Rebuilds a descriptor from [`bulk_serialize`] output on instance `mid`.
pub fn bulk_deserialize(mid: RawInstance, raw: &[u8]) -> HgResult<RawBulk> {
    instance::get(mid)?;
    let mut r = Reader::new(raw);
    if r.raw(4)? != MAGIC {
        return Err(HgReturn::Protocol);
    }
    let flags = r.u8()?;
    let access = AccessMode::from_byte(r.u8()?).ok_or(HgReturn::Protocol)?;
    let key = r.u64()?;
    let size = usize::try_from(r.u64()?).map_err(|_| HgReturn::Protocol)?;
    let owner = String::from_utf8(r.bytes()?.to_vec()).map_err(|_| HgReturn::Protocol)?;
    let nsegs = usize::try_from(r.u64()?).map_err(|_| HgReturn::Protocol)?;
    if nsegs > r.remaining() / 8 {
        return Err(HgReturn::Protocol);
    }
    let mut seg_lens = Vec::with_capacity(nsegs);
    let mut total = 0u64;
    for _ in 0..nsegs {
        let len = r.u64()?;
        total = total.checked_add(len).ok_or(HgReturn::Protocol)?;
        seg_lens.push(len);
    }
    if total != size as u64 {
        return Err(HgReturn::Protocol);
    }
    let eager = if flags & FLAG_EAGER != 0 {
        let data = r.bytes()?.to_vec();
        if data.len() != size {
            return Err(HgReturn::Protocol);
        }
        Some(Arc::new(data))
    } else {
        None
    };
    r.finish()?;
    Ok(insert(BulkRecord {
        instance: mid,
        key,
        target: Target::Remote { key, owner, access, seg_lens, size, eager },
        refs: AtomicUsize::new(1),
    }))
}

fn check_span(offset: usize, size: usize, capacity: usize) -> HgResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(HgReturn::Overflow),
    }
}

/// Moves `size` bytes between the origin descriptor (at `origin_addr`) and a
/// local descriptor (`margo_bulk_transfer`).
#[allow(clippy::too_many_arguments)]
pub fn bulk_transfer(
    mid: RawInstance,
    op: TransferOp,
    origin_addr: RawAddr,
    origin: RawBulk,
    origin_offset: usize,
    local: RawBulk,
    local_offset: usize,
    size: usize,
) -> HgResult<()> {
    instance::get(mid)?;
    let origin_rec = record(origin)?;
    let local_rec = record(local)?;
    let Target::Local(local_region) = &local_rec.target else {
        return Err(HgReturn::InvalidArg);
    };
    if addr::addr_to_string(mid, origin_addr)? != origin_rec.owner() {
        log::emit(mid, LogLevel::Error, "bulk transfer origin address does not own the descriptor");
        return Err(HgReturn::InvalidArg);
    }
    check_span(origin_offset, size, origin_rec.size())?;
    check_span(local_offset, size, local_region.size)?;

    let region = || -> HgResult<Arc<Region>> {
        match &origin_rec.target {
            Target::Local(r) => Ok(r.clone()),
            Target::Remote { key, .. } => {
                REGIONS.get(key).map(|e| e.value().clone()).ok_or(HgReturn::HostUnreach)
            }
        }
    };

    match op {
        TransferOp::Pull => {
            if !origin_rec.access().readable() || !local_region.access.writable() {
                return Err(HgReturn::Permission);
            }
            let data = match &origin_rec.target {
                Target::Remote { eager: Some(inline), .. } => {
                    inline[origin_offset..origin_offset + size].to_vec()
                }
                _ => region()?.read(origin_offset, size)?,
            };
            local_region.write(local_offset, &data)?;
        }
        TransferOp::Push => {
            if !origin_rec.access().writable() || !local_region.access.readable() {
                return Err(HgReturn::Permission);
            }
            let data = local_region.read(local_offset, size)?;
            region()?.write(origin_offset, &data)?;
        }
    }
    Ok(())
}

/// Non-blocking [`bulk_transfer`]: runs on the instance's RPC pool. The
/// request completes on every path, a panicking transfer included.
#[allow(clippy::too_many_arguments)]
pub fn bulk_itransfer(
    mid: RawInstance,
    op: TransferOp,
    origin_addr: RawAddr,
    origin: RawBulk,
    origin_offset: usize,
    local: RawBulk,
    local_offset: usize,
    size: usize,
) -> HgResult<RawRequest> {
    let inst = instance::get(mid)?;
    let done = Arc::new(Eventual::new());
    let signal = done.clone();
    inst.rpc_pool().spawn_blocking(move || {
        let ret = panic::catch_unwind(AssertUnwindSafe(|| {
            bulk_transfer(mid, op, origin_addr, origin, origin_offset, local, local_offset, size)
        }))
        .unwrap_or_else(|_| {
            tracing::error!(%mid, "bulk transfer panicked");
            Err(HgReturn::Fault)
        });
        signal.set(HgReturn::from_result(&ret));
    });
    Ok(rpc::track(Pending::Eventual(done)))
}
