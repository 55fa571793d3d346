//! # RPC Handles
//!
//! A handle is shared state for one RPC, reference-counted by the engine.
//! `create` (client) and request arrival (server) start the count at one;
//! `ref_incr` adds a reference; `destroy` removes one and frees the handle
//! when the count reaches zero. The decrement and the removal happen under
//! the same table lock, so a handle is freed exactly once.
//!
//! [`HandleStats`] counts creations and frees process-wide so tests can
//! check that every handle is released exactly once.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::addr;
use crate::instance;
use crate::proc;
use crate::registry;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::rpc::Completion;
use crate::rpc::Message;
use crate::types::HandleInfo;
use crate::types::ProviderId;
use crate::types::RawAddr;
use crate::types::RawHandle;
use crate::types::RawInstance;
use crate::types::RpcId;

pub(crate) enum Role {
    Client {
        /// Completion of the forward in flight, if any.
        pending: Mutex<Option<Arc<Completion>>>,
        /// Encoded response of the last completed forward.
        output: Mutex<Option<Vec<u8>>>,
    },
    Server {
        /// Encoded request payload.
        input: Vec<u8>,
        /// Where the response goes; `None` when the caller expects none.
        reply: Option<Arc<Completion>>,
        responded: AtomicBool,
    },
}

pub(crate) struct HandleState {
    pub(crate) instance: RawInstance,
    /// Owned address record, released with the handle.
    pub(crate) addr: RawAddr,
    pub(crate) id: Mutex<RpcId>,
    pub(crate) role: Role,
    refs: AtomicUsize,
}

impl HandleState {
    pub(crate) fn rpc_id(&self) -> RpcId {
        *self.id.lock()
    }
}

static HANDLES: LazyLock<DashMap<RawHandle, Arc<HandleState>>> = LazyLock::new(DashMap::new);
static CREATED: AtomicU64 = AtomicU64::new(0);
static DESTROYED: AtomicU64 = AtomicU64::new(0);

/// Process-wide handle accounting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandleStats {
    pub created: u64,
    pub destroyed: u64,
    pub live: usize,
}

pub fn handle_stats() -> HandleStats {
    HandleStats {
        created: CREATED.load(Ordering::SeqCst),
        destroyed: DESTROYED.load(Ordering::SeqCst),
        live: HANDLES.len(),
    }
}

pub(crate) fn state(h: RawHandle) -> HgResult<Arc<HandleState>> {
    HANDLES.get(&h).map(|e| e.value().clone()).ok_or(HgReturn::NoEntry)
}

fn insert(state: HandleState) -> RawHandle {
    let h = RawHandle::fresh();
    HANDLES.insert(h, Arc::new(state));
    CREATED.fetch_add(1, Ordering::SeqCst);
    h
}

/// Builds a server-side handle for an inbound request.
pub(crate) fn accept(mid: RawInstance, msg: Message) -> RawHandle {
    let origin = addr::new_record(mid, msg.origin);
    insert(HandleState {
        instance: mid,
        addr: origin,
        id: Mutex::new(msg.id),
        role: Role::Server {
            input: msg.input,
            reply: msg.reply,
            responded: AtomicBool::new(false),
        },
        refs: AtomicUsize::new(1),
    })
}

/// Creates a client handle targeting `addr` (`margo_create`).
///
/// The handle keeps its own copy of the address; `id` must be registered
/// on the instance for at least one provider.
pub fn create(mid: RawInstance, addr: RawAddr, id: RpcId) -> HgResult<RawHandle> {
    let inst = instance::get(mid)?;
    if !registry::knows_base(&inst, id) {
        return Err(HgReturn::NoEntry);
    }
    let target = addr::addr_dup(mid, addr)?;
    Ok(insert(HandleState {
        instance: mid,
        addr: target,
        id: Mutex::new(id),
        role: Role::Client {
            pending: Mutex::new(None),
            output: Mutex::new(None),
        },
        refs: AtomicUsize::new(1),
    }))
}

/// Adds a reference (`margo_ref_incr`).
pub fn ref_incr(h: RawHandle) -> HgResult<()> {
    let st = HANDLES.get(&h).ok_or(HgReturn::NoEntry)?;
    st.refs.fetch_add(1, Ordering::AcqRel);
    Ok(())
}

/// Drops a reference, freeing the handle at zero (`margo_destroy`).
pub fn destroy(h: RawHandle) -> HgResult<()> {
    let mut found = false;
    let removed = HANDLES.remove_if(&h, |_, st| {
        found = true;
        st.refs.fetch_sub(1, Ordering::AcqRel) == 1
    });
    if !found {
        return Err(HgReturn::NoEntry);
    }
    if let Some((_, st)) = removed {
        addr::release(st.addr);
        DESTROYED.fetch_add(1, Ordering::SeqCst);
    }
    Ok(())
}

pub fn handle_ref_count(h: RawHandle) -> HgResult<usize> {
    Ok(state(h)?.refs.load(Ordering::Acquire))
}

pub fn get_info(h: RawHandle) -> HgResult<HandleInfo> {
    let st = state(h)?;
    let id = st.rpc_id();
    Ok(HandleInfo {
        id,
        provider_id: id.provider_id(),
        addr: st.addr,
        instance: st.instance,
    })
}

pub fn handle_instance(h: RawHandle) -> HgResult<RawInstance> {
    Ok(state(h)?.instance)
}

/// Decodes the request payload of a server handle (`margo_get_input`).
pub fn get_input(h: RawHandle) -> HgResult<Vec<u8>> {
    match &state(h)?.role {
        Role::Server { input, .. } => proc::decode_string(input),
        Role::Client { .. } => Err(HgReturn::InvalidArg),
    }
}

/// Decodes the response of the last completed forward (`margo_get_output`).
pub fn get_output(h: RawHandle) -> HgResult<Vec<u8>> {
    match &state(h)?.role {
        Role::Client { output, .. } => {
            let raw = output.lock().clone().ok_or(HgReturn::NoEntry)?;
            proc::decode_string(&raw)
        }
        Role::Server { .. } => Err(HgReturn::InvalidArg),
    }
}

/// Fabricates a server handle as if a request for `(id, provider_id)` carrying
/// the already-encoded `raw_input` had arrived from this instance itself.
/// Nobody waits for its response. Meant for tooling and tests of dispatch paths.
pub fn inject_request(
    mid: RawInstance,
    id: RpcId,
    provider_id: ProviderId,
    raw_input: Vec<u8>,
) -> HgResult<RawHandle> {
    let inst = instance::get(mid)?;
    Ok(accept(mid, Message {
        id: RpcId::mux(id.base(), provider_id),
        origin: inst.uri.clone(),
        input: raw_input,
        reply: None,
    }))
}
