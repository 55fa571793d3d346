//! # Forward, Respond, Wait
//!
//! Calls travel as [`Message`]s through the fabric. The caller's handle keeps
//! a [`Completion`] that the server side resolves with the encoded response
//! (or a failure status). Non-blocking variants hand out a [`RawRequest`]
//! that `wait` consumes and `test` polls.
//!
//! ## Server side
//!
//! The progress loop turns each message into a server handle and runs the
//! registered callback on the RPC pool. If the callback returns a failure
//! status without having responded, that status is delivered to the caller.
//! If it returns success without responding, the caller keeps waiting; a
//! handler may respond later from another thread.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::addr;
use crate::eventual::Eventual;
use crate::fabric;
use crate::handle;
use crate::handle::HandleState;
use crate::handle::Role;
use crate::instance;
use crate::log;
use crate::proc;
use crate::registry;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::types::LogLevel;
use crate::types::Mode;
use crate::types::ProviderId;
use crate::types::RawHandle;
use crate::types::RawInstance;
use crate::types::RawRequest;
use crate::types::RpcId;

/// Resolves with the encoded response, or the status that replaced it.
pub(crate) type Completion = Eventual<HgResult<Vec<u8>>>;

/// One request in flight on the fabric.
pub(crate) struct Message {
    pub(crate) id: RpcId,
    pub(crate) origin: String,
    pub(crate) input: Vec<u8>,
    pub(crate) reply: Option<Arc<Completion>>,
}

pub(crate) enum Pending {
    Forward {
        state: Arc<HandleState>,
        completion: Arc<Completion>,
        deadline: Option<Instant>,
    },
    Eventual(Arc<Eventual<HgReturn>>),
    Done(HgReturn),
}

static REQUESTS: LazyLock<DashMap<RawRequest, Pending>> = LazyLock::new(DashMap::new);

pub(crate) fn track(p: Pending) -> RawRequest {
    let req = RawRequest::fresh();
    REQUESTS.insert(req, p);
    req
}

/// Drains an instance's inbox until the fabric drops its sender.
pub(crate) async fn progress_loop(mid: RawInstance, mut inbox: UnboundedReceiver<Message>) {
    while let Some(msg) = inbox.recv().await {
        dispatch(mid, msg);
    }
    tracing::trace!(%mid, "progress loop stopped");
}

fn dispatch(mid: RawInstance, msg: Message) {
    let inst = match instance::get(mid) {
        Ok(inst) => inst,
        Err(e) => {
            if let Some(reply) = &msg.reply {
                reply.set(Err(e));
            }
            return;
        }
    };
    let id = msg.id;
    let callback = inst.registrations.get(&id).and_then(|r| r.callback);
    let Some(callback) = callback else {
        if let Some(reply) = &msg.reply {
            reply.set(Err(HgReturn::NoEntry));
        }
        log::emit(mid, LogLevel::Error, format!("no handler registered for rpc {id}"));
        return;
    };

    let h = handle::accept(mid, msg);
    let state = match handle::state(h) {
        Ok(state) => state,
        Err(_) => return,
    };
    inst.rpc_pool().spawn_blocking(move || {
        let ret = callback(h);
        if ret.is_success() {
            return;
        }
        if let Role::Server { reply: Some(reply), responded, .. } = &state.role {
            if !responded.swap(true, Ordering::AcqRel) {
                reply.set(Err(ret));
            }
        }
        log::emit(mid, LogLevel::Warning, format!("rpc {id} handler returned {ret}"));
    });
}

/// Sends the request carried by a client handle; returns a request id.
///
/// The response flag of the sender's registration decides whether a
/// response is awaited at all; when it is disabled the request completes
/// as soon as it is delivered.
pub fn iforward(
    h: RawHandle,
    provider_id: ProviderId,
    input: &[u8],
    timeout: Option<Duration>,
) -> HgResult<RawRequest> {
    let state = handle::state(h)?;
    let Role::Client { pending, output } = &state.role else {
        return Err(HgReturn::InvalidArg);
    };
    let inst = instance::get(state.instance)?;
    let id = RpcId::mux(state.rpc_id().base(), provider_id);
    *state.id.lock() = id;

    let encoded = proc::encode_string(input)?;
    let target = addr::uri_of(state.addr)?;
    let endpoint = fabric::endpoint(&target).ok_or(HgReturn::HostUnreach)?;
    if endpoint.mode == Mode::Client {
        return Err(HgReturn::OpNotSupported);
    }
    let disabled = registry::resolve(&inst, id).is_some_and(|r| r.disabled_response());

    let completion = Arc::new(Completion::new());
    *output.lock() = None;
    *pending.lock() = Some(completion.clone());

    let msg = Message {
        id,
        origin: inst.uri.clone(),
        input: encoded,
        reply: (!disabled).then(|| completion.clone()),
    };
    endpoint.inbox.send(msg).map_err(|_| HgReturn::HostUnreach)?;

    if disabled {
        *pending.lock() = None;
        return Ok(track(Pending::Done(HgReturn::Success)));
    }
    Ok(track(Pending::Forward {
        state,
        completion,
        deadline: timeout.map(|t| Instant::now() + t),
    }))
}

/// Blocking forward (`margo_provider_forward_timed` when `timeout` is set).
pub fn forward(
    h: RawHandle,
    provider_id: ProviderId,
    input: &[u8],
    timeout: Option<Duration>,
) -> HgResult<()> {
    let req = iforward(h, provider_id, input, timeout)?;
    wait(req)
}

/// Sends the response of a server handle. At most one response per handle.
pub fn respond(h: RawHandle, output: &[u8]) -> HgResult<()> {
    let state = handle::state(h)?;
    let Role::Server { reply, responded, .. } = &state.role else {
        return Err(HgReturn::InvalidArg);
    };
    let encoded = proc::encode_string(output)?;
    if responded.swap(true, Ordering::AcqRel) {
        return Err(HgReturn::Permission);
    }
    let disabled = instance::get(state.instance)
        .ok()
        .and_then(|inst| registry::resolve(&inst, state.rpc_id()))
        .is_some_and(|r| r.disabled_response());
    if !disabled {
        if let Some(reply) = reply {
            reply.set(Ok(encoded));
        }
    }
    Ok(())
}

/// Non-blocking respond. Delivery on the loopback fabric is immediate, so
/// the returned request is already complete.
pub fn irespond(h: RawHandle, output: &[u8]) -> HgResult<RawRequest> {
    let ret = HgReturn::from_result(&respond(h, output));
    if ret == HgReturn::NoEntry {
        return Err(ret);
    }
    Ok(track(Pending::Done(ret)))
}

fn finish_forward(state: &HandleState, result: Option<HgResult<Vec<u8>>>) -> HgReturn {
    let Role::Client { pending, output } = &state.role else {
        return HgReturn::InvalidArg;
    };
    *pending.lock() = None;
    match result {
        None => HgReturn::Timeout,
        Some(Ok(out)) => {
            *output.lock() = Some(out);
            HgReturn::Success
        }
        Some(Err(e)) => e,
    }
}

/// Blocks until the request completes and consumes it (`margo_wait`).
pub fn wait(req: RawRequest) -> HgResult<()> {
    let (_, pending) = REQUESTS.remove(&req).ok_or(HgReturn::NoEntry)?;
    let ret = match pending {
        Pending::Forward { state, completion, deadline } => {
            let result = match deadline {
                Some(d) => completion.wait_until(d),
                None => Some(completion.wait()),
            };
            finish_forward(&state, result)
        }
        Pending::Eventual(ev) => ev.wait(),
        Pending::Done(ret) => ret,
    };
    ret.check()
}

/// Abandons a request without waiting for it (`margo_request_free`). The
/// operation itself still completes; nobody observes the result.
pub fn request_free(req: RawRequest) -> HgResult<()> {
    let (_, pending) = REQUESTS.remove(&req).ok_or(HgReturn::NoEntry)?;
    if let Pending::Forward { state, .. } = pending {
        if let Role::Client { pending, .. } = &state.role {
            *pending.lock() = None;
        }
    }
    Ok(())
}

/// Number of requests not yet waited on or freed.
pub fn pending_requests() -> usize {
    REQUESTS.len()
}

/// Reports whether the request has completed, without consuming it
/// (`margo_test`). A timed forward whose deadline passed counts as complete.
pub fn test(req: RawRequest) -> HgResult<bool> {
    let pending = REQUESTS.get(&req).ok_or(HgReturn::NoEntry)?;
    Ok(match pending.value() {
        Pending::Forward { completion, deadline, .. } => {
            completion.test() || deadline.is_some_and(|d| Instant::now() >= d)
        }
        Pending::Eventual(ev) => ev.test(),
        Pending::Done(_) => true,
    })
}
