//! # RPC Registrations
//!
//! Each instance maps RPC ids (name hash × provider id) to a registration:
//! the callback the progress loop invokes, an optional user-data value, and
//! the response-disabled flag. User data is dropped (its destructor runs)
//! when the registration is removed or the instance finalizes, always
//! after the table entry is gone, never under a table lock.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::instance;
use crate::instance::Instance;
use crate::log;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::types::LogLevel;
use crate::types::ProviderId;
use crate::types::RawHandle;
use crate::types::RawInstance;
use crate::types::RpcId;

/// Server-side entry point for an RPC. Owns one reference to `handle` and
/// must destroy it before returning.
pub type RpcCallback = fn(RawHandle) -> HgReturn;

/// Opaque per-registration value owned by the engine.
pub type UserData = Arc<dyn Any + Send + Sync>;

pub(crate) struct Registration {
    pub(crate) name: String,
    pub(crate) callback: Option<RpcCallback>,
    data: Mutex<Option<UserData>>,
    disabled_response: AtomicBool,
}

impl Registration {
    pub(crate) fn disabled_response(&self) -> bool {
        self.disabled_response.load(Ordering::Acquire)
    }
}

fn entry(inst: &Instance, id: RpcId) -> HgResult<Arc<Registration>> {
    inst.registrations
        .get(&id)
        .map(|e| e.value().clone())
        .ok_or(HgReturn::NoEntry)
}

/// Registration that governs `id`: the exact provider first, then provider 0.
pub(crate) fn resolve(inst: &Instance, id: RpcId) -> Option<Arc<Registration>> {
    entry(inst, id)
        .or_else(|_| entry(inst, RpcId::mux(id.base(), 0)))
        .ok()
}

/// True when some provider of `id`'s base is registered.
pub(crate) fn knows_base(inst: &Instance, id: RpcId) -> bool {
    let base = id.base();
    inst.registrations.iter().any(|e| e.key().base() == base)
}

/// Registers `name` for `provider_id`. A `None` callback registers the id
/// for calling only. Registering an existing (name, provider) pair fails
/// with `Exist` and leaves the first registration in place.
pub fn register(
    mid: RawInstance,
    name: &str,
    provider_id: ProviderId,
    callback: Option<RpcCallback>,
) -> HgResult<RpcId> {
    let inst = instance::get(mid)?;
    let id = RpcId::mux(RpcId::from_name(name), provider_id);
    match inst.registrations.entry(id) {
        Entry::Occupied(_) => {}
        Entry::Vacant(slot) => {
            slot.insert(Arc::new(Registration {
                name: name.to_string(),
                callback,
                data: Mutex::new(None),
                disabled_response: AtomicBool::new(false),
            }));
            log::emit(mid, LogLevel::Debug, format!("registered rpc '{name}' as {id}"));
            return Ok(id);
        }
    }
    log::emit(mid, LogLevel::Error, format!("rpc '{name}' already registered for provider {provider_id}"));
    Err(HgReturn::Exist)
}

/// Attaches user data to a registration, dropping any previous value.
pub fn register_data(mid: RawInstance, id: RpcId, data: UserData) -> HgResult<()> {
    let inst = instance::get(mid)?;
    let reg = entry(&inst, id)?;
    let previous = reg.data.lock().replace(data);
    drop(previous);
    Ok(())
}

pub fn registered_data(mid: RawInstance, id: RpcId) -> HgResult<Option<UserData>> {
    let inst = instance::get(mid)?;
    let reg = entry(&inst, id)?;
    let data = reg.data.lock().clone();
    Ok(data)
}

/// Removes a registration and runs its user-data destructor.
pub fn deregister(mid: RawInstance, id: RpcId) -> HgResult<()> {
    let inst = instance::get(mid)?;
    let (_, reg) = inst.registrations.remove(&id).ok_or(HgReturn::NoEntry)?;
    let data = reg.data.lock().take();
    drop(data);
    log::emit(mid, LogLevel::Debug, format!("deregistered rpc '{}' ({id})", reg.name));
    Ok(())
}

/// Id of `name` for provider 0, if registered.
pub fn registered_name(mid: RawInstance, name: &str) -> HgResult<Option<RpcId>> {
    registered_name_provider(mid, name, 0)
}

pub fn registered_name_provider(
    mid: RawInstance,
    name: &str,
    provider_id: ProviderId,
) -> HgResult<Option<RpcId>> {
    let inst = instance::get(mid)?;
    let id = RpcId::mux(RpcId::from_name(name), provider_id);
    Ok(inst.registrations.contains_key(&id).then_some(id))
}

pub fn registered_disable_response(mid: RawInstance, id: RpcId, disable: bool) -> HgResult<()> {
    let inst = instance::get(mid)?;
    entry(&inst, id)?.disabled_response.store(disable, Ordering::Release);
    Ok(())
}

pub fn registered_disabled_response(mid: RawInstance, id: RpcId) -> HgResult<bool> {
    let inst = instance::get(mid)?;
    Ok(entry(&inst, id)?.disabled_response())
}
