//! # Addresses
//!
//! An address record names an endpoint URI on behalf of one instance.
//! Every lookup, self-query or dup produces an independent record that must
//! be freed exactly once; equality is by URI, not by record.

use std::sync::LazyLock;

use dashmap::DashMap;

use crate::fabric;
use crate::instance;
use crate::log;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::types::LogLevel;
use crate::types::RawAddr;
use crate::types::RawInstance;

struct AddrRecord {
    instance: RawInstance,
    uri: String,
}

static ADDRS: LazyLock<DashMap<RawAddr, AddrRecord>> = LazyLock::new(DashMap::new);

pub(crate) fn new_record(mid: RawInstance, uri: String) -> RawAddr {
    let addr = RawAddr::fresh();
    ADDRS.insert(addr, AddrRecord { instance: mid, uri });
    addr
}

pub(crate) fn uri_of(addr: RawAddr) -> HgResult<String> {
    ADDRS.get(&addr).map(|r| r.uri.clone()).ok_or(HgReturn::NoEntry)
}

/// Releases a record without instance checks. Used for handle-owned addresses.
pub(crate) fn release(addr: RawAddr) {
    ADDRS.remove(&addr);
}

fn owned_uri(mid: RawInstance, addr: RawAddr) -> HgResult<String> {
    let rec = ADDRS.get(&addr).ok_or(HgReturn::NoEntry)?;
    if rec.instance != mid {
        return Err(HgReturn::InvalidArg);
    }
    Ok(rec.uri.clone())
}

/// Resolves a URI published on the fabric (`margo_addr_lookup`).
pub fn addr_lookup(mid: RawInstance, uri: &str) -> HgResult<RawAddr> {
    let inst = instance::get(mid)?;
    let uri = uri.trim();
    if fabric::protocol_of(uri) != fabric::protocol_of(&inst.uri) {
        return Err(HgReturn::ProtoNoSupport);
    }
    if !fabric::is_published(uri) {
        log::emit(mid, LogLevel::Warning, format!("lookup of unknown address {uri}"));
        return Err(HgReturn::NoEntry);
    }
    Ok(new_record(mid, uri.to_string()))
}

pub fn addr_self(mid: RawInstance) -> HgResult<RawAddr> {
    let inst = instance::get(mid)?;
    Ok(new_record(mid, inst.uri.clone()))
}

pub fn addr_dup(mid: RawInstance, addr: RawAddr) -> HgResult<RawAddr> {
    let uri = owned_uri(mid, addr)?;
    Ok(new_record(mid, uri))
}

pub fn addr_free(mid: RawInstance, addr: RawAddr) -> HgResult<()> {
    owned_uri(mid, addr)?;
    ADDRS.remove(&addr);
    Ok(())
}

pub fn addr_cmp(mid: RawInstance, a: RawAddr, b: RawAddr) -> HgResult<bool> {
    Ok(owned_uri(mid, a)? == owned_uri(mid, b)?)
}

pub fn addr_to_string(mid: RawInstance, addr: RawAddr) -> HgResult<String> {
    owned_uri(mid, addr)
}

/// Hints that the peer behind `addr` is gone. Connections to it are not
/// cached by the loopback fabric, so this only validates and logs.
pub fn addr_set_remove(mid: RawInstance, addr: RawAddr) -> HgResult<()> {
    let uri = owned_uri(mid, addr)?;
    log::emit(mid, LogLevel::Debug, format!("address {uri} marked for removal"));
    Ok(())
}
