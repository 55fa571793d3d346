//! # Loopback Fabric
//!
//! The process-wide "network": a concurrent map from address URI to the
//! inbox of the instance listening on it. Delivery is a channel send; the
//! receiving instance's progress loop picks the message up on its own thread.

use std::sync::LazyLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc::UnboundedSender;

use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::rpc::Message;
use crate::types::Mode;
use crate::types::RawInstance;

/// Transport plugins this engine accepts in an init address.
pub const PROTOCOLS: &[&str] = &["na+sm", "sm", "tcp", "ofi+tcp", "ofi+verbs", "ucx+tcp", "bmi+tcp"];

#[derive(Clone)]
pub(crate) struct Endpoint {
    pub(crate) instance: RawInstance,
    pub(crate) mode: Mode,
    pub(crate) inbox: UnboundedSender<Message>,
}

static FABRIC: LazyLock<DashMap<String, Endpoint>> = LazyLock::new(DashMap::new);
static NEXT_PORT: AtomicU64 = AtomicU64::new(1);

/// The protocol part of an address (`"tcp"` for `"tcp://host:1"`).
pub(crate) fn protocol_of(addr: &str) -> &str {
    addr.split_once("://").map_or(addr, |(proto, _)| proto)
}

/// Validates an init address and picks the URI the instance will listen on.
pub(crate) fn allocate_uri(addr_spec: &str) -> HgResult<String> {
    let proto = protocol_of(addr_spec.trim());
    if !PROTOCOLS.contains(&proto) {
        return Err(HgReturn::ProtoNoSupport);
    }
    match addr_spec.trim().split_once("://") {
        Some((_, rest)) if !rest.is_empty() => Ok(addr_spec.trim().to_string()),
        _ => {
            let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
            Ok(format!("{}://{}/{}", proto, std::process::id(), port))
        }
    }
}

pub(crate) fn publish(uri: &str, endpoint: Endpoint) -> HgResult<()> {
    match FABRIC.entry(uri.to_string()) {
        Entry::Occupied(_) => Err(HgReturn::AddrNotAvail),
        Entry::Vacant(slot) => {
            slot.insert(endpoint);
            Ok(())
        }
    }
}

pub(crate) fn unpublish(uri: &str) {
    FABRIC.remove(uri);
}

pub(crate) fn endpoint(uri: &str) -> Option<Endpoint> {
    FABRIC.get(uri).map(|e| e.value().clone())
}

pub(crate) fn is_published(uri: &str) -> bool {
    FABRIC.contains_key(uri)
}
