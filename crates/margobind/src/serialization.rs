//! JSON payload encoding. While a value is being encoded or decoded, the
//! engine it belongs to is made current on this thread so that embedded
//! [`Bulk`](crate::bulk::Bulk) descriptors can be rebuilt on that engine.

use std::cell::Cell;

use hgcore::RawInstance;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::capsule::OpaqueRef;
use crate::engine::Engine;
use crate::error::Result;

thread_local! {
    static CURRENT: Cell<Option<OpaqueRef>> = const { Cell::new(None) };
}

/// Makes an engine current until dropped, restoring the previous one.
struct Current(Option<OpaqueRef>);

impl Current {
    fn enter(engine: OpaqueRef) -> Self {
        Self(CURRENT.with(|c| c.replace(Some(engine))))
    }
}

impl Drop for Current {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.0));
    }
}

/// The engine made current by an enclosing `dumps`/`loads`.
pub(crate) fn current() -> Option<RawInstance> {
    CURRENT.with(|c| c.get()).and_then(|r| r.as_instance().ok())
}

pub fn dumps<T: Serialize + ?Sized>(engine: &Engine, value: &T) -> Result<Vec<u8>> {
    dumps_in(engine.id(), value)
}

pub fn loads<T: DeserializeOwned>(engine: &Engine, raw: &[u8]) -> Result<T> {
    loads_in(engine.id(), raw)
}

pub(crate) fn dumps_in<T: Serialize + ?Sized>(engine: OpaqueRef, value: &T) -> Result<Vec<u8>> {
    let _current = Current::enter(engine);
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn loads_in<T: DeserializeOwned>(engine: OpaqueRef, raw: &[u8]) -> Result<T> {
    let _current = Current::enter(engine);
    Ok(serde_json::from_slice(raw)?)
}
