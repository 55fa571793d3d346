//! # Generic Dispatch
//!
//! The one native callback registered for every binding RPC. Per call:
//!
//! 1. Resolve call metadata from the engine handle.
//! 2. Decode the payload. Failure is a `Protocol` error; no user code runs.
//! 3. Find the registration data for (RPC id, provider id). Absent data is
//!    `HandlerNotFound`; no user code runs.
//! 4. Wrap the handle (taking a reference of our own, since the engine drops
//!    its reference when we return) and run the handler under the
//!    interpreter lock.
//! 5. A handler error is logged and reported to the engine as a status. A
//!    panic is not an error: the process aborts.
//! 6. Release the engine's reference on every path.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use hgcore::HgReturn;
use hgcore::LogLevel;
use hgcore::RawHandle;

use crate::error::Error;
use crate::error::Op;
use crate::error::Result;
use crate::gil::with_interpreter;
use crate::handle::Handle;
use crate::registry::RpcData;

/// Entry point handed to the engine at registration.
pub(crate) fn generic_callback(raw: RawHandle) -> HgReturn {
    match dispatch(raw) {
        Ok(()) => HgReturn::Success,
        Err(e) => e.code(),
    }
}

/// Releases the reference the engine lent to the callback.
struct Lent(RawHandle);

impl Drop for Lent {
    fn drop(&mut self) {
        if let Err(code) = hgcore::destroy(self.0) {
            tracing::warn!(handle = %self.0, error = %code, "failed to release dispatched handle");
        }
    }
}

pub(crate) fn dispatch(raw: RawHandle) -> Result<()> {
    let _lent = Lent(raw);
    let info = hgcore::get_info(raw).op("get_info")?;
    let mid = info.instance;

    let payload = match hgcore::get_input(raw) {
        Ok(payload) => payload,
        Err(code) => {
            let msg = format!("rpc {} carried an undecodable payload: {}", info.id, code);
            hgcore::log::log(Some(mid), LogLevel::Error, &msg);
            return Err(Error::Protocol(msg));
        }
    };

    let data = hgcore::registered_data(mid, info.id)
        .ok()
        .flatten()
        .and_then(|data| data.downcast::<RpcData>().ok());
    let Some(data) = data else {
        let err = Error::HandlerNotFound { rpc_id: info.id, provider_id: info.provider_id };
        hgcore::log::log(Some(mid), LogLevel::Error, &err.to_string());
        return Err(err);
    };

    let handle = Handle::adopt(raw)?;
    let outcome = fatal_on_panic("rpc handler", || {
        with_interpreter(|gil| data.invoke(gil, handle, payload))
    });
    if let Err(e) = outcome {
        hgcore::log::log(Some(mid), LogLevel::Error, &format!("handler for rpc {} failed: {:#}", info.id, e));
        return Err(Error::Engine { code: HgReturn::Other, op: "rpc handler" });
    }
    Ok(())
}

/// Runs `f`, turning a panic into a process abort. Interpreted code reports
/// failure through its error type; a panic means the lock or reference
/// invariants can no longer be trusted.
pub(crate) fn fatal_on_panic<R>(what: &str, f: impl FnOnce() -> R) -> R {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(payload) => {
            let msg = panic_message(&*payload);
            tracing::error!(critical = true, what, panic = %msg, "fatal fault in interpreted code, aborting");
            std::process::abort();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
