//! # Asynchronous Requests
//!
//! Pending non-blocking operations. `wait` consumes the request (the type
//! system enforces single use) and releases the interpreter lock while it
//! blocks; `test` is a non-blocking poll and keeps the lock.
//!
//! A request dropped without `wait` is abandoned: its engine record is
//! freed and the operation completes unobserved.

use hgcore::ProviderId;
use hgcore::RawRequest;
use hgcore::RpcId;

use crate::capsule::OpaqueRef;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::handle::Handle;

/// A forward in flight. Keeps its handle alive until completion.
#[must_use = "a forward request must be waited on"]
pub struct ForwardRequest {
    req: OpaqueRef,
    handle: Handle,
    rpc_id: RpcId,
    provider_id: ProviderId,
    expect_output: bool,
    waited: bool,
}

impl ForwardRequest {
    pub(crate) fn new(
        req: RawRequest,
        handle: Handle,
        rpc_id: RpcId,
        provider_id: ProviderId,
        expect_output: bool,
    ) -> Self {
        Self {
            req: OpaqueRef::request(req),
            handle,
            rpc_id,
            provider_id,
            expect_output,
            waited: false,
        }
    }

    pub fn opaque(&self) -> OpaqueRef {
        self.req
    }

    pub fn test(&self) -> Result<bool> {
        hgcore::test(self.req.as_request()?).op("test")
    }

    /// Waits for the response and returns it (empty when responses are disabled).
    pub fn wait(mut self, gil: Gil<'_>) -> Result<Vec<u8>> {
        let raw = self.req.as_request()?;
        self.waited = true;
        let ret = gil.allow_native(|| hgcore::wait(raw));
        self.handle
            .complete_forward(ret, self.rpc_id, self.provider_id, self.expect_output)
    }
}

/// A response or bulk transfer in flight.
#[must_use = "a request must be waited on"]
pub struct Request {
    req: OpaqueRef,
    op: &'static str,
    waited: bool,
}

impl Request {
    pub(crate) fn new(req: RawRequest, op: &'static str) -> Self {
        Self { req: OpaqueRef::request(req), op, waited: false }
    }

    pub fn opaque(&self) -> OpaqueRef {
        self.req
    }

    pub fn test(&self) -> Result<bool> {
        hgcore::test(self.req.as_request()?).op("test")
    }

    pub fn wait(mut self, gil: Gil<'_>) -> Result<()> {
        let raw = self.req.as_request()?;
        self.waited = true;
        gil.allow_native(|| hgcore::wait(raw)).op(self.op)
    }
}

fn abandon(req: OpaqueRef) {
    let Ok(raw) = req.as_request() else { return };
    if let Err(code) = hgcore::request_free(raw) {
        tracing::warn!(request = %raw, error = %code, "failed to free request");
    }
}

impl Drop for ForwardRequest {
    fn drop(&mut self) {
        if !self.waited {
            abandon(self.req);
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.waited {
            abandon(self.req);
        }
    }
}
