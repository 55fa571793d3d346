//! # RPC Handles
//!
//! A [`Handle`] owns exactly one engine reference to a per-call handle.
//! `try_clone` takes another reference, dropping releases one; the engine
//! frees the handle when the last reference goes. There is no way to copy a
//! `Handle` without going through the engine's reference count.
//!
//! Blocking operations (`forward`, `respond`) release the interpreter lock
//! for the duration of the engine call.

use std::fmt;
use std::time::Duration;

use hgcore::HandleInfo;
use hgcore::HgResult;
use hgcore::HgReturn;
use hgcore::ProviderId;
use hgcore::RawAddr;
use hgcore::RawHandle;
use hgcore::RawInstance;
use hgcore::RpcId;
use serde::Serialize;

use crate::address::Address;
use crate::capsule::OpaqueRef;
use crate::error::Error;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::request::ForwardRequest;
use crate::request::Request;
use crate::serialization;

pub struct Handle {
    raw: RawHandle,
}

impl Handle {
    /// Creates a client handle for `id` targeting `addr`.
    pub(crate) fn create(mid: RawInstance, addr: RawAddr, id: RpcId) -> Result<Self> {
        let raw = hgcore::create(mid, addr, id).op("create")?;
        Ok(Self { raw })
    }

    /// Wraps a handle the engine lent us, taking our own reference so the
    /// wrapper stays valid after the engine drops its one.
    pub(crate) fn adopt(raw: RawHandle) -> Result<Self> {
        hgcore::ref_incr(raw).op("ref_incr")?;
        Ok(Self { raw })
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::adopt(self.raw)
    }

    pub fn info(&self) -> Result<HandleInfo> {
        hgcore::get_info(self.raw).op("get_info")
    }

    pub fn rpc_id(&self) -> Result<RpcId> {
        Ok(self.info()?.id)
    }

    pub fn provider_id(&self) -> Result<ProviderId> {
        Ok(self.info()?.provider_id)
    }

    /// The peer of this call: the sender for a received request, the
    /// target for a client handle. The returned address is an independent copy.
    pub fn get_addr(&self) -> Result<Address> {
        let info = self.info()?;
        Address::dup(info.instance, info.addr)
    }

    pub fn owning_instance(&self) -> Result<OpaqueRef> {
        let mid = hgcore::handle_instance(self.raw).op("handle_instance")?;
        Ok(OpaqueRef::instance(mid))
    }

    pub fn ref_count(&self) -> Result<usize> {
        hgcore::handle_ref_count(self.raw).op("ref_count")
    }

    /// Request payload of a received call.
    pub fn input(&self) -> Result<Vec<u8>> {
        hgcore::get_input(self.raw).map_err(|code| Error::Protocol(format!("undecodable input: {}", code)))
    }

    /// Sends `payload` to provider `provider_id` and waits for the response.
    ///
    /// Returns an empty payload when responses are disabled for this RPC.
    pub fn forward(
        &self,
        gil: Gil<'_>,
        provider_id: ProviderId,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let info = self.info()?;
        let expect_output = !responses_disabled(info.instance, info.id, provider_id);
        let raw = self.raw;
        let ret = gil.allow_native(|| hgcore::forward(raw, provider_id, payload, timeout));
        self.complete_forward(ret, info.id, provider_id, expect_output)
    }

    /// Non-blocking [`forward`](Self::forward).
    pub fn iforward(
        &self,
        provider_id: ProviderId,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ForwardRequest> {
        let info = self.info()?;
        let expect_output = !responses_disabled(info.instance, info.id, provider_id);
        let req = hgcore::iforward(self.raw, provider_id, payload, timeout).op("iforward")?;
        Ok(ForwardRequest::new(req, self.try_clone()?, info.id, provider_id, expect_output))
    }

    pub(crate) fn complete_forward(
        &self,
        ret: HgResult<()>,
        id: RpcId,
        provider_id: ProviderId,
        expect_output: bool,
    ) -> Result<Vec<u8>> {
        match ret {
            Err(HgReturn::NoEntry) => {
                return Err(Error::HandlerNotFound {
                    rpc_id: RpcId::mux(id.base(), provider_id),
                    provider_id,
                });
            }
            other => other.op("forward")?,
        }
        if !expect_output {
            return Ok(Vec::new());
        }
        hgcore::get_output(self.raw).map_err(|code| Error::Protocol(format!("undecodable response: {}", code)))
    }

    pub fn respond(&self, gil: Gil<'_>, payload: &[u8]) -> Result<()> {
        let raw = self.raw;
        gil.allow_native(|| hgcore::respond(raw, payload)).op("respond")
    }

    /// Serializes `value` and sends it as the response.
    pub fn respond_value<T: Serialize>(&self, gil: Gil<'_>, value: &T) -> Result<()> {
        let mid = hgcore::handle_instance(self.raw).op("handle_instance")?;
        let payload = serialization::dumps_in(OpaqueRef::instance(mid), value)?;
        self.respond(gil, &payload)
    }

    pub fn irespond(&self, payload: &[u8]) -> Result<Request> {
        let req = hgcore::irespond(self.raw, payload).op("irespond")?;
        Ok(Request::new(req, "respond"))
    }
}

/// Mirrors the engine's rule: the exact (id, provider) registration
/// decides, otherwise the provider-0 one.
fn responses_disabled(mid: RawInstance, id: RpcId, provider_id: ProviderId) -> bool {
    [RpcId::mux(id.base(), provider_id), RpcId::mux(id.base(), 0)]
        .into_iter()
        .find_map(|candidate| hgcore::registered_disabled_response(mid, candidate).ok())
        .unwrap_or(false)
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(code) = hgcore::destroy(self.raw) {
            tracing::warn!(handle = %self.raw, error = %code, "failed to destroy rpc handle");
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.raw.0).finish()
    }
}
