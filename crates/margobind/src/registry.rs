//! # Registration Registry
//!
//! Binding handlers are registered with the engine under the generic
//! dispatch callback; the interpreted side of each registration (an object
//! plus an optional method selector) travels as the engine's user data, so
//! the engine's own table is the only registry and its destructor releases
//! the interpreted object.
//!
//! ## Providers
//!
//! A [`Provider`] exposes several RPCs from one object. Registering it with
//! a service name prefixes every RPC name with `"{service}_"`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hgcore::ProviderId;
use hgcore::RawInstance;
use hgcore::RpcId;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::address::Address;
use crate::capsule::OpaqueRef;
use crate::dispatch;
use crate::engine::Engine;
use crate::error::Error;
use crate::error::Op;
use crate::error::Result;
use crate::gil::Gil;
use crate::gil::with_interpreter;
use crate::handle::Handle;
use crate::request::ForwardRequest;
use crate::serialization;

/// An object serving one or more RPCs.
pub trait Provider: Send + Sync + 'static {
    /// Prefix applied to RPC names when none is given at registration.
    fn service_name(&self) -> Option<&str> {
        None
    }

    /// The RPCs this provider serves.
    fn rpcs(&self) -> Vec<RemoteSpec>;

    /// Runs `method` for one inbound call. The handle is the caller's to
    /// keep: it can be stored and responded to later.
    fn invoke(&self, gil: Gil<'_>, method: &str, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()>;
}

/// One RPC served by a [`Provider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSpec {
    pub rpc_name: String,
    pub method: String,
    pub disable_response: bool,
}

impl RemoteSpec {
    /// An RPC named after its method.
    pub fn new(method: &str) -> Self {
        Self {
            rpc_name: method.to_string(),
            method: method.to_string(),
            disable_response: false,
        }
    }

    pub fn named(mut self, rpc_name: &str) -> Self {
        self.rpc_name = rpc_name.to_string();
        self
    }

    pub fn without_response(mut self) -> Self {
        self.disable_response = true;
        self
    }
}

/// Adapts a plain function to the provider interface.
struct Function<F>(F);

impl<F> Provider for Function<F>
where
    F: for<'py> Fn(Gil<'py>, Handle, Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn rpcs(&self) -> Vec<RemoteSpec> {
        Vec::new()
    }

    fn invoke(&self, gil: Gil<'_>, _method: &str, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()> {
        (self.0)(gil, handle, payload)
    }
}

/// Registration user data: the capability the dispatcher invokes.
pub(crate) struct RpcData {
    object: Option<Arc<dyn Provider>>,
    method: Option<String>,
}

impl RpcData {
    pub(crate) fn invoke(&self, gil: Gil<'_>, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()> {
        let Some(object) = &self.object else {
            anyhow::bail!("registration was released");
        };
        object.invoke(gil, self.method.as_deref().unwrap_or_default(), handle, payload)
    }
}

impl Drop for RpcData {
    fn drop(&mut self) {
        // The object is interpreted state: release it under the lock.
        if let Some(object) = self.object.take() {
            with_interpreter(|_| drop(object));
        }
    }
}

impl Engine {
    fn register_data(&self, name: &str, provider_id: ProviderId, data: RpcData) -> Result<RemoteFunction> {
        let mid = self.mid();
        let id = hgcore::register(mid, name, provider_id, Some(dispatch::generic_callback)).op("register")?;
        if let Err(code) = hgcore::register_data(mid, id, Arc::new(data)) {
            let _ = hgcore::deregister(mid, id);
            return Err(Error::Engine { code, op: "register_data" });
        }
        Ok(RemoteFunction::new(mid, id))
    }

    /// Serves `name` for `provider_id` with `handler`, which receives the raw payload.
    pub fn register<F>(&self, name: &str, provider_id: ProviderId, handler: F) -> Result<RemoteFunction>
    where
        F: for<'py> Fn(Gil<'py>, Handle, Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let data = RpcData { object: Some(Arc::new(Function(handler))), method: None };
        self.register_data(name, provider_id, data)
    }

    /// Like [`register`](Self::register), decoding the payload into `A` first.
    pub fn register_typed<A, F>(&self, name: &str, provider_id: ProviderId, handler: F) -> Result<RemoteFunction>
    where
        A: DeserializeOwned + 'static,
        F: for<'py> Fn(Gil<'py>, Handle, A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(name, provider_id, move |gil, handle, payload| {
            let args = serialization::loads_in(handle.owning_instance()?, &payload)?;
            handler(gil, handle, args)
        })
    }

    /// Registers `name` for calling only. Registering it twice is harmless.
    pub fn register_client_only(&self, name: &str, provider_id: ProviderId) -> Result<RemoteFunction> {
        let mid = self.mid();
        match hgcore::register(mid, name, provider_id, None) {
            Ok(id) => Ok(RemoteFunction::new(mid, id)),
            Err(hgcore::HgReturn::Exist) => {
                let id = hgcore::registered_name_provider(mid, name, provider_id)
                    .op("registered_name_provider")?
                    .ok_or(Error::Engine { code: hgcore::HgReturn::NoEntry, op: "register" })?;
                Ok(RemoteFunction::new(mid, id))
            }
            Err(code) => Err(Error::Engine { code, op: "register" }),
        }
    }

    /// Registers every RPC of `provider`, keyed by final RPC name.
    pub fn register_provider<P: Provider>(
        &self,
        provider: Arc<P>,
        provider_id: ProviderId,
        service_name: Option<&str>,
    ) -> Result<BTreeMap<String, RemoteFunction>> {
        let prefix = service_name.or(provider.service_name()).map(str::to_string);
        let object: Arc<dyn Provider> = provider.clone();
        let mut registered = BTreeMap::new();
        for spec in provider.rpcs() {
            let name = match &prefix {
                Some(service) => format!("{}_{}", service, spec.rpc_name),
                None => spec.rpc_name.clone(),
            };
            let data = RpcData { object: Some(object.clone()), method: Some(spec.method.clone()) };
            let function = self.register_data(&name, provider_id, data)?;
            function.disable_response(spec.disable_response)?;
            tracing::debug!(rpc = %name, provider_id, "registered provider rpc");
            registered.insert(name, function);
        }
        Ok(registered)
    }

    /// Looks up a registration. Without `provider_id`, provider 0 is assumed.
    pub fn registered(&self, name: &str, provider_id: Option<ProviderId>) -> Result<Option<RemoteFunction>> {
        let mid = self.mid();
        let id = match provider_id {
            None => hgcore::registered_name(mid, name),
            Some(pid) => hgcore::registered_name_provider(mid, name, pid),
        }
        .op("registered_name")?;
        Ok(id.map(|id| RemoteFunction::new(mid, id)))
    }
}

/// A registered RPC id on one engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RemoteFunction {
    engine: OpaqueRef,
    rpc_id: RpcId,
}

impl RemoteFunction {
    fn new(mid: RawInstance, rpc_id: RpcId) -> Self {
        Self { engine: OpaqueRef::instance(mid), rpc_id }
    }

    pub fn rpc_id(&self) -> RpcId {
        self.rpc_id
    }

    pub fn engine(&self) -> OpaqueRef {
        self.engine
    }

    /// Binds this RPC to a target.
    pub fn on(&self, address: &Address, provider_id: ProviderId) -> Result<CallableRemoteFunction> {
        let handle = Handle::create(self.engine.as_instance()?, address.raw(), self.rpc_id)?;
        Ok(CallableRemoteFunction { function: *self, handle, provider_id, timeout: None })
    }

    pub fn disable_response(&self, disable: bool) -> Result<()> {
        hgcore::registered_disable_response(self.engine.as_instance()?, self.rpc_id, disable)
            .op("registered_disable_response")
    }

    pub fn disabled_response(&self) -> Result<bool> {
        hgcore::registered_disabled_response(self.engine.as_instance()?, self.rpc_id)
            .op("registered_disabled_response")
    }

    pub fn deregister(&self) -> Result<()> {
        hgcore::deregister(self.engine.as_instance()?, self.rpc_id).op("deregister")
    }
}

/// An RPC bound to an address and provider id, ready to call.
#[derive(Debug)]
pub struct CallableRemoteFunction {
    function: RemoteFunction,
    handle: Handle,
    provider_id: ProviderId,
    timeout: Option<Duration>,
}

impl CallableRemoteFunction {
    pub fn function(&self) -> RemoteFunction {
        self.function
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    /// Applies a deadline to every subsequent call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn call(&self, gil: Gil<'_>, payload: &[u8]) -> Result<Vec<u8>> {
        self.handle.forward(gil, self.provider_id, payload, self.timeout)
    }

    pub fn call_async(&self, payload: &[u8]) -> Result<ForwardRequest> {
        self.handle.iforward(self.provider_id, payload, self.timeout)
    }

    /// Serializes `args`, calls, and decodes the response. `None` when the
    /// RPC sends no response.
    pub fn invoke<A: Serialize, R: DeserializeOwned>(&self, gil: Gil<'_>, args: &A) -> Result<Option<R>> {
        let payload = serialization::dumps_in(self.function.engine, args)?;
        let output = self.call(gil, &payload)?;
        if output.is_empty() {
            return Ok(None);
        }
        serialization::loads_in(self.function.engine, &output).map(Some)
    }
}
