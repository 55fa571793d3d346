//! # margobind
//!
//! Binds lock-serialized interpreted code to the `hgcore` RPC engine.
//!
//! ## Architecture
//!
//! Interpreted code runs under one process-wide lock ([`gil`]). The engine
//! runs its progress loop and RPC handlers on its own threads. This crate
//! sits between the two:
//!
//! - Every blocking engine call releases the lock ([`Gil::allow_native`]).
//! - Every engine callback into interpreted code takes it first
//!   ([`with_interpreter`]): RPC dispatch, finalize callbacks, log sinks.
//! - Engine objects are owned wrappers ([`Handle`], [`Address`], [`Bulk`])
//!   whose copies go through the engine's reference counts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use margobind::{Engine, EngineOptions, with_interpreter};
//!
//! # fn main() -> margobind::Result<()> {
//! let server = Engine::new("na+sm", EngineOptions::server())?;
//! let client = Engine::new("na+sm", EngineOptions::client())?;
//! server.register("ping", 0, |gil, handle, _payload| {
//!     handle.respond(gil, b"pong")?;
//!     Ok(())
//! })?;
//!
//! let target = client.lookup(&server.address()?.to_uri()?)?;
//! let ping = client.register_client_only("ping", 0)?.on(&target, 0)?;
//! let reply = with_interpreter(|gil| ping.call(gil, b"ping"))?;
//! assert_eq!(reply, b"pong");
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bulk;
pub mod capsule;
mod dispatch;
pub mod engine;
pub mod error;
mod finalize;
pub mod gil;
pub mod handle;
pub mod logging;
pub mod registry;
pub mod request;
pub mod serialization;
pub mod sync;

pub use address::Address;
pub use bulk::Buffer;
pub use bulk::Bulk;
pub use capsule::Kind;
pub use capsule::OpaqueRef;
pub use engine::DispatchLocation;
pub use engine::Engine;
pub use engine::EngineOptions;
pub use error::Error;
pub use error::Result;
pub use gil::Gil;
pub use gil::with_interpreter;
pub use handle::Handle;
pub use logging::EngineLogger;
pub use logging::Logger;
pub use registry::CallableRemoteFunction;
pub use registry::Provider;
pub use registry::RemoteFunction;
pub use registry::RemoteSpec;
pub use request::ForwardRequest;
pub use request::Request;

pub use hgcore::AccessMode;
pub use hgcore::HgReturn;
pub use hgcore::LogLevel;
pub use hgcore::Mode;
pub use hgcore::ProviderId;
pub use hgcore::RpcId;
pub use hgcore::TransferOp;
