//! # hgcore
//!
//! An in-process RPC engine with a flat, status-code based API in the shape
//! of Margo/Mercury: opaque raw identifiers in, `HgResult` out.
//!
//! ## Architecture
//!
//! - **Instances** own a progress runtime that drains their fabric inbox and
//!   a handler pool that runs registered callbacks.
//! - **Fabric**: a process-wide loopback network keyed by address URI.
//! - **Handles** are reference-counted per-call records; the engine frees a
//!   handle exactly once, when its last reference is destroyed.
//! - **Bulk** descriptors expose shared memory segments for push/pull
//!   transfers and serialize to a self-describing byte form.
//! - **abt**: explicit-unlock mutex, rwlock and yield.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hgcore::{HgReturn, Mode, RawHandle};
//!
//! fn echo(h: RawHandle) -> HgReturn {
//!     let ret = hgcore::get_input(h).and_then(|input| hgcore::respond(h, &input));
//!     let _ = hgcore::destroy(h);
//!     HgReturn::from_result(&ret)
//! }
//!
//! # fn main() -> hgcore::HgResult<()> {
//! let server = hgcore::init("na+sm", Mode::Server, false, -1, "")?;
//! let client = hgcore::init("na+sm", Mode::Client, false, 0, "")?;
//! hgcore::register(server, "echo", 0, Some(echo))?;
//! let id = hgcore::register(client, "echo", 0, None)?;
//!
//! let uri = hgcore::addr_to_string(server, hgcore::addr_self(server)?)?;
//! let addr = hgcore::addr_lookup(client, &uri)?;
//! let h = hgcore::create(client, addr, id)?;
//! hgcore::forward(h, 0, b"hi", None)?;
//! assert_eq!(hgcore::get_output(h)?, b"hi");
//! # Ok(())
//! # }
//! ```

pub mod abt;
pub mod addr;
pub mod bulk;
pub mod config;
mod eventual;
mod fabric;
pub mod handle;
pub mod instance;
pub mod log;
pub mod proc;
pub mod registry;
pub mod ret;
pub mod rpc;
pub mod types;

pub use addr::addr_cmp;
pub use addr::addr_dup;
pub use addr::addr_free;
pub use addr::addr_lookup;
pub use addr::addr_self;
pub use addr::addr_set_remove;
pub use addr::addr_to_string;
pub use bulk::SharedMemory;
pub use bulk::Segment;
pub use bulk::bulk_access;
pub use bulk::bulk_create;
pub use bulk::bulk_deserialize;
pub use bulk::bulk_free;
pub use bulk::bulk_itransfer;
pub use bulk::bulk_ref_count;
pub use bulk::bulk_ref_incr;
pub use bulk::bulk_serialize;
pub use bulk::bulk_size;
pub use bulk::bulk_transfer;
pub use config::EngineConfig;
pub use config::RPC_IN_CALLER_THREAD;
pub use config::RPC_IN_PROGRESS_THREAD;
pub use fabric::PROTOCOLS;
pub use handle::HandleStats;
pub use handle::create;
pub use handle::destroy;
pub use handle::get_info;
pub use handle::get_input;
pub use handle::get_output;
pub use handle::handle_instance;
pub use handle::handle_ref_count;
pub use handle::handle_stats;
pub use handle::inject_request;
pub use handle::ref_incr;
pub use instance::FinalizeCallback;
pub use instance::SHUTDOWN_RPC;
pub use instance::config_dump;
pub use instance::enable_remote_shutdown;
pub use instance::finalize;
pub use instance::init;
pub use instance::is_listening;
pub use instance::push_finalize_callback;
pub use instance::push_prefinalize_callback;
pub use instance::shutdown_remote_instance;
pub use instance::thread_sleep;
pub use instance::wait_for_finalize;
pub use log::LogSink;
pub use ret::HgResult;
pub use ret::HgReturn;
pub use registry::RpcCallback;
pub use registry::UserData;
pub use registry::deregister;
pub use registry::register;
pub use registry::register_data;
pub use registry::registered_data;
pub use registry::registered_disable_response;
pub use registry::registered_disabled_response;
pub use registry::registered_name;
pub use registry::registered_name_provider;
pub use rpc::forward;
pub use rpc::iforward;
pub use rpc::irespond;
pub use rpc::pending_requests;
pub use rpc::request_free;
pub use rpc::respond;
pub use rpc::test;
pub use rpc::wait;
pub use types::AccessMode;
pub use types::HandleInfo;
pub use types::LogLevel;
pub use types::Mode;
pub use types::ProviderId;
pub use types::RawAddr;
pub use types::RawBulk;
pub use types::RawHandle;
pub use types::RawInstance;
pub use types::RawRequest;
pub use types::RpcId;
pub use types::TransferOp;

#[cfg(test)]
mod tests;
