//! # Engine Instances
//!
//! An instance owns its progress runtime, an optional dedicated handler
//! runtime, its RPC registrations, its logger, and the prefinalize/finalize
//! callback queues. Instances are published on the fabric under their URI
//! for as long as they run.
//!
//! ## Threads
//!
//! - `hg-progress`: a single-worker tokio runtime draining the inbox.
//! - `hg-rpc`: blocking threads running RPC callbacks. They belong to the
//!   progress runtime unless `rpc_thread_count > 0` asks for a dedicated pool.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Builder;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::eventual::Eventual;
use crate::fabric;
use crate::fabric::Endpoint;
use crate::handle;
use crate::log;
use crate::log::LogState;
use crate::registry;
use crate::registry::Registration;
use crate::ret::HgResult;
use crate::ret::HgReturn;
use crate::rpc;
use crate::types::LogLevel;
use crate::types::Mode;
use crate::types::RawAddr;
use crate::types::RawHandle;
use crate::types::RawInstance;
use crate::types::RpcId;

/// Name of the internal RPC used by remote shutdown.
pub const SHUTDOWN_RPC: &str = "__shutdown__";

/// Upper bound on blocking threads of the progress runtime.
const MAX_RPC_ULTS: usize = 256;

const RUNNING: u8 = 0;
const FINALIZING: u8 = 1;
const FINALIZED: u8 = 2;

/// A callback run once at shutdown.
pub type FinalizeCallback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Instance {
    pub(crate) id: RawInstance,
    pub(crate) mode: Mode,
    pub(crate) uri: String,
    pub(crate) config: EngineConfig,
    pub(crate) registrations: DashMap<RpcId, Arc<Registration>>,
    pub(crate) log: LogState,
    rpc_pool: tokio::runtime::Handle,
    runtimes: Mutex<Vec<Runtime>>,
    prefinalize: Mutex<Vec<FinalizeCallback>>,
    finalize: Mutex<Vec<FinalizeCallback>>,
    state: AtomicU8,
    done: Eventual<()>,
}

impl Instance {
    pub(crate) fn rpc_pool(&self) -> &tokio::runtime::Handle {
        &self.rpc_pool
    }
}

static INSTANCES: LazyLock<DashMap<RawInstance, Arc<Instance>>> = LazyLock::new(DashMap::new);

/// Resolves a live (running or finalizing) instance.
pub(crate) fn get(mid: RawInstance) -> HgResult<Arc<Instance>> {
    let inst = INSTANCES
        .get(&mid)
        .map(|e| e.value().clone())
        .ok_or(HgReturn::NoEntry)?;
    if inst.state.load(Ordering::Acquire) == FINALIZED {
        return Err(HgReturn::NoEntry);
    }
    Ok(inst)
}

fn build_runtime(name: &str, blocking: usize) -> HgResult<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(blocking)
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, runtime = name, "failed to start engine runtime");
            HgReturn::NoMem
        })
}

/// Creates an instance (`margo_init_ext`).
///
/// `rpc_thread_count`: `-1` runs handlers on the progress runtime, `0` in
/// the caller's context, `n > 0` on a dedicated pool of `n` threads. Fields
/// of `json_config` override the positional arguments.
pub fn init(
    addr: &str,
    mode: Mode,
    use_progress_thread: bool,
    rpc_thread_count: i32,
    json_config: &str,
) -> HgResult<RawInstance> {
    let config = EngineConfig::new(use_progress_thread, rpc_thread_count).apply_json(json_config)?;
    let uri = fabric::allocate_uri(addr)?;

    let progress = build_runtime("hg-progress", MAX_RPC_ULTS)?;
    let mut runtimes = Vec::new();
    let rpc_pool = match config.dedicated_rpc_threads() {
        Some(n) => {
            let pool = build_runtime("hg-rpc", n)?;
            let handle = pool.handle().clone();
            runtimes.push(pool);
            handle
        }
        None => progress.handle().clone(),
    };

    let id = RawInstance::fresh();
    let (inbox, rx) = mpsc::unbounded_channel();
    progress.spawn(rpc::progress_loop(id, rx));
    runtimes.insert(0, progress);

    fabric::publish(&uri, Endpoint { instance: id, mode, inbox })?;

    let enable_shutdown = config.enable_remote_shutdown;
    let inst = Arc::new(Instance {
        id,
        mode,
        uri,
        config,
        registrations: DashMap::new(),
        log: LogState::new(),
        rpc_pool,
        runtimes: Mutex::new(runtimes),
        prefinalize: Mutex::new(Vec::new()),
        finalize: Mutex::new(Vec::new()),
        state: AtomicU8::new(RUNNING),
        done: Eventual::new(),
    });
    let uri = inst.uri.clone();
    INSTANCES.insert(id, inst);

    if enable_shutdown {
        enable_remote_shutdown(id)?;
    }
    tracing::debug!(%id, %uri, ?mode, "engine instance initialized");
    Ok(id)
}

fn drain(queue: &Mutex<Vec<FinalizeCallback>>) {
    loop {
        // The lock is released before the callback runs, so callbacks may push more.
        let next = {
            let mut q = queue.lock();
            if q.is_empty() { None } else { Some(q.remove(0)) }
        };
        match next {
            Some(cb) => cb(),
            None => break,
        }
    }
}

/// Shuts an instance down (`margo_finalize`).
///
/// Prefinalize callbacks run while the instance is still reachable; finalize
/// callbacks run after progress has stopped. Both queues run in
/// registration order. Registrations are dropped last, which runs their
/// user-data destructors.
pub fn finalize(mid: RawInstance) -> HgResult<()> {
    let inst = get(mid)?;
    if inst
        .state
        .compare_exchange(RUNNING, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Someone else is already tearing it down.
        return Ok(());
    }

    drain(&inst.prefinalize);
    fabric::unpublish(&inst.uri);
    let runtimes = std::mem::take(&mut *inst.runtimes.lock());
    for rt in runtimes {
        rt.shutdown_background();
    }
    drain(&inst.finalize);

    let ids: Vec<RpcId> = inst.registrations.iter().map(|e| *e.key()).collect();
    for id in ids {
        let removed = inst.registrations.remove(&id);
        drop(removed);
    }

    log::emit(mid, LogLevel::Debug, "instance finalized");
    inst.state.store(FINALIZED, Ordering::Release);
    inst.done.set(());
    Ok(())
}

/// Blocks until the instance has been finalized, by this or another thread.
pub fn wait_for_finalize(mid: RawInstance) -> HgResult<()> {
    let inst = INSTANCES
        .get(&mid)
        .map(|e| e.value().clone())
        .ok_or(HgReturn::NoEntry)?;
    inst.done.wait();
    Ok(())
}

pub fn is_listening(mid: RawInstance) -> HgResult<bool> {
    Ok(get(mid)?.mode == Mode::Server)
}

pub fn push_prefinalize_callback(mid: RawInstance, cb: FinalizeCallback) -> HgResult<()> {
    get(mid)?.prefinalize.lock().push(cb);
    Ok(())
}

pub fn push_finalize_callback(mid: RawInstance, cb: FinalizeCallback) -> HgResult<()> {
    get(mid)?.finalize.lock().push(cb);
    Ok(())
}

/// Effective configuration of an instance as pretty JSON.
pub fn config_dump(mid: RawInstance) -> HgResult<String> {
    let inst = get(mid)?;
    let doc = serde_json::json!({
        "address": inst.uri,
        "mode": inst.mode,
        "config": inst.config,
    });
    serde_json::to_string_pretty(&doc).map_err(|_| HgReturn::Other)
}

/// Suspends the calling thread (`margo_thread_sleep`).
pub fn thread_sleep(mid: RawInstance, timeout: Duration) -> HgResult<()> {
    get(mid)?;
    std::thread::sleep(timeout);
    Ok(())
}

fn shutdown_callback(h: RawHandle) -> HgReturn {
    let mid = match handle::handle_instance(h) {
        Ok(mid) => mid,
        Err(e) => return e,
    };
    let ret = HgReturn::from_result(&rpc::respond(h, &[]));
    if let Err(e) = handle::destroy(h) {
        log::emit(mid, LogLevel::Warning, format!("destroying shutdown handle failed: {e}"));
    }
    log::emit(mid, LogLevel::Info, "remote shutdown requested");
    // Finalize cannot run on a thread owned by the runtime it stops.
    let spawned = std::thread::Builder::new()
        .name("hg-shutdown".into())
        .spawn(move || {
            if let Err(e) = finalize(mid) {
                tracing::error!(%mid, error = %e, "remote shutdown failed");
            }
        });
    if spawned.is_err() {
        return HgReturn::NoMem;
    }
    ret
}

/// Lets peers shut this instance down with [`shutdown_remote_instance`].
pub fn enable_remote_shutdown(mid: RawInstance) -> HgResult<()> {
    match registry::register(mid, SHUTDOWN_RPC, 0, Some(shutdown_callback)) {
        Ok(_) | Err(HgReturn::Exist) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Asks the instance listening at `addr` to finalize itself.
pub fn shutdown_remote_instance(mid: RawInstance, addr: RawAddr) -> HgResult<()> {
    let id = match registry::registered_name(mid, SHUTDOWN_RPC)? {
        Some(id) => id,
        None => registry::register(mid, SHUTDOWN_RPC, 0, None)?,
    };
    let h = handle::create(mid, addr, id)?;
    let ret = rpc::forward(h, 0, &[], None);
    let destroyed = handle::destroy(h);
    ret?;
    destroyed
}
