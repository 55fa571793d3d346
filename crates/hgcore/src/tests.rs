use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use parking_lot::RwLock;

use super::*;

struct Pair {
    server: RawInstance,
    client: RawInstance,
    /// The server's address, owned by the client.
    addr: RawAddr,
}

impl Pair {
    fn new() -> Self {
        let server = init("na+sm", Mode::Server, false, RPC_IN_PROGRESS_THREAD, "").unwrap();
        let client = init("na+sm", Mode::Client, false, RPC_IN_CALLER_THREAD, "").unwrap();
        let me = addr_self(server).unwrap();
        let uri = addr_to_string(server, me).unwrap();
        addr_free(server, me).unwrap();
        let addr = addr_lookup(client, &uri).unwrap();
        Self { server, client, addr }
    }

    fn close(self) {
        addr_free(self.client, self.addr).unwrap();
        finalize(self.client).unwrap();
        finalize(self.server).unwrap();
    }
}

fn pong(h: RawHandle) -> HgReturn {
    let ret = get_input(h).and_then(|input| {
        let reply: &[u8] = if input == b"ping" { b"pong" } else { b"?" };
        respond(h, reply)
    });
    let _ = destroy(h);
    HgReturn::from_result(&ret)
}

fn silent(h: RawHandle) -> HgReturn {
    let _ = destroy(h);
    HgReturn::Success
}

fn failing(h: RawHandle) -> HgReturn {
    let _ = destroy(h);
    HgReturn::Fault
}

#[test]
fn test_ping_pong() {
    let p = Pair::new();
    register(p.server, "ping", 0, Some(pong)).unwrap();
    let id = register(p.client, "ping", 0, None).unwrap();

    let h = create(p.client, p.addr, id).unwrap();
    forward(h, 0, b"ping", Some(Duration::from_secs(1))).unwrap();
    assert_eq!(get_output(h).unwrap(), b"pong");
    destroy(h).unwrap();
    p.close();
}

#[test]
fn test_create_destroy_cycles_free_once() {
    let p = Pair::new();
    let id = register(p.client, "cycle", 0, None).unwrap();
    let before = handle_stats();
    for _ in 0..200 {
        let h = create(p.client, p.addr, id).unwrap();
        assert_eq!(handle_ref_count(h).unwrap(), 1);
        destroy(h).unwrap();
        assert_eq!(destroy(h), Err(HgReturn::NoEntry));
    }
    let after = handle_stats();
    assert!(after.created >= before.created + 200);
    assert!(after.destroyed >= before.destroyed + 200);
    p.close();
}

#[test]
fn test_duplicate_registration_keeps_first() {
    let p = Pair::new();
    let first = register(p.server, "dup", 3, Some(pong)).unwrap();
    register_data(p.server, first, Arc::new(7u32)).unwrap();
    assert_eq!(register(p.server, "dup", 3, Some(silent)), Err(HgReturn::Exist));

    let data = registered_data(p.server, first).unwrap().unwrap();
    assert_eq!(data.downcast_ref::<u32>(), Some(&7));
    assert_eq!(registered_name_provider(p.server, "dup", 3).unwrap(), Some(first));
    // Another provider id is a distinct pair.
    assert!(register(p.server, "dup", 4, Some(silent)).is_ok());
    p.close();
}

#[test]
fn test_timed_forward_against_silent_handler() {
    let p = Pair::new();
    register(p.server, "mute", 0, Some(silent)).unwrap();
    let id = register(p.client, "mute", 0, None).unwrap();

    let h = create(p.client, p.addr, id).unwrap();
    let start = Instant::now();
    let ret = forward(h, 0, b"anyone?", Some(Duration::from_millis(50)));
    assert_eq!(ret, Err(HgReturn::Timeout));
    assert!(start.elapsed() < Duration::from_secs(5));
    destroy(h).unwrap();
    p.close();
}

#[test]
fn test_failed_handler_status_reaches_caller() {
    let p = Pair::new();
    register(p.server, "broken", 0, Some(failing)).unwrap();
    let id = register(p.client, "broken", 0, None).unwrap();

    let h = create(p.client, p.addr, id).unwrap();
    assert_eq!(forward(h, 0, b"", None), Err(HgReturn::Fault));
    destroy(h).unwrap();
    p.close();
}

#[test]
fn test_missing_provider_is_no_entry() {
    let p = Pair::new();
    register(p.server, "ping", 1, Some(pong)).unwrap();
    let id = register(p.client, "ping", 0, None).unwrap();

    let h = create(p.client, p.addr, id).unwrap();
    assert_eq!(forward(h, 2, b"ping", None), Err(HgReturn::NoEntry));
    forward(h, 1, b"ping", None).unwrap();
    assert_eq!(get_output(h).unwrap(), b"pong");
    destroy(h).unwrap();
    p.close();
}

#[test]
fn test_iforward_test_then_wait() {
    let p = Pair::new();
    register(p.server, "ping", 0, Some(pong)).unwrap();
    let id = register(p.client, "ping", 0, None).unwrap();

    let h = create(p.client, p.addr, id).unwrap();
    let req = iforward(h, 0, b"ping", None).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !test(req).unwrap() {
        assert!(Instant::now() < deadline);
        std::thread::yield_now();
    }
    wait(req).unwrap();
    assert_eq!(test(req), Err(HgReturn::NoEntry));
    assert_eq!(get_output(h).unwrap(), b"pong");
    destroy(h).unwrap();
    p.close();
}

#[test]
fn test_second_respond_is_refused() {
    let p = Pair::new();
    let id = register(p.server, "solo", 0, None).unwrap();
    let h = inject_request(p.server, id, 0, proc::encode_string(b"x").unwrap()).unwrap();
    assert_eq!(get_input(h).unwrap(), b"x");
    respond(h, b"one").unwrap();
    assert_eq!(respond(h, b"two"), Err(HgReturn::Permission));
    destroy(h).unwrap();
    p.close();
}

fn memory(bytes: &[u8]) -> SharedMemory {
    Arc::new(RwLock::new(bytes.to_vec()))
}

fn whole(memory: &SharedMemory) -> Segment {
    let len = memory.read().len();
    Segment { memory: memory.clone(), offset: 0, len }
}

#[test]
fn test_bulk_pull_through_serialized_descriptor() {
    let p = Pair::new();
    let source = memory(b"hello world");
    let exposed = bulk_create(p.server, vec![whole(&source)], AccessMode::ReadOnly).unwrap();

    for eager in [false, true] {
        let wire = bulk_serialize(exposed, eager).unwrap();
        let remote = bulk_deserialize(p.client, &wire).unwrap();
        assert_eq!(bulk_size(remote).unwrap(), 11);
        assert_eq!(bulk_access(remote).unwrap(), AccessMode::ReadOnly);

        let sink = memory(&[0; 5]);
        let local = bulk_create(p.client, vec![whole(&sink)], AccessMode::WriteOnly).unwrap();
        bulk_transfer(p.client, TransferOp::Pull, p.addr, remote, 6, local, 0, 5).unwrap();
        assert_eq!(&*sink.read(), b"world");

        bulk_free(local).unwrap();
        bulk_free(remote).unwrap();
    }
    bulk_free(exposed).unwrap();
    p.close();
}

#[test]
fn test_eager_descriptor_carries_a_snapshot() {
    let p = Pair::new();
    let source = memory(b"before");
    let exposed = bulk_create(p.server, vec![whole(&source)], AccessMode::ReadWrite).unwrap();
    let wire = bulk_serialize(exposed, true).unwrap();
    source.write().copy_from_slice(b"after!");

    let remote = bulk_deserialize(p.client, &wire).unwrap();
    let sink = memory(&[0; 6]);
    let local = bulk_create(p.client, vec![whole(&sink)], AccessMode::ReadWrite).unwrap();
    bulk_transfer(p.client, TransferOp::Pull, p.addr, remote, 0, local, 0, 6).unwrap();
    assert_eq!(&*sink.read(), b"before");
    p.close();
}

#[test]
fn test_bulk_transfer_checks() {
    let p = Pair::new();
    let source = memory(b"0123456789");
    let exposed = bulk_create(p.server, vec![whole(&source)], AccessMode::ReadOnly).unwrap();
    let remote = bulk_deserialize(p.client, &bulk_serialize(exposed, false).unwrap()).unwrap();
    let sink = memory(&[0; 10]);
    let local = bulk_create(p.client, vec![whole(&sink)], AccessMode::ReadWrite).unwrap();

    let push = bulk_transfer(p.client, TransferOp::Push, p.addr, remote, 0, local, 0, 4);
    assert_eq!(push, Err(HgReturn::Permission));
    let past_end = bulk_transfer(p.client, TransferOp::Pull, p.addr, remote, 8, local, 0, 4);
    assert_eq!(past_end, Err(HgReturn::Overflow));

    let own = addr_self(p.client).unwrap();
    let wrong_origin = bulk_transfer(p.client, TransferOp::Pull, own, remote, 0, local, 0, 4);
    assert_eq!(wrong_origin, Err(HgReturn::InvalidArg));
    addr_free(p.client, own).unwrap();

    assert!(bulk_deserialize(p.client, b"HGBK\x00").is_err());
    p.close();
}

#[test]
fn test_multi_segment_push() {
    let p = Pair::new();
    let a = memory(&[0; 4]);
    let b = memory(&[0; 4]);
    let segments = vec![
        Segment { memory: a.clone(), offset: 1, len: 3 },
        Segment { memory: b.clone(), offset: 0, len: 4 },
    ];
    let exposed = bulk_create(p.server, segments, AccessMode::WriteOnly).unwrap();
    assert_eq!(bulk_size(exposed).unwrap(), 7);
    let remote = bulk_deserialize(p.client, &bulk_serialize(exposed, true).unwrap()).unwrap();

    let data = memory(b"abcdefg");
    let local = bulk_create(p.client, vec![whole(&data)], AccessMode::ReadOnly).unwrap();
    let req = bulk_itransfer(p.client, TransferOp::Push, p.addr, remote, 0, local, 0, 7).unwrap();
    wait(req).unwrap();
    assert_eq!(&*a.read(), b"\0abc");
    assert_eq!(&*b.read(), b"defg");
    p.close();
}

fn descriptor(size: u64, seg_lens: &[u64], nsegs: u64) -> Vec<u8> {
    let mut w = proc::Writer::with_capacity(64);
    w.raw(b"HGBK");
    w.u8(0);
    w.u8(AccessMode::ReadOnly.to_byte());
    w.u64(1);
    w.u64(size);
    w.bytes(b"na+sm://0");
    w.u64(nsegs);
    for len in seg_lens {
        w.u64(*len);
    }
    w.finish()
}

#[test]
fn test_crafted_descriptor_lengths_are_refused() {
    let e = init("na+sm", Mode::Client, false, RPC_IN_CALLER_THREAD, "").unwrap();
    // The lengths wrap to the declared size of zero.
    let wrapping = descriptor(0, &[u64::MAX, 1], 2);
    assert_eq!(bulk_deserialize(e, &wrapping), Err(HgReturn::Protocol));
    let too_many = descriptor(0, &[], u64::MAX);
    assert_eq!(bulk_deserialize(e, &too_many), Err(HgReturn::Protocol));
    assert!(bulk_deserialize(e, &descriptor(3, &[1, 2], 2)).is_ok());
    finalize(e).unwrap();
}

#[test]
fn test_transfer_from_shrunk_memory_fails() {
    let p = Pair::new();
    let source = memory(&[7; 64]);
    let exposed = bulk_create(p.server, vec![whole(&source)], AccessMode::ReadOnly).unwrap();
    let remote = bulk_deserialize(p.client, &bulk_serialize(exposed, false).unwrap()).unwrap();
    let sink = memory(&[0; 64]);
    let local = bulk_create(p.client, vec![whole(&sink)], AccessMode::ReadWrite).unwrap();
    source.write().truncate(8);

    let pull = bulk_transfer(p.client, TransferOp::Pull, p.addr, remote, 0, local, 0, 64);
    assert_eq!(pull, Err(HgReturn::Overflow));
    assert_eq!(bulk_serialize(exposed, true), Err(HgReturn::Overflow));

    let req = bulk_itransfer(p.client, TransferOp::Pull, p.addr, remote, 0, local, 0, 64).unwrap();
    assert_eq!(wait(req), Err(HgReturn::Overflow));

    // A shrunk destination is refused before anything is written.
    sink.write().truncate(4);
    let pull = bulk_transfer(p.client, TransferOp::Pull, p.addr, remote, 0, local, 0, 8);
    assert_eq!(pull, Err(HgReturn::Overflow));
    assert_eq!(&*sink.read(), &[0; 4]);
    p.close();
}

#[test]
fn test_request_free_abandons_request() {
    let p = Pair::new();
    register(p.server, "quiet", 0, Some(silent)).unwrap();
    let id = register(p.client, "quiet", 0, None).unwrap();
    let h = create(p.client, p.addr, id).unwrap();
    let req = iforward(h, 0, b"", None).unwrap();
    assert_eq!(test(req), Ok(false));
    request_free(req).unwrap();
    assert_eq!(test(req), Err(HgReturn::NoEntry));
    assert_eq!(request_free(req), Err(HgReturn::NoEntry));
    destroy(h).unwrap();
    p.close();
}

struct Tracker(Arc<Mutex<Vec<&'static str>>>, &'static str);

impl Drop for Tracker {
    fn drop(&mut self) {
        self.0.lock().push(self.1);
    }
}

#[test]
fn test_finalize_order() {
    let mid = init("tcp", Mode::Server, true, RPC_IN_PROGRESS_THREAD, "").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in ["pre-1", "pre-2"] {
        let seen = seen.clone();
        push_prefinalize_callback(mid, Box::new(move || seen.lock().push(name))).unwrap();
    }
    for name in ["fin-1", "fin-2"] {
        let seen = seen.clone();
        push_finalize_callback(mid, Box::new(move || seen.lock().push(name))).unwrap();
    }
    let id = register(mid, "tracked", 0, Some(silent)).unwrap();
    register_data(mid, id, Arc::new(Tracker(seen.clone(), "data"))).unwrap();

    finalize(mid).unwrap();
    wait_for_finalize(mid).unwrap();
    assert_eq!(*seen.lock(), ["pre-1", "pre-2", "fin-1", "fin-2", "data"]);
    assert_eq!(is_listening(mid), Err(HgReturn::NoEntry));
}

#[test]
fn test_deregister_runs_data_destructor() {
    let mid = init("sm", Mode::Server, false, RPC_IN_PROGRESS_THREAD, "").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let id = register(mid, "gone", 0, Some(silent)).unwrap();
    register_data(mid, id, Arc::new(Tracker(seen.clone(), "dropped"))).unwrap();
    deregister(mid, id).unwrap();
    assert_eq!(*seen.lock(), ["dropped"]);
    assert_eq!(registered_name(mid, "gone").unwrap(), None);
    finalize(mid).unwrap();
}

#[derive(Default)]
struct Collect(Mutex<Vec<(LogLevel, String)>>);

impl LogSink for Collect {
    fn log(&self, level: LogLevel, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

#[test]
fn test_log_thresholds() {
    let mid = init("na+sm", Mode::Client, false, 0, "").unwrap();
    let sink = Arc::new(Collect::default());
    log::set_logger(mid, Some(sink.clone() as Arc<dyn LogSink>)).unwrap();

    log::log(Some(mid), LogLevel::Info, "hidden");
    log::log(Some(mid), LogLevel::Error, "shown");
    log::set_log_level(mid, LogLevel::External).unwrap();
    log::log(Some(mid), LogLevel::Trace, "everything");

    let got: Vec<String> = sink.0.lock().iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(got, ["shown", "everything"]);
    finalize(mid).unwrap();
}

#[test]
fn test_init_rejects_unknown_protocol_and_bad_json() {
    assert_eq!(init("carrier-pigeon", Mode::Client, false, 0, ""), Err(HgReturn::ProtoNoSupport));
    assert_eq!(init("tcp", Mode::Client, false, 0, "{not json"), Err(HgReturn::InvalidArg));
}

#[test]
fn test_config_dump_reflects_json_overrides() {
    let mid = init("ofi+tcp", Mode::Server, false, 0, r#"{"rpc_thread_count": 2}"#).unwrap();
    let dump: serde_json::Value = serde_json::from_str(&config_dump(mid).unwrap()).unwrap();
    assert_eq!(dump["mode"], "server");
    assert_eq!(dump["config"]["rpc_thread_count"], 2);
    assert!(dump["address"].as_str().unwrap().starts_with("ofi+tcp://"));
    finalize(mid).unwrap();
}
