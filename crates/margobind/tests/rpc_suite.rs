//! Client/server scenarios through the public binding API.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use margobind::Address;
use margobind::DispatchLocation;
use margobind::Engine;
use margobind::EngineOptions;
use margobind::Error;
use margobind::Gil;
use margobind::Handle;
use margobind::HgReturn;
use margobind::Provider;
use margobind::RemoteSpec;
use margobind::RpcId;
use margobind::with_interpreter;
use serde::Deserialize;
use serde::Serialize;

struct Pair {
    /// The server as seen by the client. Freed before the engines go.
    target: Address,
    server: Engine,
    client: Engine,
}

impl Pair {
    fn new() -> Self {
        let server = Engine::new("na+sm", EngineOptions::server().dispatch(DispatchLocation::ProgressThread)).unwrap();
        let client = Engine::new("na+sm", EngineOptions::client()).unwrap();
        let target = client.lookup(&server.address().unwrap().to_uri().unwrap()).unwrap();
        Self { target, server, client }
    }
}

fn pong(gil: Gil<'_>, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()> {
    let reply: &[u8] = if payload == b"ping" { b"pong" } else { b"?" };
    handle.respond(gil, reply)?;
    Ok(())
}

#[test]
fn test_ping_pong() {
    let p = Pair::new();
    p.server.register("ping", 0, pong).unwrap();
    let ping = p
        .client
        .register_client_only("ping", 0)
        .unwrap()
        .on(&p.target, 0)
        .unwrap()
        .with_timeout(Duration::from_millis(1000));

    let reply = with_interpreter(|gil| ping.call(gil, b"ping")).unwrap();
    assert_eq!(reply, b"pong");
}

#[test]
fn test_non_blocking_respond() {
    let p = Pair::new();
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    p.server
        .register("echo", 0, move |gil, handle, payload| {
            let pending = handle.irespond(&payload)?;
            anyhow::ensure!(pending.test()?, "loopback response still in flight");
            pending.wait(gil)?;
            // The response is out; a second one is refused.
            let again = handle.irespond(b"again")?;
            anyhow::ensure!(again.wait(gil).unwrap_err().code() == HgReturn::Permission);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let echo = p
        .client
        .register_client_only("echo", 0)
        .unwrap()
        .on(&p.target, 0)
        .unwrap()
        .with_timeout(Duration::from_millis(1000));

    for payload in [&b"first"[..], b"second"] {
        let reply = with_interpreter(|gil| echo.call(gil, payload)).unwrap();
        assert_eq!(reply, payload);
    }
    // The handler finishes its checks after the reply is already out.
    let deadline = Instant::now() + Duration::from_secs(5);
    while completed.load(Ordering::SeqCst) < 2 {
        assert!(Instant::now() < deadline, "handler checks failed");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_duplicate_registration_is_an_engine_error() {
    let p = Pair::new();
    p.server.register("once", 0, pong).unwrap();
    let err = p.server.register("once", 0, pong).unwrap_err();
    assert!(matches!(err, Error::Engine { code: HgReturn::Exist, .. }));
    // Another provider id is a separate registration.
    p.server.register("once", 1, pong).unwrap();
}

#[test]
fn test_slow_handler_times_out() {
    let p = Pair::new();
    p.server
        .register("slow", 0, |gil, handle, _| {
            gil.allow_native(|| std::thread::sleep(Duration::from_millis(300)));
            handle.respond(gil, b"too late")?;
            Ok(())
        })
        .unwrap();
    let slow = p
        .client
        .register_client_only("slow", 0)
        .unwrap()
        .on(&p.target, 0)
        .unwrap()
        .with_timeout(Duration::from_millis(50));

    let err = with_interpreter(|gil| slow.call(gil, b"")).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(err.code(), HgReturn::Timeout);
}

#[test]
fn test_unknown_provider_is_handler_not_found() {
    let p = Pair::new();
    p.server.register("ping", 1, pong).unwrap();
    let ping = p.client.register_client_only("ping", 0).unwrap();

    let err = with_interpreter(|gil| ping.on(&p.target, 2)?.call(gil, b"ping")).unwrap_err();
    let Error::HandlerNotFound { rpc_id, provider_id } = err else {
        panic!("expected HandlerNotFound");
    };
    assert_eq!(provider_id, 2);
    assert_eq!(rpc_id.base(), RpcId::from_name("ping"));
    assert_eq!(with_interpreter(|gil| ping.on(&p.target, 1)?.call(gil, b"ping")).unwrap(), b"pong");
}

#[test]
fn test_failing_handler_reaches_the_caller() {
    let p = Pair::new();
    p.server.register("grumpy", 0, |_, _, _| anyhow::bail!("not today")).unwrap();
    let grumpy = p.client.register_client_only("grumpy", 0).unwrap().on(&p.target, 0).unwrap();

    let err = with_interpreter(|gil| grumpy.call(gil, b"")).unwrap_err();
    assert_eq!(err, Error::Engine { code: HgReturn::Other, op: "forward" });
}

#[derive(Serialize, Deserialize)]
struct Sum {
    terms: Vec<i64>,
}

#[test]
fn test_typed_invoke() {
    let p = Pair::new();
    p.server
        .register_typed("sum", 0, |gil, handle, args: Sum| {
            handle.respond_value(gil, &args.terms.iter().sum::<i64>())?;
            Ok(())
        })
        .unwrap();
    let sum = p.client.register_client_only("sum", 0).unwrap().on(&p.target, 0).unwrap();

    let total: Option<i64> = with_interpreter(|gil| sum.invoke(gil, &Sum { terms: vec![1, 2, 39] })).unwrap();
    assert_eq!(total, Some(42));
}

#[test]
fn test_async_forward() {
    let p = Pair::new();
    p.server.register("ping", 0, pong).unwrap();
    let ping = p.client.register_client_only("ping", 0).unwrap().on(&p.target, 0).unwrap();

    let pending = ping.call_async(b"ping").unwrap();
    with_interpreter(|gil| {
        while !pending.test().unwrap() {
            gil.allow_native(|| std::thread::sleep(Duration::from_millis(1)));
        }
    });
    let reply = with_interpreter(|gil| pending.wait(gil)).unwrap();
    assert_eq!(reply, b"pong");
}

#[test]
fn test_disabled_response_still_runs_the_handler() {
    let p = Pair::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let fire = p
        .server
        .register("fire", 0, move |gil, handle, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Responding to a fire-and-forget call goes nowhere.
            handle.respond(gil, b"ignored")?;
            Ok(())
        })
        .unwrap();
    fire.disable_response(true).unwrap();
    let remote = p.client.register_client_only("fire", 0).unwrap();
    remote.disable_response(true).unwrap();

    let output = with_interpreter(|gil| remote.on(&p.target, 0)?.call(gil, b"")).unwrap();
    assert!(output.is_empty());
    let deadline = Instant::now() + Duration::from_secs(5);
    while invoked.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "handler never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
}

struct Greeter;

impl Provider for Greeter {
    fn service_name(&self) -> Option<&str> {
        Some("xyz")
    }

    fn rpcs(&self) -> Vec<RemoteSpec> {
        vec![RemoteSpec::new("hello").named("my_hello_world")]
    }

    fn invoke(&self, gil: Gil<'_>, method: &str, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()> {
        anyhow::ensure!(method == "hello", "unexpected method {method}");
        let mut reply = b"hello, ".to_vec();
        reply.extend_from_slice(&payload);
        handle.respond(gil, &reply)?;
        Ok(())
    }
}

#[test]
fn test_provider_service_prefix() {
    let p = Pair::new();
    let rpcs = p.server.register_provider(Arc::new(Greeter), 7, Some("abc")).unwrap();
    assert_eq!(rpcs.keys().collect::<Vec<_>>(), ["abc_my_hello_world"]);
    // The provider's own service name applies when none is given.
    let own = p.server.register_provider(Arc::new(Greeter), 8, None).unwrap();
    assert!(own.contains_key("xyz_my_hello_world"));

    let hello = p.client.register_client_only("abc_my_hello_world", 7).unwrap().on(&p.target, 7).unwrap();
    let reply = with_interpreter(|gil| hello.call(gil, b"world")).unwrap();
    assert_eq!(reply, b"hello, world");
}

#[test]
fn test_handle_accessors_on_both_sides() {
    let p = Pair::new();
    let seen_sender = Arc::new(parking_lot::Mutex::new(None));
    let slot = seen_sender.clone();
    p.server
        .register("whoami", 5, move |gil, handle, _| {
            *slot.lock() = Some(handle.get_addr()?.to_uri()?);
            handle.respond(gil, &[])?;
            Ok(())
        })
        .unwrap();
    let whoami = p.client.register_client_only("whoami", 5).unwrap().on(&p.target, 5).unwrap();
    assert_eq!(whoami.provider_id(), 5);
    assert!(whoami.handle().owning_instance().map(|r| p.client.is(r)).unwrap());
    assert_eq!(whoami.handle().get_addr().unwrap(), p.target);

    with_interpreter(|gil| whoami.call(gil, b"")).unwrap();
    let sender = seen_sender.lock().take().unwrap();
    assert_eq!(sender, p.client.address().unwrap().to_uri().unwrap());
}

#[test]
fn test_remote_shutdown() {
    let p = Pair::new();
    p.server.enable_remote_shutdown().unwrap();
    with_interpreter(|gil| p.target.shutdown(gil)).unwrap();
    with_interpreter(|gil| p.server.wait_for_finalize(gil)).unwrap();
}
