//! A server answering `ping` and a client calling it, in one process.
//!
//! Run with `RUST_LOG=info` to see what the server receives.

use std::time::Duration;

use margobind::DispatchLocation;
use margobind::Engine;
use margobind::EngineOptions;
use margobind::Gil;
use margobind::Handle;
use margobind::LogLevel;
use margobind::logging;
use margobind::with_interpreter;

fn pong(gil: Gil<'_>, handle: Handle, payload: Vec<u8>) -> anyhow::Result<()> {
    let sender = handle.get_addr()?;
    logging::info(&format!("got {:?} from {}", String::from_utf8_lossy(&payload), sender));
    handle.respond(gil, b"pong")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    logging::set_global_log_level(LogLevel::Info);

    let server = Engine::new(
        "na+sm",
        EngineOptions::server()
            .use_progress_thread(true)
            .dispatch(DispatchLocation::ProgressThread),
    )?;
    server.enable_remote_shutdown()?;
    server.register("ping", 0, pong)?;
    let uri = server.address()?.to_uri()?;
    println!("server listening at {uri}");

    let client = Engine::new("na+sm", EngineOptions::client())?;
    let target = client.lookup(&uri)?;
    let ping = client
        .register_client_only("ping", 0)?
        .on(&target, 0)?
        .with_timeout(Duration::from_millis(1000));

    with_interpreter(|gil| -> anyhow::Result<()> {
        for round in 1..=3 {
            let reply = ping.call(gil, b"ping")?;
            println!("round {round}: {}", String::from_utf8_lossy(&reply));
        }
        target.shutdown(gil)?;
        server.wait_for_finalize(gil)?;
        Ok(())
    })?;
    println!("server shut down");
    Ok(())
}
