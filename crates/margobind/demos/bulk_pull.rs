//! A client exposes a buffer and sends its descriptor in an RPC; the server
//! pulls the contents and answers with a checksum.

use std::sync::Arc;
use std::time::Duration;

use margobind::AccessMode;
use margobind::Buffer;
use margobind::Bulk;
use margobind::Engine;
use margobind::EngineOptions;
use margobind::TransferOp;
use margobind::logging;
use margobind::with_interpreter;
use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Deserialize)]
struct Checksum {
    len: usize,
    data: Bulk,
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let server = Arc::new(Engine::new("na+sm", EngineOptions::server().rpc_threads(2))?);
    let engine = server.clone();
    server.register_typed("checksum", 0, move |gil, handle, args: Checksum| {
        let sink = Buffer::zeroed(args.len);
        let local = engine.create_bulk(&sink, AccessMode::WriteOnly)?;
        let origin = handle.get_addr()?;
        engine.transfer(gil, TransferOp::Pull, &origin, &args.data, 0, &local, 0, args.len)?;
        let sum = sink.to_vec().iter().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(*b)));
        handle.respond_value(gil, &sum)?;
        Ok(())
    })?;

    let client = Engine::new("na+sm", EngineOptions::client())?;
    let target = client.lookup(&server.address()?.to_uri()?)?;
    let checksum = client
        .register_client_only("checksum", 0)?
        .on(&target, 0)?
        .with_timeout(Duration::from_secs(5));

    let contents: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let data = client.create_bulk(&Buffer::new(contents), AccessMode::ReadOnly)?;
    let args = Checksum { len: data.size()?, data };
    let sum: Option<u32> = with_interpreter(|gil| checksum.invoke(gil, &args))?;
    println!("server checksum of {} bytes: {:?}", args.len, sum);

    drop(checksum);
    drop(target);
    drop(args);
    // The handler holds a reference to the server engine until it is finalized.
    with_interpreter(|gil| server.finalize(gil))?;
    Ok(())
}
