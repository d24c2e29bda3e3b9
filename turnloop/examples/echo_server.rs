//! Minimal echo server: accepts connections forever, echoing back
//! whatever each client sends until it closes its write side.
//!
//! ```text
//! cargo run --example echo_server
//! ```

use std::net::Ipv4Addr;

use turnloop::{HostAndPort, SchedulerContext, SocketServer, Task};

fn main() {
    turnloop::init_from_env();
    let ctx = SchedulerContext::create().expect("no scheduler exists yet");

    let addr = HostAndPort::new(Ipv4Addr::UNSPECIFIED, 7878);
    let server = SocketServer::bind(addr).expect("bind 0.0.0.0:7878");
    tracing::info!(?addr, "listening");

    let accept_loop = Task::spawn(async move {
        loop {
            let client = match server.accept().await {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                }
            };
            Task::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match client.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if client.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    ctx.scheduler().wait_until(|| accept_loop.is_done()).expect("scheduler error");
}
