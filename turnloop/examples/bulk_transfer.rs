//! Sends a large in-memory payload to itself over a loopback socket,
//! demonstrating that `write_all`/`read` correctly chunk across many
//! non-blocking retries instead of assuming one syscall moves everything.
//!
//! ```text
//! cargo run --example bulk_transfer
//! ```

use std::net::Ipv4Addr;
use std::time::Instant;

use turnloop::{HostAndPort, SchedulerContext, SocketClient, SocketServer, Task};

const PAYLOAD_SIZE: usize = 32_000_000;

fn main() {
    turnloop::init_from_env();
    let ctx = SchedulerContext::create().expect("no scheduler exists yet");

    let addr = HostAndPort::new(Ipv4Addr::LOCALHOST, 7879);
    let payload: Vec<u8> = (0..PAYLOAD_SIZE).map(|i| (i % 256) as u8).collect();

    let server = SocketServer::bind(addr).expect("bind");
    let server_task: Task<usize> = Task::spawn(async move {
        let client = server.accept().await.expect("accept");
        let mut total = 0usize;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = client.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    });

    let to_send = payload.clone();
    let client_task: Task<()> = Task::spawn(async move {
        let client = SocketClient::connect(addr).await.expect("connect");
        client.write_all(&to_send).await.expect("write bulk payload");
    });

    let start = Instant::now();
    ctx.scheduler()
        .wait_until(|| server_task.is_done() && client_task.is_done())
        .expect("scheduler error");

    let received = server_task.value();
    let elapsed = start.elapsed();
    assert_eq!(received, PAYLOAD_SIZE, "payload truncated");
    tracing::info!(bytes = received, ?elapsed, "bulk transfer complete");
}
