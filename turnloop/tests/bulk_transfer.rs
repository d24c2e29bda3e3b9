//! End-to-end: transfers a payload larger than any single non-blocking
//! read/write can move in one syscall, proving the `write_all`/`read`
//! retry loops actually chunk correctly across many scheduler turns.

use std::net::Ipv4Addr;

use serial_test::serial;
use turnloop::{HostAndPort, SchedulerContext, SocketClient, SocketServer, Task};

const PAYLOAD_SIZE: usize = 12_000_000;

#[test]
#[serial]
fn transfers_a_large_payload_in_full() {
    let ctx = SchedulerContext::create().unwrap();
    let addr = HostAndPort::new(Ipv4Addr::LOCALHOST, 18081);

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

    ctx.scheduler()
        .wait_until(|| server_task.is_done() && client_task.is_done())
        .unwrap();

    assert_eq!(server_task.value(), PAYLOAD_SIZE);
}
