//! End-to-end: a server accepts one connection, echoes back whatever it
//! reads until the client closes its write side.

use std::net::Ipv4Addr;

use serial_test::serial;
use turnloop::{HostAndPort, SchedulerContext, SocketClient, SocketServer, Task};

#[test]
#[serial]
fn echoes_a_single_message_back_to_the_client() {
    let ctx = SchedulerContext::create().unwrap();

    // Port 0 would ask the kernel to pick one, but this wrapper's
    // `HostAndPort` is a literal IPv4 address + port, not a resolved
    // `SocketAddr` handle — so tests bind a fixed high port instead.
    let addr = HostAndPort::new(Ipv4Addr::LOCALHOST, 18080);

    let server = SocketServer::bind(addr).expect("bind");
    let server_task: Task<Vec<u8>> = Task::spawn(async move {
        let client = server.accept().await.expect("accept");
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.expect("read");
        let received = buf[..n].to_vec();
        client.write_all(&received).await.expect("echo back");
        received
    });

    let client_task: Task<Vec<u8>> = Task::spawn(async move {
        let client = SocketClient::connect(addr).await.expect("connect");
        client.write_all(b"hello").await.expect("write");
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.expect("read echo");
        buf[..n].to_vec()
    });

    ctx.scheduler()
        .wait_until(|| server_task.is_done() && client_task.is_done())
        .unwrap();

    assert_eq!(server_task.value(), b"hello");
    assert_eq!(client_task.value(), b"hello");
}
