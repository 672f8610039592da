//! Integration tests for the TFTP server
//!
//! These tests start the actual server on a loopback port and talk to it
//! with a minimal lockstep client over real UDP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tftp::{
    FileStore, Packet, ServerState, TftpAck, TftpData, TftpError, TftpErrorCode, TftpRequest, TftpServer,
    TftpServerConfig, TransferConfig, packet_buffer,
};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const BLOCK: usize = 512;

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(store: FileStore) -> Self {
        let config = TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            poll_interval: Duration::from_millis(20),
            transfer_config: TransferConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        };
        let mut server = TftpServer::new(config, store);
        let addr = server.bind().unwrap();
        let state = server.state();
        let task = tokio::spawn(async move { server.run().await });
        Self { addr, state, task }
    }

    async fn stop(self) {
        self.state.shutdown();
        let result = timeout(Duration::from_secs(1), self.task)
            .await
            .expect("server ignored shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv(sock: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = packet_buffer();
    let (n, from) = timeout(Duration::from_secs(2), sock.recv_from(&mut buf))
        .await
        .expect("no reply from server")
        .unwrap();
    (Packet::from_bytes(&buf[..n]).unwrap(), from)
}

async fn send(sock: &UdpSocket, packet: Packet, to: SocketAddr) {
    sock.send_to(&packet.to_bytes(), to).await.unwrap();
}

/// Store `content` on the server, returning the sizes of the DATA blocks sent
async fn upload(
    sock: &UdpSocket,
    server: SocketAddr,
    name: &str,
    content: &[u8],
) -> Result<Vec<usize>, TftpError> {
    send(sock, Packet::Request(TftpRequest::write(name, "octet")), server).await;

    let (reply, session) = recv(sock).await;
    match reply {
        Packet::Ack(ack) => assert_eq!(ack.block, 0),
        Packet::Error(e) => return Err(e),
        other => panic!("unexpected {}", other),
    }
    assert_ne!(session, server, "transfer must run on a session socket");

    let mut blocks: Vec<&[u8]> = content.chunks(BLOCK).collect();
    if content.len() % BLOCK == 0 {
        blocks.push(&[]);
    }

    let mut sizes = Vec::new();
    for (i, chunk) in blocks.into_iter().enumerate() {
        let block = (i + 1) as u16;
        send(sock, Packet::Data(TftpData::new(block, chunk.to_vec())), session).await;
        sizes.push(chunk.len());

        let (reply, from) = recv(sock).await;
        assert_eq!(from, session);
        match reply {
            Packet::Ack(ack) => assert_eq!(ack.block, block),
            Packet::Error(e) => return Err(e),
            other => panic!("unexpected {}", other),
        }
    }
    Ok(sizes)
}

/// Fetch `name` from the server, returning the content and the block sizes
async fn download(sock: &UdpSocket, server: SocketAddr, name: &str, mode: &str) -> Result<(Vec<u8>, Vec<usize>), TftpError> {
    send(sock, Packet::Request(TftpRequest::read(name, mode)), server).await;

    let mut content = Vec::new();
    let mut sizes = Vec::new();
    let mut expected: u16 = 1;
    loop {
        let (reply, from) = recv(sock).await;
        assert_ne!(from, server, "transfer must run on a session socket");
        let data = match reply {
            Packet::Data(data) => data,
            Packet::Error(e) => return Err(e),
            other => panic!("unexpected {}", other),
        };
        assert_eq!(data.block, expected);

        send(sock, Packet::Ack(TftpAck::new(data.block)), from).await;
        content.extend_from_slice(&data.data);
        sizes.push(data.data.len());
        if data.data.len() < BLOCK {
            return Ok((content, sizes));
        }
        expected = expected.wrapping_add(1);
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_write_then_read_exact_multiple() {
    let server = TestServer::start(FileStore::new()).await;
    let sock = client().await;
    let content = pattern(1024);

    let sent = upload(&sock, server.addr, "f", &content).await.unwrap();
    assert_eq!(sent, vec![512, 512, 0]);
    assert_eq!(server.state.store().snapshot()["f"], 1024);

    let (received, sizes) = download(&sock, server.addr, "f", "octet").await.unwrap();
    assert_eq!(received, content);
    assert_eq!(sizes, vec![512, 512, 0]);

    server.stop().await;
}

#[tokio::test]
async fn test_short_last_block() {
    let server = TestServer::start(FileStore::new()).await;
    let sock = client().await;
    let content = pattern(1300);

    upload(&sock, server.addr, "odd", &content).await.unwrap();
    let (received, sizes) = download(&sock, server.addr, "odd", "octet").await.unwrap();
    assert_eq!(received, content);
    assert_eq!(sizes, vec![512, 512, 276]);

    server.stop().await;
}

#[tokio::test]
async fn test_empty_file() {
    let server = TestServer::start(FileStore::new()).await;
    let sock = client().await;

    assert_eq!(upload(&sock, server.addr, "empty", b"").await.unwrap(), vec![0]);
    assert_eq!(server.state.store().snapshot()["empty"], 0);

    let (received, sizes) = download(&sock, server.addr, "empty", "octet").await.unwrap();
    assert!(received.is_empty());
    assert_eq!(sizes, vec![0]);

    server.stop().await;
}

#[tokio::test]
async fn test_unsupported_mode_is_rejected_from_listening_socket() {
    let store = FileStore::new();
    let server = TestServer::start(store.clone()).await;
    let sock = client().await;

    send(&sock, Packet::Request(TftpRequest::write("f", "netascii")), server.addr).await;
    let (reply, from) = recv(&sock).await;

    assert_eq!(from, server.addr);
    assert_eq!(
        reply,
        Packet::Error(TftpError::new(TftpErrorCode::IllegalOperation, "Mode not supported"))
    );
    assert_eq!(server.state.received_request_count(), 1);
    assert!(store.snapshot().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_mode_is_case_insensitive() {
    let store = FileStore::new();
    store.open_write("f").unwrap().write(b"hello").unwrap();
    let server = TestServer::start(store).await;
    let sock = client().await;

    let (received, _) = download(&sock, server.addr, "f", "OCTET").await.unwrap();
    assert_eq!(received, b"hello");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_file() {
    let server = TestServer::start(FileStore::new()).await;
    let sock = client().await;

    let err = download(&sock, server.addr, "nope", "octet").await.unwrap_err();
    assert_eq!(err.code, TftpErrorCode::FileNotFound);
    assert_eq!(server.state.received_request_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_existing_file_is_never_overwritten() {
    let server = TestServer::start(FileStore::new()).await;
    let sock = client().await;

    upload(&sock, server.addr, "f", b"first").await.unwrap();
    let err = upload(&sock, server.addr, "f", b"second").await.unwrap_err();
    assert_eq!(err.code, TftpErrorCode::FileAlreadyExists);

    let (received, _) = download(&sock, server.addr, "f", "octet").await.unwrap();
    assert_eq!(received, b"first");

    server.stop().await;
}

#[tokio::test]
async fn test_file_size_limit() {
    let server = TestServer::start(FileStore::with_max_file_size(600)).await;
    let sock = client().await;

    let err = upload(&sock, server.addr, "big", &pattern(1024)).await.unwrap_err();
    assert_eq!(err.code, TftpErrorCode::DiskFull);
    // The part that fitted stays stored.
    assert_eq!(server.state.store().snapshot()["big"], 512);

    server.stop().await;
}

#[tokio::test]
async fn test_first_block_over_size_limit_stores_nothing() {
    let server = TestServer::start(FileStore::with_max_file_size(100)).await;
    let sock = client().await;

    let err = upload(&sock, server.addr, "huge", &pattern(300)).await.unwrap_err();
    assert_eq!(err.code, TftpErrorCode::DiskFull);
    // The session drops its write reservation right after sending the ERROR.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.state.store().snapshot().is_empty());

    // The name is still free.
    upload(&sock, server.addr, "huge", &pattern(100)).await.unwrap();
    assert_eq!(server.state.store().snapshot()["huge"], 100);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_transfers() {
    let store = FileStore::new();
    let a = pattern(3000);
    let b: Vec<u8> = pattern(2000).into_iter().rev().collect();
    store.open_write("a").unwrap().write(&a).unwrap();
    store.open_write("b").unwrap().write(&b).unwrap();
    let server = TestServer::start(store).await;

    let (sock_a, sock_b, sock_c) = (client().await, client().await, client().await);
    let c = pattern(700);
    let (got_a, got_b, put_c) = tokio::join!(
        download(&sock_a, server.addr, "a", "octet"),
        download(&sock_b, server.addr, "b", "octet"),
        upload(&sock_c, server.addr, "c", &c),
    );

    assert_eq!(got_a.unwrap().0, a);
    assert_eq!(got_b.unwrap().0, b);
    put_c.unwrap();
    assert_eq!(server.state.store().snapshot()["c"], 700);
    assert_eq!(server.state.received_request_count(), 3);

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_request_packets_start_separate_sessions() {
    let store = FileStore::new();
    store.open_write("f").unwrap().write(b"x").unwrap();
    let server = TestServer::start(store).await;
    let sock = client().await;

    let request = Packet::Request(TftpRequest::read("f", "octet"));
    send(&sock, request.clone(), server.addr).await;
    send(&sock, request, server.addr).await;

    let (first, from_first) = recv(&sock).await;
    let (second, from_second) = recv(&sock).await;
    assert_eq!(first, Packet::Data(TftpData::new(1, b"x".to_vec())));
    assert_eq!(first, second);
    assert_ne!(from_first, from_second);

    server.stop().await;
}

#[tokio::test]
async fn test_no_replies_after_shutdown() {
    let server = TestServer::start(FileStore::new()).await;
    let addr = server.addr;
    server.stop().await;

    let sock = client().await;
    send(&sock, Packet::Request(TftpRequest::read("f", "octet")), addr).await;
    let mut buf = packet_buffer();
    let reply = timeout(Duration::from_millis(200), sock.recv_from(&mut buf)).await;
    assert!(!matches!(reply, Ok(Ok(_))), "stopped server answered a request");
}
