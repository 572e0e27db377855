//! Shared utilities for integration testing.

#![allow(dead_code)]

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use forward_proxy::config::ProxyConfig;
use forward_proxy::net::{ConnectionRegistry, Listener};
use forward_proxy::{ProxyServer, Shutdown};

/// A proxy running on an ephemeral loopback port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub registry: ConnectionRegistry,
    pub config: Arc<ArcSwap<ProxyConfig>>,
    pub task: JoinHandle<()>,
}

impl TestProxy {
    /// Trigger shutdown and wait for the server to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
    }
}

/// Config suitable for tests: ephemeral port, short timeouts.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.timeouts.keep_alive_timeout_secs = 2.0;
    config.timeouts.dial_timeout_secs = 2.0;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Bind and run a proxy with `config`.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(config);
    let registry = server.registry();
    let shared = server.config();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    let task = tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });

    TestProxy {
        addr,
        shutdown,
        registry,
        config: shared,
        task,
    }
}

/// Upstream that answers every connection with `reply` once it has read a request head.
pub async fn start_stub_upstream(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_some() {
                    let _ = socket.write_all(reply).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Upstream that writes back everything it reads, until the peer closes.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// Upstream that discards the request head, then sends `payload` and closes.
pub async fn start_bulk_upstream(payload: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let payload = payload.clone();
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_some() {
                    let _ = socket.write_all(&payload).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Upstream that accepts and then holds connections open without replying.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// A listener whose accept queue is full, so further connects never complete.
pub struct UnacceptingUpstream {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _filler: TcpStream,
}

/// Listen with a zero backlog and occupy the single pending slot.
pub async fn start_unaccepting_upstream() -> UnacceptingUpstream {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();
    let filler = TcpStream::connect(addr).await.unwrap();

    UnacceptingUpstream {
        addr,
        _listener: listener,
        _filler: filler,
    }
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Read from `socket` until the end of an HTTP head; returns the head bytes.
pub async fn read_head(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(head);
        }
    }
}

/// A request head addressed to `upstream` via the Host header.
pub fn request_for(upstream: SocketAddr) -> Vec<u8> {
    format!(
        "GET / HTTP/1.1\r\nHost: localhost:{}\r\n\r\n",
        upstream.port()
    )
    .into_bytes()
}

/// Read until EOF, failing the test after `limit`.
pub async fn read_to_close(stream: &mut TcpStream, limit: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(limit, stream.read_to_end(&mut out))
        .await
        .expect("connection was not closed in time")
        .expect("read failed");
    out
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll until the registry is empty; fails the test after `limit`.
pub async fn wait_until_empty(registry: &ConnectionRegistry, limit: Duration) {
    wait_until(limit, || registry.is_empty()).await;
}

/// Poll `condition` every few milliseconds until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
