//! Per-connection state machine.
//!
//! # Data Flow
//! ```text
//! Accepted
//!     → AwaitingRequest  (read + incremental parse, keep-alive timeout)
//!     → ResolvingTarget  (Host header → host, port)
//!     → DialingUpstream  (connect under the dial deadline)
//!     → Relaying         (buffered head first, then raw bytes both ways)
//!     → Closing → Closed (close both legs, leave the registry)
//! ```
//!
//! Any failure jumps straight to Closing. The parser is never consulted again
//! once relaying starts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::http::parser::{ParseEvent, ParsedRequest, RequestParser};
use crate::http::response::ErrorResponse;
use crate::net::connection::{ConnectionId, ConnectionInfo, ConnectionState, Scheme, UpstreamLink};
use crate::net::listener::ClientStream;
use crate::net::registry::{ConnectionRegistry, Registration};
use crate::net::relay::{relay, RelayError, RelayOutcome, Side};
use crate::observability::metrics;
use crate::resilience::with_dial_timeout;
use crate::routing::{resolve_target, Target};

/// Read size while waiting for a request head.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on best-effort writes and shutdowns during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives one client connection from accept to close.
pub struct ConnectionHandler<S> {
    // Streams drop before the registration so the entry outlives the open socket.
    client: S,
    upstream: Option<UpstreamLink>,
    registration: Registration,
    peer_addr: Option<SocketAddr>,
    scheme: Scheme,
    parser: RequestParser,
    config: Arc<ProxyConfig>,
    state: ConnectionState,
}

impl<S: ClientStream> ConnectionHandler<S> {
    /// Register a freshly accepted client stream.
    ///
    /// The connection stays in the registry until the handler is dropped.
    pub fn accept(client: S, registry: &ConnectionRegistry, config: Arc<ProxyConfig>) -> Result<Self> {
        let peer_addr = client.peer_addr().ok();
        let local_addr = client.local_addr().ok();
        let scheme = Scheme::from_tls(client.is_tls());

        let registration = registry.register(ConnectionInfo::new(peer_addr, local_addr, scheme))?;
        let parser = RequestParser::new(
            config.limits.max_incomplete_event_size,
            config.limits.max_headers,
        );

        Ok(Self {
            client,
            upstream: None,
            registration,
            peer_addr,
            scheme,
            parser,
            config,
            state: ConnectionState::Accepted,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.registration.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion and tear it down.
    pub async fn run(mut self) -> Result<RelayOutcome> {
        self.transition(ConnectionState::AwaitingRequest);
        let result = self.proxy().await;
        self.transition(ConnectionState::Closing);

        match &result {
            Ok(outcome) => {
                tracing::debug!(
                    connection_id = %self.id(),
                    closed_by = %outcome.closed_by,
                    client_to_upstream = outcome.stats.client_to_upstream,
                    upstream_to_client = outcome.stats.upstream_to_client,
                    "Relay finished"
                );
            }
            Err(e @ (ProxyError::ClientClosed | ProxyError::KeepAliveExpired(_))) => {
                tracing::debug!(connection_id = %self.id(), reason = e.kind(), "Closing idle connection");
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id(),
                    peer_addr = ?self.peer_addr,
                    kind = e.kind(),
                    error = %e,
                    "Connection failed"
                );
                if self.config.proxy.error_responses {
                    if let Some(response) = e.error_response() {
                        self.send_error(response).await;
                    }
                }
            }
        }

        self.close().await;
        self.transition(ConnectionState::Closed);
        result
    }

    async fn proxy(&mut self) -> Result<RelayOutcome> {
        let request = self.await_request().await?;

        self.transition(ConnectionState::ResolvingTarget);
        let target = resolve_target(&request)?;
        let total_requests = self.registration.record_request();
        tracing::debug!(
            connection_id = %self.id(),
            scheme = self.scheme.as_str(),
            method = %request.method,
            path = %request.target,
            version = request.version.as_str(),
            upstream = %target,
            total_requests,
            "Request parsed"
        );

        self.transition(ConnectionState::DialingUpstream);
        let link = self.dial(target).await?;

        self.transition(ConnectionState::Relaying);
        let link = self.upstream.insert(link);
        link.stream
            .write_all(self.parser.buffered())
            .await
            .map_err(|e| RelayError::new(Side::Upstream, e))?;

        let outcome = relay(
            &mut self.client,
            &mut link.stream,
            self.config.limits.relay_buffer_size,
        )
        .await?;
        Ok(outcome)
    }

    /// Feed client bytes to the parser until it yields a request or an error.
    async fn await_request(&mut self) -> Result<ParsedRequest> {
        let keep_alive = self.config.timeouts.keep_alive();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            match self.parser.next_event() {
                ParseEvent::Request(request) => return Ok(request),
                ParseEvent::ProtocolError(e) => return Err(e.into()),
                ParseEvent::NeedData => {}
            }

            let read = self.client.read(&mut chunk);
            let n = match keep_alive {
                Some(idle) => tokio::time::timeout(idle, read)
                    .await
                    .map_err(|_| ProxyError::KeepAliveExpired(idle))?,
                None => read.await,
            }
            .map_err(ProxyError::ClientIo)?;

            if n == 0 {
                return Err(ProxyError::ClientClosed);
            }
            self.registration.touch();
            self.parser.receive_data(&chunk[..n]);
        }
    }

    async fn dial(&mut self, target: Target) -> Result<UpstreamLink> {
        let started = Instant::now();
        let dial = TcpStream::connect((target.host.as_str(), target.port));

        match with_dial_timeout(self.config.timeouts.dial_delay(), dial).await {
            Ok(stream) => {
                metrics::record_dial_duration(started.elapsed());
                tracing::debug!(
                    connection_id = %self.id(),
                    upstream = %target,
                    elapsed = ?started.elapsed(),
                    "Upstream connected"
                );
                Ok(UpstreamLink::new(stream, target, self.id()))
            }
            Err(e) => {
                metrics::record_dial_failure(e.reason());
                Err(e.into())
            }
        }
    }

    async fn send_error(&mut self, response: ErrorResponse) {
        let bytes = response.to_bytes();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.client.write_all(&bytes)).await {
            Ok(Ok(())) => {
                tracing::debug!(connection_id = %self.id(), status = response.status(), "Sent error response");
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id(), error = %e, "Failed to send error response");
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id(), "Timed out sending error response");
            }
        }
    }

    /// Best-effort close of both legs.
    async fn close(&mut self) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.client.shutdown()).await;
        if let Some(mut link) = self.upstream.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, link.stream.shutdown()).await;
            tracing::trace!(
                connection_id = %link.client,
                upstream = %link.target,
                lifetime = ?link.established_at.elapsed(),
                "Upstream closed"
            );
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::trace!(connection_id = %self.id(), from = %self.state, to = %next, "State transition");
        self.state = next;
        self.registration.set_state(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ResolveError;
    use std::cell::Cell;
    use std::marker::PhantomData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tokio::net::TcpListener;

    /// In-memory client stream with fixed addresses.
    ///
    /// Deliberately `!Sync`: client streams only need to be `Send`.
    struct TestStream {
        inner: DuplexStream,
        tls: bool,
        /// Records the registry size at the moment the stream is dropped.
        drop_witness: Option<(ConnectionRegistry, Arc<AtomicUsize>)>,
        _not_sync: PhantomData<Cell<()>>,
    }

    impl Drop for TestStream {
        fn drop(&mut self) {
            if let Some((registry, seen)) = &self.drop_witness {
                seen.store(registry.len(), Ordering::SeqCst);
            }
        }
    }

    impl AsyncRead for TestStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TestStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    impl ClientStream for TestStream {
        fn peer_addr(&self) -> std::io::Result<SocketAddr> {
            Ok("192.0.2.10:50000".parse().unwrap())
        }

        fn local_addr(&self) -> std::io::Result<SocketAddr> {
            Ok("127.0.0.1:8000".parse().unwrap())
        }

        fn is_tls(&self) -> bool {
            self.tls
        }
    }

    fn client_pair(tls: bool) -> (TestStream, DuplexStream) {
        let (proxy_side, client_side) = duplex(64 * 1024);
        let stream = TestStream {
            inner: proxy_side,
            tls,
            drop_witness: None,
            _not_sync: PhantomData,
        };
        (stream, client_side)
    }

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.timeouts.dial_timeout_secs = 2.0;
        config
    }

    /// Upstream that reads one request head, records it, and answers `HELLO`.
    async fn hello_upstream() -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 256];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert_ne!(n, 0, "proxy closed before the head arrived");
                received.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"HELLO").await.unwrap();
            received
        });
        (addr, task)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn run_is_send_without_sync_stream() {
        let registry = ConnectionRegistry::new();
        let (stream, _client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();

        let run = handler.run();
        assert_send(&run);
        drop(run);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn client_stream_closes_while_still_registered() {
        let registry = ConnectionRegistry::new();
        let (mut stream, mut client) = client_pair(false);
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        stream.drop_witness = Some((registry.clone(), Arc::clone(&seen)));
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();

        drop(handler);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accept_registers_with_transport_details() {
        let registry = ConnectionRegistry::new();
        let (stream, _client) = client_pair(true);

        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();
        let entry = registry.get(handler.id()).unwrap();
        assert_eq!(entry.scheme, Scheme::Https);
        assert_eq!(entry.peer_addr, Some("192.0.2.10:50000".parse().unwrap()));
        assert_eq!(entry.state, ConnectionState::Accepted);
        assert_eq!(handler.state(), ConnectionState::Accepted);

        drop(handler);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn byte_by_byte_request_is_proxied() {
        let (upstream_addr, upstream) = hello_upstream().await;
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();
        let task = tokio::spawn(handler.run());

        let head = format!("GET / HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", upstream_addr.port());
        for byte in head.as_bytes() {
            client.write_all(std::slice::from_ref(byte)).await.unwrap();
            tokio::task::yield_now().await;
        }

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HELLO");

        assert_eq!(upstream.await.unwrap(), head.as_bytes());
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.closed_by, Side::Upstream);
        assert_eq!(outcome.stats.upstream_to_client, 5);
        assert!(registry.is_empty());
        assert_eq!(registry.total_requests(), 1);
    }

    #[tokio::test]
    async fn missing_host_gets_bad_request_and_deregisters() {
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();
        let task = tokio::spawn(handler.run());

        client.write_all(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::Resolve(ResolveError::MissingHostHeader)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn silent_drop_when_error_responses_disabled() {
        let mut config = config();
        config.proxy.error_responses = false;
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config)).unwrap();
        let task = tokio::spawn(handler.run());

        client.write_all(b"NOT HTTP AT ALL\x00\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        assert!(matches!(task.await.unwrap(), Err(ProxyError::Parse(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn refused_dial_gets_bad_gateway() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();
        let task = tokio::spawn(handler.run());

        client
            .write_all(format!("GET / HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));

        assert!(matches!(task.await.unwrap(), Err(ProxyError::Dial(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_hits_keep_alive_timeout() {
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();

        let err = handler.run().await.unwrap_err();
        assert!(matches!(err, ProxyError::KeepAliveExpired(d) if d == Duration::from_secs(5)));

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn client_eof_before_head_closes_quietly() {
        let registry = ConnectionRegistry::new();
        let (stream, mut client) = client_pair(false);
        let handler = ConnectionHandler::accept(stream, &registry, Arc::new(config())).unwrap();
        let task = tokio::spawn(handler.run());

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(ProxyError::ClientClosed)));
        assert!(registry.is_empty());
        assert_eq!(registry.total_requests(), 0);
    }
}
