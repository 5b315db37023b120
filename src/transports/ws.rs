//! `ws`/`wss` (dialers) and `ws-listen` (listener): WebSocket binary frames
//! over HTTP/HTTPS, per RFC 6455.
//!
//! `tokio-tungstenite` (`default-features = false`) supplies the handshake;
//! TLS for `wss` is our own `rustls` connector rather than the crate's
//! bundled TLS feature, matching how `quic.rs` reuses `transports::tls`.
//!
//! The server side accepts race against [`ListenGate`] rather than reading
//! from a channel nothing closes, so a pending accept unblocks with a
//! defined error the moment the listener is closed instead of hanging
//! forever.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, Stream as FuturesStream};
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::descriptor::{Capability, Descriptor, Dialer, Listener, StringOption};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::listen_gate::ListenGate;
use crate::registry::Registry;
use crate::stream::BoxStream;
use crate::transports::tcp;

const PATH_OPTION: StringOption = StringOption {
    name: "Path",
    description: "HTTP path of the WebSocket endpoint",
    default: "/",
};

const WS_STRING_OPTIONS: [StringOption; 3] = [tcp::HOSTNAME_OPTION, tcp::PORT_OPTION, PATH_OPTION];

fn target_url(endpoint: &Endpoint, scheme: &str) -> String {
    format!(
        "{scheme}://{}{}",
        endpoint.target_host(),
        endpoint.get_string_option("Path")
    )
}

/// Adapts a message-oriented [`WebSocketStream`] to the byte-oriented
/// [`crate::stream::Stream`] contract: each write becomes one binary frame;
/// reads drain frame payloads in order, ignoring control frames, until a
/// close frame or stream end yields EOF.
struct WsStream<S> {
    inner: WebSocketStream<S>,
    read_buf: Bytes,
}

impl<S> WsStream<S> {
    fn new(inner: WebSocketStream<S>) -> Self {
        WsStream {
            inner,
            read_buf: Bytes::new(),
        }
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_buf.is_empty() {
                let n = std::cmp::min(this.read_buf.len(), buf.remaining());
                buf.put_slice(&this.read_buf[..n]);
                this.read_buf = this.read_buf.slice(n..);
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    this.read_buf = Bytes::from(data);
                    continue;
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(_))) => continue, // ping/pong/text: ignore
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
            Poll::Pending => return Poll::Pending,
        }
        match Pin::new(&mut this.inner).start_send(Message::Binary(buf.to_vec())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_close(cx)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

fn minimal_tls_connector() -> tokio_rustls::TlsConnector {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

struct WsDialer {
    /// `false` for `ws`, `true` for `wss`.
    tls: bool,
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let target = endpoint.target_host();
        let url = target_url(endpoint, if self.tls { "wss" } else { "ws" });
        debug!(url = %url, "ws: dialing");
        let tcp = TcpStream::connect(&target).await?;

        if self.tls {
            let hostname = endpoint.get_string_option("Hostname");
            let server_name = rustls::ServerName::try_from(hostname.as_str())
                .map_err(|e| Error::InvalidAddress(format!("invalid TLS server name {hostname}: {e}")))?;
            let tls = minimal_tls_connector().connect(server_name, tcp).await?;
            let (ws, _response) = tokio_tungstenite::client_async(url, tls).await?;
            Ok(Box::new(WsStream::new(ws)))
        } else {
            let (ws, _response) = tokio_tungstenite::client_async(url, tcp).await?;
            Ok(Box::new(WsStream::new(ws)))
        }
    }
}

struct WsListenerEndpoint {
    gate: ListenGate,
    listener: Mutex<Option<TokioTcpListener>>,
    path: Mutex<String>,
}

impl WsListenerEndpoint {
    fn new() -> Self {
        WsListenerEndpoint {
            gate: ListenGate::new(),
            listener: Mutex::new(None),
            path: Mutex::new(String::new()),
        }
    }
}

#[async_trait]
impl Listener for WsListenerEndpoint {
    fn is_listening(&self) -> bool {
        self.gate.is_listening()
    }

    async fn listen(&self, endpoint: &Endpoint) -> Result<()> {
        self.gate.begin_listen()?;
        let target = endpoint.target_host();
        let bound = TokioTcpListener::bind(&target).await?;
        debug!(target = %target, "ws-listen: bound");
        *self.path.lock().await = endpoint.get_string_option("Path");
        *self.listener.lock().await = Some(bound);
        Ok(())
    }

    async fn accept(&self) -> Result<BoxStream> {
        self.gate
            .race_accept(async {
                let expected_path = self.path.lock().await.clone();
                loop {
                    let guard = self.listener.lock().await;
                    let listener = guard.as_ref().expect("listening implies bound");
                    let (tcp, peer) = listener.accept().await?;
                    drop(guard);

                    let expected_path = expected_path.clone();
                    let handshake = tokio_tungstenite::accept_hdr_async(
                        tcp,
                        move |req: &Request, resp: Response| {
                            if expected_path == "/" || req.uri().path() == expected_path {
                                Ok(resp)
                            } else {
                                Err(http_not_found())
                            }
                        },
                    )
                    .await;

                    match handshake {
                        Ok(ws) => {
                            debug!(peer = %peer, "ws-listen: accepted");
                            return Ok(Box::new(WsStream::new(ws)) as BoxStream);
                        }
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "ws-listen: handshake failed, retrying accept");
                            continue;
                        }
                    }
                }
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.gate.close().await;
        *self.listener.lock().await = None;
        Ok(())
    }
}

fn http_not_found() -> tokio_tungstenite::tungstenite::handshake::server::ErrorResponse {
    Response::builder()
        .status(404)
        .body(None)
        .expect("static 404 response is well-formed")
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "ws",
        description: "connect to a websocket endpoint over http",
        examples: &["ws://localhost:1234/"],
        string_options: &WS_STRING_OPTIONS,
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(WsDialer { tls: false })),
    });
    registry.add(Descriptor {
        scheme: "wss",
        description: "connect to a websocket endpoint over https",
        examples: &["wss://localhost:1234/"],
        string_options: &WS_STRING_OPTIONS,
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(WsDialer { tls: true })),
    });
    registry.add(Descriptor {
        scheme: "ws-listen",
        description: "serve websocket connections over http",
        examples: &["ws-listen://0.0.0.0:1234/ws"],
        string_options: &WS_STRING_OPTIONS,
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Listen(Arc::new(WsListenerEndpoint::new())),
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn ws_round_trip() {
        let probe = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("ws-listen://127.0.0.1:{port}/chat"))
            .unwrap();
        let accept_task = tokio::spawn(async move { listener_ep.connect().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let dial_ep = registry
            .find_and_bind(&format!("ws://127.0.0.1:{port}/chat"))
            .unwrap();
        let mut client = dial_ep.connect().await.unwrap();
        let mut server = accept_task.await.unwrap().unwrap();

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn wrong_path_is_rejected() {
        let probe = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("ws-listen://127.0.0.1:{port}/only-this"))
            .unwrap();
        tokio::spawn(async move {
            let _ = listener_ep.connect().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let dial_ep = registry
            .find_and_bind(&format!("ws://127.0.0.1:{port}/wrong"))
            .unwrap();
        assert!(dial_ep.connect().await.is_err());
    }
}
