//! `quic` (dialer) and `quic-listen` (listener): QUIC v1 over `quinn`, reusing
//! the `rustls` config built by `transports::tls` (the same key/cert/
//! fingerprint/skip_verify/next_proto option bundle, plus
//! `enable_datagrams`/`keepalive_period`). Defaults to one bidirectional
//! stream per connection; `enable_datagrams=true` switches to RFC 9221
//! unreliable datagrams instead.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::descriptor::{BoolOption, Capability, Descriptor, Dialer, IntOption, Listener};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::listen_gate::ListenGate;
use crate::registry::Registry;
use crate::stream::{combine, BoxStream};
use crate::transports::{tcp, tls};

const ENABLE_DATAGRAMS_OPTION: BoolOption = BoolOption {
    name: "enable_datagrams",
    description: "use RFC 9221 unreliable datagrams instead of a bidirectional stream",
    default: false,
};
const KEEPALIVE_PERIOD_OPTION: IntOption = IntOption {
    name: "keepalive_period",
    description: "seconds between QUIC keep-alive pings (0 disables)",
    default: 0,
};

const QUIC_STRING_OPTIONS: [crate::descriptor::StringOption; 7] = [
    tcp::HOSTNAME_OPTION,
    tcp::PORT_OPTION,
    tls::KEY_PATH_OPTION,
    tls::CERT_PATH_OPTION,
    tls::KEYLOG_FILE_OPTION,
    tls::FINGERPRINT_OPTION,
    tls::NEXT_PROTO_OPTION,
];
const QUIC_BOOL_OPTIONS: [BoolOption; 2] = [tls::SKIP_VERIFY_OPTION, ENABLE_DATAGRAMS_OPTION];
const QUIC_INT_OPTIONS: [IntOption; 1] = [KEEPALIVE_PERIOD_OPTION];

fn transport_config(endpoint: &Endpoint) -> Result<(quinn::TransportConfig, bool)> {
    let enable_datagrams = endpoint.get_bool_option("enable_datagrams")?;
    let keepalive_period = endpoint.get_int_option("keepalive_period", 10)?;

    let mut transport = quinn::TransportConfig::default();
    if enable_datagrams {
        transport.datagram_receive_buffer_size(Some(1 << 20));
        transport.datagram_send_buffer_size(1 << 20);
    }
    if keepalive_period > 0 {
        transport.keep_alive_interval(Some(Duration::from_secs(keepalive_period as u64)));
    }
    Ok((transport, enable_datagrams))
}

async fn open_stream(connection: quinn::Connection, enable_datagrams: bool) -> Result<BoxStream> {
    if enable_datagrams {
        Ok(Box::new(DatagramStream::new(connection)))
    } else {
        let (send, recv) = connection.open_bi().await?;
        Ok(Box::new(combine(recv, send)))
    }
}

async fn accept_stream(connection: quinn::Connection, enable_datagrams: bool) -> Result<BoxStream> {
    if enable_datagrams {
        Ok(Box::new(DatagramStream::new(connection)))
    } else {
        let (send, recv) = connection.accept_bi().await?;
        Ok(Box::new(combine(recv, send)))
    }
}

struct QuicDialer;

#[async_trait]
impl Dialer for QuicDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let target = endpoint.target_host();
        let hostname = endpoint.get_string_option("Hostname");
        let remote: SocketAddr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("could not resolve {target}")))?;

        let rustls_config = tls::build_client_config(endpoint)?;
        let (transport, enable_datagrams) = transport_config(endpoint)?;

        let mut client_config = quinn::ClientConfig::new(Arc::new(rustls_config));
        client_config.transport_config(Arc::new(transport));

        let mut quinn_endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        quinn_endpoint.set_default_client_config(client_config);

        debug!(target = %target, "quic: dialing");
        let connection = quinn_endpoint.connect(remote, &hostname)?.await?;
        open_stream(connection, enable_datagrams).await
    }
}

struct QuicListenerEndpoint {
    gate: ListenGate,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    enable_datagrams: AtomicBool,
}

impl QuicListenerEndpoint {
    fn new() -> Self {
        QuicListenerEndpoint {
            gate: ListenGate::new(),
            endpoint: Mutex::new(None),
            enable_datagrams: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Listener for QuicListenerEndpoint {
    fn is_listening(&self) -> bool {
        self.gate.is_listening()
    }

    async fn listen(&self, endpoint: &Endpoint) -> Result<()> {
        self.gate.begin_listen()?;
        let target = endpoint.target_host();
        let addr: SocketAddr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("could not resolve {target}")))?;

        let rustls_config = tls::build_server_config(endpoint)?;
        let (transport, enable_datagrams) = transport_config(endpoint)?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(rustls_config));
        server_config.transport_config(Arc::new(transport));

        let bound = quinn::Endpoint::server(server_config, addr)?;
        debug!(target = %target, "quic-listen: bound");
        self.enable_datagrams.store(enable_datagrams, Ordering::Release);
        *self.endpoint.lock().await = Some(bound);
        Ok(())
    }

    async fn accept(&self) -> Result<BoxStream> {
        self.gate
            .race_accept(async {
                let guard = self.endpoint.lock().await;
                let quinn_endpoint = guard.as_ref().expect("listening implies bound");
                let connecting = quinn_endpoint.accept().await.ok_or(Error::NotInitialized)?;
                drop(guard);
                let connection = connecting.await?;
                debug!(peer = %connection.remote_address(), "quic-listen: accepted");
                accept_stream(connection, self.enable_datagrams.load(Ordering::Acquire)).await
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.gate.close().await;
        if let Some(bound) = self.endpoint.lock().await.take() {
            bound.close(0u32.into(), b"closed");
        }
        Ok(())
    }
}

/// Wraps a `quinn::Connection` as a [`crate::stream::Stream`] where each read
/// yields (at most) one datagram's worth of bytes and each write sends one
/// datagram.
struct DatagramStream {
    connection: quinn::Connection,
    pending_read: Option<Bytes>,
    read_fut: Option<Pin<Box<dyn std::future::Future<Output = std::result::Result<Bytes, quinn::ConnectionError>> + Send>>>,
}

impl DatagramStream {
    fn new(connection: quinn::Connection) -> Self {
        DatagramStream {
            connection,
            pending_read: None,
            read_fut: None,
        }
    }

    /// Datagram-mode QUIC has no per-call deadline primitive to hook; this
    /// always fails with `NotImplemented`. Not part of the object-safe
    /// [`crate::stream::Stream`] trait - reachable only on the concrete type,
    /// before it's boxed.
    pub fn set_deadline(&mut self) -> Result<()> {
        Err(Error::NotImplemented("deadlines on a QUIC datagram stream"))
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(data) = this.pending_read.take() {
                let n = std::cmp::min(data.len(), buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    this.pending_read = Some(data.slice(n..));
                }
                return Poll::Ready(Ok(()));
            }

            if this.read_fut.is_none() {
                let connection = this.connection.clone();
                this.read_fut = Some(Box::pin(async move { connection.read_datagram().await }));
            }

            match this.read_fut.as_mut().unwrap().as_mut().poll(cx) {
                Poll::Ready(Ok(data)) => {
                    this.read_fut = None;
                    this.pending_read = Some(data);
                    continue;
                }
                Poll::Ready(Err(e)) => {
                    this.read_fut = None;
                    return Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match this.connection.send_datagram(Bytes::copy_from_slice(buf)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, e))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        this.connection.close(0u32.into(), b"closed");
        Poll::Ready(Ok(()))
    }
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "quic",
        description: "dial a QUIC connection (one bidirectional stream, or datagrams)",
        examples: &["quic://example.com:443", "quic://h:443?enable_datagrams=true"],
        string_options: &QUIC_STRING_OPTIONS,
        bool_options: &QUIC_BOOL_OPTIONS,
        int_options: &QUIC_INT_OPTIONS,
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(QuicDialer)),
    });
    registry.add(Descriptor {
        scheme: "quic-listen",
        description: "listen for and accept QUIC connections",
        examples: &["quic-listen://0.0.0.0:9443"],
        string_options: &QUIC_STRING_OPTIONS,
        bool_options: &QUIC_BOOL_OPTIONS,
        int_options: &QUIC_INT_OPTIONS,
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Listen(Arc::new(QuicListenerEndpoint::new())),
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn stream_mode_round_trips() {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("quic-listen://127.0.0.1:{port}"))
            .unwrap();
        let accept_task = tokio::spawn(async move { listener_ep.connect().await });

        let dial_ep = registry
            .find_and_bind(&format!("quic://127.0.0.1:{port}?skip_verify=true"))
            .unwrap();

        let (client, server) = tokio::join!(dial_ep.connect(), accept_task);
        let mut client = client.unwrap();
        let mut server = server.unwrap().unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn datagram_mode_round_trips() {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("quic-listen://127.0.0.1:{port}?enable_datagrams=true"))
            .unwrap();
        let accept_task = tokio::spawn(async move { listener_ep.connect().await });

        let dial_ep = registry
            .find_and_bind(&format!(
                "quic://127.0.0.1:{port}?skip_verify=true&enable_datagrams=true"
            ))
            .unwrap();

        let (client, server) = tokio::join!(dial_ep.connect(), accept_task);
        let mut client = client.unwrap();
        let mut server = server.unwrap().unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn datagram_stream_rejects_deadlines() {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("quic-listen://127.0.0.1:{port}?enable_datagrams=true"))
            .unwrap();
        let accept_task = tokio::spawn(async move { listener_ep.connect().await });

        let dial_ep = registry
            .find_and_bind(&format!(
                "quic://127.0.0.1:{port}?skip_verify=true&enable_datagrams=true"
            ))
            .unwrap();
        let connection = dial_connection(&dial_ep).await.unwrap();
        let _ = accept_task.await.unwrap();

        assert!(matches!(
            DatagramStream::new(connection).set_deadline(),
            Err(Error::NotImplemented(_))
        ));
    }

    /// Test-only mirror of [`QuicDialer::dial`] that returns the raw
    /// `quinn::Connection` instead of boxing it, so a test can exercise
    /// [`DatagramStream`] methods directly.
    async fn dial_connection(endpoint: &Endpoint) -> Result<quinn::Connection> {
        let target = endpoint.target_host();
        let hostname = endpoint.get_string_option("Hostname");
        let remote: SocketAddr = tokio::net::lookup_host(&target).await?.next().unwrap();
        let rustls_config = tls::build_client_config(endpoint)?;
        let (transport, _) = transport_config(endpoint)?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(rustls_config));
        client_config.transport_config(Arc::new(transport));
        let mut quinn_endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        quinn_endpoint.set_default_client_config(client_config);
        Ok(quinn_endpoint.connect(remote, &hostname)?.await?)
    }
}
