//! `tcp` (dialer) and `tcp-listen` (listener), built directly on
//! `tokio::net::{TcpStream, TcpListener}`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

use crate::descriptor::{Capability, Descriptor, Dialer, Listener, StringOption};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::listen_gate::ListenGate;
use crate::registry::Registry;
use crate::stream::BoxStream;

pub(crate) const HOSTNAME_OPTION: StringOption = StringOption {
    name: "Hostname",
    description: "the remote host to dial, or the local address to bind",
    default: "",
};
pub(crate) const PORT_OPTION: StringOption = StringOption {
    name: "Port",
    description: "the TCP port",
    default: "0",
};

struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let target = endpoint.target_host();
        debug!(target = %target, "tcp: dialing");
        let stream = TcpStream::connect(&target).await?;
        Ok(Box::new(stream))
    }
}

struct TcpListenerEndpoint {
    gate: ListenGate,
    listener: Mutex<Option<TokioTcpListener>>,
}

impl TcpListenerEndpoint {
    fn new() -> Self {
        TcpListenerEndpoint {
            gate: ListenGate::new(),
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Listener for TcpListenerEndpoint {
    fn is_listening(&self) -> bool {
        self.gate.is_listening()
    }

    async fn listen(&self, endpoint: &Endpoint) -> Result<()> {
        self.gate.begin_listen()?;
        let target = endpoint.target_host();
        let bound = TokioTcpListener::bind(&target).await?;
        debug!(target = %target, "tcp-listen: bound");
        *self.listener.lock().await = Some(bound);
        Ok(())
    }

    async fn accept(&self) -> Result<BoxStream> {
        self.gate
            .race_accept(async {
                let guard = self.listener.lock().await;
                let listener = guard.as_ref().expect("listening implies bound");
                let (stream, peer) = listener.accept().await?;
                debug!(peer = %peer, "tcp-listen: accepted");
                Ok(Box::new(stream) as BoxStream)
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.gate.close().await;
        *self.listener.lock().await = None;
        Ok(())
    }
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "tcp",
        description: "dial a TCP connection",
        examples: &["tcp://example.com:443"],
        string_options: &[HOSTNAME_OPTION, PORT_OPTION],
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(TcpDialer)),
    });
    registry.add(Descriptor {
        scheme: "tcp-listen",
        description: "listen for and accept TCP connections",
        examples: &["tcp-listen://0.0.0.0:9000"],
        string_options: &[HOSTNAME_OPTION, PORT_OPTION],
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Listen(Arc::new(TcpListenerEndpoint::new())),
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn double_listen_is_proxy_busy() {
        let listener = TcpListenerEndpoint::new();
        let registry = build_registry();
        let endpoint = registry
            .find_and_bind("tcp-listen://127.0.0.1:0")
            .unwrap();
        listener.listen(&endpoint).await.unwrap();
        let err = listener.listen(&endpoint).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::ProxyBusy));
    }

    #[tokio::test]
    async fn accept_before_listen_is_not_initialized() {
        let listener = TcpListenerEndpoint::new();
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::NotInitialized));
    }

    #[tokio::test]
    async fn listen_then_dial_round_trips() {
        // Bind with a raw listener first to discover an ephemeral port, so
        // the `tcp`/`tcp-listen` endpoints under test can agree on it.
        let probe = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("tcp-listen://127.0.0.1:{port}"))
            .unwrap();
        let dial_ep = registry
            .find_and_bind(&format!("tcp://127.0.0.1:{port}"))
            .unwrap();

        let accept_task = tokio::spawn(async move { listener_ep.connect().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client = dial_ep.connect().await.unwrap();
        let mut server = accept_task.await.unwrap().unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
