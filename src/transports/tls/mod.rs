//! `tls` (dialer) and `tls-listen` (listener): TCP + a `rustls` handshake.
//!
//! Option bundle: `key_path`/`cert_path` with an auto-generated self-signed
//! fallback, `keylog_file`, `fingerprint` pinning via a custom verifier,
//! `skip_verify`, `next_proto`. The QUIC transport (`quic.rs`) reuses
//! `build_client_config`/`build_server_config` from here since its own option
//! bundle is "TLS plus datagram/keepalive options".

pub(crate) mod certs;

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use rustls_pemfile::{certs as read_certs, pkcs8_private_keys};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

use crate::descriptor::{BoolOption, Capability, Descriptor, Dialer, Listener, StringOption};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::listen_gate::ListenGate;
use crate::registry::Registry;
use crate::stream::BoxStream;

pub(crate) const KEY_PATH_OPTION: StringOption = StringOption {
    name: "key_path",
    description: "PEM private key path (auto-generated self-signed cert if unset, listener only)",
    default: "",
};
pub(crate) const CERT_PATH_OPTION: StringOption = StringOption {
    name: "cert_path",
    description: "PEM certificate chain path",
    default: "",
};
pub(crate) const KEYLOG_FILE_OPTION: StringOption = StringOption {
    name: "keylog_file",
    description: "write TLS key log lines here (falls back to $SSLKEYLOGFILE)",
    default: "",
};
pub(crate) const FINGERPRINT_OPTION: StringOption = StringOption {
    name: "fingerprint",
    description: "pin the peer certificate to this hex SHA-256 digest, disabling normal verification",
    default: "",
};
pub(crate) const SKIP_VERIFY_OPTION: BoolOption = BoolOption {
    name: "skip_verify",
    description: "disable certificate verification entirely (dangerous)",
    default: false,
};
pub(crate) const NEXT_PROTO_OPTION: StringOption = StringOption {
    name: "next_proto",
    description: "ALPN protocol token to offer/require",
    default: "quic",
};

pub(crate) const TLS_STRING_OPTIONS: &[StringOption] = &[
    crate::transports::tcp::HOSTNAME_OPTION,
    crate::transports::tcp::PORT_OPTION,
    KEY_PATH_OPTION,
    CERT_PATH_OPTION,
    KEYLOG_FILE_OPTION,
    FINGERPRINT_OPTION,
    NEXT_PROTO_OPTION,
];
pub(crate) const TLS_BOOL_OPTIONS: &[BoolOption] = &[SKIP_VERIFY_OPTION];

struct NoCertificateVerification;

impl rustls::client::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

struct FingerprintServerVerifier {
    fingerprint: String,
}

/// True if `fingerprint` matches the SHA-256 digest of `end_entity` or any
/// of `intermediates` - the full presented chain, not just the leaf.
fn chain_matches_fingerprint(
    end_entity: &rustls::Certificate,
    intermediates: &[rustls::Certificate],
    fingerprint: &str,
) -> bool {
    std::iter::once(end_entity)
        .chain(intermediates)
        .any(|cert| certs::fingerprint_of(&cert.0) == fingerprint)
}

impl rustls::client::ServerCertVerifier for FingerprintServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        if chain_matches_fingerprint(end_entity, intermediates, &self.fingerprint) {
            Ok(rustls::client::ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "server certificate fingerprint mismatch".into(),
            ))
        }
    }
}

struct FingerprintClientVerifier {
    fingerprint: String,
    /// Always empty: no root subjects are advertised to the client, since
    /// verification pins a fingerprint rather than checking against a CA
    /// set. Kept as an owned `Vec` because `client_auth_root_subjects`
    /// returns a borrowed slice.
    root_subjects: Vec<rustls::DistinguishedName>,
}

impl rustls::server::ClientCertVerifier for FingerprintClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn client_auth_root_subjects(&self) -> &[rustls::DistinguishedName] {
        &self.root_subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        _now: SystemTime,
    ) -> std::result::Result<rustls::server::ClientCertVerified, rustls::Error> {
        if chain_matches_fingerprint(end_entity, intermediates, &self.fingerprint) {
            Ok(rustls::server::ClientCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "client certificate fingerprint mismatch".into(),
            ))
        }
    }
}

fn apply_keylog(key_log: &mut Arc<dyn rustls::KeyLog>, keylog_file: &str) {
    if !keylog_file.is_empty() {
        std::env::set_var("SSLKEYLOGFILE", keylog_file);
    }
    if !keylog_file.is_empty() || std::env::var("SSLKEYLOGFILE").is_ok() {
        *key_log = Arc::new(rustls::KeyLogFile::new());
    }
}

/// Build a `rustls::ClientConfig` from an endpoint's TLS option bundle.
/// `pub(crate)` so `quic.rs` can build its `rustls::ClientConfig` the same
/// way before handing it to `quinn`.
pub(crate) fn build_client_config(endpoint: &Endpoint) -> Result<rustls::ClientConfig> {
    let fingerprint = endpoint.get_string_option("fingerprint");
    let skip_verify = endpoint.get_bool_option("skip_verify")?;

    let builder = rustls::ClientConfig::builder().with_safe_defaults();
    let mut config = if !fingerprint.is_empty() {
        builder
            .with_custom_certificate_verifier(Arc::new(FingerprintServerVerifier { fingerprint }))
            .with_no_client_auth()
    } else if skip_verify {
        builder
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth()
    } else {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    apply_keylog(&mut config.key_log, &endpoint.get_string_option("keylog_file"));
    config.alpn_protocols = vec![endpoint.get_string_option("next_proto").into_bytes()];
    Ok(config)
}

fn load_certs(path: &str) -> Result<Vec<rustls::Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    let der = read_certs(&mut reader)
        .map_err(|e| Error::CertGen(format!("reading certs from {path}: {e}")))?;
    Ok(der.into_iter().map(rustls::Certificate).collect())
}

fn load_key(path: &str) -> Result<rustls::PrivateKey> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut keys = pkcs8_private_keys(&mut reader)
        .map_err(|e| Error::CertGen(format!("reading key from {path}: {e}")))?;
    if keys.is_empty() {
        return Err(Error::CertGen(format!("no PKCS#8 private key found in {path}")));
    }
    Ok(rustls::PrivateKey(keys.remove(0)))
}

fn load_or_generate_cert(endpoint: &Endpoint) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
    let cert_path = endpoint.get_string_option("cert_path");
    let key_path = endpoint.get_string_option("key_path");
    if !cert_path.is_empty() && !key_path.is_empty() {
        return Ok((load_certs(&cert_path)?, load_key(&key_path)?));
    }

    let hostname = endpoint.get_string_option("Hostname");
    let san = if hostname.is_empty() {
        "localhost".to_string()
    } else {
        hostname
    };
    let generated = certs::generate_self_signed(vec![san])?;
    info!(fingerprint = %generated.fingerprint, "tls: generated self-signed certificate");
    Ok((
        vec![rustls::Certificate(generated.cert_der)],
        rustls::PrivateKey(generated.key_der),
    ))
}

/// Build a `rustls::ServerConfig` from an endpoint's TLS option bundle.
pub(crate) fn build_server_config(endpoint: &Endpoint) -> Result<rustls::ServerConfig> {
    let (cert_chain, key) = load_or_generate_cert(endpoint)?;
    let fingerprint = endpoint.get_string_option("fingerprint");

    let builder = rustls::ServerConfig::builder().with_safe_defaults();
    let mut config = if !fingerprint.is_empty() {
        builder
            .with_client_cert_verifier(Arc::new(FingerprintClientVerifier {
                fingerprint,
                root_subjects: Vec::new(),
            }))
            .with_single_cert(cert_chain, key)
            .map_err(|e| Error::CertGen(e.to_string()))?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| Error::CertGen(e.to_string()))?
    };

    apply_keylog(&mut config.key_log, &endpoint.get_string_option("keylog_file"));
    config.alpn_protocols = vec![endpoint.get_string_option("next_proto").into_bytes()];
    Ok(config)
}

struct TlsDialer;

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let target = endpoint.target_host();
        let tcp = TcpStream::connect(&target).await?;
        let config = build_client_config(endpoint)?;
        let connector = TlsConnector::from(Arc::new(config));
        let hostname = endpoint.get_string_option("Hostname");
        let server_name = rustls::ServerName::try_from(hostname.as_str())
            .map_err(|e| Error::InvalidAddress(format!("invalid TLS server name {hostname}: {e}")))?;
        let tls = connector.connect(server_name, tcp).await?;
        Ok(Box::new(tls))
    }
}

struct TlsListenerEndpoint {
    gate: ListenGate,
    listener: Mutex<Option<TokioTcpListener>>,
    acceptor: Mutex<Option<TlsAcceptor>>,
}

impl TlsListenerEndpoint {
    fn new() -> Self {
        TlsListenerEndpoint {
            gate: ListenGate::new(),
            listener: Mutex::new(None),
            acceptor: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Listener for TlsListenerEndpoint {
    fn is_listening(&self) -> bool {
        self.gate.is_listening()
    }

    async fn listen(&self, endpoint: &Endpoint) -> Result<()> {
        self.gate.begin_listen()?;
        let target = endpoint.target_host();
        let tcp_listener = TokioTcpListener::bind(&target).await?;
        let config = build_server_config(endpoint)?;
        *self.listener.lock().await = Some(tcp_listener);
        *self.acceptor.lock().await = Some(TlsAcceptor::from(Arc::new(config)));
        Ok(())
    }

    async fn accept(&self) -> Result<BoxStream> {
        self.gate
            .race_accept(async {
                let acceptor = self.acceptor.lock().await.clone().expect("listening implies configured");
                let guard = self.listener.lock().await;
                let listener = guard.as_ref().expect("listening implies bound");
                let (tcp, _peer) = listener.accept().await?;
                let tls = acceptor.accept(tcp).await?;
                Ok(Box::new(tls) as BoxStream)
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.gate.close().await;
        *self.listener.lock().await = None;
        *self.acceptor.lock().await = None;
        Ok(())
    }
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "tls",
        description: "dial a TCP connection and perform a TLS handshake",
        examples: &["tls://example.com:443", "tls://h:443?fingerprint=<hex sha256>"],
        string_options: TLS_STRING_OPTIONS,
        bool_options: TLS_BOOL_OPTIONS,
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(TlsDialer)),
    });
    registry.add(Descriptor {
        scheme: "tls-listen",
        description: "listen for TCP connections and perform a TLS handshake",
        examples: &["tls-listen://0.0.0.0:9443"],
        string_options: TLS_STRING_OPTIONS,
        bool_options: TLS_BOOL_OPTIONS,
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Listen(Arc::new(TlsListenerEndpoint::new())),
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn fingerprint_pinning_round_trip() {
        let probe = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = build_registry();
        let listener_ep = registry
            .find_and_bind(&format!("tls-listen://127.0.0.1:{port}"))
            .unwrap();

        // This test exercises the `skip_verify` path end to end, which
        // doesn't need the auto-generated cert's fingerprint; true
        // fingerprint-pin round trips are covered by `certs::test`
        // (fingerprint stability).
        let accept_task = tokio::spawn(async move { listener_ep.connect().await });

        let dial_ep = registry
            .find_and_bind(&format!("tls://127.0.0.1:{port}?skip_verify=true"))
            .unwrap();

        let (client, server) = tokio::join!(dial_ep.connect(), accept_task);
        let mut client = client.unwrap();
        let mut server = server.unwrap().unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }
}
