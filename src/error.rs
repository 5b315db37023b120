//! Error taxonomy for the relay core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No descriptor registered for this scheme, or the transport does not
    /// implement the operation being invoked.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// `listen` called on a listener that is already listening.
    #[error("proxy busy")]
    ProxyBusy,

    /// `accept` called on a listener that hasn't been `listen`ed yet.
    #[error("proxy not initialized")]
    NotInitialized,

    /// the transport doesn't implement this operation at all (e.g. deadlines
    /// on a datagram-only QUIC connection).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// the address string failed to parse or failed post-parse validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// an option value failed to parse as its declared type.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("quic connect error: {0}")]
    QuicConnect(#[from] quinn::ConnectError),

    #[error("quic connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("certificate generation failed: {0}")]
    CertGen(String),

    /// Catch-all for a transport's external-crate error types that don't
    /// warrant their own taxonomy entry (e.g. TUN device creation).
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_are_stable() {
        assert_eq!(Error::ProxyBusy.to_string(), "proxy busy");
        assert_eq!(
            Error::NotSupported("quux".into()).to_string(),
            "not supported: quux"
        );
        assert_eq!(
            Error::InvalidAddress("no scheme".into()).to_string(),
            "invalid address: no scheme"
        );
    }
}
