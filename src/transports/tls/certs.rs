//! Self-signed leaf certificate generation for listeners that weren't given
//! `key_path`/`cert_path`. Only ever needs a single self-signed Ed25519 leaf
//! - no CA/CSR chain, since nothing here verifies a chain of trust, just a
//! pinned fingerprint.

use rcgen::{Certificate, CertificateParams, KeyPair, PKCS_ED25519};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub struct GeneratedCert {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
    pub fingerprint: String,
}

/// Generate a self-signed Ed25519 leaf certificate valid for the given
/// subject alternative names (typically just the bound hostname).
pub fn generate_self_signed(subject_alt_names: Vec<String>) -> Result<GeneratedCert> {
    let key_pair = KeyPair::generate(&PKCS_ED25519)
        .map_err(|e| Error::CertGen(format!("key generation: {e}")))?;
    let mut params = CertificateParams::new(subject_alt_names);
    params.alg = &PKCS_ED25519;
    params.key_pair = Some(key_pair);

    let cert = Certificate::from_params(params)
        .map_err(|e| Error::CertGen(format!("self-signed cert: {e}")))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| Error::CertGen(format!("serialize cert: {e}")))?;
    let key_der = cert.serialize_private_key_der();
    let fingerprint = fingerprint_of(&cert_der);

    Ok(GeneratedCert {
        cert_der,
        key_der,
        fingerprint,
    })
}

/// Hex-encoded SHA-256 digest of a raw (DER) certificate, used both when
/// logging an auto-generated cert's fingerprint and when checking a
/// presented peer certificate against a pinned `fingerprint` option.
pub fn fingerprint_of(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_cert_fingerprint_matches_its_own_der() {
        let generated = generate_self_signed(vec!["example.com".into()]).unwrap();
        assert_eq!(generated.fingerprint, fingerprint_of(&generated.cert_der));
        assert_eq!(generated.fingerprint.len(), 64);
    }

    #[test]
    fn different_certs_have_different_fingerprints() {
        let a = generate_self_signed(vec!["a.example.com".into()]).unwrap();
        let b = generate_self_signed(vec!["b.example.com".into()]).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }
}
