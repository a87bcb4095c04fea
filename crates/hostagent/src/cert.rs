//! Self-signed host certificate
//!
//! A fresh certificate is generated on every start; sessions do not persist.
//! Clients pin it by the SHA-256 fingerprint the host prints at startup.

use classboard_core::transport::{fingerprint_from_cert_der, SERVER_NAME};
use classboard_core::{CoreError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Host certificate and its private key
pub struct HostCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl HostCert {
    /// Generate a self-signed certificate for [`SERVER_NAME`] and `localhost`
    pub fn generate() -> Result<Self> {
        let generated = rcgen::generate_simple_self_signed(vec![
            SERVER_NAME.to_string(),
            "localhost".to_string(),
        ])
        .map_err(|e| CoreError::Tls(format!("Failed to generate certificate: {}", e)))?;

        Ok(Self {
            cert: CertificateDer::from(generated.cert.der().to_vec()),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der())),
        })
    }

    /// Colon-separated SHA-256 fingerprint
    pub fn fingerprint(&self) -> String {
        fingerprint_from_cert_der(&self.cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let cert = HostCert::generate().unwrap();
        assert!(!cert.cert.is_empty());
        assert!(matches!(cert.key, PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn test_fingerprint_format() {
        let cert = HostCert::generate().unwrap();
        let fp = cert.fingerprint();
        // 32 bytes = 64 hex chars + 31 colons
        assert_eq!(fp.len(), 95);
        assert_eq!(fp.chars().filter(|c| *c == ':').count(), 31);
    }

    #[test]
    fn test_fresh_certificate_each_time() {
        let a = HostCert::generate().unwrap();
        let b = HostCert::generate().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
