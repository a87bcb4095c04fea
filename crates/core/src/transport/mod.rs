//! QUIC transport configuration helpers
//!
//! Client and server share the same timeouts so a board survives short
//! signal drops without either side giving up first. The host runs with a
//! self-signed certificate; clients pin its SHA-256 fingerprint or, on a
//! trusted network, skip verification.

pub mod reconnect;

pub use reconnect::{ConnectionState, ReconnectConfig, ReconnectScheduler};

use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, IdleTimeout, ServerConfig, TransportConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::{CoreError, Result};

/// Server name presented during the handshake
pub const SERVER_NAME: &str = "classboard.local";

/// QUIC timeouts
#[derive(Debug, Clone)]
pub struct TransportTuning {
    pub idle_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(20),
        }
    }
}

impl TransportTuning {
    fn transport_config(&self) -> Result<TransportConfig> {
        let idle = IdleTimeout::try_from(self.idle_timeout)
            .map_err(|e| CoreError::Tls(format!("Invalid idle timeout: {}", e)))?;
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(idle));
        transport.keep_alive_interval(Some(self.keep_alive));
        Ok(transport)
    }
}

/// Configure QUIC client
pub fn configure_client(crypto: Arc<QuicClientConfig>, tuning: &TransportTuning) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(crypto);
    config.transport_config(Arc::new(tuning.transport_config()?));
    Ok(config)
}

/// Configure QUIC server with a single certificate
pub fn configure_server(
    cert: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    tuning: &TransportTuning,
) -> Result<ServerConfig> {
    let mut config = ServerConfig::with_single_cert(cert, key)
        .map_err(|e| CoreError::Tls(format!("Failed to configure TLS: {}", e)))?;
    config.transport_config(Arc::new(tuning.transport_config()?));
    Ok(config)
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build client crypto. With a fingerprint the server certificate is pinned,
/// without one verification is skipped.
pub fn client_crypto(fingerprint: Option<&str>) -> Result<Arc<QuicClientConfig>> {
    let verifier: Arc<dyn ServerCertVerifier> = match fingerprint {
        Some(fp) => Arc::new(FingerprintVerifier::new(fp)),
        None => Arc::new(SkipVerification),
    };

    let crypto = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CoreError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    let quic = QuicClientConfig::try_from(crypto).map_err(|e| CoreError::Tls(e.to_string()))?;
    Ok(Arc::new(quic))
}

/// SHA-256 fingerprint of a DER certificate, as colon-separated hex
pub fn fingerprint_from_cert_der(cert: &CertificateDer<'_>) -> String {
    Sha256::digest(cert.as_ref())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalize a fingerprint: "AA:BB", "aa-bb" and "aabb" all become "AABB"
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Accepts only the certificate whose SHA-256 fingerprint matches
#[derive(Debug)]
struct FingerprintVerifier {
    expected: String,
    provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
    fn new(fingerprint: &str) -> Self {
        Self {
            expected: normalize_fingerprint(fingerprint),
            provider: provider(),
        }
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let actual = normalize_fingerprint(&fingerprint_from_cert_der(end_entity));
        if actual == self.expected {
            debug!("Server certificate fingerprint matched");
            Ok(ServerCertVerified::assertion())
        } else {
            // First and last 4 chars only
            let short = |s: &str| {
                let n = s.len();
                format!("{}...{}", &s[..4.min(n)], &s[n.saturating_sub(4)..])
            };
            error!(
                expected = %short(&self.expected),
                actual = %short(&actual),
                "Fingerprint mismatch"
            );
            Err(rustls::Error::General("Fingerprint mismatch".to_string()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any server certificate
#[derive(Debug)]
struct SkipVerification;

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;

    fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let cert = rcgen::generate_simple_self_signed([SERVER_NAME.to_string()]).unwrap();
        let cert_der = CertificateDer::from(cert.cert);
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
        (cert_der, key_der)
    }

    #[test]
    fn test_configure_server() {
        let (cert, key) = self_signed();
        assert!(configure_server(vec![cert], key, &TransportTuning::default()).is_ok());
    }

    #[test]
    fn test_configure_client() {
        let crypto = client_crypto(None).unwrap();
        assert!(configure_client(crypto, &TransportTuning::default()).is_ok());
        assert!(client_crypto(Some("AA:BB")).is_ok());
    }

    #[test]
    fn test_fingerprint_format() {
        let (cert, _) = self_signed();
        let fp = fingerprint_from_cert_der(&cert);
        // 32 bytes = 64 hex chars + 31 colons
        assert_eq!(fp.len(), 95);
        assert_eq!(fp.chars().filter(|c| *c == ':').count(), 31);
        assert_eq!(fp, fingerprint_from_cert_der(&cert));
    }

    #[test]
    fn test_normalize_fingerprint() {
        assert_eq!(normalize_fingerprint("AA:BB:CC"), "AABBCC");
        assert_eq!(normalize_fingerprint("aa-bb-cc"), "AABBCC");
        assert_eq!(normalize_fingerprint("aa bb cc"), "AABBCC");
    }

    #[test]
    fn test_fingerprint_verifier() {
        let (cert, _) = self_signed();
        let fp = fingerprint_from_cert_der(&cert);
        let name = ServerName::try_from(SERVER_NAME).unwrap();

        let good = FingerprintVerifier::new(&fp.to_uppercase());
        assert!(good
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());

        let bad = FingerprintVerifier::new("00:11:22");
        assert!(bad
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn test_default_tuning() {
        let t = TransportTuning::default();
        assert_eq!(t.idle_timeout, Duration::from_secs(30));
        assert_eq!(t.keep_alive, Duration::from_secs(20));
    }
}
