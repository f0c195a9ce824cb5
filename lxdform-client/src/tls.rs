//! rustls configuration for https remotes.
//!
//! Daemon certificates are usually self-signed. A pinned certificate is
//! matched by SHA-256 fingerprint inside the handshake, so nothing is written
//! to a peer that presents any other certificate.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use crate::cert;
use crate::error::{ClientError, Result};
use crate::transport::TlsConfig;

/// Accepts exactly one server certificate, identified by its fingerprint.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    fingerprint: String,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            provider: Arc::new(default_provider()),
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self::new(cert::fingerprint_pem(pem)?))
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let presented = cert::fingerprint_der(end_entity.as_ref());
        if presented == self.fingerprint {
            return Ok(ServerCertVerified::assertion());
        }
        debug!(
            expected = %self.fingerprint,
            presented = %presented,
            "Server certificate does not match the pinned certificate"
        );
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Records the certificate a server presents and then aborts the handshake.
///
/// Used to fetch a certificate for pinning without sending a request.
#[derive(Debug)]
pub(crate) struct CapturingVerifier {
    presented: Mutex<Option<Vec<u8>>>,
    provider: Arc<CryptoProvider>,
}

impl CapturingVerifier {
    pub(crate) fn new() -> Self {
        Self {
            presented: Mutex::new(None),
            provider: Arc::new(default_provider()),
        }
    }

    /// DER of the captured leaf certificate, if the server got that far.
    pub(crate) fn take(&self) -> Option<Vec<u8>> {
        self.presented.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl ServerCertVerifier for CapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Ok(mut slot) = self.presented.lock() {
            *slot = Some(end_entity.as_ref().to_vec());
        }
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds a client configuration verifying the server with `verifier` and
/// presenting the client identity from `tls`, if any.
pub fn client_config(
    verifier: Arc<dyn ServerCertVerifier>,
    tls: &TlsConfig,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(format!("failed to build TLS config: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    match (&tls.client_cert, &tls.client_key) {
        (Some(cert_pem), Some(key_pem)) => {
            let chain = cert::pem_to_der_chain(cert_pem)?
                .into_iter()
                .map(CertificateDer::from)
                .collect();
            let key = parse_private_key(key_pem)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| ClientError::Tls(format!("invalid client certificate: {}", e)))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Parses the first private key block of a PEM document.
fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let blocks = pem::parse_many(pem)
        .map_err(|e| ClientError::Tls(format!("invalid private key: {}", e)))?;

    for block in blocks {
        let key = match block.tag() {
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(block.into_contents().into()),
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(block.into_contents().into()),
            "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(block.into_contents().into()),
            _ => continue,
        };
        return Ok(key);
    }
    Err(ClientError::Tls("no private key found in PEM data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(verifier: &dyn ServerCertVerifier, der: &[u8]) -> bool {
        let name = ServerName::try_from("lxd.example").unwrap();
        verifier
            .verify_server_cert(
                &CertificateDer::from(der.to_vec()),
                &[],
                &name,
                &[],
                UnixTime::now(),
            )
            .is_ok()
    }

    #[test]
    fn test_pinned_verifier_matches_fingerprint_only() {
        let pinned = cert::der_to_pem(b"daemon certificate");
        let verifier = PinnedCertVerifier::from_pem(&pinned).unwrap();

        assert_eq!(verifier.fingerprint(), cert::fingerprint_der(b"daemon certificate"));
        assert!(verify(&verifier, b"daemon certificate"));
        assert!(!verify(&verifier, b"interceptor certificate"));
    }

    #[test]
    fn test_capturing_verifier_aborts_and_keeps_certificate() {
        let verifier = CapturingVerifier::new();
        assert!(!verify(&verifier, b"presented"));
        assert_eq!(verifier.take().as_deref(), Some(&b"presented"[..]));
        assert!(verifier.take().is_none());
    }

    #[test]
    fn test_client_config_with_identity() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["client".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let tls = TlsConfig {
            client_cert: Some(cert.pem()),
            client_key: Some(key.serialize_pem()),
            server_cert: None,
        };

        let verifier = Arc::new(PinnedCertVerifier::new("00"));
        let config = client_config(verifier.clone(), &tls).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());

        let anonymous = client_config(verifier, &TlsConfig::default()).unwrap();
        assert!(!anonymous.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_private_key_formats() {
        let ec = pem::encode(&pem::Pem::new("EC PRIVATE KEY", b"k".to_vec()));
        assert!(matches!(parse_private_key(&ec), Ok(PrivateKeyDer::Sec1(_))));

        let with_params = format!(
            "{}{}",
            pem::encode(&pem::Pem::new("EC PARAMETERS", b"p".to_vec())),
            pem::encode(&pem::Pem::new("PRIVATE KEY", b"k".to_vec()))
        );
        assert!(matches!(parse_private_key(&with_params), Ok(PrivateKeyDer::Pkcs8(_))));

        assert!(parse_private_key(&cert::der_to_pem(b"c")).is_err());
    }
}
