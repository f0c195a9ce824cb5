//! PEM helpers and certificate fingerprints.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pem::{EncodeConfig, LineEnding, Pem};
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Result};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// All certificate blocks of a PEM document as DER, in order.
pub fn pem_to_der_chain(pem: &str) -> Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(pem)
        .map_err(|e| ClientError::Tls(format!("invalid PEM data: {}", e)))?;
    let chain: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(Pem::into_contents)
        .collect();
    if chain.is_empty() {
        return Err(ClientError::Tls(
            "no certificate found in PEM data".to_string(),
        ));
    }
    Ok(chain)
}

/// Decodes the first certificate block of a PEM document into DER.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    pem_to_der_chain(pem)?
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Tls("no certificate found in PEM data".to_string()))
}

/// Encodes DER bytes as a PEM certificate block.
pub fn der_to_pem(der: &[u8]) -> String {
    let block = Pem::new(CERTIFICATE_TAG, der);
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Lowercase hex SHA-256 of a DER certificate. This is the daemon's certificate key.
pub fn fingerprint_der(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Fingerprint of the first certificate in a PEM document.
pub fn fingerprint_pem(pem: &str) -> Result<String> {
    pem_to_der(pem).map(|der| fingerprint_der(&der))
}

/// Base64 DER form the daemon expects in `POST /1.0/certificates`.
pub fn pem_to_base64_der(pem: &str) -> Result<String> {
    pem_to_der(pem).map(|der| STANDARD.encode(der))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_der_roundtrip_and_fingerprint() {
        let der: Vec<u8> = (0u8..200).collect();
        let pem = der_to_pem(&der);

        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(!pem.contains('\r'));
        assert!(pem.lines().all(|l| l.len() <= 64));
        assert_eq!(pem_to_der(&pem).unwrap(), der);
        assert_eq!(fingerprint_pem(&pem).unwrap(), fingerprint_der(&der));
        assert_eq!(fingerprint_der(&der).len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_per_certificate() {
        let a = der_to_pem(b"certificate-a");
        let b = der_to_pem(b"certificate-b");
        assert_ne!(fingerprint_pem(&a).unwrap(), fingerprint_pem(&b).unwrap());
    }

    #[test]
    fn test_pem_with_surrounding_text() {
        let pem = format!("subject=CN=test\n{}", der_to_pem(b"abc"));
        assert_eq!(pem_to_der(&pem).unwrap(), b"abc");
    }

    #[test]
    fn test_chain_skips_other_blocks() {
        let key = pem::encode(&Pem::new("PRIVATE KEY", b"key".to_vec()));
        let doc = format!("{}{}{}", key, der_to_pem(b"leaf"), der_to_pem(b"issuer"));

        let chain = pem_to_der_chain(&doc).unwrap();
        assert_eq!(chain, vec![b"leaf".to_vec(), b"issuer".to_vec()]);
        assert_eq!(pem_to_der(&doc).unwrap(), b"leaf");
        assert!(pem_to_der(&key).is_err());
    }

    #[test]
    fn test_invalid_pem() {
        assert!(pem_to_der("not a certificate").is_err());
        assert!(pem_to_der("-----BEGIN CERTIFICATE-----\nAAAA").is_err());
        assert!(pem_to_der("-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----").is_err());
    }
}
