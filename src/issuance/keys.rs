use rcgen::{CertificateParams, DnType, KeyPair};
use thiserror::Error;

use crate::domain::Domain;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("failed to generate key pair: {0}")]
    Generate(String),
    #[error("failed to build certificate signing request: {0}")]
    Csr(String),
    #[error("stored private key could not be parsed: {0}")]
    InvalidKey(String),
    #[error("stored CSR could not be parsed: {0}")]
    InvalidCsr(String),
}

/// A domain key with its signing request, both PEM encoded.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub private_key_pem: String,
    pub csr_pem: String,
    pub csr_der: Vec<u8>,
}

/// P-256 ECDSA key in PKCS#8 PEM.
pub fn create_private_key() -> Result<KeyPair, KeyError> {
    KeyPair::generate().map_err(|err| KeyError::Generate(err.to_string()))
}

/// CSR with CN = domain and SANs = {domain, *.domain}.
pub fn create_csr(domain: &Domain, key: &KeyPair) -> Result<KeyMaterial, KeyError> {
    let mut params = CertificateParams::new(vec![domain.wildcard(), domain.as_str().to_string()])
        .map_err(|err| KeyError::Csr(err.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, domain.as_str());
    let request = params
        .serialize_request(key)
        .map_err(|err| KeyError::Csr(err.to_string()))?;
    let csr_pem = request.pem().map_err(|err| KeyError::Csr(err.to_string()))?;
    Ok(KeyMaterial {
        private_key_pem: key.serialize_pem(),
        csr_pem,
        csr_der: request.der().to_vec(),
    })
}

pub fn generate_key_material(domain: &Domain) -> Result<KeyMaterial, KeyError> {
    let key = create_private_key()?;
    create_csr(domain, &key)
}

/// Rebuilds key material from previously persisted PEM files.
pub fn load_key_material(private_key_pem: &str, csr_pem: &str) -> Result<KeyMaterial, KeyError> {
    let key = pem::parse(private_key_pem).map_err(|err| KeyError::InvalidKey(err.to_string()))?;
    if !key.tag().ends_with("PRIVATE KEY") {
        return Err(KeyError::InvalidKey(format!("unexpected PEM tag {}", key.tag())));
    }
    let csr = pem::parse(csr_pem).map_err(|err| KeyError::InvalidCsr(err.to_string()))?;
    if csr.tag() != "CERTIFICATE REQUEST" {
        return Err(KeyError::InvalidCsr(format!("unexpected PEM tag {}", csr.tag())));
    }
    Ok(KeyMaterial {
        private_key_pem: private_key_pem.to_string(),
        csr_pem: csr_pem.to_string(),
        csr_der: csr.contents().to_vec(),
    })
}
