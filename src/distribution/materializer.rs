use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use crate::domain::Domain;
use crate::storage::layout::write_new_file;
use crate::storage::{StorageError, StorageLayout, WriteStatus};

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("certificate chain is malformed: {0}")]
    InvalidChain(String),
    #[error("leaf certificate is unusable: {0}")]
    Certificate(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A leaf-first chain split into the three artifacts TLS servers expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChain {
    pub leaf: String,
    pub chain: String,
    pub fullchain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Written,
    Skipped,
}

impl From<WriteStatus> for FileStatus {
    fn from(status: WriteStatus) -> Self {
        match status {
            WriteStatus::Written => FileStatus::Written,
            WriteStatus::AlreadyExists => FileStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedFile {
    pub label: String,
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    pub sans: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializedCertificate {
    pub files: Vec<MaterializedFile>,
    pub summary: CertificateSummary,
}

/// Splits a PEM chain on certificate boundaries, keeping each block's bytes.
///
/// The first block is the leaf, the rest form `chain`. A chain without an
/// issuer certificate is rejected.
pub fn split_certificate_chain(chain_pem: &str) -> Result<SplitChain, MaterializeError> {
    let mut blocks = Vec::new();
    let mut rest = chain_pem;
    while let Some(start) = rest.find(BEGIN_CERTIFICATE) {
        let tail = &rest[start..];
        let end = tail.find(END_CERTIFICATE).ok_or_else(|| {
            MaterializeError::InvalidChain("unterminated certificate block".to_string())
        })?;
        let block_len = end + END_CERTIFICATE.len();
        blocks.push(format!("{}\n", &tail[..block_len]));
        rest = &tail[block_len..];
    }

    for block in &blocks {
        let parsed = pem::parse(block).map_err(|err| MaterializeError::InvalidChain(err.to_string()))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(MaterializeError::InvalidChain(format!(
                "unexpected PEM tag {}",
                parsed.tag()
            )));
        }
    }

    match blocks.len() {
        0 => Err(MaterializeError::InvalidChain(
            "no certificate PEM blocks found".to_string(),
        )),
        1 => Err(MaterializeError::InvalidChain(
            "issuer chain is missing; cannot write chain.pem".to_string(),
        )),
        _ => {
            let leaf = blocks[0].clone();
            let chain = blocks[1..].concat();
            let fullchain = format!("{leaf}{chain}");
            Ok(SplitChain {
                leaf,
                chain,
                fullchain,
            })
        }
    }
}

/// Parses the leaf certificate for serial, validity, fingerprint and SANs.
pub fn summarize_certificate(leaf_pem: &str) -> Result<CertificateSummary, MaterializeError> {
    let (_, pem_block) = parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|err| MaterializeError::InvalidChain(format!("failed to parse leaf PEM: {err}")))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|err| MaterializeError::InvalidChain(err.to_string()))?;

    let not_before = validity_bound("notBefore", cert.validity().not_before.timestamp())?;
    let not_after = validity_bound("notAfter", cert.validity().not_after.timestamp())?;
    let fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(cert.as_raw());
        hex::encode(hasher.finalize())
    };
    let sans = match cert.subject_alternative_name() {
        Ok(Some(extension)) => extension
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!("[materialize] unreadable SAN extension: {}", err);
            Vec::new()
        }
    };

    Ok(CertificateSummary {
        serial: cert.raw_serial_as_string(),
        not_before,
        not_after,
        fingerprint,
        sans,
    })
}

fn validity_bound(field: &str, seconds: i64) -> Result<DateTime<Utc>, MaterializeError> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        MaterializeError::Certificate(format!("{field} {seconds} is outside the supported range"))
    })
}

/// Persists issued certificates under the domain directory, write-once.
pub struct CertificateMaterializer {
    layout: StorageLayout,
}

impl CertificateMaterializer {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Writes `cert.pem`, `chain.pem` and `fullchain.pem`. Files that already
    /// exist are reported as skipped and keep their bytes.
    pub fn write(
        &self,
        domain: &Domain,
        chain_pem: &str,
    ) -> Result<MaterializedCertificate, MaterializeError> {
        let split = split_certificate_chain(chain_pem)?;
        let summary = summarize_certificate(&split.leaf)?;

        let targets = [
            ("cert", self.layout.certificate(domain), &split.leaf),
            ("chain", self.layout.chain(domain), &split.chain),
            ("fullchain", self.layout.fullchain(domain), &split.fullchain),
        ];
        let mut files = Vec::with_capacity(targets.len());
        for (label, path, content) in targets {
            let status = FileStatus::from(write_new_file(&path, content.as_bytes())?);
            if status == FileStatus::Skipped {
                warn!(
                    "[materialize] {} exists for {}; keeping the existing file",
                    path.display(),
                    domain
                );
            }
            files.push(MaterializedFile {
                label: label.to_string(),
                path,
                status,
            });
        }

        info!(
            "[materialize] {} serial {} valid until {} ({} file(s) written)",
            domain,
            summary.serial,
            summary.not_after,
            files
                .iter()
                .filter(|file| file.status == FileStatus::Written)
                .count()
        );
        Ok(MaterializedCertificate { files, summary })
    }
}
