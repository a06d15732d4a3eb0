pub mod materializer;

pub use materializer::{
    CertificateMaterializer, CertificateSummary, FileStatus, MaterializeError,
    MaterializedCertificate, MaterializedFile, SplitChain, split_certificate_chain,
};
