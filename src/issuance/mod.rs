pub mod acme;
pub mod acme_authority;
pub mod authority;
pub mod cancel;
pub mod coordinator;
pub mod dns;
pub mod dns_providers;
pub mod error;
pub mod extractor;
pub mod finalizer;
pub mod keys;
pub mod poll;
pub mod provisioner;
pub mod session;
pub mod types;
pub mod validator;

pub use acme::{AccountError, AccountSummary, AcmeAccount};
pub use acme_authority::AcmeAuthority;
pub use authority::{AuthorityError, CertificateAuthority};
pub use cancel::CancelToken;
pub use coordinator::{IssuanceCoordinator, IssuanceFailure, IssuanceReport};
pub use error::{ErrorKind, IssuanceError};
pub use extractor::{ChallengeExtractor, ExtractedChallenges};
pub use finalizer::{FinalizedOrder, OrderFinalizer};
pub use provisioner::{DeletionOutcome, ProvisionOutcome, TxtRecordProvisioner};
pub use session::{IssuanceState, PendingIssuance};
pub use validator::ChallengeValidator;
