use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use super::authority::CertificateAuthority;
use super::cancel::CancelToken;
use super::dns::PropagationState;
use super::dns_providers::poll_dns_propagation;
use super::error::{ErrorKind, IssuanceError};
use super::extractor::ChallengeExtractor;
use super::finalizer::OrderFinalizer;
use super::provisioner::{DeletionOutcome, ProvisionOutcome, TxtRecordProvisioner};
use super::session::{DomainLocks, IssuanceState, PendingIssuance, SessionRegistry, StateTransition};
use super::types::{Authorization, Order, PublishedChallenge};
use super::validator::ChallengeValidator;
use crate::config::EngineSettings;
use crate::distribution::{CertificateMaterializer, CertificateSummary, MaterializedFile};
use crate::domain::Domain;
use crate::storage::StorageLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuanceFailure {
    /// Last state reached before the failure.
    pub state: IssuanceState,
    pub kind: ErrorKind,
    pub message: String,
}

/// Structured outcome of an issuance run; failures are data, never panics.
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceReport {
    pub run_id: String,
    pub domain: String,
    pub state: IssuanceState,
    pub history: Vec<StateTransition>,
    pub challenges: Vec<PublishedChallenge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<ProvisionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<DeletionOutcome>,
    pub files: Vec<MaterializedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_reused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<IssuanceFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IssuanceReport {
    pub fn is_success(&self) -> bool {
        self.state == IssuanceState::CertificateWritten && self.failure.is_none()
    }
}

struct Run {
    id: String,
    domain: String,
    state: IssuanceState,
    history: Vec<StateTransition>,
    started_at: DateTime<Utc>,
    report: Partial,
}

#[derive(Default)]
struct Partial {
    challenges: Vec<PublishedChallenge>,
    records: Option<ProvisionOutcome>,
    cleanup: Option<DeletionOutcome>,
    files: Vec<MaterializedFile>,
    certificate: Option<CertificateSummary>,
    key_reused: Option<bool>,
    failure: Option<IssuanceFailure>,
}

impl Run {
    fn start(id: String, domain: &str) -> Self {
        let mut run = Self {
            id,
            domain: domain.to_string(),
            state: IssuanceState::Created,
            history: Vec::new(),
            started_at: Utc::now(),
            report: Partial::default(),
        };
        run.record(IssuanceState::Created);
        run
    }

    fn resume(pending: &PendingIssuance) -> Self {
        let state = pending
            .history
            .last()
            .map(|transition| transition.state)
            .unwrap_or(IssuanceState::AuthorizationsFetched);
        Self {
            id: pending.session_id.clone(),
            domain: pending.domain.to_string(),
            state,
            history: pending.history.clone(),
            started_at: pending.created_at,
            report: Partial {
                challenges: pending.challenges.clone(),
                ..Partial::default()
            },
        }
    }

    fn advance(&mut self, state: IssuanceState) {
        info!(
            "[issuance] {} ({}): {:?} -> {:?}",
            self.domain, self.id, self.state, state
        );
        self.record(state);
    }

    fn record(&mut self, state: IssuanceState) {
        self.state = state;
        self.history.push(StateTransition {
            state,
            at: Utc::now(),
        });
    }

    fn fail(&mut self, err: &IssuanceError) {
        error!(
            "[issuance] {} ({}) failed after {:?}: {}",
            self.domain, self.id, self.state, err
        );
        self.report.failure = Some(IssuanceFailure {
            state: self.state,
            kind: err.kind(),
            message: err.to_string(),
        });
        self.record(IssuanceState::Failed);
    }

    fn finish(self) -> IssuanceReport {
        IssuanceReport {
            run_id: self.id,
            domain: self.domain,
            state: self.state,
            history: self.history,
            challenges: self.report.challenges,
            records: self.report.records,
            cleanup: self.report.cleanup,
            files: self.report.files,
            certificate: self.report.certificate,
            key_reused: self.report.key_reused,
            failure: self.report.failure,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Public DNS check used before asking the CA to validate.
struct PropagationCheck {
    client: Client,
    resolvers: Vec<String>,
}

/// Composes extraction, provisioning, validation, finalization and
/// materialization into one fail-fast pipeline.
pub struct IssuanceCoordinator {
    authority: Arc<dyn CertificateAuthority>,
    layout: StorageLayout,
    settings: EngineSettings,
    provisioner: Option<TxtRecordProvisioner>,
    propagation: Option<PropagationCheck>,
    sessions: SessionRegistry,
    locks: DomainLocks,
    cancel: CancelToken,
}

impl IssuanceCoordinator {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        layout: StorageLayout,
        settings: EngineSettings,
    ) -> Self {
        Self {
            authority,
            layout,
            settings,
            provisioner: None,
            propagation: None,
            sessions: SessionRegistry::new(),
            locks: DomainLocks::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: TxtRecordProvisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Enables the public DNS wait when `settings.propagation` is set.
    pub fn with_propagation_check(mut self, client: Client, resolvers: Vec<String>) -> Self {
        self.propagation = Some(PropagationCheck { client, resolvers });
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Orders the domain and returns the challenges the caller must publish.
    ///
    /// The pending session is kept in the registry until [`Self::complete`] is called.
    pub async fn begin(&self, domain: &str) -> Result<PendingIssuance, IssuanceError> {
        let domain = Domain::parse(domain)?;
        let _guard = self.locks.acquire(&domain).await;
        let _file_lock = self.layout.lock_domain(&domain).await?;
        let mut run = Run::start(Uuid::new_v4().to_string(), domain.as_str());

        let (order, authorizations, challenges) = match self.extract(&mut run, &domain).await {
            Ok(extracted) => extracted,
            Err(err) => {
                run.fail(&err);
                return Err(err);
            }
        };

        let pending =
            PendingIssuance::new(run.id, domain, order, authorizations, challenges, run.history);
        info!(
            "[issuance] session {} waiting for {} TXT record(s) at {}",
            pending.session_id,
            pending.challenges.len(),
            pending.domain.record_name()
        );
        self.sessions.insert(pending.clone());
        Ok(pending)
    }

    /// Finishes a session started with [`Self::begin`] once its records are published.
    ///
    /// A failed run puts the session back so it can be completed again.
    pub async fn complete(&self, session_id: &str) -> IssuanceReport {
        match self.sessions.take(session_id) {
            Some(pending) => {
                let retry = pending.clone();
                let report = self.resume(pending).await;
                if !report.is_success() {
                    info!(
                        "[issuance] session {} kept for another attempt",
                        retry.session_id
                    );
                    self.sessions.insert(retry);
                }
                report
            }
            None => {
                let mut run = Run::start(session_id.to_string(), "");
                run.fail(&IssuanceError::SessionNotFound(session_id.to_string()));
                run.finish()
            }
        }
    }

    /// Continues a pending session, for instance one restored from disk.
    ///
    /// Published TXT records are left in place; the caller owns their cleanup.
    pub async fn resume(&self, pending: PendingIssuance) -> IssuanceReport {
        let _guard = self.locks.acquire(&pending.domain).await;
        let mut run = Run::resume(&pending);
        let _file_lock = match self.layout.lock_domain(&pending.domain).await {
            Ok(lock) => lock,
            Err(err) => {
                run.fail(&IssuanceError::from(err));
                return run.finish();
            }
        };
        run.advance(IssuanceState::RecordsPublished);

        if let Err(err) = self
            .validate_and_issue(&mut run, &pending.domain, pending.order, &pending.authorizations)
            .await
        {
            run.fail(&err);
        }
        run.finish()
    }

    /// Runs the whole pipeline, publishing and removing the TXT records itself.
    pub async fn issue(&self, domain: &str, zone_id: &str) -> IssuanceReport {
        let mut run = Run::start(Uuid::new_v4().to_string(), domain.trim());
        let domain = match Domain::parse(domain) {
            Ok(domain) => domain,
            Err(err) => {
                run.fail(&IssuanceError::from(err));
                return run.finish();
            }
        };
        run.domain = domain.to_string();
        let _guard = self.locks.acquire(&domain).await;
        let _file_lock = match self.layout.lock_domain(&domain).await {
            Ok(lock) => lock,
            Err(err) => {
                run.fail(&IssuanceError::from(err));
                return run.finish();
            }
        };

        let Some(provisioner) = self.provisioner.as_ref() else {
            run.fail(&IssuanceError::RecordProvisioning {
                created: 0,
                message: "no DNS provider configured".to_string(),
            });
            return run.finish();
        };

        let (order, authorizations, challenges) = match self.extract(&mut run, &domain).await {
            Ok(extracted) => extracted,
            Err(err) => {
                run.fail(&err);
                return run.finish();
            }
        };

        let contents: Vec<String> = challenges
            .iter()
            .map(|challenge| challenge.content.clone())
            .collect();
        let published = provisioner
            .create(zone_id, domain.as_str(), &contents, &self.cancel)
            .await;
        let record_ids = published.record_ids.clone();
        let provisioned = published.success;
        let provision_error = published.error.clone();
        run.report.records = Some(published);

        let outcome = if provisioned {
            run.advance(IssuanceState::RecordsPublished);
            match self.wait_for_propagation(&domain, &contents).await {
                Ok(()) => {
                    self.validate_and_issue(&mut run, &domain, order, &authorizations)
                        .await
                }
                Err(err) => Err(err),
            }
        } else if self.cancel.is_cancelled() {
            Err(IssuanceError::Cancelled { stage: "provision" })
        } else {
            Err(IssuanceError::RecordProvisioning {
                created: record_ids.len(),
                message: provision_error.unwrap_or_else(|| "unknown provider error".to_string()),
            })
        };
        if let Err(err) = outcome {
            run.fail(&err);
        }

        if !record_ids.is_empty() {
            // Cleanup runs even after cancellation.
            let cleanup = provisioner
                .delete(zone_id, &record_ids, &CancelToken::new())
                .await;
            if !cleanup.success {
                warn!(
                    "[issuance] cleanup left TXT record(s) behind for {}: {:?}",
                    domain,
                    cleanup.error
                );
            }
            run.report.cleanup = Some(cleanup);
        }
        run.finish()
    }

    async fn extract(
        &self,
        run: &mut Run,
        domain: &Domain,
    ) -> Result<(Order, Vec<Authorization>, Vec<PublishedChallenge>), IssuanceError> {
        let extractor = ChallengeExtractor::new(Arc::clone(&self.authority), self.settings.call_timeout);
        let order = extractor.order_for(domain, &self.cancel).await?;
        run.advance(IssuanceState::Ordered);
        let extracted = extractor.challenges_for(domain, order, &self.cancel).await?;
        run.advance(IssuanceState::AuthorizationsFetched);
        run.report.challenges = extracted.challenges.clone();
        Ok((extracted.order, extracted.authorizations, extracted.challenges))
    }

    async fn validate_and_issue(
        &self,
        run: &mut Run,
        domain: &Domain,
        order: Order,
        authorizations: &[Authorization],
    ) -> Result<(), IssuanceError> {
        let validator = ChallengeValidator::new(
            Arc::clone(&self.authority),
            self.settings.authorization_backoff,
            self.settings.call_timeout,
        );
        validator.validate(authorizations, &self.cancel).await?;
        run.advance(IssuanceState::Validated);

        let finalizer = OrderFinalizer::new(
            Arc::clone(&self.authority),
            self.layout.clone(),
            self.settings.clone(),
        );
        let finalized = finalizer.finalize(&order, domain, &self.cancel).await?;
        run.report.key_reused = Some(finalized.key_reused);
        run.advance(IssuanceState::Finalized);

        let materialized = CertificateMaterializer::new(self.layout.clone())
            .write(domain, &finalized.chain_pem)
            .map_err(IssuanceError::from_materialize)?;
        run.report.files = materialized.files;
        run.report.certificate = Some(materialized.summary);
        run.advance(IssuanceState::CertificateWritten);
        Ok(())
    }

    /// Waits until every value is visible in public DNS. Timeouts only warn;
    /// the CA has the final say.
    async fn wait_for_propagation(
        &self,
        domain: &Domain,
        contents: &[String],
    ) -> Result<(), IssuanceError> {
        let (Some(settings), Some(check)) = (self.settings.propagation, self.propagation.as_ref())
        else {
            return Ok(());
        };
        let record_name = domain.record_name();
        for expected in contents {
            let result = poll_dns_propagation(
                &check.client,
                &check.resolvers,
                &record_name,
                expected,
                settings.timeout,
                settings.interval,
                &self.cancel,
            )
            .await
            .ok_or(IssuanceError::Cancelled {
                stage: "propagation",
            })?;
            if result.state != PropagationState::Found {
                warn!(
                    "[issuance] {} not confirmed in public DNS ({:?}); continuing",
                    record_name, result.state
                );
            }
        }
        Ok(())
    }
}
