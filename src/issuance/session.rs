use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Authorization, Order, PublishedChallenge};
use crate::domain::Domain;
use crate::storage::layout::{SESSION_FILENAME, read_optional, remove_if_exists, write_secure_file};
use crate::storage::{StorageError, StorageLayout};

/// Lifecycle of one issuance run. `Failed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceState {
    Created,
    Ordered,
    AuthorizationsFetched,
    RecordsPublished,
    Validated,
    Finalized,
    CertificateWritten,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: IssuanceState,
    pub at: DateTime<Utc>,
}

/// An order whose challenges have been handed out and now wait for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIssuance {
    pub session_id: String,
    pub domain: Domain,
    pub order: Order,
    pub authorizations: Vec<Authorization>,
    pub challenges: Vec<PublishedChallenge>,
    pub history: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
}

impl PendingIssuance {
    pub fn new(
        session_id: String,
        domain: Domain,
        order: Order,
        authorizations: Vec<Authorization>,
        challenges: Vec<PublishedChallenge>,
        history: Vec<StateTransition>,
    ) -> Self {
        Self {
            session_id,
            domain,
            order,
            authorizations,
            challenges,
            history,
            created_at: Utc::now(),
        }
    }

    /// TXT values in authorization order.
    pub fn contents(&self) -> Vec<String> {
        self.challenges
            .iter()
            .map(|challenge| challenge.content.clone())
            .collect()
    }

    /// Stores the session under the domain directory so a later process can resume it.
    pub fn save(&self, layout: &StorageLayout) -> Result<std::path::PathBuf, SessionFileError> {
        let path = layout.session(&self.domain);
        let json = serde_json::to_string_pretty(self)?;
        write_secure_file(&path, json.as_bytes())?;
        Ok(path)
    }

    pub fn load(layout: &StorageLayout, domain: &Domain) -> Result<Option<Self>, SessionFileError> {
        match read_optional(&layout.session(domain))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Scans every domain directory for the session with `session_id`.
    pub fn find(layout: &StorageLayout, session_id: &str) -> Result<Option<Self>, SessionFileError> {
        let entries = match std::fs::read_dir(layout.root()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Read {
                    path: layout.root().to_path_buf(),
                    source,
                }
                .into());
            }
        };
        for entry in entries.flatten().filter(|entry| entry.path().is_dir()) {
            let path = entry.path().join(SESSION_FILENAME);
            let Some(raw) = read_optional(&path)? else {
                continue;
            };
            let pending: Self = serde_json::from_str(&raw)?;
            if pending.session_id == session_id {
                return Ok(Some(pending));
            }
        }
        Ok(None)
    }

    pub fn discard(layout: &StorageLayout, domain: &Domain) -> Result<bool, SessionFileError> {
        Ok(remove_if_exists(&layout.session(domain))?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionFileError {
    #[error("session file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pending sessions of this process, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, PendingIssuance>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pending: PendingIssuance) {
        lock(&self.sessions).insert(pending.session_id.clone(), pending);
    }

    /// Removes and returns the session; a session can be completed once.
    pub fn take(&self, session_id: &str) -> Option<PendingIssuance> {
        lock(&self.sessions).remove(session_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One async mutex per domain so runs within a process never overlap.
/// Other processes are kept out by [`crate::storage::StorageLayout::lock_domain`].
#[derive(Default)]
pub struct DomainLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, domain: &Domain) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = lock(&self.locks);
            Arc::clone(
                locks
                    .entry(domain.as_str().to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
