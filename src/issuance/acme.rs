use std::path::PathBuf;

use instant_acme::{Account, AccountCredentials, NewAccount};
use log::info;
use thiserror::Error;

use crate::storage::layout::{read_optional, write_new_file, write_secure_file};
use crate::storage::{StorageError, StorageLayout, WriteStatus};

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account credentials already exist at {0}; pass --force to replace them")]
    AlreadyExists(PathBuf),
    #[error("no account credentials at {0}; run `account create` first")]
    Missing(PathBuf),
    #[error("ACME account request failed: {0}")]
    Acme(String),
    #[error("invalid account credentials: {0}")]
    Credentials(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An authenticated ACME session, created once and handed to the authority adapter.
#[derive(Clone)]
pub struct AcmeAccount {
    account: Account,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountSummary {
    pub account_url: String,
    pub directory_url: String,
    pub credentials_path: PathBuf,
    pub replaced: bool,
}

impl AcmeAccount {
    /// Registers a new account and persists its credentials (key included).
    ///
    /// Existing credentials are kept unless `force` is set.
    pub async fn create(
        directory_url: &str,
        contact_email: Option<&str>,
        layout: &StorageLayout,
        force: bool,
    ) -> Result<(Self, AccountSummary), AccountError> {
        let path = layout.account_credentials();
        let existed = path.exists();
        if existed && !force {
            return Err(AccountError::AlreadyExists(path));
        }

        let contact = contact_email.map(|email| format!("mailto:{email}"));
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();
        info!("[acme] registering account at {}", directory_url);
        let (account, credentials) = Account::builder()
            .map_err(|err| AccountError::Acme(err.to_string()))?
            .create(
                &NewAccount {
                    contact: &contact_refs,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                directory_url.to_owned(),
                None,
            )
            .await
            .map_err(|err| AccountError::Acme(err.to_string()))?;

        let json = serde_json::to_string_pretty(&credentials)?;
        if existed {
            write_secure_file(&path, json.as_bytes())?;
            info!("[acme] replaced account credentials at {}", path.display());
        } else if write_new_file(&path, json.as_bytes())? == WriteStatus::AlreadyExists {
            return Err(AccountError::AlreadyExists(path));
        }

        let summary = AccountSummary {
            account_url: account.id().to_string(),
            directory_url: directory_url.to_string(),
            credentials_path: path,
            replaced: existed,
        };
        info!("[acme] account ready: {}", summary.account_url);
        Ok((
            Self { account },
            summary,
        ))
    }

    /// Restores the account from stored credentials; they carry their own directory URL.
    pub async fn load(layout: &StorageLayout) -> Result<Self, AccountError> {
        let path = layout.account_credentials();
        let raw = read_optional(&path)?.ok_or_else(|| AccountError::Missing(path.clone()))?;
        let credentials: AccountCredentials = serde_json::from_str(&raw)?;
        let account = Account::builder()
            .map_err(|err| AccountError::Acme(err.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|err| AccountError::Acme(err.to_string()))?;
        info!("[acme] loaded account {}", account.id());
        Ok(Self { account })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }
}
