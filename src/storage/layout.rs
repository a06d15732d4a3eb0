use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Domain;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

pub const ACCOUNT_DIR: &str = "account";
pub const CREDENTIALS_FILENAME: &str = "credentials.json";
pub const PRIVKEY_FILENAME: &str = "privkey.pem";
pub const CSR_FILENAME: &str = "request.csr";
pub const CERT_FILENAME: &str = "cert.pem";
pub const CHAIN_FILENAME: &str = "chain.pem";
pub const FULLCHAIN_FILENAME: &str = "fullchain.pem";
pub const SESSION_FILENAME: &str = "session.json";
pub const LOCK_FILENAME: &str = ".lock";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a write-once attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    Written,
    AlreadyExists,
}

/// Predictable on-disk locations for account and per-domain artifacts.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account_credentials(&self) -> PathBuf {
        self.root.join(ACCOUNT_DIR).join(CREDENTIALS_FILENAME)
    }

    pub fn domain_dir(&self, domain: &Domain) -> PathBuf {
        self.root.join(domain.as_str())
    }

    pub fn private_key(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(PRIVKEY_FILENAME)
    }

    pub fn csr(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(CSR_FILENAME)
    }

    pub fn certificate(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(CERT_FILENAME)
    }

    pub fn chain(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(CHAIN_FILENAME)
    }

    pub fn fullchain(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(FULLCHAIN_FILENAME)
    }

    pub fn session(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(SESSION_FILENAME)
    }

    pub fn lock_file(&self, domain: &Domain) -> PathBuf {
        self.domain_dir(domain).join(LOCK_FILENAME)
    }

    /// Waits for the domain's advisory lock, shared by every process using this root.
    pub async fn lock_domain(&self, domain: &Domain) -> Result<DomainFileLock, StorageError> {
        let path = self.lock_file(domain);
        ensure_parent(&path)?;
        let lock_error = |source| StorageError::Lock {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_error)?;
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
            .await
            .map_err(|err| lock_error(io::Error::other(err)))?
            .map_err(lock_error)?;
        debug!("[storage] locked {}", path.display());
        Ok(DomainFileLock { _file: file, path })
    }
}

/// Held advisory lock; closing the file releases it.
#[derive(Debug)]
pub struct DomainFileLock {
    _file: fs::File,
    path: PathBuf,
}

impl DomainFileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes `content` only if `path` does not exist yet. Existing files are left untouched.
pub fn write_new_file(path: &Path, content: &[u8]) -> Result<WriteStatus, StorageError> {
    ensure_parent(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!("[storage] {} already exists; leaving it in place", path.display());
            return Ok(WriteStatus::AlreadyExists);
        }
        Err(source) => {
            return Err(StorageError::Write {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    write_all(&mut file, path, content)?;
    Ok(WriteStatus::Written)
}

/// Replaces `path` with owner-only permissions. Readers see the old or the new
/// content, never a truncated file.
pub fn write_secure_file(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    ensure_parent(path)?;
    let staging = staging_path(path);
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(&staging).map_err(|source| StorageError::Write {
        path: staging.clone(),
        source,
    })?;
    write_all(&mut file, &staging, content)?;
    ensure_permissions(&staging)?;
    fs::rename(&staging, path).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

pub fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_all(file: &mut fs::File, path: &Path, content: &[u8]) -> Result<(), StorageError> {
    file.write_all(content)
        .and_then(|_| file.flush())
        .map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn ensure_permissions(path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        let current = fs::metadata(path)
            .map_err(|source| StorageError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .permissions();
        if current.mode() & 0o777 != 0o600 {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
                StorageError::Write {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
