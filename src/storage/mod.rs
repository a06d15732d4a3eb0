pub mod layout;

pub use layout::{DomainFileLock, StorageError, StorageLayout, WriteStatus};
