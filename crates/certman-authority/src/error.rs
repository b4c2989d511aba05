//! Authority error types

use std::io;
use std::path::PathBuf;

use certman_core::{
    AccessError, ChainError, CodecError, CryptoError, SignatureError, StoreError,
};
use thiserror::Error;

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, AuthorityError>;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("No root certificate is available")]
    NoRoot,

    #[error("File already exists: {0} (use force=yes to overwrite)")]
    FileExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Certificate {0} is not a root certificate")]
    NotARoot(u64),

    #[error("Certificate {0} is a root certificate; use root import")]
    UnexpectedRoot(u64),

    #[error("Certificate {serial} is not one of the {expected} certificates")]
    WrongFamily { serial: u64, expected: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Certificate untrusted: {0}")]
    Untrusted(#[from] ChainError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthorityError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AuthorityError::Io {
            path: path.into(),
            source,
        }
    }
}
