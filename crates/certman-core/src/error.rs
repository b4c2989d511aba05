//! Error types for certman

use thiserror::Error;

use crate::access::AccessError;
use crate::chain::ChainError;
use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::flags::FlagParseError;
use crate::signature::SignatureError;
use crate::store::StoreError;

/// Result type alias using CertmanError
pub type Result<T> = std::result::Result<T, CertmanError>;

/// Any error raised by the certificate core
#[derive(Error, Debug)]
pub enum CertmanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Certificate or signature file could not be decoded
    #[error("malformed file: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Flags(#[from] FlagParseError),
}

impl CertmanError {
    /// True when the error means a certificate is not trusted
    pub fn is_untrusted(&self) -> bool {
        matches!(
            self,
            CertmanError::Chain(_)
                | CertmanError::Store(StoreError::InvalidChain(_))
                | CertmanError::Signature(SignatureError::UntrustedCertificate(_))
        )
    }
}
