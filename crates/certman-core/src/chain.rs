//! Chain validation
//!
//! A certificate is trusted when every link from it to the store's root
//! resolves, every issuer along the way carries `sign-certs`, and every
//! issuer signature verifies. Validation runs in two passes:
//!
//! 1. Structural walk from the target through parent serials, tracking
//!    visited serials so that cycles terminate
//! 2. Signature checks from leaf to root, each certificate against its
//!    parent's public key (the root against its own)
//!
//! No cryptography runs unless the structure is sound.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::certificate::{Certificate, CertificateRecord};
use crate::crypto::SignatureScheme;
use crate::store::CertificateStore;

/// Reasons a certificate chain is not trusted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    /// A referenced certificate is not in the store
    #[error("broken chain: certificate {0} not found")]
    BrokenLink(u64),

    /// An issuer in the chain lacks `sign-certs` or is not a signing certificate
    #[error("certificate {0} is not allowed to sign certificates")]
    MissingCapability(u64),

    /// The chain ends at a parentless certificate other than the store root
    #[error("chain does not end at the trusted root")]
    NoRoot,

    /// The chain revisits a serial
    #[error("cycle detected at certificate {0}")]
    CycleDetected(u64),

    /// The issuer signature on a certificate does not verify
    #[error("bad issuer signature on certificate {0}")]
    BadIssuerSignature(u64),
}

/// Read-only view of store contents used during validation
pub(crate) struct ChainView<'a> {
    pub records: &'a BTreeMap<u64, CertificateRecord>,
    pub root_serial: Option<u64>,
    pub scheme: &'a dyn SignatureScheme,
}

impl ChainView<'_> {
    fn is_root(&self, certificate: &Certificate) -> bool {
        self.root_serial == Some(certificate.serial)
            && self
                .records
                .get(&certificate.serial)
                .is_some_and(|root| root.certificate() == certificate)
    }

    /// Validate a certificate, whether or not it is held in the store
    pub fn check(&self, target: &Certificate) -> Result<(), ChainError> {
        let chain = self.walk(target)?;
        self.verify_signatures(&chain)
    }

    /// Collect `target` and its ancestors, leaf first
    fn walk<'c>(&'c self, target: &'c Certificate) -> Result<Vec<&'c Certificate>, ChainError> {
        let mut chain = vec![target];
        let mut visited = BTreeSet::from([target.serial]);
        let mut current = target;

        while let Some(parent_serial) = current.parent_serial {
            if !visited.insert(parent_serial) {
                return Err(ChainError::CycleDetected(parent_serial));
            }
            let parent = self
                .records
                .get(&parent_serial)
                .ok_or(ChainError::BrokenLink(parent_serial))?
                .certificate();
            if !parent.can_issue() {
                return Err(ChainError::MissingCapability(parent_serial));
            }
            chain.push(parent);
            current = parent;
        }

        if !self.is_root(current) {
            return Err(ChainError::NoRoot);
        }
        Ok(chain)
    }

    fn verify_signatures(&self, chain: &[&Certificate]) -> Result<(), ChainError> {
        for (i, certificate) in chain.iter().enumerate() {
            let issuer = chain.get(i + 1).unwrap_or(certificate);
            let valid = self.scheme.verify(
                &issuer.public_key,
                &certificate.tbs_bytes(),
                &certificate.signature,
            );
            if !valid {
                return Err(ChainError::BadIssuerSignature(certificate.serial));
            }
        }
        debug!(serial = chain[0].serial, depth = chain.len(), "Chain validated");
        Ok(())
    }
}

/// Validates certificates against a store
#[derive(Debug, Clone, Copy)]
pub struct ChainValidator<'a> {
    store: &'a CertificateStore,
}

impl<'a> ChainValidator<'a> {
    pub fn new(store: &'a CertificateStore) -> Self {
        Self { store }
    }

    /// Validate the stored certificate with the given serial
    pub fn validate(&self, serial: u64) -> Result<(), ChainError> {
        self.store.with_chain_view(|view| {
            let target = view
                .records
                .get(&serial)
                .ok_or(ChainError::BrokenLink(serial))?
                .certificate();
            view.check(target)
        })
    }

    /// Validate a record that may not be in the store
    ///
    /// Ancestors are resolved in the store; the record itself is taken as
    /// given. Used for imports and for certificates received from peers.
    pub fn validate_record(&self, record: &CertificateRecord) -> Result<(), ChainError> {
        self.store
            .with_chain_view(|view| view.check(record.certificate()))
    }
}
