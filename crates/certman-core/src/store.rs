//! Certificate store
//!
//! Owns every record, allocates serials and enforces the chain invariants:
//!
//! - exactly one root per store, and it is a signing certificate
//! - every non-root record's parent is present, is a signing certificate
//!   and carries `sign-certs`
//! - encryption certificates never carry `sign-certs` or `sign-messages`
//! - serials are unique and never reused, not even after removal
//!
//! Records and the serial counter live behind a single `RwLock`, so a
//! mutation is atomic with respect to readers and a failed operation leaves
//! the store unchanged.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::debug;

use crate::certificate::{CertificateBuilder, CertificateKind, CertificateRecord};
use crate::chain::{ChainError, ChainView};
use crate::crypto::{
    CryptoError, KemKind, KeyAgreementScheme, SignatureScheme, X25519Scheme,
};
use crate::flags::{CapabilityFlag, CapabilityFlags};

/// Errors raised by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A root certificate already exists
    #[error("a root certificate already exists")]
    AlreadyExists,

    /// Issuance referenced a parent that is not in the store
    #[error("unknown parent certificate {0}")]
    UnknownParent(u64),

    /// Import of a serial that is already taken
    #[error("certificate serial {0} already exists")]
    DuplicateSerial(u64),

    /// Parent lacks the capability required to issue
    #[error("certificate {0} is not allowed to sign certificates")]
    InsufficientCapability(u64),

    /// Imported certificate does not chain to the root
    #[error("certificate untrusted: {0}")]
    InvalidChain(#[from] ChainError),

    /// Parent is a public-only copy and cannot sign
    #[error("no secret key held for issuer {0}")]
    MissingIssuerKey(u64),

    /// Owned record's secret key does not match its public key
    #[error("secret key does not match public key of certificate {0}")]
    KeyMismatch(u64),

    /// No certificate with that serial
    #[error("no such certificate: {0}")]
    NotFound(u64),

    /// The root cannot be removed
    #[error("the root certificate cannot be removed")]
    RootRemoval,

    /// Certificate still has children
    #[error("certificate {0} still has dependent certificates")]
    HasDependents(u64),

    /// Encryption certificates hold no signature key
    #[error("encryption certificates cannot carry sign-certs or sign-messages")]
    EncryptionSigningFlags,

    /// A root must hold a signature key
    #[error("encryption certificate {0} cannot be a root")]
    EncryptionRoot(u64),

    /// The serial space is used up
    #[error("no serials left to allocate")]
    SerialsExhausted,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Point-in-time copy of store contents, used for persistence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSnapshot {
    pub next_serial: u64,
    pub records: Vec<CertificateRecord>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<u64, CertificateRecord>,
    root_serial: Option<u64>,
    next_serial: u64,
}

impl StoreState {
    /// Rebuild state from a snapshot without chain checks
    fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut state = StoreState {
            next_serial: snapshot.next_serial,
            ..Default::default()
        };
        for record in snapshot.records {
            let serial = record.serial();
            if state.records.contains_key(&serial) {
                return Err(StoreError::DuplicateSerial(serial));
            }
            if record.is_root() {
                if state.root_serial.is_some() {
                    return Err(StoreError::AlreadyExists);
                }
                state.root_serial = Some(serial);
            }
            state.advance_past(serial);
            state.records.insert(serial, record);
        }
        Ok(state)
    }

    fn allocate(&mut self) -> Result<u64> {
        let serial = self.next_serial;
        if self.records.contains_key(&serial) {
            return Err(StoreError::SerialsExhausted);
        }
        self.next_serial = serial.saturating_add(1);
        Ok(serial)
    }

    fn advance_past(&mut self, serial: u64) {
        if serial >= self.next_serial {
            self.next_serial = serial.saturating_add(1);
        }
    }

    fn view<'a>(&'a self, scheme: &'a dyn SignatureScheme) -> ChainView<'a> {
        ChainView {
            records: &self.records,
            root_serial: self.root_serial,
            scheme,
        }
    }
}

fn check_kind_flags(kind: CertificateKind, flags: CapabilityFlags) -> Result<()> {
    let signs =
        flags.contains(CapabilityFlag::SignCerts) || flags.contains(CapabilityFlag::SignMessages);
    if !kind.is_signing() && signs {
        return Err(StoreError::EncryptionSigningFlags);
    }
    Ok(())
}

/// Keyed collection of certificate records
#[derive(Debug)]
pub struct CertificateStore {
    scheme: Arc<dyn SignatureScheme>,
    key_agreement: Arc<dyn KeyAgreementScheme>,
    state: RwLock<StoreState>,
}

impl CertificateStore {
    /// Create an empty store; the first root will receive serial 0
    ///
    /// Encryption certificates default to X25519 keys.
    pub fn new(scheme: Arc<dyn SignatureScheme>) -> Self {
        Self {
            scheme,
            key_agreement: Arc::new(X25519Scheme),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Use `key_agreement` for encryption certificates issued from now on
    pub fn with_key_agreement(mut self, key_agreement: Arc<dyn KeyAgreementScheme>) -> Self {
        self.key_agreement = key_agreement;
        self
    }

    /// Rebuild a store from persisted contents
    ///
    /// Persisted records are trusted as written: only duplicate serials and
    /// duplicate roots are rejected. Chains are checked when used.
    pub fn restore(scheme: Arc<dyn SignatureScheme>, snapshot: StoreSnapshot) -> Result<Self> {
        Ok(Self {
            scheme,
            key_agreement: Arc::new(X25519Scheme),
            state: RwLock::new(StoreState::from_snapshot(snapshot)?),
        })
    }

    /// Replace the contents with an earlier snapshot of this store
    pub fn reset_to(&self, snapshot: StoreSnapshot) -> Result<()> {
        let state = StoreState::from_snapshot(snapshot)?;
        *self.write() = state;
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read();
        StoreSnapshot {
            next_serial: state.next_serial,
            records: state.records.values().cloned().collect(),
        }
    }

    pub fn scheme(&self) -> &Arc<dyn SignatureScheme> {
        &self.scheme
    }

    pub fn key_agreement(&self) -> &Arc<dyn KeyAgreementScheme> {
        &self.key_agreement
    }

    fn key_agreement_for(&self, kem: KemKind) -> Result<Arc<dyn KeyAgreementScheme>> {
        if kem == self.key_agreement.kind() {
            Ok(self.key_agreement.clone())
        } else {
            Ok(kem.scheme()?)
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn with_chain_view<R>(&self, f: impl FnOnce(&ChainView<'_>) -> R) -> R {
        let state = self.read();
        f(&state.view(self.scheme.as_ref()))
    }

    /// Generate the self-signed root
    ///
    /// The root carries `sign-certs` and `sign-messages`.
    pub fn put_root(&self, name: &str) -> Result<CertificateRecord> {
        let mut state = self.write();
        if state.root_serial.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        let serial = state.next_serial;
        if state.records.contains_key(&serial) {
            return Err(StoreError::SerialsExhausted);
        }
        let (public_key, secret_key) = self.scheme.generate_keypair();
        let certificate = CertificateBuilder::new(serial, public_key)
            .name(name)
            .flags(CapabilityFlags::from([
                CapabilityFlag::SignCerts,
                CapabilityFlag::SignMessages,
            ]))
            .sign(self.scheme.as_ref(), &secret_key)?;
        let record = CertificateRecord::owned(certificate, secret_key);

        state.allocate()?;
        state.root_serial = Some(serial);
        state.records.insert(serial, record.clone());
        debug!(serial, name = %name, "Root certificate created");
        Ok(record)
    }

    /// Issue a signing certificate signed by `parent_serial`
    pub fn issue(
        &self,
        name: &str,
        parent_serial: u64,
        flags: CapabilityFlags,
    ) -> Result<CertificateRecord> {
        self.issue_kind(name, parent_serial, flags, CertificateKind::Signing)
    }

    /// Issue an encryption certificate signed by `parent_serial`
    ///
    /// The key pair comes from the store's key agreement scheme.
    pub fn issue_encryption(
        &self,
        name: &str,
        parent_serial: u64,
        flags: CapabilityFlags,
    ) -> Result<CertificateRecord> {
        let kind = CertificateKind::Encryption(self.key_agreement.kind());
        self.issue_kind(name, parent_serial, flags, kind)
    }

    fn issue_kind(
        &self,
        name: &str,
        parent_serial: u64,
        flags: CapabilityFlags,
        kind: CertificateKind,
    ) -> Result<CertificateRecord> {
        check_kind_flags(kind, flags)?;
        let mut state = self.write();
        let parent = state
            .records
            .get(&parent_serial)
            .ok_or(StoreError::UnknownParent(parent_serial))?;
        if !parent.certificate().can_issue() {
            return Err(StoreError::InsufficientCapability(parent_serial));
        }
        let issuer_secret = parent
            .secret_key()
            .ok_or(StoreError::MissingIssuerKey(parent_serial))?
            .clone();

        let serial = state.next_serial;
        if state.records.contains_key(&serial) {
            return Err(StoreError::SerialsExhausted);
        }
        let (public_key, secret_key) = match kind {
            CertificateKind::Signing => self.scheme.generate_keypair(),
            CertificateKind::Encryption(_) => self.key_agreement.generate_keypair(),
        };
        let certificate = CertificateBuilder::new(serial, public_key)
            .kind(kind)
            .name(name)
            .parent(parent_serial)
            .flags(flags)
            .sign(self.scheme.as_ref(), &issuer_secret)?;
        let record = CertificateRecord::owned(certificate, secret_key);

        state.allocate()?;
        state.records.insert(serial, record.clone());
        debug!(serial, parent_serial, name = %name, flags = %flags, kind = %kind, "Certificate issued");
        Ok(record)
    }

    /// Insert a record produced elsewhere
    ///
    /// Non-root records must chain to this store's root. A root is accepted
    /// only into a store without one, and only if it is correctly self-signed.
    pub fn import(&self, record: CertificateRecord) -> Result<()> {
        let mut state = self.write();
        let serial = record.serial();

        if state.records.contains_key(&serial) {
            return Err(StoreError::DuplicateSerial(serial));
        }
        check_kind_flags(record.kind(), record.flags())?;

        if record.is_root() {
            if record.is_encryption() {
                return Err(StoreError::EncryptionRoot(serial));
            }
            if state.root_serial.is_some() {
                return Err(StoreError::AlreadyExists);
            }
            let certificate = record.certificate();
            if !self.scheme.verify(
                &certificate.public_key,
                &certificate.tbs_bytes(),
                &certificate.signature,
            ) {
                return Err(ChainError::BadIssuerSignature(serial).into());
            }
        } else {
            state.view(self.scheme.as_ref()).check(record.certificate())?;
        }

        if let Some(secret_key) = record.secret_key() {
            let matches = match record.kind() {
                CertificateKind::Signing => self.scheme.keys_match(record.public_key(), secret_key),
                CertificateKind::Encryption(kem) => {
                    self.key_agreement_for(kem)?
                        .keys_match(record.public_key(), secret_key)
                }
            };
            if !matches {
                return Err(StoreError::KeyMismatch(serial));
            }
        }

        if record.is_root() {
            state.root_serial = Some(serial);
        }
        state.advance_past(serial);
        debug!(serial, owned = record.is_owned(), "Certificate imported");
        state.records.insert(serial, record);
        Ok(())
    }

    /// Remove a non-root certificate that has no children
    pub fn remove(&self, serial: u64) -> Result<CertificateRecord> {
        let mut state = self.write();
        let record = state
            .records
            .get(&serial)
            .ok_or(StoreError::NotFound(serial))?;
        if record.is_root() {
            return Err(StoreError::RootRemoval);
        }
        if state
            .records
            .values()
            .any(|other| other.parent_serial() == Some(serial))
        {
            return Err(StoreError::HasDependents(serial));
        }

        let removed = state
            .records
            .remove(&serial)
            .ok_or(StoreError::NotFound(serial))?;
        debug!(serial, "Certificate removed");
        Ok(removed)
    }

    pub fn get(&self, serial: u64) -> Option<CertificateRecord> {
        self.read().records.get(&serial).cloned()
    }

    pub fn root(&self) -> Option<CertificateRecord> {
        let state = self.read();
        state
            .root_serial
            .and_then(|serial| state.records.get(&serial).cloned())
    }

    /// All records, ordered by serial
    pub fn all(&self) -> Vec<CertificateRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Serial the next generated certificate will receive
    pub fn next_serial(&self) -> u64 {
        self.read().next_serial
    }
}
