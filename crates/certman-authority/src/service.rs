//! Certificate authority service
//!
//! Wraps a [`CertificateStore`] with persistence and file exchange:
//!
//! - root bootstrap, export and import
//! - issuance, export, import and removal of signing and encryption
//!   certificates
//! - detached file signatures
//! - command authorization (signature plus access policy)
//!
//! Every mutation is one unit under the writer mutex and the backend lock:
//! reload the saved store, apply the change to that copy, save it, and only
//! then make it visible. A failed change or save leaves both the saved and
//! the visible store as they were.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};

use certman_core::codec;
use certman_core::{
    authorize, CapabilityFlags, CertificateRecord, CertificateStore, ChainValidator,
    CommandAccess, DetachedSignature, KeyAgreementScheme, SignatureEngine, SignatureScheme,
    SignedEnvelope, StoreError,
};
use tracing::{info, warn};

use crate::config::CertmanConfig;
use crate::error::{AuthorityError, Result};
use crate::storage::{
    write_atomic, FileBackend, MemoryBackend, PersistedStore, StorageError, StoreBackend,
};

/// Which family of non-root certificates an operation works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateFamily {
    Signing,
    Encryption,
}

impl CertificateFamily {
    pub fn label(self) -> &'static str {
        match self {
            CertificateFamily::Signing => "signing",
            CertificateFamily::Encryption => "encryption",
        }
    }

    fn admits(self, record: &CertificateRecord) -> bool {
        match self {
            CertificateFamily::Signing => !record.is_encryption(),
            CertificateFamily::Encryption => record.is_encryption(),
        }
    }

    fn check(self, record: &CertificateRecord) -> Result<()> {
        if self.admits(record) {
            Ok(())
        } else {
            Err(AuthorityError::WrongFamily {
                serial: record.serial(),
                expected: self.label(),
            })
        }
    }
}

#[derive(Debug)]
pub struct CertificateAuthorityService {
    store: CertificateStore,
    backend: Box<dyn StoreBackend>,
    writer: Mutex<()>,
}

impl CertificateAuthorityService {
    /// Open the store saved in `backend`, or start an empty one
    pub fn open(scheme: Arc<dyn SignatureScheme>, backend: Box<dyn StoreBackend>) -> Result<Self> {
        let store = match backend.load()? {
            Some(persisted) => {
                check_scheme(scheme.as_ref(), &persisted)?;
                CertificateStore::restore(scheme, persisted.snapshot)?
            }
            None => CertificateStore::new(scheme),
        };
        Ok(Self {
            store,
            backend,
            writer: Mutex::new(()),
        })
    }

    /// Open the store file named by the configuration
    pub fn from_config(config: &CertmanConfig) -> Result<Self> {
        let scheme = config.scheme.scheme()?;
        let key_agreement = config.kem.scheme()?;
        Ok(
            Self::open(scheme, Box::new(FileBackend::new(&config.store_path)))?
                .with_key_agreement(key_agreement),
        )
    }

    /// Service over an empty in-memory store
    pub fn in_memory(scheme: Arc<dyn SignatureScheme>) -> Self {
        Self {
            store: CertificateStore::new(scheme),
            backend: Box::new(MemoryBackend::new()),
            writer: Mutex::new(()),
        }
    }

    /// Use `key_agreement` for new encryption certificates
    pub fn with_key_agreement(mut self, key_agreement: Arc<dyn KeyAgreementScheme>) -> Self {
        self.store = self.store.with_key_agreement(key_agreement);
        self
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    fn mutate<T>(&self, op: impl FnOnce(&CertificateStore) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = self.backend.lock()?;

        // Another process may have saved since this one loaded
        let base = match self.backend.load()? {
            Some(persisted) => {
                check_scheme(self.store.scheme().as_ref(), &persisted)?;
                persisted.snapshot
            }
            None => self.store.snapshot(),
        };
        let working = CertificateStore::restore(self.store.scheme().clone(), base)?
            .with_key_agreement(self.store.key_agreement().clone());

        let value = op(&working)?;
        let persisted = PersistedStore {
            scheme: self.store.scheme().kind(),
            snapshot: working.snapshot(),
        };
        if let Err(e) = self.backend.save(&persisted) {
            warn!(error = %e, "Failed to save store, change discarded");
            return Err(e.into());
        }
        self.store.reset_to(persisted.snapshot)?;
        Ok(value)
    }

    // =========================================================================
    // Root
    // =========================================================================

    pub fn root_generate(&self, name: &str) -> Result<CertificateRecord> {
        let root = self.mutate(|store| Ok(store.put_root(name)?))?;
        info!(
            serial = root.serial(),
            name = %name,
            fingerprint = %root.public_key().fingerprint(),
            "Generated root certificate"
        );
        Ok(root)
    }

    pub fn root_show(&self) -> Option<CertificateRecord> {
        self.store.root()
    }

    pub fn root_export(&self, path: &Path, include_secret: bool, overwrite: bool) -> Result<()> {
        let root = self.store.root().ok_or(AuthorityError::NoRoot)?;
        export(&root, path, include_secret, overwrite)?;
        info!(
            serial = root.serial(),
            path = %path.display(),
            secret = include_secret,
            "Exported root certificate"
        );
        Ok(())
    }

    pub fn root_import(&self, path: &Path) -> Result<CertificateRecord> {
        let record = read_certificate(path)?;
        if !record.is_root() {
            return Err(AuthorityError::NotARoot(record.serial()));
        }
        self.mutate(|store| Ok(store.import(record.clone())?))?;
        info!(
            serial = record.serial(),
            name = %record.name(),
            owned = record.is_owned(),
            "Imported root certificate"
        );
        Ok(record)
    }

    // =========================================================================
    // Signing and encryption certificates
    // =========================================================================

    pub fn signing_generate(
        &self,
        name: &str,
        parent_serial: u64,
        flags: CapabilityFlags,
    ) -> Result<CertificateRecord> {
        let record = self.mutate(|store| Ok(store.issue(name, parent_serial, flags)?))?;
        info!(
            serial = record.serial(),
            parent_serial,
            name = %name,
            flags = %flags,
            "Generated signing certificate"
        );
        Ok(record)
    }

    /// Non-root signing certificates, ordered by serial
    pub fn signing_show(&self) -> Vec<CertificateRecord> {
        self.list(CertificateFamily::Signing)
    }

    pub fn signing_export(
        &self,
        serial: u64,
        path: &Path,
        include_secret: bool,
        overwrite: bool,
    ) -> Result<()> {
        self.export_member(CertificateFamily::Signing, serial, path, include_secret, overwrite)
    }

    pub fn signing_import(&self, path: &Path) -> Result<CertificateRecord> {
        self.import_member(CertificateFamily::Signing, path)
    }

    pub fn signing_remove(&self, serial: u64) -> Result<CertificateRecord> {
        self.remove_member(CertificateFamily::Signing, serial)
    }

    /// Issue an encryption certificate under a `sign-certs` signing certificate
    pub fn encryption_generate(
        &self,
        name: &str,
        parent_serial: u64,
        flags: CapabilityFlags,
    ) -> Result<CertificateRecord> {
        let record =
            self.mutate(|store| Ok(store.issue_encryption(name, parent_serial, flags)?))?;
        info!(
            serial = record.serial(),
            parent_serial,
            name = %name,
            flags = %flags,
            kind = %record.kind(),
            "Generated encryption certificate"
        );
        Ok(record)
    }

    /// Encryption certificates, ordered by serial
    pub fn encryption_show(&self) -> Vec<CertificateRecord> {
        self.list(CertificateFamily::Encryption)
    }

    pub fn encryption_export(
        &self,
        serial: u64,
        path: &Path,
        include_secret: bool,
        overwrite: bool,
    ) -> Result<()> {
        self.export_member(CertificateFamily::Encryption, serial, path, include_secret, overwrite)
    }

    pub fn encryption_import(&self, path: &Path) -> Result<CertificateRecord> {
        self.import_member(CertificateFamily::Encryption, path)
    }

    pub fn encryption_remove(&self, serial: u64) -> Result<CertificateRecord> {
        self.remove_member(CertificateFamily::Encryption, serial)
    }

    fn list(&self, family: CertificateFamily) -> Vec<CertificateRecord> {
        self.store
            .all()
            .into_iter()
            .filter(|record| !record.is_root() && family.admits(record))
            .collect()
    }

    fn export_member(
        &self,
        family: CertificateFamily,
        serial: u64,
        path: &Path,
        include_secret: bool,
        overwrite: bool,
    ) -> Result<()> {
        let record = self.store.get(serial).ok_or(StoreError::NotFound(serial))?;
        family.check(&record)?;
        export(&record, path, include_secret, overwrite)?;
        info!(
            serial,
            family = family.label(),
            path = %path.display(),
            secret = include_secret,
            "Exported certificate"
        );
        Ok(())
    }

    fn import_member(&self, family: CertificateFamily, path: &Path) -> Result<CertificateRecord> {
        let record = read_certificate(path)?;
        if record.is_root() {
            return Err(AuthorityError::UnexpectedRoot(record.serial()));
        }
        family.check(&record)?;
        if let Err(e) = self.mutate(|store| Ok(store.import(record.clone())?)) {
            warn!(serial = record.serial(), error = %e, "Rejected certificate import");
            return Err(e);
        }
        info!(
            serial = record.serial(),
            family = family.label(),
            name = %record.name(),
            owned = record.is_owned(),
            "Imported certificate"
        );
        Ok(record)
    }

    fn remove_member(&self, family: CertificateFamily, serial: u64) -> Result<CertificateRecord> {
        let removed = self.mutate(|store| {
            let record = store.get(serial).ok_or(StoreError::NotFound(serial))?;
            family.check(&record)?;
            Ok(store.remove(serial)?)
        })?;
        info!(
            serial,
            family = family.label(),
            name = %removed.name(),
            "Removed certificate"
        );
        Ok(removed)
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    /// Sign `file` with certificate `serial`, writing a `.pqsig` to `signature_file`
    pub fn sign_file(
        &self,
        serial: u64,
        file: &Path,
        signature_file: &Path,
        overwrite: bool,
    ) -> Result<DetachedSignature> {
        let record = self.store.get(serial).ok_or(StoreError::NotFound(serial))?;
        let input = File::open(file).map_err(|e| AuthorityError::io(file, e))?;
        let signature =
            SignatureEngine::new(&self.store).sign_stream(&record, BufReader::new(input))?;
        write_file(signature_file, &signature.to_bytes(), overwrite, false)?;
        info!(
            serial,
            file = %file.display(),
            chunks = signature.chunks.len(),
            "Signed file"
        );
        Ok(signature)
    }

    /// Check a `.pqsig` against `file`; returns the signer
    pub fn verify_file_signature(
        &self,
        file: &Path,
        signature_file: &Path,
    ) -> Result<CertificateRecord> {
        let bytes = fs::read(signature_file).map_err(|e| AuthorityError::io(signature_file, e))?;
        let signature =
            DetachedSignature::from_bytes(&bytes).map_err(|source| AuthorityError::Malformed {
                path: signature_file.to_path_buf(),
                source,
            })?;
        let input = File::open(file).map_err(|e| AuthorityError::io(file, e))?;
        let signer =
            SignatureEngine::new(&self.store).verify_stream(&signature, BufReader::new(input))?;
        info!(
            serial = signer.serial(),
            file = %file.display(),
            "Verified file signature"
        );
        Ok(signer)
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Verify a signed command and check its signer may perform `access`
    pub fn authorize_command(
        &self,
        envelope: &SignedEnvelope,
        access: CommandAccess,
    ) -> Result<CertificateRecord> {
        let signer = SignatureEngine::new(&self.store).open(envelope)?;
        authorize(&signer, access)?;
        Ok(signer)
    }

    /// Check that the local operator certificate is trusted and may perform `access`
    pub fn authorize_operator(&self, serial: u64, access: CommandAccess) -> Result<CertificateRecord> {
        let operator = self.store.get(serial).ok_or(StoreError::NotFound(serial))?;
        if let Err(e) = ChainValidator::new(&self.store).validate(serial) {
            warn!(serial, error = %e, "Operator certificate untrusted");
            return Err(e.into());
        }
        authorize(&operator, access)?;
        Ok(operator)
    }
}

fn check_scheme(scheme: &dyn SignatureScheme, persisted: &PersistedStore) -> Result<()> {
    if persisted.scheme != scheme.kind() {
        return Err(StorageError::SchemeMismatch {
            expected: scheme.kind(),
            found: persisted.scheme,
        }
        .into());
    }
    Ok(())
}

fn read_certificate(path: &Path) -> Result<CertificateRecord> {
    let bytes = fs::read(path).map_err(|e| AuthorityError::io(path, e))?;
    codec::decode(&bytes).map_err(|source| AuthorityError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a `.pqcert`; files carrying a secret key are private to the owner
fn export(
    record: &CertificateRecord,
    path: &Path,
    include_secret: bool,
    overwrite: bool,
) -> Result<()> {
    let private = include_secret && record.is_owned();
    write_file(path, &codec::encode(record, include_secret), overwrite, private)
}

/// Write `bytes` to `path`, refusing to replace an existing file unless `overwrite`
fn write_file(path: &Path, bytes: &[u8], overwrite: bool, private: bool) -> Result<()> {
    write_atomic(path, bytes, overwrite, private).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => AuthorityError::FileExists(path.to_path_buf()),
        _ => AuthorityError::io(path, e),
    })
}
