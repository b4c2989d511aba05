//! Certificate records
//!
//! A certificate binds a public key to a serial, a name and a set of
//! capabilities, and carries its issuer's signature over those fields. The
//! parent relationship is a serial reference resolved through the store;
//! records never hold handles to each other.
//!
//! Records come in two shapes:
//!
//! - [`CertificateRecord::Owned`]: the certificate together with its secret
//!   key, as held by the party that generated it
//! - [`CertificateRecord::Public`]: the certificate alone, as handed to
//!   other parties for verification
//!
//! Both expose the same read accessors; only the owned shape can sign.
//!
//! Orthogonal to the shape, a certificate's [`CertificateKind`] says what
//! its key is for: a signing certificate carries a signature key, an
//! encryption certificate carries a key agreement key and never signs.

use std::fmt;

use bytes::BufMut;

use crate::crypto::{CryptoError, KemKind, PublicKey, SecretKey, Signature, SignatureScheme};
use crate::flags::{CapabilityFlag, CapabilityFlags};

/// Domain separation tag prepended to the signed bytes of a signing certificate
const TBS_TAG: &[u8] = b"certman/certificate/v1";

/// Tag for encryption certificates, followed by the key agreement scheme id
const ENCRYPTION_TBS_TAG: &[u8] = b"certman/encryption-certificate/v1";

/// What a certificate's public key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CertificateKind {
    /// Signature key under the store's signature scheme
    #[default]
    Signing,
    /// Key agreement key under the given scheme
    Encryption(KemKind),
}

impl CertificateKind {
    pub fn is_signing(self) -> bool {
        self == CertificateKind::Signing
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateKind::Signing => f.write_str("signing"),
            CertificateKind::Encryption(kem) => write!(f, "encryption ({})", kem),
        }
    }
}

/// The public part of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Store-unique serial
    pub serial: u64,

    /// Signing or encryption key
    pub kind: CertificateKind,

    /// Verification key
    pub public_key: PublicKey,

    /// Issuer serial, `None` for the root
    pub parent_serial: Option<u64>,

    /// Capabilities granted to the holder
    pub flags: CapabilityFlags,

    /// Human-readable name, not required to be unique
    pub name: String,

    /// Issuer signature over [`Certificate::tbs_bytes`]
    ///
    /// The root signs itself; every other certificate is signed by its parent.
    pub signature: Signature,
}

impl Certificate {
    /// Check if this is a root certificate
    pub fn is_root(&self) -> bool {
        self.parent_serial.is_none()
    }

    pub fn has_flag(&self, flag: CapabilityFlag) -> bool {
        self.flags.contains(flag)
    }

    /// Whether this certificate may issue other certificates
    pub fn can_issue(&self) -> bool {
        self.kind.is_signing() && self.has_flag(CapabilityFlag::SignCerts)
    }

    /// Bytes covered by the issuer signature
    ///
    /// Everything except the signature itself. Secret keys are never part
    /// of a certificate body.
    pub fn tbs_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            ENCRYPTION_TBS_TAG.len() + 1 + 8 + 4 + self.public_key.len() + 9 + 4 + 4
                + self.name.len(),
        );
        match self.kind {
            CertificateKind::Signing => buf.put_slice(TBS_TAG),
            CertificateKind::Encryption(kem) => {
                buf.put_slice(ENCRYPTION_TBS_TAG);
                buf.put_u8(kem.code());
            }
        }
        buf.put_u64(self.serial);
        buf.put_u32(self.public_key.len() as u32);
        buf.put_slice(self.public_key.as_bytes());
        match self.parent_serial {
            Some(parent) => {
                buf.put_u8(1);
                buf.put_u64(parent);
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(self.flags.bits());
        buf.put_u32(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf
    }
}

/// Builder for certificate bodies
///
/// # Example
///
/// ```ignore
/// let certificate = CertificateBuilder::new(1, public_key)
///     .name("deploy-signer")
///     .parent(0)
///     .flags(CapabilityFlags::from([CapabilityFlag::SignMessages]))
///     .sign(scheme.as_ref(), &root_secret)?;
/// ```
#[derive(Debug)]
pub struct CertificateBuilder {
    serial: u64,
    kind: CertificateKind,
    public_key: PublicKey,
    parent_serial: Option<u64>,
    flags: CapabilityFlags,
    name: String,
}

impl CertificateBuilder {
    pub fn new(serial: u64, public_key: PublicKey) -> Self {
        Self {
            serial,
            kind: CertificateKind::Signing,
            public_key,
            parent_serial: None,
            flags: CapabilityFlags::empty(),
            name: String::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Defaults to [`CertificateKind::Signing`]
    pub fn kind(mut self, kind: CertificateKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the issuer serial; leave unset for a root
    pub fn parent(mut self, parent_serial: u64) -> Self {
        self.parent_serial = Some(parent_serial);
        self
    }

    pub fn flags(mut self, flags: CapabilityFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sign the body with the issuer's secret key
    pub fn sign(
        self,
        scheme: &dyn SignatureScheme,
        issuer_secret: &SecretKey,
    ) -> Result<Certificate, CryptoError> {
        let mut certificate = self.unsigned();
        certificate.signature = scheme.sign(issuer_secret, &certificate.tbs_bytes())?;
        Ok(certificate)
    }

    /// Build with an empty signature
    ///
    /// Such a certificate never validates; useful for fixtures and for
    /// bodies that are signed later.
    pub fn unsigned(self) -> Certificate {
        Certificate {
            serial: self.serial,
            kind: self.kind,
            public_key: self.public_key,
            parent_serial: self.parent_serial,
            flags: self.flags,
            name: self.name,
            signature: Signature::new(Vec::new()),
        }
    }
}

/// A certificate as held in a store or exchanged in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateRecord {
    /// Certificate plus its secret key
    Owned {
        certificate: Certificate,
        secret_key: SecretKey,
    },
    /// Verification-only copy
    Public(Certificate),
}

impl CertificateRecord {
    pub fn owned(certificate: Certificate, secret_key: SecretKey) -> Self {
        CertificateRecord::Owned {
            certificate,
            secret_key,
        }
    }

    pub fn public(certificate: Certificate) -> Self {
        CertificateRecord::Public(certificate)
    }

    pub fn certificate(&self) -> &Certificate {
        match self {
            CertificateRecord::Owned { certificate, .. } => certificate,
            CertificateRecord::Public(certificate) => certificate,
        }
    }

    pub fn into_certificate(self) -> Certificate {
        match self {
            CertificateRecord::Owned { certificate, .. } => certificate,
            CertificateRecord::Public(certificate) => certificate,
        }
    }

    /// Secret key, if this side owns the certificate
    pub fn secret_key(&self) -> Option<&SecretKey> {
        match self {
            CertificateRecord::Owned { secret_key, .. } => Some(secret_key),
            CertificateRecord::Public(_) => None,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, CertificateRecord::Owned { .. })
    }

    /// Copy without the secret key
    pub fn to_public(&self) -> CertificateRecord {
        CertificateRecord::Public(self.certificate().clone())
    }

    pub fn serial(&self) -> u64 {
        self.certificate().serial
    }

    pub fn name(&self) -> &str {
        &self.certificate().name
    }

    pub fn kind(&self) -> CertificateKind {
        self.certificate().kind
    }

    pub fn is_encryption(&self) -> bool {
        !self.kind().is_signing()
    }

    pub fn flags(&self) -> CapabilityFlags {
        self.certificate().flags
    }

    pub fn has_flag(&self, flag: CapabilityFlag) -> bool {
        self.certificate().has_flag(flag)
    }

    pub fn parent_serial(&self) -> Option<u64> {
        self.certificate().parent_serial
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.certificate().public_key
    }

    pub fn signature(&self) -> &Signature {
        &self.certificate().signature
    }

    pub fn is_root(&self) -> bool {
        self.certificate().is_root()
    }
}

impl From<Certificate> for CertificateRecord {
    fn from(certificate: Certificate) -> Self {
        CertificateRecord::Public(certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Scheme;

    #[test]
    fn test_root_is_self_signed() {
        let scheme = Ed25519Scheme;
        let (public, secret) = scheme.generate_keypair();

        let root = CertificateBuilder::new(0, public.clone())
            .name("example.com")
            .flags(CapabilityFlags::from([CapabilityFlag::SignCerts]))
            .sign(&scheme, &secret)
            .unwrap();

        assert!(root.is_root());
        assert!(scheme.verify(&public, &root.tbs_bytes(), &root.signature));
    }

    #[test]
    fn test_tbs_bytes_cover_every_field() {
        let base = CertificateBuilder::new(3, PublicKey::new(vec![1; 32]))
            .name("signer")
            .parent(0)
            .flags(CapabilityFlags::from([CapabilityFlag::SignMessages]))
            .unsigned();

        let mut renamed = base.clone();
        renamed.name = "signer2".into();
        let mut reflagged = base.clone();
        reflagged.flags.insert(CapabilityFlag::SignCerts);
        let mut reparented = base.clone();
        reparented.parent_serial = Some(1);
        let mut reserialed = base.clone();
        reserialed.serial = 4;
        let mut rekinded = base.clone();
        rekinded.kind = CertificateKind::Encryption(KemKind::X25519);

        for altered in [renamed, reflagged, reparented, reserialed, rekinded] {
            assert_ne!(altered.tbs_bytes(), base.tbs_bytes());
        }
    }

    #[test]
    fn test_tbs_bytes_ignore_signature() {
        let mut certificate = CertificateBuilder::new(1, PublicKey::new(vec![2; 32])).unsigned();
        let before = certificate.tbs_bytes();
        certificate.signature = Signature::new(vec![9; 64]);

        assert_eq!(before, certificate.tbs_bytes());
    }

    #[test]
    fn test_key_agreement_scheme_is_signed() {
        let base = CertificateBuilder::new(3, PublicKey::new(vec![1; 32]))
            .kind(CertificateKind::Encryption(KemKind::X25519))
            .parent(0)
            .unsigned();
        let mut other = base.clone();
        other.kind = CertificateKind::Encryption(KemKind::Kyber1024);

        assert_ne!(base.tbs_bytes(), other.tbs_bytes());
    }

    #[test]
    fn test_only_signing_certificates_issue() {
        let issuer = CertificateBuilder::new(1, PublicKey::new(vec![1; 32]))
            .parent(0)
            .flags(CapabilityFlags::from([CapabilityFlag::SignCerts]))
            .unsigned();
        let mut encryption = issuer.clone();
        encryption.kind = CertificateKind::Encryption(KemKind::X25519);

        assert!(issuer.can_issue());
        assert!(!encryption.can_issue());
    }

    #[test]
    fn test_record_accessors_and_to_public() {
        let scheme = Ed25519Scheme;
        let (public, secret) = scheme.generate_keypair();
        let certificate = CertificateBuilder::new(7, public)
            .name("ops")
            .parent(0)
            .flags(CapabilityFlags::from([CapabilityFlag::UserCert]))
            .unsigned();

        let owned = CertificateRecord::owned(certificate.clone(), secret);
        assert!(owned.is_owned());
        assert!(owned.secret_key().is_some());
        assert_eq!(owned.serial(), 7);
        assert_eq!(owned.name(), "ops");
        assert_eq!(owned.parent_serial(), Some(0));
        assert_eq!(owned.kind(), CertificateKind::Signing);
        assert!(!owned.is_encryption());
        assert!(owned.has_flag(CapabilityFlag::UserCert));

        let public = owned.to_public();
        assert!(!public.is_owned());
        assert!(public.secret_key().is_none());
        assert_eq!(public.certificate(), &certificate);
    }
}
