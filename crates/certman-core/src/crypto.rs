//! Signature and key agreement scheme abstractions
//!
//! The certificate engine treats key material as opaque bytes and delegates
//! every cryptographic operation to a [`SignatureScheme`] (signing
//! certificates) or a [`KeyAgreementScheme`] (encryption certificates).
//!
//! Signature schemes:
//! - `Ed25519Scheme`: Ed25519 via `ed25519-dalek` (default)
//! - `Falcon1024Scheme`: Falcon-1024 post-quantum signatures, behind the
//!   `falcon` cargo feature
//!
//! Key agreement schemes:
//! - `X25519Scheme`: X25519 via `x25519-dalek` (default)
//! - `Kyber1024Scheme`: Kyber-1024 post-quantum KEM, behind the `kyber`
//!   cargo feature
//!
//! Key types:
//! - `PublicKey`: verification or encapsulation key bytes
//! - `SecretKey`: signing or decapsulation key bytes, zeroized on drop
//! - `Signature`: detached signature bytes
//! - `SharedSecret`: agreed key bytes, zeroized on drop

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Errors raised by a signature scheme
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Secret key bytes are not valid for the scheme
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Public key bytes are not valid for the scheme
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encapsulated key does not decode for the scheme
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// Scheme name or id is not recognized
    #[error("unknown signature scheme: {0}")]
    UnknownScheme(String),

    /// Key agreement scheme name or id is not recognized
    #[error("unknown key agreement scheme: {0}")]
    UnknownKeyAgreement(String),

    /// Scheme exists but was not compiled in
    #[error("scheme '{0}' is not available in this build")]
    SchemeUnavailable(&'static str),
}

/// Public (verification) key bytes
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short, stable identifier for display: base64 of the first 9 bytes
    /// of the SHA-256 digest of the key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        URL_SAFE_NO_PAD.encode(&digest[..9])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

/// Secret (signing) key bytes
///
/// The buffer is wiped when dropped and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

/// Detached signature bytes
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// Key produced by key agreement
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([redacted])")
    }
}

/// An opaque signature primitive
///
/// Implementations must be deterministic in their encodings: the bytes
/// returned by `generate_keypair` and `sign` are what gets persisted and
/// exchanged in certificate files.
pub trait SignatureScheme: Send + Sync + fmt::Debug {
    /// Which scheme this is
    fn kind(&self) -> SchemeKind;

    /// Generate a fresh key pair
    fn generate_keypair(&self) -> (PublicKey, SecretKey);

    /// Sign a message with a secret key
    fn sign(&self, secret: &SecretKey, message: &[u8]) -> Result<Signature, CryptoError>;

    /// Verify a detached signature. Malformed keys or signatures verify as `false`.
    fn verify(&self, public: &PublicKey, message: &[u8], signature: &Signature) -> bool;

    /// Check that a secret key belongs to a public key
    fn keys_match(&self, public: &PublicKey, secret: &SecretKey) -> bool {
        const CHALLENGE: &[u8] = b"certman key-pair check";
        match self.sign(secret, CHALLENGE) {
            Ok(signature) => self.verify(public, CHALLENGE, &signature),
            Err(_) => false,
        }
    }
}

/// Identifiers for the supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeKind {
    Ed25519,
    Falcon1024,
}

impl SchemeKind {
    /// Stable numeric id used in persisted store files
    pub fn code(self) -> u8 {
        match self {
            SchemeKind::Ed25519 => 1,
            SchemeKind::Falcon1024 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SchemeKind::Ed25519),
            2 => Some(SchemeKind::Falcon1024),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SchemeKind::Ed25519 => "ed25519",
            SchemeKind::Falcon1024 => "falcon1024",
        }
    }

    /// Instantiate the scheme
    pub fn scheme(self) -> Result<Arc<dyn SignatureScheme>, CryptoError> {
        match self {
            SchemeKind::Ed25519 => Ok(Arc::new(Ed25519Scheme)),
            #[cfg(feature = "falcon")]
            SchemeKind::Falcon1024 => Ok(Arc::new(falcon::Falcon1024Scheme)),
            #[cfg(not(feature = "falcon"))]
            SchemeKind::Falcon1024 => Err(CryptoError::SchemeUnavailable(self.name())),
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchemeKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ed25519" => Ok(SchemeKind::Ed25519),
            "falcon1024" | "falcon-1024" => Ok(SchemeKind::Falcon1024),
            other => Err(CryptoError::UnknownScheme(other.to_string())),
        }
    }
}

/// An opaque key encapsulation primitive
///
/// Encryption certificates carry a public key of this kind. Whoever holds
/// the certificate can `encapsulate` to it; only the owner of the secret
/// key can `decapsulate`.
pub trait KeyAgreementScheme: Send + Sync + fmt::Debug {
    /// Which scheme this is
    fn kind(&self) -> KemKind;

    /// Generate a fresh key pair
    fn generate_keypair(&self) -> (PublicKey, SecretKey);

    /// Derive a fresh shared secret for `public`, along with the ciphertext
    /// its owner needs to recover it
    fn encapsulate(&self, public: &PublicKey) -> Result<(SharedSecret, Vec<u8>), CryptoError>;

    /// Recover the shared secret from a ciphertext
    fn decapsulate(&self, secret: &SecretKey, ciphertext: &[u8])
        -> Result<SharedSecret, CryptoError>;

    /// Check that a secret key belongs to a public key
    fn keys_match(&self, public: &PublicKey, secret: &SecretKey) -> bool {
        match self.encapsulate(public) {
            Ok((shared, ciphertext)) => self
                .decapsulate(secret, &ciphertext)
                .is_ok_and(|recovered| recovered == shared),
            Err(_) => false,
        }
    }
}

/// Identifiers for the supported key agreement schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KemKind {
    X25519,
    Kyber1024,
}

impl KemKind {
    /// Stable numeric id used in encryption certificate encodings
    pub fn code(self) -> u8 {
        match self {
            KemKind::X25519 => 1,
            KemKind::Kyber1024 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(KemKind::X25519),
            2 => Some(KemKind::Kyber1024),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KemKind::X25519 => "x25519",
            KemKind::Kyber1024 => "kyber1024",
        }
    }

    /// Instantiate the scheme
    pub fn scheme(self) -> Result<Arc<dyn KeyAgreementScheme>, CryptoError> {
        match self {
            KemKind::X25519 => Ok(Arc::new(X25519Scheme)),
            #[cfg(feature = "kyber")]
            KemKind::Kyber1024 => Ok(Arc::new(kyber::Kyber1024Scheme)),
            #[cfg(not(feature = "kyber"))]
            KemKind::Kyber1024 => Err(CryptoError::SchemeUnavailable(self.name())),
        }
    }
}

impl fmt::Display for KemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KemKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x25519" => Ok(KemKind::X25519),
            "kyber1024" | "kyber-1024" => Ok(KemKind::Kyber1024),
            other => Err(CryptoError::UnknownKeyAgreement(other.to_string())),
        }
    }
}

/// Ed25519 signatures (32-byte seeds, 32-byte public keys, 64-byte signatures)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Ed25519
    }

    fn generate_keypair(&self) -> (PublicKey, SecretKey) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKey::new(signing_key.verifying_key().to_bytes().to_vec());
        let secret = SecretKey::new(signing_key.to_bytes().to_vec());
        (public, secret)
    }

    fn sign(&self, secret: &SecretKey, message: &[u8]) -> Result<Signature, CryptoError> {
        use ed25519_dalek::Signer;

        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            secret.as_bytes().try_into().map_err(|_| {
                CryptoError::InvalidSecretKey(format!(
                    "expected 32 bytes, got {}",
                    secret.len()
                ))
            })?,
        );
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(Signature::new(signing_key.sign(message).to_bytes().to_vec()))
    }

    fn verify(&self, public: &PublicKey, message: &[u8], signature: &Signature) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public.as_bytes()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        verifying_key.verify_strict(message, &signature).is_ok()
    }
}

/// Tag mixed into every X25519 shared secret
const X25519_KDF_TAG: &[u8] = b"certman/x25519-kem/v1";

/// X25519 used as a KEM: the ciphertext is an ephemeral public key and the
/// shared secret is SHA-256 over the tag, the Diffie-Hellman output and
/// both public keys
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Scheme;

impl X25519Scheme {
    fn public_key(key: &[u8]) -> Option<X25519PublicKey> {
        let bytes: [u8; 32] = key.try_into().ok()?;
        Some(X25519PublicKey::from(bytes))
    }

    fn derive(
        shared: &x25519_dalek::SharedSecret,
        ephemeral: &X25519PublicKey,
        recipient: &X25519PublicKey,
    ) -> Result<SharedSecret, CryptoError> {
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey("low-order point".into()));
        }
        let mut hasher = Sha256::new();
        hasher.update(X25519_KDF_TAG);
        hasher.update(shared.as_bytes());
        hasher.update(ephemeral.as_bytes());
        hasher.update(recipient.as_bytes());
        Ok(SharedSecret::new(hasher.finalize().to_vec()))
    }
}

impl KeyAgreementScheme for X25519Scheme {
    fn kind(&self) -> KemKind {
        KemKind::X25519
    }

    fn generate_keypair(&self) -> (PublicKey, SecretKey) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        (
            PublicKey::new(public.as_bytes().to_vec()),
            SecretKey::new(secret.to_bytes().to_vec()),
        )
    }

    fn encapsulate(&self, public: &PublicKey) -> Result<(SharedSecret, Vec<u8>), CryptoError> {
        let recipient = Self::public_key(public.as_bytes()).ok_or_else(|| {
            CryptoError::InvalidPublicKey(format!("expected 32 bytes, got {}", public.len()))
        })?;
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient);
        let key = Self::derive(&shared, &ephemeral_public, &recipient)?;
        Ok((key, ephemeral_public.as_bytes().to_vec()))
    }

    fn decapsulate(
        &self,
        secret: &SecretKey,
        ciphertext: &[u8],
    ) -> Result<SharedSecret, CryptoError> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(secret.as_bytes().try_into().map_err(
            |_| CryptoError::InvalidSecretKey(format!("expected 32 bytes, got {}", secret.len())),
        )?);
        let secret = StaticSecret::from(*bytes);
        let ephemeral = Self::public_key(ciphertext).ok_or(CryptoError::InvalidCiphertext)?;
        let shared = secret.diffie_hellman(&ephemeral);
        Self::derive(&shared, &ephemeral, &X25519PublicKey::from(&secret))
    }
}

#[cfg(feature = "falcon")]
mod falcon {
    use super::{CryptoError, PublicKey, SchemeKind, SecretKey, Signature, SignatureScheme};
    use pqcrypto_falcon::falcon1024;
    use pqcrypto_traits::sign::{
        DetachedSignature as _, PublicKey as _, SecretKey as _,
    };

    /// Falcon-1024 post-quantum signatures
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Falcon1024Scheme;

    impl SignatureScheme for Falcon1024Scheme {
        fn kind(&self) -> SchemeKind {
            SchemeKind::Falcon1024
        }

        fn generate_keypair(&self) -> (PublicKey, SecretKey) {
            let (pk, sk) = falcon1024::keypair();
            (
                PublicKey::new(pk.as_bytes().to_vec()),
                SecretKey::new(sk.as_bytes().to_vec()),
            )
        }

        fn sign(&self, secret: &SecretKey, message: &[u8]) -> Result<Signature, CryptoError> {
            let sk = falcon1024::SecretKey::from_bytes(secret.as_bytes())
                .map_err(|e| CryptoError::InvalidSecretKey(format!("{:?}", e)))?;
            let signature = falcon1024::detached_sign(message, &sk);
            Ok(Signature::new(signature.as_bytes().to_vec()))
        }

        fn verify(&self, public: &PublicKey, message: &[u8], signature: &Signature) -> bool {
            let Ok(pk) = falcon1024::PublicKey::from_bytes(public.as_bytes()) else {
                return false;
            };
            let Ok(signature) = falcon1024::DetachedSignature::from_bytes(signature.as_bytes())
            else {
                return false;
            };
            falcon1024::verify_detached_signature(&signature, message, &pk).is_ok()
        }
    }
}

#[cfg(feature = "falcon")]
pub use falcon::Falcon1024Scheme;

#[cfg(feature = "kyber")]
mod kyber {
    use super::{CryptoError, KemKind, KeyAgreementScheme, PublicKey, SecretKey, SharedSecret};
    use pqcrypto_kyber::kyber1024;
    use pqcrypto_traits::kem::{
        Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
    };

    /// Kyber-1024 post-quantum key encapsulation
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Kyber1024Scheme;

    impl KeyAgreementScheme for Kyber1024Scheme {
        fn kind(&self) -> KemKind {
            KemKind::Kyber1024
        }

        fn generate_keypair(&self) -> (PublicKey, SecretKey) {
            let (pk, sk) = kyber1024::keypair();
            (
                PublicKey::new(pk.as_bytes().to_vec()),
                SecretKey::new(sk.as_bytes().to_vec()),
            )
        }

        fn encapsulate(
            &self,
            public: &PublicKey,
        ) -> Result<(SharedSecret, Vec<u8>), CryptoError> {
            let pk = kyber1024::PublicKey::from_bytes(public.as_bytes())
                .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;
            let (shared, ciphertext) = kyber1024::encapsulate(&pk);
            Ok((
                SharedSecret::new(shared.as_bytes().to_vec()),
                ciphertext.as_bytes().to_vec(),
            ))
        }

        fn decapsulate(
            &self,
            secret: &SecretKey,
            ciphertext: &[u8],
        ) -> Result<SharedSecret, CryptoError> {
            let sk = kyber1024::SecretKey::from_bytes(secret.as_bytes())
                .map_err(|e| CryptoError::InvalidSecretKey(format!("{:?}", e)))?;
            let ciphertext = kyber1024::Ciphertext::from_bytes(ciphertext)
                .map_err(|_| CryptoError::InvalidCiphertext)?;
            let shared = kyber1024::decapsulate(&ciphertext, &sk);
            Ok(SharedSecret::new(shared.as_bytes().to_vec()))
        }
    }
}

#[cfg(feature = "kyber")]
pub use kyber::Kyber1024Scheme;
