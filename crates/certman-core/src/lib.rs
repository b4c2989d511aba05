//! # Certman Core
//!
//! Certificate authority primitives for authorizing orchestration commands.
//! A broker and its peers accept a command only if it is signed by a
//! certificate that chains to a trusted root and carries the right
//! capabilities.
//!
//! ## Key Concepts
//!
//! - **Certificate**: a public key bound to a serial, a name and a set of
//!   capability flags, signed by its parent (the root signs itself). Signing
//!   certificates hold signature keys; encryption certificates hold key
//!   agreement keys and never sign
//! - **Store**: the single-root collection of certificates that allocates
//!   serials and enforces chain invariants
//! - **Chain validation**: parent links resolve, every issuer may sign
//!   certificates, every issuer signature verifies
//! - **Signature engine**: capability-gated signing, trust-gated verification
//! - **`.pqcert` / `.pqsig`**: binary exchange formats for certificates and
//!   detached file signatures
//!
//! ## Trust rules
//!
//! 1. A store holds exactly one root
//! 2. Only `sign-certs` holders may issue certificates
//! 3. Only `sign-messages` holders may sign commands
//! 4. `no-read` / `no-write` restrict what an accepted command may do

pub mod access;
pub mod certificate;
pub mod chain;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod flags;
pub mod signature;
pub mod store;

pub use access::{authorize, AccessError, CommandAccess};
pub use certificate::{Certificate, CertificateBuilder, CertificateKind, CertificateRecord};
pub use chain::{ChainError, ChainValidator};
pub use codec::CodecError;
pub use crypto::{
    CryptoError, Ed25519Scheme, KemKind, KeyAgreementScheme, PublicKey, SchemeKind, SecretKey,
    SharedSecret, Signature, SignatureScheme, X25519Scheme,
};
#[cfg(feature = "falcon")]
pub use crypto::Falcon1024Scheme;
#[cfg(feature = "kyber")]
pub use crypto::Kyber1024Scheme;
pub use error::{CertmanError, Result};
pub use flags::{CapabilityFlag, CapabilityFlags, FlagParseError};
pub use signature::{DetachedSignature, SignatureEngine, SignatureError, SignedEnvelope};
pub use store::{CertificateStore, StoreError, StoreSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
