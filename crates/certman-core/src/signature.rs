//! Message signing and verification
//!
//! Signing is gated on capability: only records carrying `sign-messages`
//! and holding a secret key can sign. Verification is gated on trust: the
//! signer's chain is validated before any signature bytes are examined.
//!
//! Three shapes of signed data are supported:
//!
//! - raw payloads (`sign` / `verify`)
//! - command envelopes that name their signer (`seal` / `open`)
//! - streams such as files, signed in fixed-size chunks
//!   (`sign_stream` / `verify_stream`) into a [`DetachedSignature`]

use std::io::{self, Read};

use bytes::BufMut;
use thiserror::Error;
use tracing::warn;

use crate::certificate::CertificateRecord;
use crate::chain::{ChainError, ChainValidator};
use crate::codec::{put_len_prefixed, ByteReader, CodecError};
use crate::crypto::{CryptoError, SecretKey, Signature};
use crate::flags::CapabilityFlag;
use crate::store::CertificateStore;

/// Size of each independently signed stream chunk
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// `.pqsig` format version
pub const DETACHED_SIGNATURE_VERSION: u8 = 1;

/// Conventional file extension for detached signatures
pub const SIGNATURE_EXTENSION: &str = "pqsig";

const STREAM_TAG: &[u8] = b"certman/stream/v1";

/// Errors raised while signing or verifying
#[derive(Error, Debug)]
pub enum SignatureError {
    /// Record lacks `sign-messages`
    #[error("certificate {0} is not allowed to sign messages")]
    InsufficientCapability(u64),

    /// Record is a public-only copy
    #[error("no secret key held for certificate {0}")]
    MissingSecretKey(u64),

    /// Signer's chain does not validate
    #[error("certificate untrusted: {0}")]
    UntrustedCertificate(#[from] ChainError),

    /// Signature does not match the payload
    #[error("signature verification failed for certificate {0}")]
    VerificationFailed(u64),

    /// Signer serial is not in the store
    #[error("unknown signer: no such certificate {0}")]
    UnknownSigner(u64),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed signature file: {0}")]
    Malformed(#[from] CodecError),

    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SignatureError>;

/// A payload together with its signer and signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub signer_serial: u64,
    pub payload: Vec<u8>,
    pub signature: Signature,
}

/// Chunked signature over a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    pub signer_serial: u64,
    /// One signature per chunk, in stream order
    pub chunks: Vec<Signature>,
}

impl DetachedSignature {
    /// Encode as `.pqsig`: version, signer serial, chunk count, then each
    /// chunk signature length-prefixed
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + 8 + 4 + self.chunks.iter().map(|s| 4 + s.len()).sum::<usize>(),
        );
        buf.put_u8(DETACHED_SIGNATURE_VERSION);
        buf.put_u64(self.signer_serial);
        buf.put_u32(self.chunks.len() as u32);
        for chunk in &self.chunks {
            put_len_prefixed(&mut buf, chunk.as_bytes());
        }
        buf
    }

    pub fn from_bytes(input: &[u8]) -> std::result::Result<Self, CodecError> {
        let mut reader = ByteReader::new(input);
        let version = reader.u8()?;
        if version != DETACHED_SIGNATURE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let signer_serial = reader.u64()?;
        let count = reader.u32()? as usize;
        // every chunk costs at least its 4-byte length
        if count > reader.remaining() / 4 {
            return Err(CodecError::TruncatedInput);
        }
        let mut chunks = Vec::with_capacity(count);
        for _ in 0..count {
            chunks.push(Signature::new(reader.len_prefixed()?.to_vec()));
        }
        reader.finish()?;
        Ok(Self {
            signer_serial,
            chunks,
        })
    }
}

/// Signs and verifies on behalf of the certificates in a store
#[derive(Debug, Clone, Copy)]
pub struct SignatureEngine<'a> {
    store: &'a CertificateStore,
}

impl<'a> SignatureEngine<'a> {
    pub fn new(store: &'a CertificateStore) -> Self {
        Self { store }
    }

    fn signing_key_check(record: &CertificateRecord) -> Result<&SecretKey> {
        if !record.has_flag(CapabilityFlag::SignMessages) {
            return Err(SignatureError::InsufficientCapability(record.serial()));
        }
        record
            .secret_key()
            .ok_or(SignatureError::MissingSecretKey(record.serial()))
    }

    /// Check that `record` is trusted and allowed to sign messages
    fn trust_check(&self, record: &CertificateRecord) -> Result<()> {
        if let Err(e) = ChainValidator::new(self.store).validate_record(record) {
            warn!(serial = record.serial(), error = %e, "Rejected untrusted signer");
            return Err(SignatureError::UntrustedCertificate(e));
        }
        if !record.has_flag(CapabilityFlag::SignMessages) {
            warn!(serial = record.serial(), "Rejected signer without sign-messages");
            return Err(SignatureError::InsufficientCapability(record.serial()));
        }
        Ok(())
    }

    /// Sign a payload
    pub fn sign(&self, record: &CertificateRecord, payload: &[u8]) -> Result<Signature> {
        let secret = Self::signing_key_check(record)?;
        Ok(self.store.scheme().sign(secret, payload)?)
    }

    /// Verify a payload signature
    ///
    /// The signer's chain is validated first; an untrusted certificate is
    /// rejected without touching the signature.
    pub fn verify(
        &self,
        record: &CertificateRecord,
        payload: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        self.trust_check(record)?;
        if !self
            .store
            .scheme()
            .verify(record.public_key(), payload, signature)
        {
            warn!(serial = record.serial(), "Signature verification failed");
            return Err(SignatureError::VerificationFailed(record.serial()));
        }
        Ok(())
    }

    /// Sign a payload into an envelope naming the signer
    pub fn seal(&self, record: &CertificateRecord, payload: Vec<u8>) -> Result<SignedEnvelope> {
        let signature = self.sign(record, &payload)?;
        Ok(SignedEnvelope {
            signer_serial: record.serial(),
            payload,
            signature,
        })
    }

    /// Verify an envelope against the signer held in the store
    ///
    /// Returns the signer's record on success.
    pub fn open(&self, envelope: &SignedEnvelope) -> Result<CertificateRecord> {
        let signer = self.store.get(envelope.signer_serial).ok_or_else(|| {
            warn!(serial = envelope.signer_serial, "Envelope from unknown signer");
            SignatureError::UnknownSigner(envelope.signer_serial)
        })?;
        self.verify(&signer, &envelope.payload, &envelope.signature)?;
        Ok(signer)
    }

    /// Sign a stream chunk by chunk
    ///
    /// Each chunk signature covers the chunk index, whether it is the final
    /// chunk, and the chunk bytes, so chunks cannot be reordered, dropped or
    /// truncated away. Empty input yields a single empty final chunk.
    pub fn sign_stream<R: Read>(
        &self,
        record: &CertificateRecord,
        mut reader: R,
    ) -> Result<DetachedSignature> {
        let secret = Self::signing_key_check(record)?;
        let scheme = self.store.scheme();

        let mut chunks = Vec::new();
        let mut current = read_chunk(&mut reader)?;
        loop {
            let next = read_chunk(&mut reader)?;
            let last = next.is_empty();
            let message = chunk_message(chunks.len() as u64, last, &current);
            chunks.push(scheme.sign(secret, &message)?);
            if last {
                break;
            }
            current = next;
        }

        Ok(DetachedSignature {
            signer_serial: record.serial(),
            chunks,
        })
    }

    /// Verify a stream against a detached signature
    ///
    /// Returns the signer's record on success.
    pub fn verify_stream<R: Read>(
        &self,
        signature: &DetachedSignature,
        mut reader: R,
    ) -> Result<CertificateRecord> {
        let serial = signature.signer_serial;
        let signer = self
            .store
            .get(serial)
            .ok_or(SignatureError::UnknownSigner(serial))?;
        self.trust_check(&signer)?;
        let scheme = self.store.scheme();

        let mut current = read_chunk(&mut reader)?;
        let mut index = 0usize;
        loop {
            let next = read_chunk(&mut reader)?;
            let last = next.is_empty();
            let Some(chunk_signature) = signature.chunks.get(index) else {
                warn!(serial, index, "Stream longer than its signature");
                return Err(SignatureError::VerificationFailed(serial));
            };
            let message = chunk_message(index as u64, last, &current);
            if !scheme.verify(signer.public_key(), &message, chunk_signature) {
                warn!(serial, index, "Stream chunk signature mismatch");
                return Err(SignatureError::VerificationFailed(serial));
            }
            index += 1;
            if last {
                break;
            }
            current = next;
        }

        if index != signature.chunks.len() {
            warn!(serial, "Stream shorter than its signature");
            return Err(SignatureError::VerificationFailed(serial));
        }
        Ok(signer)
    }
}

fn chunk_message(index: u64, last: bool, chunk: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(STREAM_TAG.len() + 8 + 1 + chunk.len());
    message.put_slice(STREAM_TAG);
    message.put_u64(index);
    message.put_u8(u8::from(last));
    message.put_slice(chunk);
    message
}

/// Read up to one full chunk, short only at end of input
fn read_chunk<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(STREAM_CHUNK_SIZE);
    reader
        .by_ref()
        .take(STREAM_CHUNK_SIZE as u64)
        .read_to_end(&mut chunk)?;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Scheme;
    use crate::flags::CapabilityFlags;
    use std::io::Cursor;
    use std::sync::Arc;

    fn store_with_signer() -> (CertificateStore, CertificateRecord) {
        let store = CertificateStore::new(Arc::new(Ed25519Scheme));
        store.put_root("example.com").unwrap();
        let signer = store
            .issue("deploy", 0, CapabilityFlags::parse_list("sign-messages").unwrap())
            .unwrap();
        (store, signer)
    }

    #[test]
    fn test_sign_and_verify() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);

        let signature = engine.sign(&signer, b"certman/root/show").unwrap();

        engine.verify(&signer, b"certman/root/show", &signature).unwrap();
        engine.verify(&signer.to_public(), b"certman/root/show", &signature).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_payload() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);
        let signature = engine.sign(&signer, b"read").unwrap();

        assert!(matches!(
            engine.verify(&signer, b"write", &signature),
            Err(SignatureError::VerificationFailed(1))
        ));
    }

    #[test]
    fn test_sign_requires_sign_messages() {
        let (store, _) = store_with_signer();
        let user = store
            .issue("user", 0, CapabilityFlags::parse_list("user-cert").unwrap())
            .unwrap();

        assert!(matches!(
            SignatureEngine::new(&store).sign(&user, b"payload"),
            Err(SignatureError::InsufficientCapability(2))
        ));
    }

    #[test]
    fn test_sign_requires_secret_key() {
        let (store, signer) = store_with_signer();

        assert!(matches!(
            SignatureEngine::new(&store).sign(&signer.to_public(), b"payload"),
            Err(SignatureError::MissingSecretKey(1))
        ));
    }

    #[test]
    fn test_seal_and_open() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);

        let envelope = engine.seal(&signer, b"certman/signing/show".to_vec()).unwrap();
        let opened = engine.open(&envelope).unwrap();

        assert_eq!(opened, signer);
    }

    #[test]
    fn test_open_unknown_signer() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);
        let mut envelope = engine.seal(&signer, b"x".to_vec()).unwrap();
        envelope.signer_serial = 77;

        assert!(matches!(
            engine.open(&envelope),
            Err(SignatureError::UnknownSigner(77))
        ));
    }

    #[test]
    fn test_stream_roundtrip_across_chunk_boundaries() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);

        for len in [0, 1, STREAM_CHUNK_SIZE, STREAM_CHUNK_SIZE + 1, 3 * STREAM_CHUNK_SIZE] {
            let data = vec![0x5A; len];
            let signature = engine.sign_stream(&signer, Cursor::new(&data)).unwrap();
            let expected_chunks = len.div_ceil(STREAM_CHUNK_SIZE).max(1);

            assert_eq!(signature.chunks.len(), expected_chunks, "len {}", len);
            engine.verify_stream(&signature, Cursor::new(&data)).unwrap();
        }
    }

    #[test]
    fn test_stream_truncated_at_chunk_boundary_fails() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);
        let data = vec![1u8; 2 * STREAM_CHUNK_SIZE];
        let mut signature = engine.sign_stream(&signer, Cursor::new(&data)).unwrap();

        signature.chunks.truncate(1);
        let result = engine.verify_stream(&signature, Cursor::new(&data[..STREAM_CHUNK_SIZE]));

        assert!(matches!(result, Err(SignatureError::VerificationFailed(1))));
    }

    #[test]
    fn test_stream_modified_byte_fails() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);
        let mut data = vec![7u8; STREAM_CHUNK_SIZE + 10];
        let signature = engine.sign_stream(&signer, Cursor::new(&data)).unwrap();

        data[STREAM_CHUNK_SIZE + 3] ^= 1;

        assert!(matches!(
            engine.verify_stream(&signature, Cursor::new(&data)),
            Err(SignatureError::VerificationFailed(1))
        ));
    }

    #[test]
    fn test_detached_signature_encoding() {
        let (store, signer) = store_with_signer();
        let engine = SignatureEngine::new(&store);
        let signature = engine
            .sign_stream(&signer, Cursor::new(vec![3u8; STREAM_CHUNK_SIZE * 2]))
            .unwrap();

        let bytes = signature.to_bytes();
        assert_eq!(DetachedSignature::from_bytes(&bytes).unwrap(), signature);

        assert_eq!(
            DetachedSignature::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CodecError::TruncatedInput)
        );

        let mut huge_count = bytes.clone();
        huge_count[9..13].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(
            DetachedSignature::from_bytes(&huge_count),
            Err(CodecError::TruncatedInput)
        );
    }
}
