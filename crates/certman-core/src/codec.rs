//! `.pqcert` binary encoding
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! u8   format version (1)
//! u64  serial
//! u32  public key length, then bytes
//! u8   secret key present (0/1) [u32 length, then bytes]
//! u8   parent present (0/1)     [u64 parent serial]
//! u32  capability flag bits
//! u32  name length, then UTF-8 bytes
//! u32  issuer signature length, then bytes
//! ```
//!
//! Encryption certificates use format version 2, which inserts one byte
//! after the version: the key agreement scheme id. Every later field is
//! laid out as in version 1.
//!
//! Decoding is strict: unknown versions, unknown flag bits, invalid presence
//! tags, short input and trailing bytes are all errors.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::certificate::{Certificate, CertificateKind, CertificateRecord};
use crate::crypto::{KemKind, PublicKey, SecretKey, Signature};
use crate::flags::CapabilityFlags;

/// `.pqcert` format version of signing certificates
pub const FORMAT_VERSION: u8 = 1;

/// `.pqcert` format version of encryption certificates
pub const ENCRYPTION_FORMAT_VERSION: u8 = 2;

/// Conventional file extension for exported certificates
pub const CERTIFICATE_EXTENSION: &str = "pqcert";

/// Errors produced while decoding binary certificate data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a field was complete
    #[error("truncated input")]
    TruncatedInput,

    /// Version tag is not one this build understands
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// Flag word has undefined bits set
    #[error("malformed capability flags {0:#010x}")]
    MalformedFlags(u32),

    /// Encryption certificate names a key agreement scheme id this build does not know
    #[error("unknown key agreement scheme id {0}")]
    UnknownKeyAgreement(u8),

    /// Presence byte was neither 0 nor 1
    #[error("invalid presence tag {0}")]
    InvalidPresenceTag(u8),

    /// Name is not valid UTF-8
    #[error("certificate name is not valid UTF-8")]
    InvalidName,

    /// Input continues after the last field
    #[error("{0} trailing bytes after certificate")]
    TrailingBytes(usize),
}

/// Encode a record
///
/// With `include_secret == false` the secret key field collapses to a single
/// zero presence byte, so a public export carries no key bytes and no padding.
pub fn encode(record: &CertificateRecord, include_secret: bool) -> Vec<u8> {
    let certificate = record.certificate();
    let secret = if include_secret { record.secret_key() } else { None };

    let mut buf = Vec::with_capacity(
        2 + 8
            + 4
            + certificate.public_key.len()
            + 1
            + secret.map_or(0, |s| 4 + s.len())
            + 9
            + 4
            + 4
            + certificate.name.len()
            + 4
            + certificate.signature.len(),
    );

    match certificate.kind {
        CertificateKind::Signing => buf.put_u8(FORMAT_VERSION),
        CertificateKind::Encryption(kem) => {
            buf.put_u8(ENCRYPTION_FORMAT_VERSION);
            buf.put_u8(kem.code());
        }
    }
    buf.put_u64(certificate.serial);
    put_len_prefixed(&mut buf, certificate.public_key.as_bytes());
    match secret {
        Some(secret) => {
            buf.put_u8(1);
            put_len_prefixed(&mut buf, secret.as_bytes());
        }
        None => buf.put_u8(0),
    }
    match certificate.parent_serial {
        Some(parent) => {
            buf.put_u8(1);
            buf.put_u64(parent);
        }
        None => buf.put_u8(0),
    }
    buf.put_u32(certificate.flags.bits());
    put_len_prefixed(&mut buf, certificate.name.as_bytes());
    put_len_prefixed(&mut buf, certificate.signature.as_bytes());
    buf
}

/// Decode a record, rejecting anything but an exact, well-formed encoding
pub fn decode(input: &[u8]) -> Result<CertificateRecord, CodecError> {
    let mut reader = ByteReader::new(input);

    let kind = match reader.u8()? {
        FORMAT_VERSION => CertificateKind::Signing,
        ENCRYPTION_FORMAT_VERSION => {
            let code = reader.u8()?;
            let kem = KemKind::from_code(code).ok_or(CodecError::UnknownKeyAgreement(code))?;
            CertificateKind::Encryption(kem)
        }
        version => return Err(CodecError::UnsupportedVersion(version)),
    };

    let serial = reader.u64()?;
    let public_key = PublicKey::new(reader.len_prefixed()?.to_vec());
    let secret_key = if reader.presence()? {
        Some(SecretKey::new(reader.len_prefixed()?.to_vec()))
    } else {
        None
    };
    let parent_serial = if reader.presence()? {
        Some(reader.u64()?)
    } else {
        None
    };
    let bits = reader.u32()?;
    let flags = CapabilityFlags::from_bits(bits).ok_or(CodecError::MalformedFlags(bits))?;
    let name = std::str::from_utf8(reader.len_prefixed()?)
        .map_err(|_| CodecError::InvalidName)?
        .to_string();
    let signature = Signature::new(reader.len_prefixed()?.to_vec());
    reader.finish()?;

    let certificate = Certificate {
        serial,
        kind,
        public_key,
        parent_serial,
        flags,
        name,
        signature,
    };

    Ok(match secret_key {
        Some(secret_key) => CertificateRecord::owned(certificate, secret_key),
        None => CertificateRecord::public(certificate),
    })
}

/// Append a `u32` length followed by the bytes
pub fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Bounds-checked big-endian reader shared by the binary formats
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            Err(CodecError::TruncatedInput)
        } else {
            Ok(())
        }
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a `u32` length and that many bytes
    pub fn len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Read a 0/1 presence byte
    pub fn presence(&mut self) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidPresenceTag(tag)),
        }
    }

    /// Require that the input is fully consumed
    pub fn finish(self) -> Result<(), CodecError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateBuilder;
    use crate::crypto::{Ed25519Scheme, KeyAgreementScheme, SignatureScheme, X25519Scheme};
    use crate::flags::CapabilityFlag;

    fn sample_record() -> CertificateRecord {
        let scheme = Ed25519Scheme;
        let (_, root_secret) = scheme.generate_keypair();
        let (public, secret) = scheme.generate_keypair();

        let certificate = CertificateBuilder::new(1, public)
            .name("example.com")
            .parent(0)
            .flags(CapabilityFlags::from([
                CapabilityFlag::ServerCert,
                CapabilityFlag::SignCerts,
                CapabilityFlag::SignMessages,
            ]))
            .sign(&scheme, &root_secret)
            .unwrap();
        CertificateRecord::owned(certificate, secret)
    }

    #[test]
    fn test_roundtrip_with_secret() {
        let record = sample_record();
        let decoded = decode(&encode(&record, true)).unwrap();

        assert_eq!(decoded, record);
        assert!(decoded.is_owned());
    }

    #[test]
    fn test_roundtrip_without_secret() {
        let record = sample_record();
        let decoded = decode(&encode(&record, false)).unwrap();

        assert_eq!(decoded, record.to_public());
        assert!(decoded.secret_key().is_none());
    }

    #[test]
    fn test_public_export_omits_key_bytes_entirely() {
        let record = sample_record();
        let secret_len = record.secret_key().unwrap().len();

        let with_secret = encode(&record, true);
        let without_secret = encode(&record, false);

        assert_eq!(with_secret.len() - without_secret.len(), 4 + secret_len);
    }

    #[test]
    fn test_root_layout() {
        let certificate = CertificateBuilder::new(0, PublicKey::new(vec![0xAB; 2]))
            .name("r")
            .flags(CapabilityFlags::from([CapabilityFlag::SignCerts]))
            .unsigned();
        let bytes = encode(&CertificateRecord::public(certificate), true);

        let expected: Vec<u8> = [
            &[FORMAT_VERSION][..],
            &0u64.to_be_bytes(),
            &2u32.to_be_bytes(),
            &[0xAB, 0xAB],
            &[0],
            &[0],
            &(1u32 << 4).to_be_bytes(),
            &1u32.to_be_bytes(),
            b"r",
            &0u32.to_be_bytes(),
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = encode(&sample_record(), true);

        for len in 0..bytes.len() {
            assert_eq!(decode(&bytes[..len]), Err(CodecError::TruncatedInput), "len {}", len);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample_record(), false);
        bytes.extend_from_slice(&[0, 0]);

        assert_eq!(decode(&bytes), Err(CodecError::TrailingBytes(2)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = encode(&sample_record(), false);
        bytes[0] = 3;

        assert_eq!(decode(&bytes), Err(CodecError::UnsupportedVersion(3)));
    }

    #[test]
    fn test_encryption_certificate_layout() {
        let scheme = Ed25519Scheme;
        let (_, issuer_secret) = scheme.generate_keypair();
        let (public, secret) = X25519Scheme.generate_keypair();
        let certificate = CertificateBuilder::new(4, public)
            .kind(CertificateKind::Encryption(KemKind::X25519))
            .name("inbox")
            .parent(1)
            .flags(CapabilityFlags::from([CapabilityFlag::ClientCert]))
            .sign(&scheme, &issuer_secret)
            .unwrap();
        let record = CertificateRecord::owned(certificate, secret);

        let bytes = encode(&record, true);

        assert_eq!(bytes[0], ENCRYPTION_FORMAT_VERSION);
        assert_eq!(bytes[1], KemKind::X25519.code());
        assert_eq!(&bytes[2..10], &4u64.to_be_bytes());
        assert_eq!(decode(&bytes).unwrap(), record);
        assert_eq!(decode(&encode(&record, false)).unwrap(), record.to_public());
    }

    #[test]
    fn test_unknown_key_agreement_rejected() {
        let certificate = CertificateBuilder::new(2, PublicKey::new(vec![1]))
            .kind(CertificateKind::Encryption(KemKind::X25519))
            .parent(0)
            .unsigned();
        let mut bytes = encode(&CertificateRecord::public(certificate), false);
        bytes[1] = 0xEE;

        assert_eq!(decode(&bytes), Err(CodecError::UnknownKeyAgreement(0xEE)));
        assert_eq!(decode(&bytes[..1]), Err(CodecError::TruncatedInput));
    }

    #[test]
    fn test_unknown_flag_bit_rejected() {
        let certificate = CertificateBuilder::new(0, PublicKey::new(vec![1]))
            .name("x")
            .unsigned();
        let mut bytes = encode(&CertificateRecord::public(certificate), false);
        // version + serial + (len + 1 key byte) + secret tag + parent tag
        let flags_at = 1 + 8 + 4 + 1 + 1 + 1;
        bytes[flags_at..flags_at + 4].copy_from_slice(&(1u32 << 12).to_be_bytes());

        assert_eq!(decode(&bytes), Err(CodecError::MalformedFlags(1 << 12)));
    }

    #[test]
    fn test_invalid_presence_tag_rejected() {
        let certificate = CertificateBuilder::new(0, PublicKey::new(vec![1]))
            .name("x")
            .unsigned();
        let mut bytes = encode(&CertificateRecord::public(certificate), false);
        bytes[1 + 8 + 4 + 1] = 7;

        assert_eq!(decode(&bytes), Err(CodecError::InvalidPresenceTag(7)));
    }

    #[test]
    fn test_invalid_utf8_name_rejected() {
        let certificate = CertificateBuilder::new(0, PublicKey::new(vec![1]))
            .name("ab")
            .unsigned();
        let mut bytes = encode(&CertificateRecord::public(certificate), false);
        let name_at = 1 + 8 + 4 + 1 + 1 + 1 + 4 + 4;
        bytes[name_at] = 0xFF;

        assert_eq!(decode(&bytes), Err(CodecError::InvalidName));
    }
}
