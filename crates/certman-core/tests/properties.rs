//! Property-Based Tests for certificate encoding and trust rules
//!
//! These tests check, for arbitrary inputs:
//! 1. CODEC: every record survives `.pqcert` encoding, with or without its secret
//! 2. FLAGS: flag lists are order- and duplicate-insensitive; unknown bits never decode
//! 3. CHAINS: issued chains of any depth validate; a missing `sign-certs` anywhere breaks them
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use std::sync::Arc;

use certman_core::codec::{decode, encode};
use certman_core::{
    CapabilityFlag, CapabilityFlags, CertificateBuilder, CertificateKind, CertificateRecord,
    CertificateStore, ChainError, ChainValidator, CodecError, Ed25519Scheme, KemKind, PublicKey,
    SecretKey, Signature, SignatureEngine, SignatureError,
};
use proptest::prelude::*;

fn arb_flags() -> impl Strategy<Value = CapabilityFlags> {
    proptest::sample::subsequence(CapabilityFlag::ALL.to_vec(), 0..=CapabilityFlag::ALL.len())
        .prop_map(|flags| flags.into_iter().collect())
}

fn arb_kind() -> impl Strategy<Value = CertificateKind> {
    prop_oneof![
        Just(CertificateKind::Signing),
        Just(CertificateKind::Encryption(KemKind::X25519)),
        Just(CertificateKind::Encryption(KemKind::Kyber1024)),
    ]
}

fn arb_record() -> impl Strategy<Value = CertificateRecord> {
    (
        arb_kind(),
        any::<u64>(),
        proptest::collection::vec(any::<u8>(), 0..64),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
        proptest::option::of(any::<u64>()),
        arb_flags(),
        ".{0,24}",
        proptest::collection::vec(any::<u8>(), 0..96),
    )
        .prop_map(|(kind, serial, public, secret, parent, flags, name, signature)| {
            let mut builder = CertificateBuilder::new(serial, PublicKey::new(public))
                .kind(kind)
                .name(name)
                .flags(flags);
            if let Some(parent) = parent {
                builder = builder.parent(parent);
            }
            let mut certificate = builder.unsigned();
            certificate.signature = Signature::new(signature);
            match secret {
                Some(secret) => CertificateRecord::owned(certificate, SecretKey::new(secret)),
                None => CertificateRecord::public(certificate),
            }
        })
}

// =============================================================================
// CODEC
// =============================================================================

proptest! {
    /// Encoding with the secret and decoding gives back the same record
    #[test]
    fn prop_codec_roundtrip_with_secret(record in arb_record()) {
        let decoded = decode(&encode(&record, true)).expect("decode should succeed");
        prop_assert_eq!(decoded, record);
    }

    /// Encoding without the secret yields the public copy
    #[test]
    fn prop_codec_roundtrip_public(record in arb_record()) {
        let decoded = decode(&encode(&record, false)).expect("decode should succeed");
        prop_assert!(!decoded.is_owned());
        prop_assert_eq!(decoded, record.to_public());
    }

    /// No strict prefix of a valid encoding decodes
    #[test]
    fn prop_codec_prefixes_are_truncated(record in arb_record(), cut in any::<prop::sample::Index>()) {
        let bytes = encode(&record, true);
        let len = cut.index(bytes.len());
        prop_assert_eq!(decode(&bytes[..len]), Err(CodecError::TruncatedInput));
    }

    /// Arbitrary bytes never panic the decoder
    #[test]
    fn prop_codec_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
    }
}

// =============================================================================
// FLAGS
// =============================================================================

proptest! {
    /// Order and repetition of tokens do not matter
    #[test]
    fn prop_flag_list_is_a_set(
        tokens in proptest::collection::vec(proptest::sample::select(CapabilityFlag::ALL.to_vec()), 0..16),
    ) {
        let forward: Vec<&str> = tokens.iter().map(|f| f.token()).collect();
        let mut backward = forward.clone();
        backward.reverse();

        let a = CapabilityFlags::parse_list(&forward.join(",")).unwrap();
        let b = CapabilityFlags::parse_list(&backward.join(",")).unwrap();

        prop_assert_eq!(a, b);
        for flag in &tokens {
            prop_assert!(a.contains(*flag));
        }
        prop_assert_eq!(CapabilityFlags::parse_list(&a.to_string()).unwrap(), a);
    }

    /// Any bit outside the defined set is rejected
    #[test]
    fn prop_unknown_bits_never_decode(bits in any::<u32>()) {
        let known = bits & !CapabilityFlags::KNOWN_BITS == 0;
        prop_assert_eq!(CapabilityFlags::from_bits(bits).is_some(), known);
    }
}

// =============================================================================
// CHAINS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A chain of intermediates of any depth validates and its leaf can sign
    #[test]
    fn prop_issued_chains_validate(depth in 0..6usize) {
        let store = CertificateStore::new(Arc::new(Ed25519Scheme));
        store.put_root("root").unwrap();

        let mut parent = 0;
        for i in 0..depth {
            parent = store
                .issue(&format!("intermediate-{}", i), parent, CapabilityFlags::from([CapabilityFlag::SignCerts]))
                .unwrap()
                .serial();
        }
        let leaf = store
            .issue("leaf", parent, CapabilityFlags::from([CapabilityFlag::SignMessages]))
            .unwrap();

        prop_assert_eq!(ChainValidator::new(&store).validate(leaf.serial()), Ok(()));

        let engine = SignatureEngine::new(&store);
        let signature = engine.sign(&leaf, b"payload").unwrap();
        prop_assert!(engine.verify(&leaf, b"payload", &signature).is_ok());
    }

    /// Stripping `sign-certs` from any ancestor makes the leaf untrusted
    #[test]
    fn prop_ancestor_without_sign_certs_is_untrusted(depth in 1..5usize, weak in any::<prop::sample::Index>()) {
        let source = CertificateStore::new(Arc::new(Ed25519Scheme));
        source.put_root("root").unwrap();
        let mut parent = 0;
        for i in 0..depth {
            parent = source
                .issue(&format!("intermediate-{}", i), parent, CapabilityFlags::from([CapabilityFlag::SignCerts]))
                .unwrap()
                .serial();
        }
        let leaf = source
            .issue("leaf", parent, CapabilityFlags::from([CapabilityFlag::SignMessages]))
            .unwrap();
        let signature = SignatureEngine::new(&source).sign(&leaf, b"payload").unwrap();

        let weak_serial = 1 + weak.index(depth) as u64;
        let mut snapshot = source.snapshot();
        for record in &mut snapshot.records {
            if record.serial() == weak_serial {
                let mut certificate = record.certificate().clone();
                certificate.flags.remove(CapabilityFlag::SignCerts);
                *record = CertificateRecord::public(certificate);
            }
        }
        let store = CertificateStore::restore(Arc::new(Ed25519Scheme), snapshot).unwrap();

        let result = SignatureEngine::new(&store).verify(&leaf, b"payload", &signature);
        prop_assert!(matches!(
            result,
            Err(SignatureError::UntrustedCertificate(ChainError::MissingCapability(s))) if s == weak_serial
        ));
    }
}
