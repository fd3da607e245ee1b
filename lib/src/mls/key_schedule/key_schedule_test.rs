use bytes::Bytes;
use hex_literal::hex;

use crate::mls::crypto::provider::RustCryptoProvider;
use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::ProtocolVersion;
use crate::mls::key_schedule::*;
use crate::mls::utilities::error::*;
use crate::mls::utilities::serde::{Deserializer, Serializer};

const CIPHER_SUITE: CipherSuite = CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

fn context(epoch: u64) -> GroupContext {
    GroupContext {
        version: ProtocolVersion::MLS10,
        cipher_suite: CIPHER_SUITE,
        group_id: Bytes::from_static(b"group"),
        epoch,
        tree_hash: Bytes::from_static(&[0x01; 32]),
        confirmed_transcript_hash: Bytes::from_static(&[0x02; 32]),
        extensions: Default::default(),
    }
}

#[test]
fn joiner_derives_the_committer_schedule() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let init_secret = Secret::new(vec![0x10; 32]);
    let commit_secret = Secret::new(vec![0x20; 32]);
    let psk_secret = Secret::new(vec![0x30; 32]);
    let context = context(1);

    let secrets = KeySchedule::next_epoch(
        &crypto_provider,
        &init_secret,
        &commit_secret,
        &context,
        &psk_secret,
    )?;
    let joined = KeySchedule::from_joiner_secret(
        &crypto_provider,
        &secrets.joiner_secret,
        &psk_secret,
        &context,
    )?;
    assert_eq!(joined, secrets.key_schedule);

    let welcome_secret = extract_welcome_secret(
        &crypto_provider,
        CIPHER_SUITE,
        &secrets.joiner_secret,
        &psk_secret,
    )?;
    assert_eq!(welcome_secret, secrets.welcome_secret);
    Ok(())
}

#[test]
fn group_context_wire_format() -> Result<()> {
    assert_eq!(
        context(1).serialize_detached()?.as_ref(),
        hex!(
            "0001 0001 05 67726f7570 0000000000000001"
            "20 0101010101010101010101010101010101010101010101010101010101010101"
            "20 0202020202020202020202020202020202020202020202020202020202020202"
            "00"
        )
    );
    Ok(())
}

#[test]
fn schedule_known_answer() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let secrets = KeySchedule::next_epoch(
        &crypto_provider,
        &Secret::new(vec![0x10; 32]),
        &Secret::new(vec![0x20; 32]),
        &context(1),
        &Secret::new(vec![0x30; 32]),
    )?;
    let schedule = &secrets.key_schedule;

    assert_eq!(
        secrets.joiner_secret.as_bytes(),
        hex!("0f524251d6af29996b7b2e5ba9c28b15e15cc1ec3c92112a217e92c73fa59c84")
    );
    assert_eq!(
        secrets.welcome_secret.as_bytes(),
        hex!("f95e5a5e1cdf7bf7aca885ad8fd6db8a1bc61a464013d30b88cff9d64dc458c8")
    );
    assert_eq!(
        schedule.epoch_secret.as_bytes(),
        hex!("9a8d4305f3f188069a59813f1025b910cb8586125b44ef36b75e5afffc86561b")
    );
    assert_eq!(
        schedule.sender_data_secret().as_bytes(),
        hex!("3d0ab1b946a8528c18f923b3872321701038ddc89b2e42b55005a8e77c44ade1")
    );
    assert_eq!(
        schedule.encryption_secret().as_bytes(),
        hex!("458b8947d4234bf189013e2adc724e1eda8825c8e8fcb2f197b7085d4782a3b0")
    );
    assert_eq!(
        schedule.exporter_secret.as_bytes(),
        hex!("0a1f5de5619b80823e2d302ec02801554006d4fad1f264ed57831f68388b5dd4")
    );
    assert_eq!(
        schedule.external_secret.as_bytes(),
        hex!("50dfe9ec1348cf855fb042d87585c01df90a8450aed7a6cb1f9401026e25f118")
    );
    assert_eq!(
        schedule.confirmation_key().as_bytes(),
        hex!("821cfdd2f4416f1ac2eef202c0dc9b42b69a6da420b6d15be38ca3f25c014d2d")
    );
    assert_eq!(
        schedule.membership_key().as_bytes(),
        hex!("9984a9ba34b9dd03e53a98d3fb51dce52412105329abfe5613471cb4e12fb893")
    );
    assert_eq!(
        schedule.resumption_psk().as_bytes(),
        hex!("3f5cdff01e11e0ecdefdd83755d59d6d0e8116210665037f214b4dbda90cf61f")
    );
    assert_eq!(
        schedule.epoch_authenticator().as_bytes(),
        hex!("c0a6cd3a016aaa2db631ae34c4fef7a8f039d85276da2a5a80f34855c9b3fda9")
    );
    assert_eq!(
        schedule.init_secret().as_bytes(),
        hex!("521ce5a938edcb52f7cdd5efc6edfe94aa3ddd1923f3baa5727ef3a87cd10b4e")
    );
    assert_eq!(
        schedule
            .mls_exporter(&crypto_provider, b"label", b"context", 32)?
            .as_bytes(),
        hex!("ebd1745e53802b15daaa8241335cae8e61160e195b916af760b643a06b62be5b")
    );
    Ok(())
}

#[test]
fn joiner_secret_is_bound_to_the_context() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let init_secret = Secret::new(vec![0x10; 32]);
    let commit_secret = Secret::zero(32);
    let psk_secret = Secret::zero(32);

    let pre_joiner = crypto_provider.extract(
        CIPHER_SUITE,
        init_secret.as_bytes(),
        commit_secret.as_bytes(),
    )?;
    let want = crypto_provider.expand_with_label(
        CIPHER_SUITE,
        pre_joiner.as_bytes(),
        b"joiner",
        &context(1).serialize_detached()?,
        32,
    )?;

    let secrets = KeySchedule::next_epoch(
        &crypto_provider,
        &init_secret,
        &commit_secret,
        &context(1),
        &psk_secret,
    )?;
    assert_eq!(secrets.joiner_secret, want);

    let other = KeySchedule::next_epoch(
        &crypto_provider,
        &init_secret,
        &commit_secret,
        &context(2),
        &psk_secret,
    )?;
    assert_ne!(other.joiner_secret, secrets.joiner_secret);
    Ok(())
}

#[test]
fn psk_secret_changes_every_epoch_secret() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let init_secret = Secret::new(vec![0x10; 32]);
    let commit_secret = Secret::new(vec![0x20; 32]);

    let without = KeySchedule::next_epoch(
        &crypto_provider,
        &init_secret,
        &commit_secret,
        &context(1),
        &Secret::zero(32),
    )?;
    let with = KeySchedule::next_epoch(
        &crypto_provider,
        &init_secret,
        &commit_secret,
        &context(1),
        &Secret::new(vec![0x30; 32]),
    )?;

    assert_eq!(without.joiner_secret, with.joiner_secret);
    assert_ne!(without.welcome_secret, with.welcome_secret);
    assert_ne!(
        without.key_schedule.epoch_authenticator(),
        with.key_schedule.epoch_authenticator()
    );
    assert_ne!(
        without.key_schedule.init_secret(),
        with.key_schedule.init_secret()
    );
    Ok(())
}

#[test]
fn epoch_secrets_use_their_labels() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let epoch_secret = Secret::new(vec![0x42; 32]);
    let schedule = KeySchedule::from_epoch_secret(&crypto_provider, CIPHER_SUITE, epoch_secret.clone())?;

    let derive = |label: &[u8]| {
        crypto_provider.derive_secret(CIPHER_SUITE, epoch_secret.as_bytes(), label)
    };
    assert_eq!(schedule.sender_data_secret(), &derive(b"sender data")?);
    assert_eq!(schedule.encryption_secret(), &derive(b"encryption")?);
    assert_eq!(schedule.confirmation_key(), &derive(b"confirm")?);
    assert_eq!(schedule.membership_key(), &derive(b"membership")?);
    assert_eq!(schedule.resumption_psk(), &derive(b"resumption")?);
    assert_eq!(schedule.epoch_authenticator(), &derive(b"authentication")?);
    assert_eq!(schedule.init_secret(), &derive(b"init")?);
    Ok(())
}

#[test]
fn exporter_depends_on_label_and_context() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let schedule = KeySchedule::from_epoch_secret(
        &crypto_provider,
        CIPHER_SUITE,
        Secret::new(vec![0x42; 32]),
    )?;

    let exported = schedule.mls_exporter(&crypto_provider, b"label", b"context", 16)?;
    assert_eq!(exported.as_bytes().len(), 16);
    assert_eq!(
        schedule.mls_exporter(&crypto_provider, b"label", b"context", 16)?,
        exported
    );
    assert_ne!(
        schedule.mls_exporter(&crypto_provider, b"other", b"context", 16)?,
        exported
    );
    assert_ne!(
        schedule.mls_exporter(&crypto_provider, b"label", b"other", 16)?,
        exported
    );
    Ok(())
}

#[test]
fn confirmation_tag_is_a_mac_over_the_transcript() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let schedule = KeySchedule::initial(&crypto_provider, CIPHER_SUITE)?;
    let confirmed = [0x55; 32];

    let tag = schedule.confirmation_tag(&crypto_provider, &confirmed)?;
    assert!(crypto_provider.verify_mac(
        CIPHER_SUITE,
        schedule.confirmation_key().as_bytes(),
        &confirmed,
        &tag
    )?);
    assert!(!crypto_provider.verify_mac(
        CIPHER_SUITE,
        schedule.confirmation_key().as_bytes(),
        &[0x56; 32],
        &tag
    )?);
    Ok(())
}

#[test]
fn initial_schedules_are_random() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let a = KeySchedule::initial(&crypto_provider, CIPHER_SUITE)?;
    let b = KeySchedule::initial(&crypto_provider, CIPHER_SUITE)?;
    assert_ne!(a.epoch_authenticator(), b.epoch_authenticator());
    Ok(())
}

#[test]
fn group_context_next_and_encoding() -> Result<()> {
    let current = context(3);
    let next = current.next(Bytes::from_static(&[0x07; 32]), Bytes::from_static(&[0x08; 32]));
    assert_eq!(next.epoch, 4);
    assert_eq!(next.group_id, current.group_id);
    assert_eq!(next.extensions, current.extensions);
    assert_eq!(next.tree_hash.as_ref(), &[0x07; 32]);

    let encoded = current.serialize_detached()?;
    // version, cipher suite, group id
    assert_eq!(&encoded[..10], &[0x00, 0x01, 0x00, 0x01, 0x05, b'g', b'r', b'o', b'u', b'p']);
    assert_eq!(&encoded[10..18], &3u64.to_be_bytes());
    assert_eq!(GroupContext::deserialize_exact(&encoded)?, current);
    Ok(())
}
