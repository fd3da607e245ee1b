use bytes::Bytes;
use hex_literal::hex;

use crate::mls::crypto::provider::RustCryptoProvider;
use crate::mls::crypto::{cipher_suite::CipherSuite, Secret};
use crate::mls::framing::commit::Commit;
use crate::mls::framing::{Content, FramedContent, Sender, WireFormat};
use crate::mls::group::transcript::*;
use crate::mls::key_schedule::ConfirmedTranscriptHashInput;
use crate::mls::utilities::error::*;
use crate::mls::utilities::serde::Serializer;
use crate::mls::utilities::tree_math::LeafIndex;

const CIPHER_SUITE: CipherSuite = CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

fn commit_input() -> ConfirmedTranscriptHashInput {
    ConfirmedTranscriptHashInput {
        wire_format: WireFormat::PublicMessage,
        content: FramedContent {
            group_id: Bytes::from_static(b"group"),
            epoch: 1,
            sender: Sender::Member(LeafIndex(1)),
            authenticated_data: Bytes::new(),
            content: Content::Commit(Commit {
                proposals: vec![],
                path: None,
            }),
        },
        signature: Bytes::from_static(&hex!("deadbeef")),
    }
}

#[test]
fn confirmed_hash_input_wire_format() -> Result<()> {
    assert_eq!(
        commit_input().serialize_detached()?.as_ref(),
        hex!("0001 05 67726f7570 0000000000000001 01 00000001 00 03 00 00 04 deadbeef")
    );
    Ok(())
}

#[test]
fn confirmed_hash_known_answer() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let confirmed = update_confirmed_transcript_hash(
        &crypto_provider,
        CIPHER_SUITE,
        &[0x03; 32],
        &commit_input(),
    )?;
    assert_eq!(
        confirmed.as_ref(),
        hex!("a5cdfeed805dcd3281f3b07a70bd19070bd9a3845668bd46cc80a2cd256528b7")
    );
    Ok(())
}

#[test]
fn interim_hash_known_answer() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let confirmed = hex!("a5cdfeed805dcd3281f3b07a70bd19070bd9a3845668bd46cc80a2cd256528b7");
    let tag = Bytes::from_static(&hex!(
        "828acab922cdbdf2ef72ef70360dffb81a5e0005d4e1959963a91dd5d7cda63b"
    ));

    let interim = update_interim_transcript_hash(&crypto_provider, CIPHER_SUITE, &confirmed, &tag)?;
    assert_eq!(
        interim.as_ref(),
        hex!("4ca6159061d6203680ee26b5c7ad4841025d28a2f7879182be2d7f07a55350b5")
    );

    // the tag is length prefixed, the empty confirmed hash of a new group adds nothing
    let first = update_interim_transcript_hash(
        &crypto_provider,
        CIPHER_SUITE,
        &[],
        &Bytes::from_static(&[0x05; 32]),
    )?;
    assert_eq!(
        first.as_ref(),
        hex!("225401556bdb6de5dc9e9c13607b9f8c6c49c5e9f2656f01fd7303901fdd6774")
    );
    Ok(())
}

#[test]
fn transcript_advances_through_one_commit() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let before = ConfirmedTranscriptHash {
        confirmed_hash: Bytes::new(),
        interim_hash: Bytes::from_static(&[0x03; 32]),
    };

    let confirmed = before.next_confirmed_hash(&crypto_provider, CIPHER_SUITE, &commit_input())?;
    let tag = Bytes::from_static(&hex!(
        "828acab922cdbdf2ef72ef70360dffb81a5e0005d4e1959963a91dd5d7cda63b"
    ));
    let after = ConfirmedTranscriptHash::from_confirmed(&crypto_provider, CIPHER_SUITE, confirmed, &tag)?;

    assert_eq!(
        after.confirmed_hash().as_ref(),
        hex!("a5cdfeed805dcd3281f3b07a70bd19070bd9a3845668bd46cc80a2cd256528b7")
    );
    assert_eq!(
        after.interim_hash().as_ref(),
        hex!("4ca6159061d6203680ee26b5c7ad4841025d28a2f7879182be2d7f07a55350b5")
    );
    Ok(())
}

#[test]
fn confirmation_tag_known_answer() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let confirmation_key = Secret::new(vec![0x04; 32]);
    let confirmed = hex!("a5cdfeed805dcd3281f3b07a70bd19070bd9a3845668bd46cc80a2cd256528b7");
    let tag = hex!("828acab922cdbdf2ef72ef70360dffb81a5e0005d4e1959963a91dd5d7cda63b");

    verify_confirmation_tag(&crypto_provider, CIPHER_SUITE, &confirmation_key, &confirmed, &tag)?;

    let mut forged = tag;
    forged[0] ^= 1;
    assert!(matches!(
        verify_confirmation_tag(&crypto_provider, CIPHER_SUITE, &confirmation_key, &confirmed, &forged),
        Err(Error::Commit(CommitError::InvalidConfirmationTag))
    ));
    Ok(())
}
