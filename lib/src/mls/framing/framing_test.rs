use bytes::Bytes;

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::credential::Credential;
use crate::mls::crypto::key_pair::SignatureKeyPair;
use crate::mls::crypto::provider::{CryptoProvider, RustCryptoProvider};
use crate::mls::crypto::Secret;
use crate::mls::framing::group_info::{GroupInfo, GroupSecrets};
use crate::mls::framing::private_message::PrivateMessage;
use crate::mls::framing::proposal::*;
use crate::mls::framing::public_message::PublicMessage;
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::*;
use crate::mls::key_package::KeyPackageBundle;
use crate::mls::key_schedule::GroupContext;
use crate::mls::psk::PreSharedKeyId;
use crate::mls::secret_tree::{RatchetLabel, SecretTree};
use crate::mls::utilities::error::*;
use crate::mls::utilities::serde::{Deserializer, Serializer};
use crate::mls::utilities::tree_math::{LeafIndex, NumLeaves};

const CIPHER_SUITE: CipherSuite = CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

fn group_context(epoch: u64) -> GroupContext {
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

fn signer(crypto_provider: &RustCryptoProvider) -> Result<SignatureKeyPair> {
    crypto_provider.signature(CIPHER_SUITE)?.signature_key_pair()
}

fn signed(
    crypto_provider: &RustCryptoProvider,
    signature_key_pair: &SignatureKeyPair,
    wire_format: WireFormat,
    content: Content,
) -> Result<AuthenticatedContent> {
    let ctx = group_context(3);
    AuthenticatedContent::new(
        crypto_provider,
        CIPHER_SUITE,
        signature_key_pair.private_key(),
        wire_format,
        FramedContent {
            group_id: ctx.group_id.clone(),
            epoch: ctx.epoch,
            sender: Sender::Member(LeafIndex(1)),
            authenticated_data: Bytes::from_static(b"aad"),
            content,
        },
        &ctx,
    )
}

#[test]
fn content_signature_is_bound_to_the_context() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let signature_key_pair = signer(&crypto_provider)?;
    let content = signed(
        &crypto_provider,
        &signature_key_pair,
        WireFormat::PublicMessage,
        Content::Proposal(Proposal::Remove(RemoveProposal {
            removed: LeafIndex(0),
        })),
    )?;

    content.verify_signature(
        &crypto_provider,
        CIPHER_SUITE,
        &signature_key_pair.public_key,
        &group_context(3),
    )?;
    assert_eq!(
        content.verify_signature(
            &crypto_provider,
            CIPHER_SUITE,
            &signature_key_pair.public_key,
            &group_context(4),
        ),
        Err(Error::InvalidSignature)
    );
    Ok(())
}

#[test]
fn public_message_membership_tag() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let signature_key_pair = signer(&crypto_provider)?;
    let content = signed(
        &crypto_provider,
        &signature_key_pair,
        WireFormat::PublicMessage,
        Content::Proposal(Proposal::Remove(RemoveProposal {
            removed: LeafIndex(0),
        })),
    )?;
    let membership_key = [0x33; 32];

    let message = PublicMessage::new(
        &crypto_provider,
        CIPHER_SUITE,
        content.clone(),
        &membership_key,
        &group_context(3),
    )?;
    message.verify_membership_tag(&crypto_provider, CIPHER_SUITE, &membership_key, &group_context(3))?;
    assert_eq!(
        message.verify_membership_tag(&crypto_provider, CIPHER_SUITE, &[0x34; 32], &group_context(3)),
        Err(Error::InvalidMembershipTag)
    );
    assert_eq!(message.authenticated_content(), content);

    let wire = MlsMessage::new(ProtocolVersion::MLS10, MlsMessageBody::PublicMessage(message));
    let decoded = MlsMessage::deserialize_exact(wire.serialize_detached()?)?;
    assert_eq!(decoded, wire);
    assert_eq!(decoded.wire_format(), WireFormat::PublicMessage);
    assert_eq!(
        decoded.group_id_and_epoch(),
        Some((&Bytes::from_static(b"group"), 3))
    );
    Ok(())
}

#[test]
fn private_message_round_trip() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let signature_key_pair = signer(&crypto_provider)?;
    let content = signed(
        &crypto_provider,
        &signature_key_pair,
        WireFormat::PrivateMessage,
        Content::Application(Bytes::from_static(b"hello")),
    )?;
    let encryption_secret = Secret::new(vec![0x44; 32]);
    let sender_data_secret = [0x55; 32];

    let mut sender_tree = SecretTree::new(CIPHER_SUITE, NumLeaves(2), &encryption_secret, 10);
    let key = sender_tree.next_key(&crypto_provider, LeafIndex(1), RatchetLabel::Application)?;
    let message = PrivateMessage::new(
        &crypto_provider,
        CIPHER_SUITE,
        &content,
        LeafIndex(1),
        &key,
        &sender_data_secret,
    )?;
    assert_eq!(message.content_type, ContentType::Application);

    let sender_data = message.decrypt_sender_data(&crypto_provider, CIPHER_SUITE, &sender_data_secret)?;
    assert_eq!(sender_data.leaf_index, LeafIndex(1));
    assert_eq!(sender_data.generation, 0);

    let mut receiver_tree = SecretTree::new(CIPHER_SUITE, NumLeaves(2), &encryption_secret, 10);
    let key = receiver_tree.key_for_generation(
        &crypto_provider,
        sender_data.leaf_index,
        RatchetLabel::Application,
        sender_data.generation,
    )?;
    let decrypted = message.decrypt_content(&crypto_provider, CIPHER_SUITE, &key, &sender_data.reuse_guard)?;
    assert_eq!(message.authenticated_content(&sender_data, decrypted), content);

    assert!(message
        .decrypt_sender_data(&crypto_provider, CIPHER_SUITE, &[0x56; 32])
        .is_err());
    Ok(())
}

#[test]
fn proposal_refs_identify_content() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let signature_key_pair = signer(&crypto_provider)?;
    let remove = |removed| {
        signed(
            &crypto_provider,
            &signature_key_pair,
            WireFormat::PublicMessage,
            Content::Proposal(Proposal::Remove(RemoveProposal {
                removed: LeafIndex(removed),
            })),
        )
    };

    let first = remove(0)?;
    assert_eq!(
        ProposalRef::new(&crypto_provider, CIPHER_SUITE, &first)?,
        ProposalRef::new(&crypto_provider, CIPHER_SUITE, &first)?
    );
    assert_ne!(
        ProposalRef::new(&crypto_provider, CIPHER_SUITE, &first)?,
        ProposalRef::new(&crypto_provider, CIPHER_SUITE, &remove(2)?)?
    );
    Ok(())
}

#[test]
fn path_requirement_by_proposal_type() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psk = Proposal::PreSharedKey(PreSharedKeyProposal {
        psk: PreSharedKeyId::external(&crypto_provider, CIPHER_SUITE, "psk")?,
    });
    let remove = Proposal::Remove(RemoveProposal {
        removed: LeafIndex(1),
    });
    let reinit = Proposal::ReInit(ReInitProposal::default());

    assert!(!psk.requires_path());
    assert!(!reinit.requires_path());
    assert!(remove.requires_path());

    let decoded = Proposal::deserialize_exact(psk.serialize_detached()?)?;
    assert_eq!(decoded, psk);
    Ok(())
}

#[test]
fn welcome_reaches_only_its_recipients() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let committer = signer(&crypto_provider)?;
    let joiner = KeyPackageBundle::with_credential(
        &crypto_provider,
        CIPHER_SUITE,
        Credential::basic("bob"),
        signer(&crypto_provider)?,
    )?;
    let stranger = KeyPackageBundle::with_credential(
        &crypto_provider,
        CIPHER_SUITE,
        Credential::basic("eve"),
        signer(&crypto_provider)?,
    )?;

    let group_info = GroupInfo::new(
        &crypto_provider,
        group_context(1),
        Default::default(),
        Bytes::from_static(&[0x07; 32]),
        LeafIndex(0),
        committer.private_key(),
    )?;
    let group_secrets = GroupSecrets {
        joiner_secret: Secret::new(vec![0x11; 32]),
        path_secret: Some(Secret::new(vec![0x22; 32])),
        psks: vec![],
    };
    let welcome_secret = [0x66; 32];
    let welcome = Welcome::new(
        &crypto_provider,
        &welcome_secret,
        &group_info,
        &[(joiner.key_package.clone(), group_secrets.clone())],
    )?;
    assert_eq!(welcome.cipher_suite(), CIPHER_SUITE);

    let joiner_ref = joiner.key_package.generate_ref(&crypto_provider)?;
    assert_eq!(
        welcome.decrypt_group_secrets(
            &crypto_provider,
            &joiner_ref,
            joiner.init_key_pair.private_key.as_bytes()
        )?,
        group_secrets
    );
    let stranger_ref = stranger.key_package.generate_ref(&crypto_provider)?;
    assert!(welcome.find_secret(&stranger_ref).is_none());

    let decrypted = welcome.decrypt_group_info(&crypto_provider, &welcome_secret)?;
    assert_eq!(decrypted, group_info);
    decrypted.verify_signature(&crypto_provider, &committer.public_key)?;
    assert!(welcome.decrypt_group_info(&crypto_provider, &[0x67; 32]).is_err());
    Ok(())
}

#[test]
fn version_and_suite_keep_both_encodings() -> Result<()> {
    assert_eq!(ProtocolVersion::MLS10.serialize_detached()?.as_ref(), [0x00, 0x01]);
    assert_eq!(
        CipherSuite::MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519
            .serialize_detached()?
            .as_ref(),
        [0x00, 0x03]
    );
    assert_eq!(
        ProtocolVersion::deserialize_exact([0x00, 0x07])?,
        ProtocolVersion::Unknown(7)
    );

    let json = serde_json::to_string(&(
        ProtocolVersion::MLS10,
        CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519,
    ))
    .expect("encode");
    assert_eq!(json, "[1,1]");
    let decoded: (ProtocolVersion, CipherSuite) = serde_json::from_str("[1,3]").expect("decode");
    assert_eq!(
        decoded,
        (
            ProtocolVersion::MLS10,
            CipherSuite::MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519
        )
    );
    Ok(())
}
