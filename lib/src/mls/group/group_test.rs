use bytes::Bytes;

use crate::mls::auth::BasicAuthenticationService;
use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::config::CryptoConfig;
use crate::mls::crypto::credential::Credential;
use crate::mls::crypto::key_pair::SignatureKeyPair;
use crate::mls::crypto::provider::{CryptoProvider, RustCryptoProvider};
use crate::mls::crypto::Secret;
use crate::mls::extensibility::{Extension, ExtensionType, Extensions};
use crate::mls::framing::proposal::*;
use crate::mls::framing::public_message::PublicMessage;
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::{MlsMessage, MlsMessageBody, ProtocolVersion};
use crate::mls::group::config::GroupConfig;
use crate::mls::group::*;
use crate::mls::key_package::KeyPackageBundle;
use crate::mls::psk::{InMemoryPskStore, PreSharedKeyId, ResumptionPskUsage};
use crate::mls::utilities::error::*;
use crate::mls::utilities::tree_math::LeafIndex;

const CIPHER_SUITE: CipherSuite = CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;
const OTHER_CIPHER_SUITE: CipherSuite =
    CipherSuite::MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519;

const AUTH: BasicAuthenticationService = BasicAuthenticationService;

fn signer(crypto_provider: &RustCryptoProvider) -> SignatureKeyPair {
    crypto_provider
        .signature(CIPHER_SUITE)
        .and_then(|signature| signature.signature_key_pair())
        .expect("signature key pair")
}

fn key_package(
    crypto_provider: &RustCryptoProvider,
    cipher_suite: CipherSuite,
    name: &str,
) -> KeyPackageBundle {
    KeyPackageBundle::with_credential(
        crypto_provider,
        cipher_suite,
        Credential::basic(name.to_owned()),
        signer(crypto_provider),
    )
    .expect("key package")
}

fn active(state: GroupState) -> ActiveGroup {
    state.into_active().expect("active group")
}

fn create_group(crypto_provider: &RustCryptoProvider) -> Result<ActiveGroup> {
    ActiveGroup::new(
        crypto_provider,
        GroupConfig::default(),
        Credential::basic("alice"),
        signer(crypto_provider),
        Some(Bytes::from_static(b"group")),
    )
}

async fn join(
    crypto_provider: &RustCryptoProvider,
    psks: &InMemoryPskStore,
    welcome: &Welcome,
    bundle: &KeyPackageBundle,
) -> Result<ActiveGroup> {
    ActiveGroup::join(
        crypto_provider,
        &AUTH,
        psks,
        welcome,
        bundle,
        None,
        GroupConfig::default(),
    )
    .await
}

/// Alice creates the group and adds one member per name in a single commit.
async fn group_with(
    crypto_provider: &RustCryptoProvider,
    names: &[&str],
) -> Result<(ActiveGroup, Vec<ActiveGroup>)> {
    let psks = InMemoryPskStore::new();
    let alice = create_group(crypto_provider)?;

    let bundles: Vec<KeyPackageBundle> = names
        .iter()
        .map(|name| key_package(crypto_provider, CIPHER_SUITE, name))
        .collect();
    let proposals = bundles
        .iter()
        .map(|bundle| {
            Proposal::Add(AddProposal {
                key_package: bundle.key_package.clone(),
            })
        })
        .collect();

    let output = alice
        .prepare_commit(
            crypto_provider,
            &AUTH,
            &psks,
            proposals,
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let welcome = output.welcome.expect("welcome");

    let mut members = vec![];
    for bundle in &bundles {
        members.push(join(crypto_provider, &psks, &welcome, bundle).await?);
    }

    Ok((active(output.group), members))
}

async fn receive_commit(
    crypto_provider: &RustCryptoProvider,
    psks: &InMemoryPskStore,
    member: &mut ActiveGroup,
    message: &MlsMessage,
) -> Result<GroupState> {
    match member
        .process_message(crypto_provider, &AUTH, psks, message)
        .await?
    {
        ProcessedMessage::Commit { group, .. } => Ok(group),
        other => panic!("expected a commit, got {other:?}"),
    }
}

fn assert_same_epoch(a: &ActiveGroup, b: &ActiveGroup) {
    assert_eq!(a.epoch(), b.epoch());
    assert_eq!(a.context(), b.context());
    assert_eq!(a.epoch_authenticator(), b.epoch_authenticator());
    assert_eq!(a.confirmation_tag(), b.confirmation_tag());
    assert_eq!(a.transcript(), b.transcript());
}

#[test]
fn new_group_has_a_single_member_at_epoch_zero() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let alice = create_group(&crypto_provider)?;

    assert_eq!(alice.epoch(), 0);
    assert_eq!(alice.group_id().as_ref(), b"group");
    assert_eq!(alice.member_count(), 1);
    assert_eq!(alice.own_leaf_index(), LeafIndex(0));
    assert!(alice.context().confirmed_transcript_hash.is_empty());
    assert!(alice.past_resumption_psk(0).is_some());

    let random_id = ActiveGroup::new(
        &crypto_provider,
        GroupConfig::default(),
        Credential::basic("alice"),
        signer(&crypto_provider),
        None,
    )?;
    assert!(!random_id.group_id().is_empty());
    assert_ne!(random_id.group_id(), alice.group_id());
    Ok(())
}

#[test]
fn group_config_builder() -> Result<()> {
    let config = GroupConfig::builder()
        .with_crypto_config(CryptoConfig::with_cipher_suite(OTHER_CIPHER_SUITE))
        .with_resumption_psk_history(2)
        .with_max_generation_gap(10)
        .build()?;
    assert_eq!(config.crypto_config().cipher_suite, OTHER_CIPHER_SUITE);
    assert_eq!(config.resumption_psk_history(), 2);
    assert_eq!(config.max_generation_gap(), 10);

    let parsed: GroupConfig = serde_json::from_str(r#"{"max_generation_gap": 5}"#)
        .expect("config json");
    assert_eq!(parsed.max_generation_gap(), 5);
    assert_eq!(parsed.resumption_psk_history(), 5);
    Ok(())
}

#[tokio::test]
async fn added_members_share_the_epoch() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let (alice, members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;

    assert_eq!(alice.epoch(), 1);
    assert_eq!(alice.member_count(), 3);
    for member in &members {
        assert_same_epoch(&alice, member);
        assert_eq!(
            member.export_secret(&crypto_provider, b"label", b"context", 32)?,
            alice.export_secret(&crypto_provider, b"label", b"context", 32)?
        );
    }
    assert_eq!(members[0].own_leaf_index(), LeafIndex(1));
    assert_eq!(members[1].own_leaf_index(), LeafIndex(2));
    Ok(())
}

#[tokio::test]
async fn welcome_requires_the_matching_key_package() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let alice = create_group(&crypto_provider)?;
    let bob = key_package(&crypto_provider, CIPHER_SUITE, "bob");

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![Proposal::Add(AddProposal {
                key_package: bob.key_package.clone(),
            })],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let welcome = output.welcome.expect("welcome");

    let eve = key_package(&crypto_provider, CIPHER_SUITE, "eve");
    assert_eq!(
        join(&crypto_provider, &psks, &welcome, &eve).await.err(),
        Some(Error::NoMatchingKeyPackage)
    );
    Ok(())
}

#[tokio::test]
async fn application_messages_reach_every_member() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (mut alice, mut members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;

    let message = alice.encrypt_application_message(
        &crypto_provider,
        Bytes::from_static(b"hello"),
        Bytes::from_static(b"aad"),
    )?;
    assert!(matches!(message.body, MlsMessageBody::PrivateMessage(_)));

    for member in &mut members {
        match member
            .process_message(&crypto_provider, &AUTH, &psks, &message)
            .await?
        {
            ProcessedMessage::Application {
                sender,
                data,
                authenticated_data,
            } => {
                assert_eq!(sender, LeafIndex(0));
                assert_eq!(data.as_ref(), b"hello");
                assert_eq!(authenticated_data.as_ref(), b"aad");
            }
            other => panic!("expected application data, got {other:?}"),
        }
    }

    // The key of a generation is consumed on first use.
    assert_eq!(
        members[0]
            .process_message(&crypto_provider, &AUTH, &psks, &message)
            .await
            .err(),
        Some(Error::GenerationInThePast(0))
    );
    Ok(())
}

#[tokio::test]
async fn remove_by_reference_advances_remaining_members() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (mut alice, members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;
    let (mut bob, mut charlie) = (members[0].clone(), members[1].clone());

    let (proposal, reference) = bob
        .propose(
            &crypto_provider,
            &AUTH,
            Proposal::Remove(RemoveProposal {
                removed: LeafIndex(2),
            }),
            Bytes::new(),
            false,
        )
        .await?;
    for member in [&mut alice, &mut charlie] {
        match member
            .process_message(&crypto_provider, &AUTH, &psks, &proposal)
            .await?
        {
            ProcessedMessage::Proposal { reference: got, .. } => assert_eq!(got, reference),
            other => panic!("expected a proposal, got {other:?}"),
        }
    }
    assert_eq!(alice.pending_proposals().len(), 1);

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    assert!(output.welcome.is_none());
    let alice_next = active(output.group);
    assert_eq!(alice_next.epoch(), 2);
    assert_eq!(alice_next.member_count(), 2);
    assert!(alice_next.pending_proposals().is_empty());

    let bob_next = active(receive_commit(&crypto_provider, &psks, &mut bob, &output.message).await?);
    assert_same_epoch(&alice_next, &bob_next);

    assert_eq!(
        receive_commit(&crypto_provider, &psks, &mut charlie, &output.message)
            .await
            .err(),
        Some(Error::Commit(CommitError::RemovedFromGroup))
    );

    // The previous epoch is untouched by the commit.
    assert_eq!(alice.epoch(), 1);
    assert_eq!(bob.epoch(), 1);
    Ok(())
}

#[tokio::test]
async fn update_rotates_the_leaf_key() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (mut alice, members) = group_with(&crypto_provider, &["bob"]).await?;
    let mut bob = members[0].clone();
    let old_key = bob.tree().get_leaf(LeafIndex(1)).expect("bob").encryption_key.clone();

    let (update, _) = bob
        .propose_update(&crypto_provider, &AUTH, Bytes::new(), true)
        .await?;
    alice
        .process_message(&crypto_provider, &AUTH, &psks, &update)
        .await?;

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions {
                use_private_message: true,
                ..Default::default()
            },
        )
        .await?;
    let mut alice = active(output.group);
    let mut bob = active(receive_commit(&crypto_provider, &psks, &mut bob, &output.message).await?);
    assert_same_epoch(&alice, &bob);

    let new_key = &bob.tree().get_leaf(LeafIndex(1)).expect("bob").encryption_key;
    assert_ne!(*new_key, old_key);

    let message = alice.encrypt_application_message(
        &crypto_provider,
        Bytes::from_static(b"after update"),
        Bytes::new(),
    )?;
    assert!(matches!(
        bob.process_message(&crypto_provider, &AUTH, &psks, &message).await?,
        ProcessedMessage::Application { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn empty_commit_carries_a_path() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let alice_next = active(output.group);
    assert_ne!(
        alice_next.tree().get_leaf(LeafIndex(0)),
        alice.tree().get_leaf(LeafIndex(0))
    );

    for mut member in members {
        let next = active(receive_commit(&crypto_provider, &psks, &mut member, &output.message).await?);
        assert_same_epoch(&alice_next, &next);
        assert_eq!(
            &next.context().confirmed_transcript_hash,
            next.transcript().confirmed_hash()
        );
    }
    Ok(())
}

#[tokio::test]
async fn messages_of_other_epochs_are_rejected() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, mut members) = group_with(&crypto_provider, &["bob"]).await?;

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let mut alice_next = active(output.group);
    let message = alice_next.encrypt_application_message(
        &crypto_provider,
        Bytes::from_static(b"too early"),
        Bytes::new(),
    )?;

    assert_eq!(
        members[0]
            .process_message(&crypto_provider, &AUTH, &psks, &message)
            .await
            .err(),
        Some(Error::WrongEpoch {
            expected: 1,
            got: 2
        })
    );
    Ok(())
}

#[tokio::test]
async fn tampered_commits_leave_the_group_untouched() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, mut members) = group_with(&crypto_provider, &["bob"]).await?;
    let bob = &mut members[0];

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let MlsMessageBody::PublicMessage(public_message) = &output.message.body else {
        panic!("commit should be a public message");
    };

    let mut content = public_message.authenticated_content();
    content.auth.confirmation_tag = Some(Bytes::from_static(&[0; 32]));

    // A changed tag breaks the membership tag computed by the sender.
    let mut stale = public_message.clone();
    stale.auth = content.auth.clone();
    let stale = MlsMessage::new(ProtocolVersion::MLS10, MlsMessageBody::PublicMessage(stale));
    assert_eq!(
        receive_commit(&crypto_provider, &psks, bob, &stale).await.err(),
        Some(Error::InvalidMembershipTag)
    );

    let forged = PublicMessage::new(
        &crypto_provider,
        CIPHER_SUITE,
        content,
        alice.key_schedule.membership_key().as_bytes(),
        alice.context(),
    )?;
    let forged = MlsMessage::new(ProtocolVersion::MLS10, MlsMessageBody::PublicMessage(forged));
    assert_eq!(
        receive_commit(&crypto_provider, &psks, bob, &forged).await.err(),
        Some(Error::Commit(CommitError::InvalidConfirmationTag))
    );

    assert_eq!(bob.epoch(), 1);
    let bob_next = active(receive_commit(&crypto_provider, &psks, bob, &output.message).await?);
    assert_same_epoch(&active(output.group), &bob_next);
    Ok(())
}

#[tokio::test]
async fn invalid_proposals_are_rejected() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (mut alice, _) = group_with(&crypto_provider, &["bob"]).await?;

    assert_eq!(
        alice
            .propose(
                &crypto_provider,
                &AUTH,
                Proposal::Remove(RemoveProposal {
                    removed: LeafIndex(5),
                }),
                Bytes::new(),
                false,
            )
            .await
            .err(),
        Some(Error::Proposal(ProposalError::BlankLeaf(LeafIndex(5))))
    );

    assert_eq!(
        alice
            .prepare_commit(
                &crypto_provider,
                &AUTH,
                &psks,
                vec![Proposal::Remove(RemoveProposal {
                    removed: LeafIndex(0),
                })],
                Bytes::new(),
                CommitOptions::default(),
            )
            .await
            .err(),
        Some(Error::Proposal(ProposalError::RemoveOfCommitter))
    );

    let reinit = Proposal::ReInit(ReInitProposal {
        group_id: Bytes::from_static(b"next"),
        version: ProtocolVersion::MLS10,
        cipher_suite: CIPHER_SUITE,
        extensions: Default::default(),
    });
    let remove = Proposal::Remove(RemoveProposal {
        removed: LeafIndex(1),
    });
    assert_eq!(
        alice
            .prepare_commit(
                &crypto_provider,
                &AUTH,
                &psks,
                vec![reinit, remove],
                Bytes::new(),
                CommitOptions::default(),
            )
            .await
            .err(),
        Some(Error::Proposal(ProposalError::ReInitNotAlone))
    );
    assert!(alice.pending_proposals().is_empty());
    Ok(())
}

#[tokio::test]
async fn commit_skips_replayed_and_conflicting_proposals() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (mut alice, mut members) =
        group_with(&crypto_provider, &["bob", "charlie", "dave"]).await?;

    let remove = |removed: LeafIndex| Proposal::Remove(RemoveProposal { removed });
    let (from_bob, bob_ref) = members[0]
        .propose(&crypto_provider, &AUTH, remove(LeafIndex(2)), Bytes::new(), false)
        .await?;
    let (from_dave, _) = members[2]
        .propose(&crypto_provider, &AUTH, remove(LeafIndex(2)), Bytes::new(), false)
        .await?;
    let (from_charlie, _) = members[1]
        .propose(&crypto_provider, &AUTH, remove(LeafIndex(0)), Bytes::new(), false)
        .await?;

    for message in [&from_bob, &from_bob, &from_dave, &from_charlie] {
        let processed = alice
            .process_message(&crypto_provider, &AUTH, &psks, message)
            .await?;
        assert!(matches!(processed, ProcessedMessage::Proposal { .. }));
    }
    assert_eq!(alice.pending_proposals().len(), 3);
    assert_eq!(
        alice
            .pending_proposals()
            .iter()
            .filter(|pending| pending.reference == bob_ref)
            .count(),
        1
    );

    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;
    let alice_next = active(output.group);
    assert_eq!(alice_next.member_count(), 3);
    assert!(alice_next.tree().get_leaf(LeafIndex(0)).is_some());
    assert!(alice_next.tree().get_leaf(LeafIndex(2)).is_none());

    let bob_next =
        active(receive_commit(&crypto_provider, &psks, &mut members[0], &output.message).await?);
    assert_same_epoch(&alice_next, &bob_next);
    Ok(())
}

#[tokio::test]
async fn psks_are_injected_into_the_epoch() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let (alice, mut members) = group_with(&crypto_provider, &["bob"]).await?;
    let mut psks = InMemoryPskStore::new();
    psks.insert_external("shared", Secret::new(vec![0x42; 32]));

    let external = PreSharedKeyId::external(&crypto_provider, CIPHER_SUITE, "shared")?;
    let resumption = PreSharedKeyId::resumption(
        &crypto_provider,
        CIPHER_SUITE,
        ResumptionPskUsage::Application,
        alice.group_id().clone(),
        1,
    )?;
    let output = alice
        .prepare_commit(
            &crypto_provider,
            &AUTH,
            &psks,
            vec![
                Proposal::PreSharedKey(PreSharedKeyProposal { psk: external }),
                Proposal::PreSharedKey(PreSharedKeyProposal { psk: resumption }),
            ],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await?;

    let without_psk = InMemoryPskStore::new();
    assert_eq!(
        receive_commit(&crypto_provider, &without_psk, &mut members[0], &output.message)
            .await
            .err(),
        Some(Error::Psk(PskError::NotFound))
    );

    let bob_next =
        active(receive_commit(&crypto_provider, &psks, &mut members[0], &output.message).await?);
    let alice_next = active(output.group);
    assert_same_epoch(&alice_next, &bob_next);
    assert!(alice_next.past_resumption_psk(1).is_some());
    assert!(alice_next.past_resumption_psk(2).is_some());
    Ok(())
}

#[tokio::test]
async fn reinit_suspends_and_resumes_the_group() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, mut members) = group_with(&crypto_provider, &["bob"]).await?;

    let output = alice
        .reinit_group(
            &crypto_provider,
            &AUTH,
            &psks,
            Some(Bytes::from_static(b"group-2")),
            ProtocolVersion::MLS10,
            OTHER_CIPHER_SUITE,
            Default::default(),
        )
        .await?;
    let mut alice_suspended = output.group;
    let mut bob_suspended =
        receive_commit(&crypto_provider, &psks, &mut members[0], &output.message).await?;
    assert!(!alice_suspended.is_active());
    assert!(!bob_suspended.is_active());
    assert_eq!(alice_suspended.epoch(), 2);
    assert_eq!(
        alice_suspended.as_suspended().map(|group| group.resumption_psk()),
        bob_suspended.as_suspended().map(|group| group.resumption_psk())
    );

    assert_eq!(
        alice_suspended
            .encrypt_application_message(&crypto_provider, Bytes::from_static(b"hi"), Bytes::new())
            .err(),
        Some(Error::Commit(CommitError::GroupSuspended))
    );
    assert_eq!(
        bob_suspended
            .process_message(&crypto_provider, &AUTH, &psks, &output.message)
            .await
            .err(),
        Some(Error::Commit(CommitError::GroupSuspended))
    );

    let bob_bundle = key_package(&crypto_provider, OTHER_CIPHER_SUITE, "bob");
    let (alice_new, welcome) = alice_suspended
        .as_suspended()
        .expect("suspended")
        .create_welcome(
            &crypto_provider,
            &AUTH,
            &psks,
            key_package(&crypto_provider, OTHER_CIPHER_SUITE, "alice"),
            vec![bob_bundle.key_package.clone()],
        )
        .await?;
    assert_eq!(alice_new.group_id().as_ref(), b"group-2");
    assert_eq!(alice_new.cipher_suite(), OTHER_CIPHER_SUITE);
    assert_eq!(alice_new.epoch(), 1);

    // A plain join does not know the resumption PSK of the old group.
    assert!(join(&crypto_provider, &psks, &welcome, &bob_bundle).await.is_err());

    let bob_new = ActiveGroup::join_resumption(
        &crypto_provider,
        &AUTH,
        &psks,
        &welcome,
        &bob_bundle,
        None,
        GroupConfig::default(),
        &bob_suspended,
    )
    .await?;
    assert_same_epoch(&alice_new, &bob_new);
    assert_eq!(bob_new.config().crypto_config().cipher_suite, OTHER_CIPHER_SUITE);
    Ok(())
}

#[tokio::test]
async fn reinit_join_requires_every_member() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, mut members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;

    let output = alice
        .reinit_group(
            &crypto_provider,
            &AUTH,
            &psks,
            None,
            ProtocolVersion::MLS10,
            CIPHER_SUITE,
            Default::default(),
        )
        .await?;
    let bob_suspended =
        receive_commit(&crypto_provider, &psks, &mut members[0], &output.message).await?;

    let bob_bundle = key_package(&crypto_provider, CIPHER_SUITE, "bob");
    let (_, welcome) = output
        .group
        .as_suspended()
        .expect("suspended")
        .create_welcome(
            &crypto_provider,
            &AUTH,
            &psks,
            key_package(&crypto_provider, CIPHER_SUITE, "alice"),
            vec![bob_bundle.key_package.clone()],
        )
        .await?;

    assert_eq!(
        ActiveGroup::join_resumption(
            &crypto_provider,
            &AUTH,
            &psks,
            &welcome,
            &bob_bundle,
            None,
            GroupConfig::default(),
            &bob_suspended,
        )
        .await
        .err(),
        Some(Error::ReInitJoin(ReInitJoinError::MembersMissing))
    );
    Ok(())
}

fn suspended_mut(state: &mut GroupState) -> &mut SuspendedGroup {
    match state {
        GroupState::Suspended(group) => group,
        GroupState::Active(_) => panic!("expected a suspended group"),
    }
}

/// Alice and Bob re-initialize their group. Alice starts the new group with Bob and one fresh
/// client per name in `newcomers`, Bob gets the welcome and his suspended state.
async fn reinit_welcome(
    crypto_provider: &RustCryptoProvider,
    psks: &InMemoryPskStore,
    newcomers: &[&str],
) -> Result<(Welcome, KeyPackageBundle, GroupState)> {
    let (alice, mut members) = group_with(crypto_provider, &["bob"]).await?;
    let output = alice
        .reinit_group(
            crypto_provider,
            &AUTH,
            psks,
            Some(Bytes::from_static(b"group-2")),
            ProtocolVersion::MLS10,
            CIPHER_SUITE,
            Default::default(),
        )
        .await?;
    let bob_suspended = receive_commit(crypto_provider, psks, &mut members[0], &output.message).await?;

    let bob_bundle = key_package(crypto_provider, CIPHER_SUITE, "bob");
    let mut key_packages = vec![bob_bundle.key_package.clone()];
    key_packages.extend(
        newcomers
            .iter()
            .map(|name| key_package(crypto_provider, CIPHER_SUITE, name).key_package),
    );
    let (_, welcome) = output
        .group
        .as_suspended()
        .expect("suspended")
        .create_welcome(
            crypto_provider,
            &AUTH,
            psks,
            key_package(crypto_provider, CIPHER_SUITE, "alice"),
            key_packages,
        )
        .await?;

    Ok((welcome, bob_bundle, bob_suspended))
}

async fn join_resumed(
    crypto_provider: &RustCryptoProvider,
    psks: &InMemoryPskStore,
    welcome: &Welcome,
    bundle: &KeyPackageBundle,
    source: &GroupState,
) -> Option<Error> {
    ActiveGroup::join_resumption(
        crypto_provider,
        &AUTH,
        psks,
        welcome,
        bundle,
        None,
        GroupConfig::default(),
        source,
    )
    .await
    .err()
}

#[tokio::test]
async fn reinit_join_rejects_new_members() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (welcome, bob_bundle, bob_suspended) =
        reinit_welcome(&crypto_provider, &psks, &["mallory"]).await?;

    assert_eq!(
        join_resumed(&crypto_provider, &psks, &welcome, &bob_bundle, &bob_suspended).await,
        Some(Error::ResumptionJoin(ResumptionJoinError::NewMembersAdded))
    );
    Ok(())
}

#[tokio::test]
async fn reinit_join_checks_the_committed_parameters() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (welcome, bob_bundle, bob_suspended) = reinit_welcome(&crypto_provider, &psks, &[]).await?;

    let mut other_group = bob_suspended.clone();
    suspended_mut(&mut other_group).reinit.group_id = Bytes::from_static(b"elsewhere");
    assert_eq!(
        join_resumed(&crypto_provider, &psks, &welcome, &bob_bundle, &other_group).await,
        Some(Error::ReInitJoin(ReInitJoinError::GroupIdMismatch))
    );

    let mut other_extensions = bob_suspended.clone();
    suspended_mut(&mut other_extensions).reinit.extensions = Extensions::new(vec![Extension {
        extension_type: ExtensionType::from(0x0a0a),
        extension_data: Bytes::from_static(b"x"),
    }]);
    assert_eq!(
        join_resumed(&crypto_provider, &psks, &welcome, &bob_bundle, &other_extensions).await,
        Some(Error::ReInitJoin(ReInitJoinError::ExtensionsMismatch))
    );

    assert_eq!(
        join_resumed(&crypto_provider, &psks, &welcome, &bob_bundle, &bob_suspended).await,
        None
    );
    Ok(())
}

#[tokio::test]
async fn reinit_join_must_use_the_final_epoch() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let mut psks = InMemoryPskStore::new();
    let (welcome, bob_bundle, mut bob_suspended) =
        reinit_welcome(&crypto_provider, &psks, &[]).await?;

    // The PSK of the final epoch stays resolvable, but the source claims a later one.
    let suspended = suspended_mut(&mut bob_suspended);
    psks.insert_resumption(
        suspended.context.group_id.clone(),
        suspended.context.epoch,
        suspended.resumption_psk.clone(),
    );
    suspended.context.epoch += 5;

    assert_eq!(
        join_resumed(&crypto_provider, &psks, &welcome, &bob_bundle, &bob_suspended).await,
        Some(Error::ReInitJoin(ReInitJoinError::EpochMismatch))
    );
    Ok(())
}

#[tokio::test]
async fn branch_forks_a_subgroup() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, members) = group_with(&crypto_provider, &["bob", "charlie"]).await?;
    let bob = GroupState::Active(members[0].clone());

    let bob_bundle = key_package(&crypto_provider, CIPHER_SUITE, "bob");
    let (alice_branch, welcome) = alice
        .branch_group(
            &crypto_provider,
            &AUTH,
            &psks,
            key_package(&crypto_provider, CIPHER_SUITE, "alice"),
            vec![(LeafIndex(1), bob_bundle.key_package.clone())],
            Some(Bytes::from_static(b"branch")),
        )
        .await?;
    assert_eq!(alice_branch.member_count(), 2);
    assert_eq!(alice_branch.group_id().as_ref(), b"branch");

    let bob_branch = ActiveGroup::join_resumption(
        &crypto_provider,
        &AUTH,
        &psks,
        &welcome,
        &bob_bundle,
        None,
        GroupConfig::default(),
        &bob,
    )
    .await?;
    assert_same_epoch(&alice_branch, &bob_branch);
    assert_ne!(bob_branch.epoch_authenticator(), alice.epoch_authenticator());
    Ok(())
}

#[tokio::test]
async fn branch_checks_the_selected_members() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, _) = group_with(&crypto_provider, &["bob", "charlie"]).await?;
    let own = || key_package(&crypto_provider, CIPHER_SUITE, "alice");

    assert_eq!(
        alice
            .branch_group(
                &crypto_provider,
                &AUTH,
                &psks,
                own(),
                vec![(
                    LeafIndex(5),
                    key_package(&crypto_provider, CIPHER_SUITE, "bob").key_package
                )],
                None,
            )
            .await
            .err(),
        Some(Error::Branch(BranchError::BlankLeavesIncluded(vec![
            LeafIndex(5)
        ])))
    );

    assert_eq!(
        alice
            .branch_group(
                &crypto_provider,
                &AUTH,
                &psks,
                own(),
                vec![(
                    LeafIndex(1),
                    key_package(&crypto_provider, CIPHER_SUITE, "charlie").key_package
                )],
                None,
            )
            .await
            .err(),
        Some(Error::Branch(BranchError::KeyPackageMismatch(LeafIndex(1))))
    );

    assert_eq!(
        alice
            .branch_group(
                &crypto_provider,
                &AUTH,
                &psks,
                key_package(&crypto_provider, CIPHER_SUITE, "mallory"),
                vec![(
                    LeafIndex(1),
                    key_package(&crypto_provider, CIPHER_SUITE, "bob").key_package
                )],
                None,
            )
            .await
            .err(),
        Some(Error::Branch(BranchError::KeyPackageMismatch(LeafIndex(0))))
    );

    assert_eq!(
        alice
            .branch_group(&crypto_provider, &AUTH, &psks, own(), vec![], None)
            .await
            .err(),
        Some(Error::NoResumedMembers)
    );
    Ok(())
}

#[tokio::test]
async fn branch_join_is_bound_to_the_source_group() -> Result<()> {
    let crypto_provider = RustCryptoProvider;
    let psks = InMemoryPskStore::new();
    let (alice, members) = group_with(&crypto_provider, &["bob"]).await?;
    let (_, other_members) = group_with(&crypto_provider, &["bob"]).await?;

    let bob_bundle = key_package(&crypto_provider, CIPHER_SUITE, "bob");
    let (_, welcome) = alice
        .branch_group(
            &crypto_provider,
            &AUTH,
            &psks,
            key_package(&crypto_provider, CIPHER_SUITE, "alice"),
            vec![(LeafIndex(1), bob_bundle.key_package.clone())],
            None,
        )
        .await?;

    // Bob joins against a group that is not the one that was branched.
    assert!(ActiveGroup::join_resumption(
        &crypto_provider,
        &AUTH,
        &psks,
        &welcome,
        &bob_bundle,
        None,
        GroupConfig::default(),
        &GroupState::Active(other_members[0].clone()),
    )
    .await
    .is_err());

    ActiveGroup::join_resumption(
        &crypto_provider,
        &AUTH,
        &psks,
        &welcome,
        &bob_bundle,
        None,
        GroupConfig::default(),
        &GroupState::Active(members[0].clone()),
    )
    .await?;
    Ok(())
}
