//! [RFC9420 Sec.11.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-11.2) Reinitialization
//! and [RFC9420 Sec.11.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-11.3) Subgroup
//! Branching
//!
//! Both start a new group whose first epoch is bound to an epoch of an existing one through a
//! resumption PSK. A re-initialization replaces a suspended group, possibly with another protocol
//! version or cipher suite. A branch forks a subset of the members of an active group.

use bytes::Bytes;

use crate::mls::auth::AuthenticationService;
use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::config::CryptoConfig;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::crypto::Secret;
use crate::mls::extensibility::Extensions;
use crate::mls::framing::proposal::{AddProposal, PreSharedKeyProposal, Proposal, ReInitProposal};
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::{MlsGroupId, ProtocolVersion};
use crate::mls::group::config::GroupConfig;
use crate::mls::group::{
    random_group_id, ActiveGroup, CommitOptions, CommitOutput, GroupState, SuspendedGroup,
};
use crate::mls::key_package::{KeyPackage, KeyPackageBundle};
use crate::mls::psk::{PreSharedKeyId, Psk, PskLookup, ResumptionPskUsage};
use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::utilities::error::{
    BranchError, CommitError, Error, ReInitJoinError, Result, ResumptionJoinError,
};
use crate::mls::utilities::tree_math::LeafIndex;

/// Creates the first epoch of a resumed group: the creator commits an Add for every other member
/// together with the resumption PSK of the group it resumes.
#[allow(clippy::too_many_arguments)]
async fn start_resumed_group(
    crypto_provider: &impl CryptoProvider,
    auth_service: &impl AuthenticationService,
    psk_lookup: &impl PskLookup,
    config: GroupConfig,
    group_id: Option<MlsGroupId>,
    own_bundle: KeyPackageBundle,
    key_packages: Vec<KeyPackage>,
    usage: ResumptionPskUsage,
    source: (&MlsGroupId, u64, &Secret),
) -> Result<(ActiveGroup, Welcome)> {
    if key_packages.is_empty() {
        return Err(Error::NoResumedMembers);
    }

    let group = ActiveGroup::from_key_package_bundle(crypto_provider, config, group_id, own_bundle)?;
    let (source_group_id, source_epoch, _) = source;
    let resumption_psk = PreSharedKeyId::resumption(
        crypto_provider,
        group.cipher_suite(),
        usage,
        source_group_id.clone(),
        source_epoch,
    )?;

    let mut proposals: Vec<Proposal> = key_packages
        .into_iter()
        .map(|key_package| Proposal::Add(AddProposal { key_package }))
        .collect();
    proposals.push(Proposal::PreSharedKey(PreSharedKeyProposal {
        psk: resumption_psk,
    }));

    let output = group
        .commit_with_source(
            crypto_provider,
            auth_service,
            psk_lookup,
            proposals,
            Bytes::new(),
            CommitOptions {
                resumption: Some(usage),
                ..Default::default()
            },
            Some(source),
        )
        .await?;

    let welcome = output.welcome.ok_or(Error::NoResumedMembers)?;
    let group = output
        .group
        .into_active()
        .ok_or(CommitError::GroupSuspended)?;

    log::debug!(
        "resumed group {:?} at epoch {} into a group of {} members",
        usage,
        source_epoch,
        group.member_count()
    );

    Ok((group, welcome))
}

impl ActiveGroup {
    /// Commits a lone `ReInit` proposal. The returned state is a [`SuspendedGroup`] from which
    /// [`SuspendedGroup::create_welcome`] starts the new group.
    ///
    /// Proposals pending in this epoch make the commit fail, since `ReInit` must be alone.
    #[allow(clippy::too_many_arguments)]
    pub async fn reinit_group(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        group_id: Option<MlsGroupId>,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        extensions: Extensions,
    ) -> Result<CommitOutput> {
        let reinit = ReInitProposal {
            group_id: group_id.unwrap_or_else(random_group_id),
            version,
            cipher_suite,
            extensions,
        };

        self.prepare_commit(
            crypto_provider,
            auth_service,
            psk_lookup,
            vec![Proposal::ReInit(reinit)],
            Bytes::new(),
            CommitOptions::default(),
        )
        .await
    }

    /// Forks a new group out of this epoch. Every entry of `members` names the current leaf of a
    /// member and a fresh key package of the same client.
    pub async fn branch_group(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        own_bundle: KeyPackageBundle,
        members: Vec<(LeafIndex, KeyPackage)>,
        new_group_id: Option<MlsGroupId>,
    ) -> Result<(ActiveGroup, Welcome)> {
        let blank: Vec<LeafIndex> = members
            .iter()
            .map(|(leaf_index, _)| *leaf_index)
            .filter(|leaf_index| self.tree.get_leaf(*leaf_index).is_none())
            .collect();
        if !blank.is_empty() {
            return Err(BranchError::BlankLeavesIncluded(blank).into());
        }

        let own_leaf = self
            .tree
            .get_leaf(self.own_leaf)
            .ok_or(Error::BlankLeaf(self.own_leaf))?;
        if !auth_service
            .is_same_client(&own_leaf.credential, &own_bundle.key_package.leaf_node.credential)
            .await
        {
            return Err(BranchError::KeyPackageMismatch(self.own_leaf).into());
        }

        let mut key_packages = Vec::with_capacity(members.len());
        for (leaf_index, key_package) in members {
            let leaf = self
                .tree
                .get_leaf(leaf_index)
                .ok_or(Error::BlankLeaf(leaf_index))?;
            if !auth_service
                .is_same_client(&leaf.credential, &key_package.leaf_node.credential)
                .await
            {
                return Err(BranchError::KeyPackageMismatch(leaf_index).into());
            }
            key_packages.push(key_package);
        }

        start_resumed_group(
            crypto_provider,
            auth_service,
            psk_lookup,
            self.config.clone(),
            new_group_id,
            own_bundle,
            key_packages,
            ResumptionPskUsage::Branch,
            (
                &self.context.group_id,
                self.context.epoch,
                self.key_schedule.resumption_psk(),
            ),
        )
        .await
    }

    /// Joins a group branched from, or re-initializing, `source`.
    ///
    /// On top of the checks of [`ActiveGroup::join`], the new group must be bound to the final
    /// epoch of a suspended `source` or to an epoch of an active one, and must only contain
    /// clients that are members of `source`.
    #[allow(clippy::too_many_arguments)]
    pub async fn join_resumption(
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        welcome: &Welcome,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<RatchetTree>,
        config: GroupConfig,
        source: &GroupState,
    ) -> Result<Self> {
        let (usage, group_id, epoch, resumption_psk) = source.resumption_source();
        let joined = Self::join_with_psks(
            crypto_provider,
            auth_service,
            psk_lookup,
            welcome,
            bundle,
            ratchet_tree,
            config,
            Some((group_id, epoch, resumption_psk)),
            Some(usage),
        )
        .await?;

        joined
            .group
            .validate_resumption(auth_service, &joined.psks, source)
            .await?;

        log::debug!(
            "joined group resumed ({:?}) from epoch {} of its predecessor",
            usage,
            epoch
        );
        Ok(joined.group)
    }

    async fn validate_resumption(
        &self,
        auth_service: &impl AuthenticationService,
        psks: &[PreSharedKeyId],
        source: &GroupState,
    ) -> Result<()> {
        let (usage, source_group_id, _, _) = source.resumption_source();
        let psk_epoch = psks
            .iter()
            .find_map(|id| match &id.psk {
                Psk::Resumption {
                    usage: psk_usage,
                    psk_group_id,
                    psk_epoch,
                } if *psk_usage == usage && psk_group_id == source_group_id => Some(*psk_epoch),
                _ => None,
            })
            .ok_or(ResumptionJoinError::MissingResumptionPsk)?;

        match source {
            GroupState::Suspended(suspended) => {
                // https://www.rfc-editor.org/rfc/rfc9420.html#section-11.2-6
                let reinit = &suspended.reinit;
                if self.context.group_id != reinit.group_id {
                    return Err(ReInitJoinError::GroupIdMismatch.into());
                }
                if self.context.version != reinit.version {
                    return Err(ResumptionJoinError::ProtocolVersionMismatch.into());
                }
                if self.context.cipher_suite != reinit.cipher_suite {
                    return Err(ResumptionJoinError::CipherSuiteMismatch.into());
                }
                if self.context.extensions != reinit.extensions {
                    return Err(ReInitJoinError::ExtensionsMismatch.into());
                }
                if psk_epoch != suspended.context.epoch {
                    return Err(ReInitJoinError::EpochMismatch.into());
                }
                if self.member_count() < suspended.tree.member_count() {
                    return Err(ReInitJoinError::MembersMissing.into());
                }
            }
            GroupState::Active(active) => {
                // https://www.rfc-editor.org/rfc/rfc9420.html#section-11.3-6
                if self.context.version != active.context.version {
                    return Err(ResumptionJoinError::ProtocolVersionMismatch.into());
                }
                if self.context.cipher_suite != active.context.cipher_suite {
                    return Err(ResumptionJoinError::CipherSuiteMismatch.into());
                }
            }
        }

        for (_, leaf) in self.tree.leaves() {
            let mut known = false;
            for (_, source_leaf) in source.tree().leaves() {
                if auth_service
                    .is_same_client(&source_leaf.credential, &leaf.credential)
                    .await
                {
                    known = true;
                    break;
                }
            }
            if !known {
                return Err(ResumptionJoinError::NewMembersAdded.into());
            }
        }

        Ok(())
    }
}

impl SuspendedGroup {
    /// Starts the group described by the committed `ReInit` proposal and welcomes the other
    /// members into it. `own_bundle` and `key_packages` must use the new version and cipher
    /// suite.
    pub async fn create_welcome(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        own_bundle: KeyPackageBundle,
        key_packages: Vec<KeyPackage>,
    ) -> Result<(ActiveGroup, Welcome)> {
        let reinit = &self.reinit;
        if own_bundle.key_package.version != reinit.version {
            return Err(ResumptionJoinError::ProtocolVersionMismatch.into());
        }
        if own_bundle.key_package.cipher_suite != reinit.cipher_suite {
            return Err(ResumptionJoinError::CipherSuiteMismatch.into());
        }

        let config = self.config.resumed(
            CryptoConfig::new(reinit.version, reinit.cipher_suite),
            reinit.extensions.clone(),
        );

        start_resumed_group(
            crypto_provider,
            auth_service,
            psk_lookup,
            config,
            Some(reinit.group_id.clone()),
            own_bundle,
            key_packages,
            ResumptionPskUsage::ReInit,
            (
                &self.context.group_id,
                self.context.epoch,
                &self.resumption_psk,
            ),
        )
        .await
    }
}
