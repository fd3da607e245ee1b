use std::collections::HashSet;

use bytes::Bytes;

use crate::mls::auth::AuthenticationService;
use crate::mls::crypto::{provider::CryptoProvider, Secret};
use crate::mls::extensibility::Extensions;
use crate::mls::framing::commit::Commit;
use crate::mls::framing::group_info::GroupSecrets;
use crate::mls::framing::proposal::{Proposal, ProposalOrRef, ReInitProposal};
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::{
    AuthenticatedContent, Content, FramedContent, MlsGroupId, Sender, WireFormat,
};
use crate::mls::group::message::protect;
use crate::mls::group::transcript::{verify_confirmation_tag, ConfirmedTranscriptHash};
use crate::mls::group::{ActiveGroup, CommitOptions, CommitOutput, GroupState, SuspendedGroup};
use crate::mls::key_package::KeyPackage;
use crate::mls::key_schedule::{GroupContext, KeySchedule};
use crate::mls::psk::{calculate_psk_secret, PreSharedKeyId, PskLookup, PskResolver};
use crate::mls::ratchet_tree::tree_kem::TreePrivateKeys;
use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::secret_tree::SecretTree;
use crate::mls::utilities::error::{CommitError, Error, ProposalError, Result};
use crate::mls::utilities::serde::Serializer;
use crate::mls::utilities::tree_math::LeafIndex;

/// Outcome of applying a proposal list to a copy of the tree.
struct AppliedProposals {
    tree: RatchetTree,
    extensions: Extensions,
    added: Vec<(LeafIndex, KeyPackage)>,
    removed: Vec<LeafIndex>,
    psks: Vec<PreSharedKeyId>,
    reinit: Option<ReInitProposal>,
    path_required: bool,
}

impl AppliedProposals {
    fn added_leaves(&self) -> HashSet<LeafIndex> {
        self.added.iter().map(|(leaf_index, _)| *leaf_index).collect()
    }
}

impl ActiveGroup {
    /// https://www.rfc-editor.org/rfc/rfc9420.html#name-applying-a-proposal-list
    ///
    /// Updates first, then removes, then adds. The remaining proposal types do not touch the
    /// tree.
    fn apply_proposals(&self, proposals: &[(Sender, Proposal)]) -> Result<AppliedProposals> {
        let mut tree = self.tree.clone();
        let mut extensions = self.context.extensions.clone();
        let mut added = vec![];
        let mut removed = vec![];
        let mut psks = vec![];
        let mut reinit = None;

        for (sender, proposal) in proposals {
            if let Proposal::Update(update) = proposal {
                let leaf_index = sender.as_member().ok_or(ProposalError::InvalidSender)?;
                tree.update_leaf(leaf_index, update.leaf_node.clone())?;
            }
        }

        for (_, proposal) in proposals {
            if let Proposal::Remove(remove) = proposal {
                tree.remove_leaf(remove.removed)?;
                removed.push(remove.removed);
            }
        }

        for (_, proposal) in proposals {
            if let Proposal::Add(add) = proposal {
                let leaf_index = tree.add_leaf(add.key_package.leaf_node.clone());
                added.push((leaf_index, add.key_package.clone()));
            }
        }

        for (_, proposal) in proposals {
            match proposal {
                Proposal::GroupContextExtensions(gce) => extensions = gce.extensions.clone(),
                Proposal::PreSharedKey(psk) => psks.push(psk.psk.clone()),
                Proposal::ReInit(proposal) => reinit = Some(proposal.clone()),
                _ => {}
            }
        }

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4-3
        let path_required =
            proposals.is_empty() || proposals.iter().any(|(_, proposal)| proposal.requires_path());

        Ok(AppliedProposals {
            tree,
            extensions,
            added,
            removed,
            psks,
            reinit,
            path_required,
        })
    }

    /// Context of the next epoch before the commit is confirmed: new tree hash, old confirmed
    /// transcript hash.
    fn provisional_context(
        &self,
        crypto_provider: &impl CryptoProvider,
        tree: &RatchetTree,
        extensions: &Extensions,
    ) -> Result<GroupContext> {
        let tree_hash = tree.compute_root_tree_hash(crypto_provider, self.context.cipher_suite)?;
        let mut context = self
            .context
            .next(tree_hash, self.context.confirmed_transcript_hash.clone());
        context.extensions = extensions.clone();
        Ok(context)
    }

    fn zero_commit_secret(&self, crypto_provider: &impl CryptoProvider) -> Result<Secret> {
        let nh = crypto_provider
            .hpke(self.context.cipher_suite)?
            .kdf_extract_size();
        Ok(Secret::zero(nh as usize))
    }

    async fn psk_secret(
        &self,
        crypto_provider: &impl CryptoProvider,
        psk_lookup: &impl PskLookup,
        psks: &[PreSharedKeyId],
        source: Option<(&MlsGroupId, u64, &Secret)>,
    ) -> Result<Secret> {
        let resolved = PskResolver {
            own: Some((&self.context.group_id, &self.resumption_psks)),
            source,
            lookup: psk_lookup,
        }
        .resolve(psks)
        .await?;

        calculate_psk_secret(crypto_provider, self.context.cipher_suite, &resolved)
    }

    /// State of the epoch a commit creates. A committed `ReInit` suspends the group.
    #[allow(clippy::too_many_arguments)]
    fn next_state(
        &self,
        crypto_provider: &impl CryptoProvider,
        tree: RatchetTree,
        private_keys: TreePrivateKeys,
        context: GroupContext,
        key_schedule: KeySchedule,
        confirmation_tag: Bytes,
        reinit: Option<ReInitProposal>,
    ) -> Result<GroupState> {
        let cipher_suite = context.cipher_suite;

        if let Some(reinit) = reinit {
            log::debug!(
                "group suspended at epoch {} for reinit with cipher suite {:?}",
                context.epoch,
                reinit.cipher_suite
            );
            return Ok(GroupState::Suspended(SuspendedGroup {
                config: self.config.clone(),
                own_leaf: self.own_leaf,
                context,
                tree,
                reinit,
                resumption_psk: key_schedule.resumption_psk().clone(),
                signature_key_pair: self.signature_key_pair.clone(),
            }));
        }

        let transcript = ConfirmedTranscriptHash::from_confirmed(
            crypto_provider,
            cipher_suite,
            context.confirmed_transcript_hash.clone(),
            &confirmation_tag,
        )?;
        let secret_tree = SecretTree::new(
            cipher_suite,
            tree.num_leaves(),
            key_schedule.encryption_secret(),
            self.config.max_generation_gap,
        );
        let mut resumption_psks = self.resumption_psks.clone();
        resumption_psks.push(context.epoch, key_schedule.resumption_psk().clone());

        log::debug!(
            "group advanced to epoch {} with {} members",
            context.epoch,
            tree.member_count()
        );

        Ok(GroupState::Active(ActiveGroup {
            config: self
                .config
                .resumed(self.config.crypto_config, context.extensions.clone()),
            own_leaf: self.own_leaf,
            context,
            tree,
            private_keys,
            key_schedule,
            secret_tree,
            transcript,
            confirmation_tag,
            pending_proposals: vec![],
            pending_leaf_keys: vec![],
            resumption_psks,
            signature_key_pair: self.signature_key_pair.clone(),
        }))
    }

    /// Commits the pending proposals together with `proposals`.
    ///
    /// The current state is left untouched, the new epoch is in [`CommitOutput::group`].
    pub async fn prepare_commit(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        proposals: Vec<Proposal>,
        authenticated_data: Bytes,
        options: CommitOptions,
    ) -> Result<CommitOutput> {
        self.commit_with_source(
            crypto_provider,
            auth_service,
            psk_lookup,
            proposals,
            authenticated_data,
            options,
            None,
        )
        .await
    }

    /// [`Self::prepare_commit`], with `source` providing the resumption PSK of the group this one
    /// was resumed from.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn commit_with_source(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        proposals: Vec<Proposal>,
        authenticated_data: Bytes,
        options: CommitOptions,
        source: Option<(&MlsGroupId, u64, &Secret)>,
    ) -> Result<CommitOutput> {
        let cipher_suite = self.context.cipher_suite;
        let committer = Sender::Member(self.own_leaf);

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.1-3.1
        let mut covered = vec![];
        let mut proposal_or_refs = vec![];
        for pending in self.committable_proposals(&proposals) {
            covered.push((pending.sender, pending.proposal.clone()));
            proposal_or_refs.push(ProposalOrRef::Reference(pending.reference.clone()));
        }
        for proposal in proposals {
            covered.push((committer, proposal.clone()));
            proposal_or_refs.push(ProposalOrRef::Proposal(proposal));
        }

        self.validate_proposal_list(
            crypto_provider,
            auth_service,
            self.own_leaf,
            &covered,
            options.resumption,
        )
        .await?;

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.1-3.3
        let applied = self.apply_proposals(&covered)?;
        let excluded = applied.added_leaves();
        let mut tree = applied.tree.clone();
        let mut private_keys = self.private_keys.clone();

        let psk_secret = self
            .psk_secret(crypto_provider, psk_lookup, &applied.psks, source)
            .await?;

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.1-3.5
        let (path, generated, provisional) = if applied.path_required || options.force_path {
            let generated = tree.apply_own_path(
                crypto_provider,
                cipher_suite,
                &self.context.group_id,
                self.own_leaf,
                &self.signature_key_pair,
                &mut private_keys,
            )?;
            let provisional = self.provisional_context(crypto_provider, &tree, &applied.extensions)?;
            let update_path = tree.encrypt_path_secrets(
                crypto_provider,
                cipher_suite,
                self.own_leaf,
                &generated,
                &excluded,
                &provisional.serialize_detached()?,
            )?;
            (Some(update_path), Some(generated), provisional)
        } else {
            private_keys.prune(&tree);
            let provisional = self.provisional_context(crypto_provider, &tree, &applied.extensions)?;
            (None, None, provisional)
        };
        let commit_secret = match &generated {
            Some(generated) => generated.commit_secret.clone(),
            None => self.zero_commit_secret(crypto_provider)?,
        };

        let wire_format = if options.use_private_message {
            WireFormat::PrivateMessage
        } else {
            WireFormat::PublicMessage
        };
        let content = FramedContent {
            group_id: self.context.group_id.clone(),
            epoch: self.context.epoch,
            sender: committer,
            authenticated_data,
            content: Content::Commit(Commit {
                proposals: proposal_or_refs,
                path,
            }),
        };
        let mut authenticated_content = AuthenticatedContent::new(
            crypto_provider,
            cipher_suite,
            self.signature_key_pair.private_key(),
            wire_format,
            content,
            &self.context,
        )?;

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.1-3.6
        let confirmed_transcript_hash = self.transcript.next_confirmed_hash(
            crypto_provider,
            cipher_suite,
            &authenticated_content.confirmed_transcript_hash_input(),
        )?;
        let context = GroupContext {
            confirmed_transcript_hash,
            ..provisional
        };

        let epoch_secrets = KeySchedule::next_epoch(
            crypto_provider,
            self.key_schedule.init_secret(),
            &commit_secret,
            &context,
            &psk_secret,
        )?;
        let confirmation_tag = epoch_secrets
            .key_schedule
            .confirmation_tag(crypto_provider, &context.confirmed_transcript_hash)?;
        authenticated_content.auth.confirmation_tag = Some(confirmation_tag.clone());

        // The commit is protected with the keys of the epoch it ends.
        let mut secret_tree = self.secret_tree.clone();
        let message = protect(
            crypto_provider,
            &self.context,
            &self.key_schedule,
            &mut secret_tree,
            self.own_leaf,
            authenticated_content,
        )?;

        let joiner_secret = epoch_secrets.joiner_secret.clone();
        let welcome_secret = epoch_secrets.welcome_secret.clone();
        let group = self.next_state(
            crypto_provider,
            tree,
            private_keys,
            context,
            epoch_secrets.key_schedule,
            confirmation_tag,
            applied.reinit.clone(),
        )?;

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.3.1
        let welcome = match &group {
            GroupState::Active(next) if !applied.added.is_empty() => {
                let group_info = next.group_info(crypto_provider)?;
                let mut joiners = Vec::with_capacity(applied.added.len());
                for (leaf_index, key_package) in &applied.added {
                    let path_secret = generated.as_ref().and_then(|generated| {
                        next.tree
                            .common_ancestor_position(self.own_leaf, *leaf_index)
                            .and_then(|position| generated.path_secrets.get(position))
                            .map(|(_, secret)| secret.clone())
                    });
                    joiners.push((
                        key_package.clone(),
                        GroupSecrets {
                            joiner_secret: joiner_secret.clone(),
                            path_secret,
                            psks: applied.psks.clone(),
                        },
                    ));
                }
                Some(Welcome::new(
                    crypto_provider,
                    welcome_secret.as_bytes(),
                    &group_info,
                    &joiners,
                )?)
            }
            _ => None,
        };

        log::debug!(
            "prepared commit for epoch {} covering {} proposals, {} joiners",
            group.epoch(),
            covered.len(),
            applied.added.len()
        );

        Ok(CommitOutput {
            group,
            message,
            welcome,
        })
    }

    /// https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.2
    ///
    /// `authenticated_content` must already be authenticated as coming from `committer`.
    pub(crate) async fn process_commit(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        authenticated_content: &AuthenticatedContent,
        commit: &Commit,
        committer: LeafIndex,
    ) -> Result<GroupState> {
        let cipher_suite = self.context.cipher_suite;
        if committer == self.own_leaf {
            return Err(CommitError::OwnCommit.into());
        }

        let mut covered = Vec::with_capacity(commit.proposals.len());
        for proposal_or_ref in &commit.proposals {
            match proposal_or_ref {
                ProposalOrRef::Proposal(proposal) => {
                    covered.push((Sender::Member(committer), proposal.clone()));
                }
                ProposalOrRef::Reference(reference) => {
                    let pending = self
                        .pending_proposals
                        .iter()
                        .find(|pending| pending.reference == *reference)
                        .ok_or(Error::UnknownProposalRef)?;
                    covered.push((pending.sender, pending.proposal.clone()));
                }
            }
        }

        self.validate_proposal_list(crypto_provider, auth_service, committer, &covered, None)
            .await?;
        let applied = self.apply_proposals(&covered)?;

        if applied.removed.contains(&self.own_leaf) {
            log::debug!(
                "removed from group {:?} by commit of leaf {}",
                self.context.group_id,
                committer
            );
            return Err(CommitError::RemovedFromGroup.into());
        }
        if applied.path_required && commit.path.is_none() {
            return Err(CommitError::PathRequired.into());
        }

        let excluded = applied.added_leaves();
        let mut tree = applied.tree.clone();
        let mut private_keys = self.private_keys.clone();

        // An update proposal of this member was committed: its new leaf key is now in use.
        if let Some(own_leaf) = tree.get_leaf(self.own_leaf) {
            if let Some(key_pair) = self
                .pending_leaf_keys
                .iter()
                .find(|key_pair| key_pair.public_key == own_leaf.encryption_key)
            {
                private_keys.insert(self.own_leaf.node_index(), key_pair.clone());
            }
        }

        let (provisional, commit_secret) = match &commit.path {
            Some(update_path) => {
                let old_leaf = tree
                    .get_leaf(committer)
                    .ok_or(CommitError::InvalidSender)?;
                let identity = auth_service.authenticate_credential(old_leaf).await?;
                auth_service
                    .authenticate_credential_identity(&identity, &update_path.leaf_node)
                    .await?;

                tree.merge_update_path(
                    crypto_provider,
                    cipher_suite,
                    &self.context.group_id,
                    committer,
                    update_path,
                )?;
                let provisional =
                    self.provisional_context(crypto_provider, &tree, &applied.extensions)?;

                let (position, path_secret) = tree.decrypt_path_secret(
                    crypto_provider,
                    cipher_suite,
                    committer,
                    self.own_leaf,
                    update_path,
                    &private_keys,
                    &excluded,
                    &provisional.serialize_detached()?,
                )?;
                let derived = tree.derive_path_keys(
                    crypto_provider,
                    cipher_suite,
                    committer,
                    position,
                    path_secret,
                )?;

                private_keys.prune(&tree);
                for (node, key_pair) in derived.key_pairs {
                    private_keys.insert(node, key_pair);
                }
                (provisional, derived.commit_secret)
            }
            None => {
                private_keys.prune(&tree);
                let provisional =
                    self.provisional_context(crypto_provider, &tree, &applied.extensions)?;
                (provisional, self.zero_commit_secret(crypto_provider)?)
            }
        };

        let psk_secret = self
            .psk_secret(crypto_provider, psk_lookup, &applied.psks, None)
            .await?;

        let confirmed_transcript_hash = self.transcript.next_confirmed_hash(
            crypto_provider,
            cipher_suite,
            &authenticated_content.confirmed_transcript_hash_input(),
        )?;
        let context = GroupContext {
            confirmed_transcript_hash,
            ..provisional
        };

        let epoch_secrets = KeySchedule::next_epoch(
            crypto_provider,
            self.key_schedule.init_secret(),
            &commit_secret,
            &context,
            &psk_secret,
        )?;

        let confirmation_tag = authenticated_content
            .auth
            .confirmation_tag
            .clone()
            .ok_or(CommitError::MissingConfirmationTag)?;
        verify_confirmation_tag(
            crypto_provider,
            cipher_suite,
            epoch_secrets.key_schedule.confirmation_key(),
            &context.confirmed_transcript_hash,
            &confirmation_tag,
        )?;

        self.next_state(
            crypto_provider,
            tree,
            private_keys,
            context,
            epoch_secrets.key_schedule,
            confirmation_tag,
            applied.reinit,
        )
    }
}
