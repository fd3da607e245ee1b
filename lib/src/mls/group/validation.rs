//! [RFC9420 Sec.12.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.2) Proposal List
//! Validation
//!
//! Every proposal is checked on its own when it is received, and the full list again when a
//! commit covers it.

use std::collections::HashSet;

use crate::mls::auth::AuthenticationService;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::framing::proposal::Proposal;
use crate::mls::framing::Sender;
use crate::mls::crypto::SignaturePublicKey;
use crate::mls::group::{ActiveGroup, PendingProposal};
use crate::mls::psk::{validate_psk_ids, PreSharedKeyId, ResumptionPskUsage};
use crate::mls::ratchet_tree::leaf_node::{LeafNode, LeafNodeSource, TreePosition};
use crate::mls::utilities::error::{ProposalError, PskError, Result};
use crate::mls::utilities::tree_math::LeafIndex;

impl ActiveGroup {
    fn proposal_sender(&self, sender: &Sender) -> Result<(LeafIndex, &LeafNode)> {
        let leaf_index = sender.as_member().ok_or(ProposalError::InvalidSender)?;
        let leaf = self
            .tree
            .get_leaf(leaf_index)
            .ok_or(ProposalError::InvalidSender)?;
        Ok((leaf_index, leaf))
    }

    /// Whether a leaf other than `except` already uses the signature or encryption key of `leaf`.
    fn check_unique_keys(&self, leaf: &LeafNode, except: Option<LeafIndex>) -> Result<()> {
        for (leaf_index, member) in self.tree.leaves() {
            if Some(leaf_index) == except {
                continue;
            }
            if member.signature_key == leaf.signature_key {
                return Err(ProposalError::DuplicateSignatureKey.into());
            }
            if member.encryption_key == leaf.encryption_key {
                return Err(ProposalError::DuplicateEncryptionKey.into());
            }
        }
        Ok(())
    }

    /// Pending proposals a commit by this member covers. Replays, removals of the committer and
    /// proposals that conflict with an earlier one, or with one sent by value, are left out.
    ///
    /// <https://www.rfc-editor.org/rfc/rfc9420.html#section-12.2-5>
    pub(crate) fn committable_proposals(&self, by_value: &[Proposal]) -> Vec<&PendingProposal> {
        let committer = Sender::Member(self.own_leaf);
        let mut references = HashSet::new();
        let mut touched_leaves: HashSet<LeafIndex> = by_value
            .iter()
            .filter_map(|proposal| match proposal {
                Proposal::Remove(remove) => Some(remove.removed),
                _ => None,
            })
            .collect();
        let mut added_signature_keys: HashSet<SignaturePublicKey> = by_value
            .iter()
            .filter_map(|proposal| match proposal {
                Proposal::Add(add) => Some(add.key_package.leaf_node.signature_key.clone()),
                _ => None,
            })
            .collect();
        let mut has_extensions = by_value
            .iter()
            .any(|proposal| matches!(proposal, Proposal::GroupContextExtensions(_)));

        self.pending_proposals
            .iter()
            .filter(|pending| {
                if !references.insert(&pending.reference) {
                    return false;
                }
                match &pending.proposal {
                    // The committer's own updates are replaced by its path.
                    Proposal::Update(_) => match pending.sender.as_member() {
                        Some(leaf_index) if pending.sender != committer => {
                            touched_leaves.insert(leaf_index)
                        }
                        _ => false,
                    },
                    Proposal::Remove(remove) => {
                        remove.removed != self.own_leaf && touched_leaves.insert(remove.removed)
                    }
                    Proposal::Add(add) => added_signature_keys
                        .insert(add.key_package.leaf_node.signature_key.clone()),
                    Proposal::GroupContextExtensions(_) => {
                        !std::mem::replace(&mut has_extensions, true)
                    }
                    Proposal::PreSharedKey(_) | Proposal::ReInit(_) => true,
                }
            })
            .collect()
    }

    /// Checks a single proposal against the current epoch.
    pub(crate) async fn validate_proposal(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        sender: &Sender,
        proposal: &Proposal,
    ) -> Result<()> {
        let (sender_index, sender_leaf) = self.proposal_sender(sender)?;
        let cipher_suite = self.context.cipher_suite;

        match proposal {
            Proposal::Add(add) => {
                let key_package = &add.key_package;
                key_package.verify(crypto_provider, self.context.version, cipher_suite)?;
                auth_service
                    .authenticate_credential(&key_package.leaf_node)
                    .await?;

                let capabilities = &key_package.leaf_node.capabilities;
                if !self
                    .context
                    .extensions
                    .extension_types()
                    .all(|extension_type| capabilities.supports_extension(extension_type))
                {
                    return Err(ProposalError::UnsupportedExtension.into());
                }

                self.check_unique_keys(&key_package.leaf_node, None)?;
            }
            Proposal::Update(update) => {
                let leaf_node = &update.leaf_node;
                if leaf_node.leaf_node_source != LeafNodeSource::Update {
                    return Err(ProposalError::InvalidLeafNodeSource.into());
                }

                let position = TreePosition {
                    group_id: self.context.group_id.clone(),
                    leaf_index: sender_index,
                };
                leaf_node
                    .verify_signature(crypto_provider, cipher_suite, Some(&position))
                    .map_err(|_| ProposalError::InvalidLeafNodeSignature)?;

                let identity = auth_service.authenticate_credential(sender_leaf).await?;
                auth_service
                    .authenticate_credential_identity(&identity, leaf_node)
                    .await?;

                if leaf_node.encryption_key == sender_leaf.encryption_key {
                    return Err(ProposalError::DuplicateEncryptionKey.into());
                }
                self.check_unique_keys(leaf_node, Some(sender_index))?;
            }
            Proposal::Remove(remove) => {
                if self.tree.get_leaf(remove.removed).is_none() {
                    return Err(ProposalError::BlankLeaf(remove.removed).into());
                }
            }
            Proposal::PreSharedKey(psk) => {
                let nh = crypto_provider.hash_size(cipher_suite)?;
                if psk.psk.psk_nonce.len() != nh {
                    return Err(PskError::InvalidNonceLength {
                        expected: nh,
                        got: psk.psk.psk_nonce.len(),
                    }
                    .into());
                }
            }
            Proposal::ReInit(reinit) => {
                if u16::from(reinit.version) < u16::from(self.context.version) {
                    return Err(ProposalError::ReInitVersionDowngrade.into());
                }
            }
            Proposal::GroupContextExtensions(gce) => {
                let all_supported = self.tree.leaves().all(|(_, leaf)| {
                    gce.extensions
                        .extension_types()
                        .all(|extension_type| leaf.capabilities.supports_extension(extension_type))
                });
                if !all_supported {
                    return Err(ProposalError::UnsupportedExtension.into());
                }
            }
        }

        Ok(())
    }

    /// Checks the list of proposals a commit by `committer` covers.
    ///
    /// `resumption` is set for the first commit of a branched or reinitialized group, which may
    /// only add members and inject PSKs.
    pub(crate) async fn validate_proposal_list(
        &self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        committer: LeafIndex,
        proposals: &[(Sender, Proposal)],
        resumption: Option<ResumptionPskUsage>,
    ) -> Result<()> {
        let mut touched_leaves = HashSet::new();
        let mut added_signature_keys = HashSet::new();
        let mut psk_ids: Vec<PreSharedKeyId> = vec![];
        let mut group_context_extensions = 0;

        for (sender, proposal) in proposals {
            self.validate_proposal(crypto_provider, auth_service, sender, proposal)
                .await?;

            if resumption.is_some()
                && !matches!(proposal, Proposal::Add(_) | Proposal::PreSharedKey(_))
            {
                return Err(ProposalError::InvalidInResumption.into());
            }

            match proposal {
                Proposal::Add(add) => {
                    let signature_key = &add.key_package.leaf_node.signature_key;
                    if !added_signature_keys.insert(signature_key) {
                        return Err(ProposalError::DuplicateSignatureKey.into());
                    }
                }
                Proposal::Update(_) => {
                    let (leaf_index, _) = self.proposal_sender(sender)?;
                    if leaf_index == committer {
                        return Err(ProposalError::UpdateByCommitter.into());
                    }
                    if !touched_leaves.insert(leaf_index) {
                        return Err(ProposalError::DuplicateUpdateOrRemove(leaf_index).into());
                    }
                }
                Proposal::Remove(remove) => {
                    if remove.removed == committer {
                        return Err(ProposalError::RemoveOfCommitter.into());
                    }
                    if !touched_leaves.insert(remove.removed) {
                        return Err(ProposalError::DuplicateUpdateOrRemove(remove.removed).into());
                    }
                }
                Proposal::PreSharedKey(psk) => psk_ids.push(psk.psk.clone()),
                Proposal::ReInit(_) => {
                    if proposals.len() != 1 {
                        return Err(ProposalError::ReInitNotAlone.into());
                    }
                }
                Proposal::GroupContextExtensions(_) => {
                    group_context_extensions += 1;
                    if group_context_extensions > 1 {
                        return Err(ProposalError::MultipleGroupContextExtensions.into());
                    }
                }
            }
        }

        validate_psk_ids(
            crypto_provider,
            self.context.cipher_suite,
            &psk_ids,
            resumption,
        )
    }
}
