//! [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) Sending and receiving
//! framed messages within an epoch.

use bytes::Bytes;

use crate::mls::auth::AuthenticationService;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::framing::private_message::PrivateMessage;
use crate::mls::framing::proposal::{Proposal, ProposalRef, UpdateProposal};
use crate::mls::framing::public_message::PublicMessage;
use crate::mls::framing::{
    AuthenticatedContent, Content, ContentType, FramedContent, MlsMessage, MlsMessageBody, Sender,
    WireFormat,
};
use crate::mls::group::{ActiveGroup, GroupState, PendingProposal, ProcessedMessage};
use crate::mls::key_schedule::{GroupContext, KeySchedule};
use crate::mls::psk::PskLookup;
use crate::mls::ratchet_tree::leaf_node::{LeafNode, LeafNodeSource, TreePosition};
use crate::mls::secret_tree::{RatchetLabel, SecretTree};
use crate::mls::utilities::error::{CommitError, Error, ProposalError, Result};
use crate::mls::utilities::tree_math::LeafIndex;

/// Wraps signed content into a `PublicMessage` or, using the next key of the sender's ratchet, a
/// `PrivateMessage`.
pub(crate) fn protect(
    crypto_provider: &impl CryptoProvider,
    context: &GroupContext,
    key_schedule: &KeySchedule,
    secret_tree: &mut SecretTree,
    own_leaf: LeafIndex,
    authenticated_content: AuthenticatedContent,
) -> Result<MlsMessage> {
    let cipher_suite = context.cipher_suite;

    let body = match authenticated_content.wire_format {
        WireFormat::PublicMessage => MlsMessageBody::PublicMessage(PublicMessage::new(
            crypto_provider,
            cipher_suite,
            authenticated_content,
            key_schedule.membership_key().as_bytes(),
            context,
        )?),
        WireFormat::PrivateMessage => {
            let label = RatchetLabel::from(authenticated_content.content_type());
            let ratchet_key = secret_tree.next_key(crypto_provider, own_leaf, label)?;
            MlsMessageBody::PrivateMessage(PrivateMessage::new(
                crypto_provider,
                cipher_suite,
                &authenticated_content,
                own_leaf,
                &ratchet_key,
                key_schedule.sender_data_secret().as_bytes(),
            )?)
        }
        wire_format => return Err(Error::UnexpectedWireFormat(wire_format)),
    };

    Ok(MlsMessage::new(context.version, body))
}

impl ActiveGroup {
    fn sign_content(
        &self,
        crypto_provider: &impl CryptoProvider,
        wire_format: WireFormat,
        authenticated_data: Bytes,
        content: Content,
    ) -> Result<AuthenticatedContent> {
        let content = FramedContent {
            group_id: self.context.group_id.clone(),
            epoch: self.context.epoch,
            sender: Sender::Member(self.own_leaf),
            authenticated_data,
            content,
        };

        AuthenticatedContent::new(
            crypto_provider,
            self.context.cipher_suite,
            self.signature_key_pair.private_key(),
            wire_format,
            content,
            &self.context,
        )
    }

    /// Encrypts application data for the current epoch.
    pub fn encrypt_application_message(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        data: Bytes,
        authenticated_data: Bytes,
    ) -> Result<MlsMessage> {
        let authenticated_content = self.sign_content(
            crypto_provider,
            WireFormat::PrivateMessage,
            authenticated_data,
            Content::Application(data),
        )?;

        protect(
            crypto_provider,
            &self.context,
            &self.key_schedule,
            &mut self.secret_tree,
            self.own_leaf,
            authenticated_content,
        )
    }

    /// Sends a proposal. It is cached like a received one and covered by this member's next
    /// commit unless someone else commits it first.
    pub async fn propose(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        proposal: Proposal,
        authenticated_data: Bytes,
        use_private_message: bool,
    ) -> Result<(MlsMessage, ProposalRef)> {
        let sender = Sender::Member(self.own_leaf);
        self.validate_proposal(crypto_provider, auth_service, &sender, &proposal)
            .await?;

        let wire_format = if use_private_message {
            WireFormat::PrivateMessage
        } else {
            WireFormat::PublicMessage
        };
        let authenticated_content = self.sign_content(
            crypto_provider,
            wire_format,
            authenticated_data,
            Content::Proposal(proposal.clone()),
        )?;
        let reference = ProposalRef::new(
            crypto_provider,
            self.context.cipher_suite,
            &authenticated_content,
        )?;

        let message = protect(
            crypto_provider,
            &self.context,
            &self.key_schedule,
            &mut self.secret_tree,
            self.own_leaf,
            authenticated_content,
        )?;

        self.pending_proposals.push(PendingProposal {
            reference: reference.clone(),
            proposal,
            sender,
        });

        Ok((message, reference))
    }

    /// Proposes to replace this member's leaf with one holding a fresh encryption key.
    pub async fn propose_update(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        authenticated_data: Bytes,
        use_private_message: bool,
    ) -> Result<(MlsMessage, ProposalRef)> {
        let cipher_suite = self.context.cipher_suite;
        let own_leaf = self
            .tree
            .get_leaf(self.own_leaf)
            .ok_or(Error::BlankLeaf(self.own_leaf))?
            .clone();

        let encryption_key_pair = crypto_provider.generate_key_pair(cipher_suite)?;
        let leaf_node = LeafNode::new(
            crypto_provider,
            cipher_suite,
            encryption_key_pair.public_key.clone(),
            own_leaf.credential,
            &self.signature_key_pair,
            LeafNodeSource::Update,
            own_leaf.capabilities,
            own_leaf.extensions,
            Some(&TreePosition {
                group_id: self.context.group_id.clone(),
                leaf_index: self.own_leaf,
            }),
        )?;

        let proposed = self
            .propose(
                crypto_provider,
                auth_service,
                Proposal::Update(UpdateProposal { leaf_node }),
                authenticated_data,
                use_private_message,
            )
            .await?;
        self.pending_leaf_keys.push(encryption_key_pair);

        Ok(proposed)
    }

    /// Authenticates and decrypts a handshake or application message of the current epoch.
    ///
    /// Proposals are cached. A commit yields the state of the next epoch and leaves this one
    /// usable, e.g. to process further messages of the old epoch.
    pub async fn process_message(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        message: &MlsMessage,
    ) -> Result<ProcessedMessage> {
        let cipher_suite = self.context.cipher_suite;
        if message.version != self.context.version {
            return Err(Error::UnsupportedProtocolVersion(message.version));
        }

        let (group_id, epoch) = message
            .group_id_and_epoch()
            .ok_or(Error::UnexpectedWireFormat(message.wire_format()))?;
        if *group_id != self.context.group_id {
            return Err(Error::WrongGroupId);
        }
        if epoch != self.context.epoch {
            return Err(Error::WrongEpoch {
                expected: self.context.epoch,
                got: epoch,
            });
        }

        // Keys are only consumed once the message is fully authenticated.
        let mut secret_tree = self.secret_tree.clone();
        let authenticated_content = match &message.body {
            MlsMessageBody::PublicMessage(public_message) => {
                public_message.verify_membership_tag(
                    crypto_provider,
                    cipher_suite,
                    self.key_schedule.membership_key().as_bytes(),
                    &self.context,
                )?;
                let authenticated_content = public_message.authenticated_content();
                if authenticated_content.content_type() == ContentType::Application {
                    return Err(Error::UnexpectedWireFormat(WireFormat::PublicMessage));
                }
                authenticated_content
            }
            MlsMessageBody::PrivateMessage(private_message) => {
                let sender_data = private_message.decrypt_sender_data(
                    crypto_provider,
                    cipher_suite,
                    self.key_schedule.sender_data_secret().as_bytes(),
                )?;
                let ratchet_key = secret_tree.key_for_generation(
                    crypto_provider,
                    sender_data.leaf_index,
                    RatchetLabel::from(private_message.content_type),
                    sender_data.generation,
                )?;
                let content = private_message.decrypt_content(
                    crypto_provider,
                    cipher_suite,
                    &ratchet_key,
                    &sender_data.reuse_guard,
                )?;
                private_message.authenticated_content(&sender_data, content)
            }
            _ => return Err(Error::UnexpectedWireFormat(message.wire_format())),
        };

        let sender = authenticated_content.content.sender;
        let is_commit = matches!(authenticated_content.content.content, Content::Commit(_));
        let sender_index = match sender.as_member() {
            Some(leaf_index) => leaf_index,
            None if is_commit => return Err(CommitError::InvalidSender.into()),
            None => return Err(ProposalError::InvalidSender.into()),
        };
        let sender_leaf = self
            .tree
            .get_leaf(sender_index)
            .ok_or(Error::BlankLeaf(sender_index))?;

        match authenticated_content.verify_signature(
            crypto_provider,
            cipher_suite,
            &sender_leaf.signature_key,
            &self.context,
        ) {
            Err(Error::InvalidSignature) if is_commit => {
                return Err(CommitError::InvalidSignature.into())
            }
            result => result?,
        }

        let processed = match &authenticated_content.content.content {
            Content::Application(data) => ProcessedMessage::Application {
                sender: sender_index,
                data: data.clone(),
                authenticated_data: authenticated_content.content.authenticated_data.clone(),
            },
            Content::Proposal(proposal) => {
                self.validate_proposal(crypto_provider, auth_service, &sender, proposal)
                    .await
                    .inspect_err(|err| {
                        log::warn!("rejected proposal from leaf {sender_index}: {err}");
                    })?;
                let reference =
                    ProposalRef::new(crypto_provider, cipher_suite, &authenticated_content)?;
                if self
                    .pending_proposals
                    .iter()
                    .any(|pending| pending.reference == reference)
                {
                    log::debug!("proposal {reference:?} from leaf {sender_index} is already pending");
                } else {
                    log::debug!(
                        "cached proposal {:?} from leaf {}",
                        proposal.proposal_type(),
                        sender_index
                    );
                    self.pending_proposals.push(PendingProposal {
                        reference: reference.clone(),
                        proposal: proposal.clone(),
                        sender,
                    });
                }
                ProcessedMessage::Proposal { sender, reference }
            }
            Content::Commit(commit) => {
                let group = self
                    .process_commit(
                        crypto_provider,
                        auth_service,
                        psk_lookup,
                        &authenticated_content,
                        commit,
                        sender_index,
                    )
                    .await
                    .inspect_err(|err| {
                        log::warn!("rejected commit from leaf {sender_index}: {err}");
                    })?;
                ProcessedMessage::Commit {
                    sender: sender_index,
                    group,
                }
            }
        };

        self.secret_tree = secret_tree;
        Ok(processed)
    }
}

impl GroupState {
    /// [`ActiveGroup::process_message`] for a group in any state. A suspended group rejects
    /// everything.
    pub async fn process_message(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        message: &MlsMessage,
    ) -> Result<ProcessedMessage> {
        match self {
            GroupState::Active(group) => {
                group
                    .process_message(crypto_provider, auth_service, psk_lookup, message)
                    .await
            }
            GroupState::Suspended(_) => Err(CommitError::GroupSuspended.into()),
        }
    }

    /// [`ActiveGroup::encrypt_application_message`] for a group in any state.
    pub fn encrypt_application_message(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        data: Bytes,
        authenticated_data: Bytes,
    ) -> Result<MlsMessage> {
        match self {
            GroupState::Active(group) => {
                group.encrypt_application_message(crypto_provider, data, authenticated_data)
            }
            GroupState::Suspended(_) => Err(CommitError::GroupSuspended.into()),
        }
    }
}
