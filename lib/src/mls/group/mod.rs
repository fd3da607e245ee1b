//! [RFC9420 Sec.11](https://www.rfc-editor.org/rfc/rfc9420.html#section-11) Group Creation and
//! [RFC9420 Sec.12](https://www.rfc-editor.org/rfc/rfc9420.html#section-12) Group Evolution
//!
//! A group is always created with a single member, the "creator". Other members are then added to
//! the group using the usual Add/Commit mechanism.
//!
//! Over the lifetime of a group, its membership can change, and existing members might want to
//! change their keys in order to achieve post-compromise security.
//!
//! Every operation that changes the epoch consumes nothing: it returns a new [`GroupState`] and
//! leaves the state it was called on untouched, so a failed commit never corrupts the group.
//! A committed `ReInit` ends the group in a [`SuspendedGroup`], which only remains useful to
//! start its successor.

use bytes::Bytes;

use crate::mls::crypto::key_pair::{HPKEKeyPair, SignatureKeyPair};
use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::proposal::{Proposal, ProposalRef, ReInitProposal};
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::{MlsGroupId, MlsMessage, ProtocolVersion, Sender};
use crate::mls::group::config::GroupConfig;
use crate::mls::key_schedule::{GroupContext, KeySchedule};
use crate::mls::psk::{ResumptionPskHistory, ResumptionPskUsage};
use crate::mls::ratchet_tree::leaf_node::LeafNode;
use crate::mls::ratchet_tree::tree_kem::TreePrivateKeys;
use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::secret_tree::SecretTree;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::tree_math::LeafIndex;

use transcript::ConfirmedTranscriptHash;

#[cfg(test)]
mod group_test;
#[cfg(test)]
mod transcript_test;

pub mod config;
pub mod creation;
pub mod evolution;
pub mod message;
pub mod resumption;
pub mod transcript;
pub mod validation;

/// A proposal received or sent during the current epoch, waiting for a commit.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingProposal {
    pub reference: ProposalRef,
    pub proposal: Proposal,
    pub sender: Sender,
}

/// State of a member in an epoch of a running group.
#[derive(Debug, Clone)]
pub struct ActiveGroup {
    pub(crate) config: GroupConfig,
    pub(crate) own_leaf: LeafIndex,
    pub(crate) context: GroupContext,
    pub(crate) tree: RatchetTree,
    pub(crate) private_keys: TreePrivateKeys,
    pub(crate) key_schedule: KeySchedule,
    pub(crate) secret_tree: SecretTree,
    pub(crate) transcript: ConfirmedTranscriptHash,
    pub(crate) confirmation_tag: Bytes,
    pub(crate) pending_proposals: Vec<PendingProposal>,
    /// Leaf key pairs of Update proposals this member sent in the current epoch.
    pub(crate) pending_leaf_keys: Vec<HPKEKeyPair>,
    pub(crate) resumption_psks: ResumptionPskHistory,
    pub(crate) signature_key_pair: SignatureKeyPair,
}

/// A group that committed a `ReInit` proposal. It cannot send or receive anything anymore and
/// only holds what is needed to start the group that replaces it.
#[derive(Debug, Clone)]
pub struct SuspendedGroup {
    pub(crate) config: GroupConfig,
    pub(crate) own_leaf: LeafIndex,
    pub(crate) context: GroupContext,
    pub(crate) tree: RatchetTree,
    pub(crate) reinit: ReInitProposal,
    pub(crate) resumption_psk: Secret,
    pub(crate) signature_key_pair: SignatureKeyPair,
}

#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum GroupState {
    Active(ActiveGroup),
    Suspended(SuspendedGroup),
}

/// Knobs of a single commit.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct CommitOptions {
    /// Send the commit as a `PrivateMessage` instead of a `PublicMessage`.
    pub use_private_message: bool,
    /// Kind of resumption this commit performs. Only set for the first commit of a branched or
    /// reinitialized group.
    pub resumption: Option<ResumptionPskUsage>,
    /// Include an `UpdatePath` even if no proposal requires one.
    pub force_path: bool,
}

/// Result of [`ActiveGroup::prepare_commit`]: the state of the new epoch, the message to send to
/// the other members, and a `Welcome` if members were added.
#[derive(Debug, Clone)]
pub struct CommitOutput {
    pub group: GroupState,
    pub message: MlsMessage,
    pub welcome: Option<Welcome>,
}

/// Result of [`ActiveGroup::process_message`].
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum ProcessedMessage {
    Application {
        sender: LeafIndex,
        data: Bytes,
        authenticated_data: Bytes,
    },
    /// The proposal was cached until the next commit.
    Proposal {
        sender: Sender,
        reference: ProposalRef,
    },
    /// The state of the epoch the commit created. The state `process_message` was called on
    /// belongs to the previous epoch.
    Commit { sender: LeafIndex, group: GroupState },
}

/// Random group id, used when the caller does not pick one.
pub(crate) fn random_group_id() -> MlsGroupId {
    Bytes::copy_from_slice(uuid::Uuid::new_v4().as_bytes())
}

impl ActiveGroup {
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn context(&self) -> &GroupContext {
        &self.context
    }

    pub fn group_id(&self) -> &MlsGroupId {
        &self.context.group_id
    }

    pub fn epoch(&self) -> u64 {
        self.context.epoch
    }

    pub fn version(&self) -> ProtocolVersion {
        self.context.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.context.cipher_suite
    }

    pub fn own_leaf_index(&self) -> LeafIndex {
        self.own_leaf
    }

    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    pub fn members(&self) -> impl Iterator<Item = (LeafIndex, &LeafNode)> + '_ {
        self.tree.leaves()
    }

    pub fn member_count(&self) -> usize {
        self.tree.member_count()
    }

    pub fn transcript(&self) -> &ConfirmedTranscriptHash {
        &self.transcript
    }

    pub fn confirmation_tag(&self) -> &Bytes {
        &self.confirmation_tag
    }

    pub fn pending_proposals(&self) -> &[PendingProposal] {
        &self.pending_proposals
    }

    /// Secret all members of the epoch agree on, to be compared out of band.
    pub fn epoch_authenticator(&self) -> &Secret {
        self.key_schedule.epoch_authenticator()
    }

    /// Resumption PSK of the current epoch.
    pub fn resumption_psk(&self) -> &Secret {
        self.key_schedule.resumption_psk()
    }

    /// [RFC9420 Sec.8.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.5) `MLS-Exporter`
    pub fn export_secret(
        &self,
        crypto_provider: &impl CryptoProvider,
        label: &[u8],
        context: &[u8],
        length: u16,
    ) -> Result<Secret> {
        self.key_schedule
            .mls_exporter(crypto_provider, label, context, length)
    }

    /// Resumption PSK of a recent epoch, if it is still in the history.
    pub fn past_resumption_psk(&self, epoch: u64) -> Option<&Secret> {
        self.resumption_psks.get(epoch)
    }
}

impl SuspendedGroup {
    pub fn context(&self) -> &GroupContext {
        &self.context
    }

    pub fn group_id(&self) -> &MlsGroupId {
        &self.context.group_id
    }

    pub fn epoch(&self) -> u64 {
        self.context.epoch
    }

    pub fn own_leaf_index(&self) -> LeafIndex {
        self.own_leaf
    }

    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    /// Parameters of the group that replaces this one.
    pub fn reinit(&self) -> &ReInitProposal {
        &self.reinit
    }

    /// Resumption PSK of the final epoch, injected into the first epoch of the new group.
    pub fn resumption_psk(&self) -> &Secret {
        &self.resumption_psk
    }
}

impl GroupState {
    pub fn context(&self) -> &GroupContext {
        match self {
            GroupState::Active(group) => group.context(),
            GroupState::Suspended(group) => group.context(),
        }
    }

    pub fn group_id(&self) -> &MlsGroupId {
        &self.context().group_id
    }

    pub fn epoch(&self) -> u64 {
        self.context().epoch
    }

    pub fn tree(&self) -> &RatchetTree {
        match self {
            GroupState::Active(group) => group.tree(),
            GroupState::Suspended(group) => group.tree(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, GroupState::Active(_))
    }

    pub fn as_active(&self) -> Option<&ActiveGroup> {
        match self {
            GroupState::Active(group) => Some(group),
            GroupState::Suspended(_) => None,
        }
    }

    pub fn as_suspended(&self) -> Option<&SuspendedGroup> {
        match self {
            GroupState::Active(_) => None,
            GroupState::Suspended(group) => Some(group),
        }
    }

    pub fn into_active(self) -> Option<ActiveGroup> {
        match self {
            GroupState::Active(group) => Some(group),
            GroupState::Suspended(_) => None,
        }
    }

    pub fn into_suspended(self) -> Option<SuspendedGroup> {
        match self {
            GroupState::Active(_) => None,
            GroupState::Suspended(group) => Some(group),
        }
    }

    /// Group id, epoch and resumption PSK that a group resumed from this state is bound to,
    /// together with the kind of resumption it allows.
    pub(crate) fn resumption_source(&self) -> (ResumptionPskUsage, &MlsGroupId, u64, &Secret) {
        match self {
            GroupState::Active(group) => (
                ResumptionPskUsage::Branch,
                group.group_id(),
                group.epoch(),
                group.resumption_psk(),
            ),
            GroupState::Suspended(group) => (
                ResumptionPskUsage::ReInit,
                group.group_id(),
                group.epoch(),
                group.resumption_psk(),
            ),
        }
    }
}
