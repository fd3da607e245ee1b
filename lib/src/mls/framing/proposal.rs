//! [RFC9420 Sec.12.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1) Proposals

use bytes::{Buf, BufMut, Bytes};
use std::ops::Deref;

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider};
use crate::mls::extensibility::Extensions;
use crate::mls::framing::{AuthenticatedContent, MlsGroupId, ProtocolVersion};
use crate::mls::key_package::KeyPackage;
use crate::mls::psk::PreSharedKeyId;
use crate::mls::ratchet_tree::leaf_node::LeafNode;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_u16, deserialize_u8, serialize_opaque_vec, Deserializer,
    Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

/// [RFC9420 Sec.17.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-17.4) MLS Proposal Types
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ProposalType {
    Add = 0x0001,
    Update = 0x0002,
    Remove = 0x0003,
    PreSharedKey = 0x0004,
    ReInit = 0x0005,
    GroupContextExtensions = 0x0007,
}

impl TryFrom<u16> for ProposalType {
    type Error = Error;

    fn try_from(v: u16) -> Result<Self> {
        match v {
            0x0001 => Ok(ProposalType::Add),
            0x0002 => Ok(ProposalType::Update),
            0x0003 => Ok(ProposalType::Remove),
            0x0004 => Ok(ProposalType::PreSharedKey),
            0x0005 => Ok(ProposalType::ReInit),
            0x0007 => Ok(ProposalType::GroupContextExtensions),
            _ => Err(Error::InvalidProposalTypeValue(v)),
        }
    }
}

impl Deserializer for ProposalType {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        deserialize_u16(buf)?.try_into()
    }
}

impl Serializer for ProposalType {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u16(*self as u16);
        Ok(())
    }
}

/// [RFC9420 Sec.12.1.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.1) Add
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct AddProposal {
    pub key_package: KeyPackage,
}

/// [RFC9420 Sec.12.1.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.2) Update
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct UpdateProposal {
    pub leaf_node: LeafNode,
}

/// [RFC9420 Sec.12.1.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.3) Remove
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct RemoveProposal {
    pub removed: LeafIndex,
}

/// [RFC9420 Sec.12.1.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.4) PreSharedKey
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct PreSharedKeyProposal {
    pub psk: PreSharedKeyId,
}

/// [RFC9420 Sec.12.1.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.5) ReInit
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct ReInitProposal {
    pub group_id: MlsGroupId,
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub extensions: Extensions,
}

impl Deserializer for ReInitProposal {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            group_id: deserialize_opaque_vec(buf)?,
            version: ProtocolVersion::deserialize(buf)?,
            cipher_suite: CipherSuite::deserialize(buf)?,
            extensions: Extensions::deserialize(buf)?,
        })
    }
}

impl Serializer for ReInitProposal {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.group_id, buf)?;
        self.version.serialize(buf)?;
        self.cipher_suite.serialize(buf)?;
        self.extensions.serialize(buf)
    }
}

/// [RFC9420 Sec.12.1.7](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1.7)
/// GroupContextExtensions
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct GroupContextExtensionsProposal {
    pub extensions: Extensions,
}

/// [RFC9420 Sec.12.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.1) Proposal
#[derive(Debug, Clone, Eq, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum Proposal {
    Add(AddProposal),
    Update(UpdateProposal),
    Remove(RemoveProposal),
    PreSharedKey(PreSharedKeyProposal),
    ReInit(ReInitProposal),
    GroupContextExtensions(GroupContextExtensionsProposal),
}

impl Proposal {
    pub fn proposal_type(&self) -> ProposalType {
        match self {
            Proposal::Add(_) => ProposalType::Add,
            Proposal::Update(_) => ProposalType::Update,
            Proposal::Remove(_) => ProposalType::Remove,
            Proposal::PreSharedKey(_) => ProposalType::PreSharedKey,
            Proposal::ReInit(_) => ProposalType::ReInit,
            Proposal::GroupContextExtensions(_) => ProposalType::GroupContextExtensions,
        }
    }

    /// Whether a commit covering this proposal must carry an `UpdatePath`.
    ///
    /// [RFC9420 Sec.17.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-17.4) the "Path
    /// Required" column.
    pub fn requires_path(&self) -> bool {
        matches!(
            self,
            Proposal::Update(_) | Proposal::Remove(_) | Proposal::GroupContextExtensions(_)
        )
    }
}

impl Deserializer for Proposal {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let proposal = match ProposalType::deserialize(buf)? {
            ProposalType::Add => Proposal::Add(AddProposal {
                key_package: KeyPackage::deserialize(buf)?,
            }),
            ProposalType::Update => Proposal::Update(UpdateProposal {
                leaf_node: LeafNode::deserialize(buf)?,
            }),
            ProposalType::Remove => Proposal::Remove(RemoveProposal {
                removed: LeafIndex::deserialize(buf)?,
            }),
            ProposalType::PreSharedKey => Proposal::PreSharedKey(PreSharedKeyProposal {
                psk: PreSharedKeyId::deserialize(buf)?,
            }),
            ProposalType::ReInit => Proposal::ReInit(ReInitProposal::deserialize(buf)?),
            ProposalType::GroupContextExtensions => {
                Proposal::GroupContextExtensions(GroupContextExtensionsProposal {
                    extensions: Extensions::deserialize(buf)?,
                })
            }
        };

        Ok(proposal)
    }
}

impl Serializer for Proposal {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.proposal_type().serialize(buf)?;
        match self {
            Proposal::Add(add) => add.key_package.serialize(buf),
            Proposal::Update(update) => update.leaf_node.serialize(buf),
            Proposal::Remove(remove) => remove.removed.serialize(buf),
            Proposal::PreSharedKey(psk) => psk.psk.serialize(buf),
            Proposal::ReInit(reinit) => reinit.serialize(buf),
            Proposal::GroupContextExtensions(gce) => gce.extensions.serialize(buf),
        }
    }
}

/// [RFC9420 Sec.5.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.2) `ProposalRef`
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub struct ProposalRef(Bytes);

impl ProposalRef {
    /// `RefHash("MLS 1.0 Proposal Reference", AuthenticatedContent)`
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        authenticated_content: &AuthenticatedContent,
    ) -> Result<Self> {
        let raw = authenticated_content.serialize_detached()?;
        Ok(Self(crypto_provider.ref_hash(
            cipher_suite,
            b"MLS 1.0 Proposal Reference",
            &raw,
        )?))
    }
}

impl Deref for ProposalRef {
    type Target = Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deserializer for ProposalRef {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self(deserialize_opaque_vec(buf)?))
    }
}

impl Serializer for ProposalRef {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.0, buf)
    }
}

/// [RFC9420 Sec.12.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4) `ProposalOrRef`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProposalOrRef {
    Proposal(Proposal),
    Reference(ProposalRef),
}

impl Deserializer for ProposalOrRef {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(ProposalOrRef::Proposal(Proposal::deserialize(buf)?)),
            0x02 => Ok(ProposalOrRef::Reference(ProposalRef::deserialize(buf)?)),
            v => Err(Error::InvalidProposalOrRefValue(v)),
        }
    }
}

impl Serializer for ProposalOrRef {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        match self {
            ProposalOrRef::Proposal(proposal) => {
                buf.put_u8(0x01);
                proposal.serialize(buf)
            }
            ProposalOrRef::Reference(proposal_ref) => {
                buf.put_u8(0x02);
                proposal_ref.serialize(buf)
            }
        }
    }
}
