//! [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) Message Framing
//!
//! Handshake and application messages use a common framing structure, [`FramedContent`], which is
//! signed by its sender and then either published as a [`public_message::PublicMessage`] or
//! encrypted into a [`private_message::PrivateMessage`].

#[cfg(test)]
mod framing_test;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider};
use crate::mls::key_package::KeyPackage;
use crate::mls::key_schedule::{ConfirmedTranscriptHashInput, GroupContext};
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_u16, deserialize_u32, deserialize_u64, deserialize_u8,
    serialize_opaque_vec, Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

pub mod commit;
pub mod group_info;
pub mod private_message;
pub mod proposal;
pub mod public_message;
pub mod welcome;

use commit::Commit;
use group_info::GroupInfo;
use private_message::PrivateMessage;
use proposal::Proposal;
use public_message::PublicMessage;
use welcome::Welcome;

pub type MlsGroupId = Bytes;

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `ProtocolVersion`
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ProtocolVersion {
    #[default]
    MLS10,
    Unknown(u16),
}

impl From<u16> for ProtocolVersion {
    fn from(v: u16) -> Self {
        match v {
            0x0001 => ProtocolVersion::MLS10,
            _ => ProtocolVersion::Unknown(v),
        }
    }
}

impl From<ProtocolVersion> for u16 {
    fn from(val: ProtocolVersion) -> u16 {
        match val {
            ProtocolVersion::MLS10 => 0x0001,
            ProtocolVersion::Unknown(v) => v,
        }
    }
}

impl Deserializer for ProtocolVersion {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u16(buf)? {
            0 => Err(Error::InvalidProtocolVersion(0)),
            v => Ok(v.into()),
        }
    }
}

impl Serializer for ProtocolVersion {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u16((*self).into());
        Ok(())
    }
}

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `WireFormat`
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum WireFormat {
    #[default]
    PublicMessage = 0x0001,
    PrivateMessage = 0x0002,
    Welcome = 0x0003,
    GroupInfo = 0x0004,
    KeyPackage = 0x0005,
}

impl Deserializer for WireFormat {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u16(buf)? {
            0x0001 => Ok(WireFormat::PublicMessage),
            0x0002 => Ok(WireFormat::PrivateMessage),
            0x0003 => Ok(WireFormat::Welcome),
            0x0004 => Ok(WireFormat::GroupInfo),
            0x0005 => Ok(WireFormat::KeyPackage),
            v => Err(Error::InvalidWireFormatValue(v)),
        }
    }
}

impl Serializer for WireFormat {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u16(*self as u16);
        Ok(())
    }
}

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `ContentType`
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ContentType {
    #[default]
    Application = 0x01,
    Proposal = 0x02,
    Commit = 0x03,
}

impl Deserializer for ContentType {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(ContentType::Application),
            0x02 => Ok(ContentType::Proposal),
            0x03 => Ok(ContentType::Commit),
            v => Err(Error::InvalidContentTypeValue(v)),
        }
    }
}

impl Serializer for ContentType {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u8(*self as u8);
        Ok(())
    }
}

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `Sender`
///
/// Only members and pre-configured external senders are supported.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sender {
    Member(LeafIndex),
    External(u32),
}

impl Default for Sender {
    fn default() -> Self {
        Sender::Member(LeafIndex::default())
    }
}

impl Sender {
    pub fn as_member(&self) -> Option<LeafIndex> {
        match self {
            Sender::Member(leaf_index) => Some(*leaf_index),
            Sender::External(_) => None,
        }
    }
}

impl Deserializer for Sender {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(Sender::Member(LeafIndex::deserialize(buf)?)),
            0x02 => Ok(Sender::External(deserialize_u32(buf)?)),
            v => Err(Error::InvalidSenderTypeValue(v)),
        }
    }
}

impl Serializer for Sender {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        match self {
            Sender::Member(leaf_index) => {
                buf.put_u8(0x01);
                leaf_index.serialize(buf)
            }
            Sender::External(sender_index) => {
                buf.put_u8(0x02);
                buf.put_u32(*sender_index);
                Ok(())
            }
        }
    }
}

/// Body of a [`FramedContent`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Content {
    Application(Bytes),
    Proposal(Proposal),
    Commit(Commit),
}

impl Default for Content {
    fn default() -> Self {
        Content::Application(Bytes::new())
    }
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Application(_) => ContentType::Application,
            Content::Proposal(_) => ContentType::Proposal,
            Content::Commit(_) => ContentType::Commit,
        }
    }

    pub(crate) fn deserialize_body<B: Buf>(buf: &mut B, content_type: ContentType) -> Result<Self> {
        match content_type {
            ContentType::Application => Ok(Content::Application(deserialize_opaque_vec(buf)?)),
            ContentType::Proposal => Ok(Content::Proposal(Proposal::deserialize(buf)?)),
            ContentType::Commit => Ok(Content::Commit(Commit::deserialize(buf)?)),
        }
    }

    pub(crate) fn serialize_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Content::Application(application) => serialize_opaque_vec(application, buf),
            Content::Proposal(proposal) => proposal.serialize(buf),
            Content::Commit(commit) => commit.serialize(buf),
        }
    }
}

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `FramedContent`
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct FramedContent {
    pub group_id: MlsGroupId,
    pub epoch: u64,
    pub sender: Sender,
    pub authenticated_data: Bytes,
    pub content: Content,
}

impl Deserializer for FramedContent {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let group_id = deserialize_opaque_vec(buf)?;
        let epoch = deserialize_u64(buf)?;
        let sender = Sender::deserialize(buf)?;
        let authenticated_data = deserialize_opaque_vec(buf)?;
        let content_type = ContentType::deserialize(buf)?;
        let content = Content::deserialize_body(buf, content_type)?;

        Ok(Self {
            group_id,
            epoch,
            sender,
            authenticated_data,
            content,
        })
    }
}

impl Serializer for FramedContent {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.group_id, buf)?;
        buf.put_u64(self.epoch);
        self.sender.serialize(buf)?;
        serialize_opaque_vec(&self.authenticated_data, buf)?;
        self.content.content_type().serialize(buf)?;
        self.content.serialize_body(buf)
    }
}

/// [RFC9420 Sec.6.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.1) `FramedContentTBS`,
/// the group context is only bound for member senders.
pub(crate) fn framed_content_tbs(
    wire_format: WireFormat,
    content: &FramedContent,
    context: &GroupContext,
) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    context.version.serialize(&mut buf)?;
    wire_format.serialize(&mut buf)?;
    content.serialize(&mut buf)?;
    if let Sender::Member(_) = content.sender {
        context.serialize(&mut buf)?;
    }
    Ok(buf)
}

/// [RFC9420 Sec.6.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.1)
/// `FramedContentAuthData`, the confirmation tag is present for commits only.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct FramedContentAuthData {
    pub signature: Bytes,
    pub confirmation_tag: Option<Bytes>,
}

impl FramedContentAuthData {
    pub(crate) fn deserialize<B: Buf>(buf: &mut B, content_type: ContentType) -> Result<Self> {
        let signature = deserialize_opaque_vec(buf)?;
        let confirmation_tag = if content_type == ContentType::Commit {
            Some(deserialize_opaque_vec(buf)?)
        } else {
            None
        };

        Ok(Self {
            signature,
            confirmation_tag,
        })
    }

    pub(crate) fn serialize<B: BufMut>(&self, buf: &mut B, content_type: ContentType) -> Result<()> {
        serialize_opaque_vec(&self.signature, buf)?;
        if content_type == ContentType::Commit {
            let confirmation_tag = self
                .confirmation_tag
                .as_ref()
                .ok_or(crate::mls::utilities::error::CommitError::MissingConfirmationTag)?;
            serialize_opaque_vec(confirmation_tag, buf)?;
        }
        Ok(())
    }
}

/// [RFC9420 Sec.6.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.1)
/// `AuthenticatedContent`, a signed [`FramedContent`].
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct AuthenticatedContent {
    pub wire_format: WireFormat,
    pub content: FramedContent,
    pub auth: FramedContentAuthData,
}

impl AuthenticatedContent {
    /// Signs `content` as `FramedContentTBS`. The confirmation tag of a commit is set afterwards.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        sign_key: &[u8],
        wire_format: WireFormat,
        content: FramedContent,
        ctx: &GroupContext,
    ) -> Result<Self> {
        let tbs = framed_content_tbs(wire_format, &content, ctx)?;
        let signature =
            crypto_provider.sign_with_label(cipher_suite, sign_key, b"FramedContentTBS", &tbs)?;

        Ok(Self {
            wire_format,
            content,
            auth: FramedContentAuthData {
                signature,
                confirmation_tag: None,
            },
        })
    }

    pub fn verify_signature(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        verify_key: &[u8],
        ctx: &GroupContext,
    ) -> Result<()> {
        let tbs = framed_content_tbs(self.wire_format, &self.content, ctx)?;
        crypto_provider.verify_with_label(
            cipher_suite,
            verify_key,
            b"FramedContentTBS",
            &tbs,
            &self.auth.signature,
        )
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content.content_type()
    }

    pub(crate) fn confirmed_transcript_hash_input(&self) -> ConfirmedTranscriptHashInput {
        ConfirmedTranscriptHashInput {
            wire_format: self.wire_format,
            content: self.content.clone(),
            signature: self.auth.signature.clone(),
        }
    }
}

impl Deserializer for AuthenticatedContent {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let wire_format = WireFormat::deserialize(buf)?;
        let content = FramedContent::deserialize(buf)?;
        let auth = FramedContentAuthData::deserialize(buf, content.content.content_type())?;

        Ok(Self {
            wire_format,
            content,
            auth,
        })
    }
}

impl Serializer for AuthenticatedContent {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.wire_format.serialize(buf)?;
        self.content.serialize(buf)?;
        self.auth.serialize(buf, self.content_type())
    }
}

/// [RFC9420 Sec.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-6) `MLSMessage`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MlsMessage {
    pub version: ProtocolVersion,
    pub body: MlsMessageBody,
}

#[derive(Debug, Clone, Eq, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum MlsMessageBody {
    PublicMessage(PublicMessage),
    PrivateMessage(PrivateMessage),
    Welcome(Welcome),
    GroupInfo(GroupInfo),
    KeyPackage(KeyPackage),
}

impl MlsMessage {
    pub fn new(version: ProtocolVersion, body: MlsMessageBody) -> Self {
        Self { version, body }
    }

    pub fn wire_format(&self) -> WireFormat {
        match &self.body {
            MlsMessageBody::PublicMessage(_) => WireFormat::PublicMessage,
            MlsMessageBody::PrivateMessage(_) => WireFormat::PrivateMessage,
            MlsMessageBody::Welcome(_) => WireFormat::Welcome,
            MlsMessageBody::GroupInfo(_) => WireFormat::GroupInfo,
            MlsMessageBody::KeyPackage(_) => WireFormat::KeyPackage,
        }
    }

    /// Group id and epoch for handshake and application messages.
    pub fn group_id_and_epoch(&self) -> Option<(&MlsGroupId, u64)> {
        match &self.body {
            MlsMessageBody::PublicMessage(message) => {
                Some((&message.content.group_id, message.content.epoch))
            }
            MlsMessageBody::PrivateMessage(message) => Some((&message.group_id, message.epoch)),
            _ => None,
        }
    }
}

impl Deserializer for MlsMessage {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let version = ProtocolVersion::deserialize(buf)?;
        let body = match WireFormat::deserialize(buf)? {
            WireFormat::PublicMessage => {
                MlsMessageBody::PublicMessage(PublicMessage::deserialize(buf)?)
            }
            WireFormat::PrivateMessage => {
                MlsMessageBody::PrivateMessage(PrivateMessage::deserialize(buf)?)
            }
            WireFormat::Welcome => MlsMessageBody::Welcome(Welcome::deserialize(buf)?),
            WireFormat::GroupInfo => MlsMessageBody::GroupInfo(GroupInfo::deserialize(buf)?),
            WireFormat::KeyPackage => MlsMessageBody::KeyPackage(KeyPackage::deserialize(buf)?),
        };

        Ok(Self { version, body })
    }
}

impl Serializer for MlsMessage {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.version.serialize(buf)?;
        self.wire_format().serialize(buf)?;
        match &self.body {
            MlsMessageBody::PublicMessage(message) => message.serialize(buf),
            MlsMessageBody::PrivateMessage(message) => message.serialize(buf),
            MlsMessageBody::Welcome(welcome) => welcome.serialize(buf),
            MlsMessageBody::GroupInfo(group_info) => group_info.serialize(buf),
            MlsMessageBody::KeyPackage(key_package) => key_package.serialize(buf),
        }
    }
}
