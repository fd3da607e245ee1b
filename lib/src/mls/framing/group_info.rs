//! [RFC9420 Sec.12.4.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.3) Adding New
//! Members

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::extensibility::Extensions;
use crate::mls::key_schedule::GroupContext;
use crate::mls::psk::PreSharedKeyId;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_optional, deserialize_slice, serialize_opaque_vec,
    serialize_optional, serialize_slice, Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

/// `GroupInfo` describes the group for new members, it is signed by the committer.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct GroupInfo {
    pub group_context: GroupContext,
    pub extensions: Extensions,
    pub confirmation_tag: Bytes,
    pub signer: LeafIndex,
    pub signature: Bytes,
}

impl GroupInfo {
    /// Builds and signs a `GroupInfo`.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        group_context: GroupContext,
        extensions: Extensions,
        confirmation_tag: Bytes,
        signer: LeafIndex,
        sign_key: &[u8],
    ) -> Result<Self> {
        let mut group_info = Self {
            group_context,
            extensions,
            confirmation_tag,
            signer,
            signature: Bytes::new(),
        };

        let tbs = group_info.to_be_signed()?;
        group_info.signature = crypto_provider.sign_with_label(
            group_info.group_context.cipher_suite,
            sign_key,
            b"GroupInfoTBS",
            &tbs,
        )?;

        Ok(group_info)
    }

    fn to_be_signed(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.group_context.serialize(&mut buf)?;
        self.extensions.serialize(&mut buf)?;
        serialize_opaque_vec(&self.confirmation_tag, &mut buf)?;
        self.signer.serialize(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.group_context.cipher_suite
    }

    pub fn verify_signature(
        &self,
        crypto_provider: &impl CryptoProvider,
        verify_key: &[u8],
    ) -> Result<()> {
        let tbs = self.to_be_signed()?;
        crypto_provider.verify_with_label(
            self.cipher_suite(),
            verify_key,
            b"GroupInfoTBS",
            &tbs,
            &self.signature,
        )
    }
}

impl Deserializer for GroupInfo {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            group_context: GroupContext::deserialize(buf)?,
            extensions: Extensions::deserialize(buf)?,
            confirmation_tag: deserialize_opaque_vec(buf)?,
            signer: LeafIndex::deserialize(buf)?,
            signature: deserialize_opaque_vec(buf)?,
        })
    }
}

impl Serializer for GroupInfo {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put(self.to_be_signed()?);
        serialize_opaque_vec(&self.signature, buf)
    }
}

/// Secrets a new member needs to join, HPKE-encrypted to its key package's init key.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct GroupSecrets {
    pub joiner_secret: Secret,
    pub path_secret: Option<Secret>,
    pub psks: Vec<PreSharedKeyId>,
}

impl Deserializer for GroupSecrets {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let joiner_secret = Secret::deserialize(buf)?;
        let path_secret = if deserialize_optional(buf)? {
            Some(Secret::deserialize(buf)?)
        } else {
            None
        };
        let psks = deserialize_slice(buf)?;

        Ok(Self {
            joiner_secret,
            path_secret,
            psks,
        })
    }
}

impl Serializer for GroupSecrets {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.joiner_secret.serialize(buf)?;
        serialize_optional(self.path_secret.is_some(), buf)?;
        if let Some(path_secret) = &self.path_secret {
            path_secret.serialize(buf)?;
        }
        serialize_slice(&self.psks, buf)
    }
}
