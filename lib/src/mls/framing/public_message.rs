//! [RFC9420 Sec.6.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.2) Encoding and
//! decoding a `PublicMessage`

use bytes::{Buf, BufMut, Bytes};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider};
use crate::mls::framing::{
    framed_content_tbs, AuthenticatedContent, FramedContent, FramedContentAuthData, Sender,
    WireFormat,
};
use crate::mls::key_schedule::GroupContext;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, serialize_opaque_vec, Deserializer, Serializer,
};

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct PublicMessage {
    pub content: FramedContent,
    pub auth: FramedContentAuthData,
    /// Present for member senders only.
    pub membership_tag: Option<Bytes>,
}

impl Deserializer for PublicMessage {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let content = FramedContent::deserialize(buf)?;
        let auth = FramedContentAuthData::deserialize(buf, content.content.content_type())?;
        let membership_tag = match content.sender {
            Sender::Member(_) => Some(deserialize_opaque_vec(buf)?),
            Sender::External(_) => None,
        };

        Ok(Self {
            content,
            auth,
            membership_tag,
        })
    }
}

impl Serializer for PublicMessage {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.content.serialize(buf)?;
        self.auth.serialize(buf, self.content.content.content_type())?;
        if let Sender::Member(_) = self.content.sender {
            let membership_tag = self
                .membership_tag
                .as_ref()
                .ok_or(Error::InvalidMembershipTag)?;
            serialize_opaque_vec(membership_tag, buf)?;
        }
        Ok(())
    }
}

/// `AuthenticatedContentTBM`, the input of the membership tag MAC.
fn authenticated_content_tbm(
    content: &FramedContent,
    auth: &FramedContentAuthData,
    ctx: &GroupContext,
) -> Result<Bytes> {
    let mut buf = framed_content_tbs(WireFormat::PublicMessage, content, ctx)?;
    auth.serialize(&mut buf, content.content.content_type())?;
    Ok(buf.freeze())
}

impl PublicMessage {
    /// Wraps signed content, adding the membership tag for member senders.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        authenticated_content: AuthenticatedContent,
        membership_key: &[u8],
        ctx: &GroupContext,
    ) -> Result<Self> {
        let membership_tag = match authenticated_content.content.sender {
            Sender::Member(_) => {
                let tbm = authenticated_content_tbm(
                    &authenticated_content.content,
                    &authenticated_content.auth,
                    ctx,
                )?;
                Some(crypto_provider.sign_mac(cipher_suite, membership_key, &tbm)?)
            }
            Sender::External(_) => None,
        };

        Ok(Self {
            content: authenticated_content.content,
            auth: authenticated_content.auth,
            membership_tag,
        })
    }

    pub fn verify_membership_tag(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        membership_key: &[u8],
        ctx: &GroupContext,
    ) -> Result<()> {
        let Sender::Member(_) = self.content.sender else {
            return Ok(());
        };
        let tag = self
            .membership_tag
            .as_ref()
            .ok_or(Error::InvalidMembershipTag)?;
        let tbm = authenticated_content_tbm(&self.content, &self.auth, ctx)?;

        if crypto_provider.verify_mac(cipher_suite, membership_key, &tbm, tag)? {
            Ok(())
        } else {
            Err(Error::InvalidMembershipTag)
        }
    }

    pub fn authenticated_content(&self) -> AuthenticatedContent {
        AuthenticatedContent {
            wire_format: WireFormat::PublicMessage,
            content: self.content.clone(),
            auth: self.auth.clone(),
        }
    }
}
