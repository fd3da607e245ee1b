use bytes::{Buf, BufMut, Bytes};

use crate::mls::crypto::rng::random_bytes;
use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::{
    AuthenticatedContent, Content, ContentType, FramedContent, FramedContentAuthData, MlsGroupId,
    Sender, WireFormat,
};
use crate::mls::secret_tree::RatchetKey;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_u32, deserialize_u64, serialize_opaque_vec, Deserializer,
    Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

/// [RFC9420 Sec.6.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.3) Authenticated and
/// encrypted messages are encoded using the `PrivateMessage` structure.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct PrivateMessage {
    pub group_id: MlsGroupId,
    pub epoch: u64,
    pub content_type: ContentType,
    pub authenticated_data: Bytes,
    pub encrypted_sender_data: Bytes,
    pub ciphertext: Bytes,
}

impl Deserializer for PrivateMessage {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let group_id = deserialize_opaque_vec(buf)?;
        let epoch = deserialize_u64(buf)?;
        let content_type = ContentType::deserialize(buf)?;
        let authenticated_data = deserialize_opaque_vec(buf)?;
        let encrypted_sender_data = deserialize_opaque_vec(buf)?;
        let ciphertext = deserialize_opaque_vec(buf)?;

        Ok(Self {
            group_id,
            epoch,
            content_type,
            authenticated_data,
            encrypted_sender_data,
            ciphertext,
        })
    }
}

impl Serializer for PrivateMessage {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.group_id, buf)?;
        buf.put_u64(self.epoch);
        self.content_type.serialize(buf)?;
        serialize_opaque_vec(&self.authenticated_data, buf)?;
        serialize_opaque_vec(&self.encrypted_sender_data, buf)?;
        serialize_opaque_vec(&self.ciphertext, buf)
    }
}

impl PrivateMessage {
    /// Encrypts signed content with the ratchet key of the sender's leaf.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        authenticated_content: &AuthenticatedContent,
        leaf_index: LeafIndex,
        ratchet_key: &RatchetKey,
        sender_data_secret: &[u8],
    ) -> Result<PrivateMessage> {
        let content = &authenticated_content.content;
        let sender_data = SenderData {
            leaf_index,
            generation: ratchet_key.generation,
            reuse_guard: random_bytes::<4>(),
        };

        let priv_content = PrivateMessageContent {
            content: content.content.clone(),
            auth: authenticated_content.auth.clone(),
        };
        let plaintext = priv_content.serialize_detached()?;

        let nonce = apply_reuse_guard(ratchet_key.nonce.as_bytes(), &sender_data.reuse_guard)?;
        let aad = PrivateContentAAD {
            group_id: content.group_id.clone(),
            epoch: content.epoch,
            content_type: content.content.content_type(),
            authenticated_data: content.authenticated_data.clone(),
        };
        let ciphertext = crypto_provider.hpke(cipher_suite)?.aead_seal(
            ratchet_key.key.as_bytes(),
            &nonce,
            &plaintext,
            &aad.serialize_detached()?,
        )?;

        let (key, nonce) =
            sender_data_key_and_nonce(crypto_provider, cipher_suite, sender_data_secret, &ciphertext)?;
        let sender_data_aad = SenderDataAAD {
            group_id: content.group_id.clone(),
            epoch: content.epoch,
            content_type: content.content.content_type(),
        };
        let encrypted_sender_data = crypto_provider.hpke(cipher_suite)?.aead_seal(
            key.as_bytes(),
            nonce.as_bytes(),
            &sender_data.serialize_detached()?,
            &sender_data_aad.serialize_detached()?,
        )?;

        Ok(PrivateMessage {
            group_id: content.group_id.clone(),
            epoch: content.epoch,
            content_type: content.content.content_type(),
            authenticated_data: content.authenticated_data.clone(),
            encrypted_sender_data,
            ciphertext,
        })
    }

    pub(crate) fn decrypt_sender_data(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        sender_data_secret: &[u8],
    ) -> Result<SenderData> {
        let (key, nonce) = sender_data_key_and_nonce(
            crypto_provider,
            cipher_suite,
            sender_data_secret,
            &self.ciphertext,
        )?;

        let aad = SenderDataAAD {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            content_type: self.content_type,
        };

        let raw_sender_data = crypto_provider.hpke(cipher_suite)?.aead_open(
            key.as_bytes(),
            nonce.as_bytes(),
            &self.encrypted_sender_data,
            &aad.serialize_detached()?,
        )?;

        SenderData::deserialize_exact(&raw_sender_data)
    }

    pub(crate) fn decrypt_content(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        ratchet_key: &RatchetKey,
        reuse_guard: &[u8],
    ) -> Result<PrivateMessageContent> {
        let nonce = apply_reuse_guard(ratchet_key.nonce.as_bytes(), reuse_guard)?;
        let aad = PrivateContentAAD {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            content_type: self.content_type,
            authenticated_data: self.authenticated_data.clone(),
        };

        let raw_content = crypto_provider.hpke(cipher_suite)?.aead_open(
            ratchet_key.key.as_bytes(),
            &nonce,
            &self.ciphertext,
            &aad.serialize_detached()?,
        )?;

        let mut buf = raw_content.as_ref();
        PrivateMessageContent::deserialize(&mut buf, self.content_type)
    }

    pub(crate) fn authenticated_content(
        &self,
        sender_data: &SenderData,
        content: PrivateMessageContent,
    ) -> AuthenticatedContent {
        AuthenticatedContent {
            wire_format: WireFormat::PrivateMessage,
            content: FramedContent {
                group_id: self.group_id.clone(),
                epoch: self.epoch,
                sender: Sender::Member(sender_data.leaf_index),
                authenticated_data: self.authenticated_data.clone(),
                content: content.content,
            },
            auth: content.auth,
        }
    }
}

/// [RFC9420 Sec.6.3.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.3.1) Content to be
/// encrypted is encoded in a `PrivateMessageContent` structure.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct PrivateMessageContent {
    pub content: Content,
    pub auth: FramedContentAuthData,
}

impl PrivateMessageContent {
    fn deserialize<B>(buf: &mut B, ct: ContentType) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let content = Content::deserialize_body(buf, ct)?;
        let auth = FramedContentAuthData::deserialize(buf, ct)?;

        while buf.has_remaining() {
            if buf.get_u8() != 0 {
                return Err(Error::PaddingContainsNonZeroBytes);
            }
        }

        Ok(Self { content, auth })
    }
}

impl Serializer for PrivateMessageContent {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.content.serialize_body(buf)?;
        self.auth.serialize(buf, self.content.content_type())
    }
}

/// [RFC9420 Sec.6.3.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.3.1) The Additional
/// Authenticated Data (AAD) input to the encryption contains an object of the following form,
/// with the values used to identify the key and nonce
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct PrivateContentAAD {
    pub group_id: MlsGroupId,
    pub epoch: u64,
    pub content_type: ContentType,
    pub authenticated_data: Bytes,
}

impl Serializer for PrivateContentAAD {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.group_id, buf)?;
        buf.put_u64(self.epoch);
        self.content_type.serialize(buf)?;
        serialize_opaque_vec(&self.authenticated_data, buf)
    }
}

/// [RFC9420 Sec.6.3.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.3.2) Sender data,
/// encrypted separately so that the ratchet key can be looked up before decrypting the content.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct SenderData {
    pub leaf_index: LeafIndex,
    pub generation: u32,
    pub reuse_guard: [u8; 4],
}

impl Deserializer for SenderData {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let leaf_index = LeafIndex::deserialize(buf)?;
        let generation = deserialize_u32(buf)?;
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall);
        }
        let mut reuse_guard = [0u8; 4];
        buf.copy_to_slice(&mut reuse_guard);

        Ok(Self {
            leaf_index,
            generation,
            reuse_guard,
        })
    }
}

impl Serializer for SenderData {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.leaf_index.serialize(buf)?;
        buf.put_u32(self.generation);
        buf.put_slice(&self.reuse_guard);
        Ok(())
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct SenderDataAAD {
    pub group_id: MlsGroupId,
    pub epoch: u64,
    pub content_type: ContentType,
}

impl Serializer for SenderDataAAD {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.group_id, buf)?;
        buf.put_u64(self.epoch);
        self.content_type.serialize(buf)
    }
}

/// [RFC9420 Sec.6.3.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-6.3.2) Key and nonce
/// protecting the sender data, both derived from a sample of the content ciphertext.
fn sender_data_key_and_nonce(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    sender_data_secret: &[u8],
    ciphertext: &[u8],
) -> Result<(Secret, Secret)> {
    let hpke = crypto_provider.hpke(cipher_suite)?;
    let sample_len = ciphertext.len().min(crypto_provider.hash_size(cipher_suite)?);
    let sample = &ciphertext[..sample_len];

    let key = crypto_provider.expand_with_label(
        cipher_suite,
        sender_data_secret,
        b"key",
        sample,
        hpke.aead_key_size(),
    )?;
    let nonce = crypto_provider.expand_with_label(
        cipher_suite,
        sender_data_secret,
        b"nonce",
        sample,
        hpke.aead_nonce_size(),
    )?;
    Ok((key, nonce))
}

fn apply_reuse_guard(nonce: &[u8], reuse_guard: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = nonce.to_vec();
    if nonce.len() < reuse_guard.len() {
        return Err(Error::NonceAndReuseGuardLenNotMatch);
    }

    nonce
        .iter_mut()
        .zip(reuse_guard)
        .for_each(|(byte, guard)| *byte ^= guard);

    Ok(nonce)
}
