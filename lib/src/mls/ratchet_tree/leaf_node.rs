//! [RFC9420 Sec.7.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.2) Leaf Node Contents

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::credential::{Credential, CredentialType};
use crate::mls::crypto::key_pair::SignatureKeyPair;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::crypto::{HPKEPublicKey, SignaturePublicKey};
use crate::mls::extensibility::{ExtensionType, Extensions};
use crate::mls::framing::proposal::ProposalType;
use crate::mls::framing::{MlsGroupId, ProtocolVersion};
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_slice, deserialize_u64, deserialize_u8,
    serialize_opaque_vec, serialize_slice, Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

/// [RFC9420 Sec.7.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.2) `Capabilities`
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Capabilities {
    pub versions: Vec<ProtocolVersion>,
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: Vec<ExtensionType>,
    pub proposals: Vec<ProposalType>,
    pub credentials: Vec<CredentialType>,
}

impl Capabilities {
    /// Capabilities of a client backed by `crypto_provider` with basic credentials.
    pub fn with_crypto_provider(crypto_provider: &impl CryptoProvider) -> Self {
        Self {
            versions: vec![ProtocolVersion::MLS10],
            cipher_suites: crypto_provider.supported(),
            extensions: vec![],
            proposals: vec![],
            credentials: vec![CredentialType::Basic],
        }
    }

    pub fn supports_extension(&self, extension_type: ExtensionType) -> bool {
        extension_type.is_default() || self.extensions.contains(&extension_type)
    }
}

impl Deserializer for Capabilities {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            versions: deserialize_slice(buf)?,
            cipher_suites: deserialize_slice(buf)?,
            extensions: deserialize_slice(buf)?,
            proposals: deserialize_slice(buf)?,
            credentials: deserialize_slice(buf)?,
        })
    }
}

impl Serializer for Capabilities {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_slice(&self.versions, buf)?;
        serialize_slice(&self.cipher_suites, buf)?;
        serialize_slice(&self.extensions, buf)?;
        serialize_slice(&self.proposals, buf)?;
        serialize_slice(&self.credentials, buf)
    }
}

/// Validity period of a key package, in seconds since the Unix epoch.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct Lifetime {
    pub not_before: u64,
    pub not_after: u64,
}

impl Lifetime {
    /// Lifetime starting now and lasting `seconds`.
    pub fn from_now(seconds: u64) -> Self {
        let now = unix_now();
        Self {
            not_before: now,
            not_after: now.saturating_add(seconds),
        }
    }

    pub fn is_valid_at(&self, time: u64) -> bool {
        self.not_before <= time && time <= self.not_after
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// [RFC9420 Sec.7.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.2) `LeafNodeSource`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LeafNodeSource {
    KeyPackage(Lifetime),
    Update,
    /// Carries the parent hash of the committer's new path.
    Commit(Bytes),
}

impl Default for LeafNodeSource {
    fn default() -> Self {
        LeafNodeSource::KeyPackage(Lifetime::default())
    }
}

impl Deserializer for LeafNodeSource {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(LeafNodeSource::KeyPackage(Lifetime {
                not_before: deserialize_u64(buf)?,
                not_after: deserialize_u64(buf)?,
            })),
            0x02 => Ok(LeafNodeSource::Update),
            0x03 => Ok(LeafNodeSource::Commit(deserialize_opaque_vec(buf)?)),
            v => Err(Error::InvalidLeafNodeSourceValue(v)),
        }
    }
}

impl Serializer for LeafNodeSource {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        match self {
            LeafNodeSource::KeyPackage(lifetime) => {
                buf.put_u8(0x01);
                buf.put_u64(lifetime.not_before);
                buf.put_u64(lifetime.not_after);
            }
            LeafNodeSource::Update => buf.put_u8(0x02),
            LeafNodeSource::Commit(parent_hash) => {
                buf.put_u8(0x03);
                serialize_opaque_vec(parent_hash, buf)?;
            }
        }
        Ok(())
    }
}

/// Group and leaf a leaf node is bound to when it was created by an update or a commit.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct TreePosition {
    pub group_id: MlsGroupId,
    pub leaf_index: LeafIndex,
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct LeafNode {
    pub encryption_key: HPKEPublicKey,
    pub signature_key: SignaturePublicKey,
    pub credential: Credential,
    pub capabilities: Capabilities,
    pub leaf_node_source: LeafNodeSource,
    pub extensions: Extensions,
    pub signature: Bytes,
}

impl LeafNode {
    /// Creates and signs a leaf node. `tree_position` is required for the `Update` and `Commit`
    /// sources.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        encryption_key: HPKEPublicKey,
        credential: Credential,
        signature_key_pair: &SignatureKeyPair,
        leaf_node_source: LeafNodeSource,
        capabilities: Capabilities,
        extensions: Extensions,
        tree_position: Option<&TreePosition>,
    ) -> Result<Self> {
        let mut leaf_node = Self {
            encryption_key,
            signature_key: signature_key_pair.public_key.clone(),
            credential,
            capabilities,
            leaf_node_source,
            extensions,
            signature: Bytes::new(),
        };
        leaf_node.sign(
            crypto_provider,
            cipher_suite,
            signature_key_pair.private_key(),
            tree_position,
        )?;

        Ok(leaf_node)
    }

    fn to_be_signed(&self, tree_position: Option<&TreePosition>) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.serialize_content(&mut buf)?;

        match self.leaf_node_source {
            LeafNodeSource::KeyPackage(_) => {}
            LeafNodeSource::Update | LeafNodeSource::Commit(_) => {
                let position = tree_position.ok_or(Error::InvalidLeafNode)?;
                serialize_opaque_vec(&position.group_id, &mut buf)?;
                position.leaf_index.serialize(&mut buf)?;
            }
        }

        Ok(buf.freeze())
    }

    pub(crate) fn sign(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        sign_key: &[u8],
        tree_position: Option<&TreePosition>,
    ) -> Result<()> {
        let tbs = self.to_be_signed(tree_position)?;
        self.signature =
            crypto_provider.sign_with_label(cipher_suite, sign_key, b"LeafNodeTBS", &tbs)?;
        Ok(())
    }

    pub fn verify_signature(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        tree_position: Option<&TreePosition>,
    ) -> Result<()> {
        let tbs = self.to_be_signed(tree_position)?;
        crypto_provider.verify_with_label(
            cipher_suite,
            &self.signature_key,
            b"LeafNodeTBS",
            &tbs,
            &self.signature,
        )
    }

    /// Parent hash recorded by a commit, if the leaf was produced by one.
    pub fn parent_hash(&self) -> Option<&Bytes> {
        match &self.leaf_node_source {
            LeafNodeSource::Commit(parent_hash) => Some(parent_hash),
            _ => None,
        }
    }

    fn serialize_content<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        self.encryption_key.serialize(buf)?;
        self.signature_key.serialize(buf)?;
        self.credential.serialize(buf)?;
        self.capabilities.serialize(buf)?;
        self.leaf_node_source.serialize(buf)?;
        self.extensions.serialize(buf)
    }
}

impl Deserializer for LeafNode {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            encryption_key: HPKEPublicKey::deserialize(buf)?,
            signature_key: SignaturePublicKey::deserialize(buf)?,
            credential: Credential::deserialize(buf)?,
            capabilities: Capabilities::deserialize(buf)?,
            leaf_node_source: LeafNodeSource::deserialize(buf)?,
            extensions: Extensions::deserialize(buf)?,
            signature: deserialize_opaque_vec(buf)?,
        })
    }
}

impl Serializer for LeafNode {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.serialize_content(buf)?;
        serialize_opaque_vec(&self.signature, buf)
    }
}
