//! [RFC9420 Sec.10](https://www.rfc-editor.org/rfc/rfc9420.html#section-10) Key Packages
//!
//! In order to facilitate the asynchronous addition of clients to a group, clients can pre-publish
//! `KeyPackage` objects that provide some public information about a user.

use std::ops::Deref;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::credential::Credential;
use crate::mls::crypto::key_pair::{HPKEKeyPair, SignatureKeyPair};
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::crypto::HPKEPublicKey;
use crate::mls::extensibility::Extensions;
use crate::mls::framing::ProtocolVersion;
use crate::mls::ratchet_tree::leaf_node::{
    unix_now, Capabilities, LeafNode, LeafNodeSource, Lifetime,
};
use crate::mls::utilities::error::{ProposalError, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, serialize_opaque_vec, Deserializer, Serializer,
};

/// Default lifetime of a fresh key package: 90 days.
pub const DEFAULT_KEY_PACKAGE_LIFETIME: u64 = 90 * 24 * 60 * 60;

/// [RFC9420 Sec.5.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.2) `KeyPackageRef`
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub struct KeyPackageRef(Bytes);

impl KeyPackageRef {
    pub fn new<T: Into<Bytes>>(bytes: T) -> Self {
        Self(bytes.into())
    }
}

impl Deref for KeyPackageRef {
    type Target = Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deserializer for KeyPackageRef {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self(deserialize_opaque_vec(buf)?))
    }
}

impl Serializer for KeyPackageRef {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.0, buf)
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct KeyPackage {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub init_key: HPKEPublicKey,
    pub leaf_node: LeafNode,
    pub extensions: Extensions,
    pub signature: Bytes,
}

impl KeyPackage {
    fn to_be_signed(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.version.serialize(&mut buf)?;
        self.cipher_suite.serialize(&mut buf)?;
        self.init_key.serialize(&mut buf)?;
        self.leaf_node.serialize(&mut buf)?;
        self.extensions.serialize(&mut buf)?;
        Ok(buf.freeze())
    }

    /// `RefHash("MLS 1.0 KeyPackage Reference", KeyPackage)`
    pub fn generate_ref(&self, crypto_provider: &impl CryptoProvider) -> Result<KeyPackageRef> {
        let raw = self.serialize_detached()?;
        Ok(KeyPackageRef(crypto_provider.ref_hash(
            self.cipher_suite,
            b"MLS 1.0 KeyPackage Reference",
            &raw,
        )?))
    }

    /// [RFC9420 Sec.10.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-10.1) checks done by
    /// a group before adding the client, for the group's version and cipher suite.
    pub fn verify(
        &self,
        crypto_provider: &impl CryptoProvider,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
    ) -> Result<()> {
        if self.version != version {
            return Err(ProposalError::KeyPackageVersionMismatch(self.version).into());
        }
        if self.cipher_suite != cipher_suite {
            return Err(ProposalError::KeyPackageCipherSuiteMismatch(self.cipher_suite).into());
        }

        let LeafNodeSource::KeyPackage(lifetime) = self.leaf_node.leaf_node_source else {
            return Err(ProposalError::InvalidLeafNodeSource.into());
        };
        if !lifetime.is_valid_at(unix_now()) {
            return Err(ProposalError::KeyPackageExpired.into());
        }

        self.leaf_node
            .verify_signature(crypto_provider, cipher_suite, None)
            .map_err(|_| ProposalError::InvalidLeafNodeSignature)?;

        let tbs = self.to_be_signed()?;
        crypto_provider
            .verify_with_label(
                cipher_suite,
                &self.leaf_node.signature_key,
                b"KeyPackageTBS",
                &tbs,
                &self.signature,
            )
            .map_err(|_| ProposalError::InvalidKeyPackageSignature)?;

        if self.init_key == self.leaf_node.encryption_key {
            return Err(ProposalError::InitKeyEqualsEncryptionKey.into());
        }

        Ok(())
    }
}

impl Deserializer for KeyPackage {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            version: ProtocolVersion::deserialize(buf)?,
            cipher_suite: CipherSuite::deserialize(buf)?,
            init_key: HPKEPublicKey::deserialize(buf)?,
            leaf_node: LeafNode::deserialize(buf)?,
            extensions: Extensions::deserialize(buf)?,
            signature: deserialize_opaque_vec(buf)?,
        })
    }
}

impl Serializer for KeyPackage {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.version.serialize(buf)?;
        self.cipher_suite.serialize(buf)?;
        self.init_key.serialize(buf)?;
        self.leaf_node.serialize(buf)?;
        self.extensions.serialize(buf)?;
        serialize_opaque_vec(&self.signature, buf)
    }
}

/// A key package together with the private keys its owner needs to join a group with it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeyPackageBundle {
    pub key_package: KeyPackage,
    pub init_key_pair: HPKEKeyPair,
    pub encryption_key_pair: HPKEKeyPair,
    pub signature_key_pair: SignatureKeyPair,
}

impl KeyPackageBundle {
    /// Generates fresh init and encryption keys and signs a key package with `signature_key_pair`.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        credential: Credential,
        signature_key_pair: SignatureKeyPair,
        capabilities: Capabilities,
        extensions: Extensions,
    ) -> Result<Self> {
        let init_key_pair = crypto_provider.generate_key_pair(cipher_suite)?;
        let encryption_key_pair = crypto_provider.generate_key_pair(cipher_suite)?;

        let leaf_node = LeafNode::new(
            crypto_provider,
            cipher_suite,
            encryption_key_pair.public_key.clone(),
            credential,
            &signature_key_pair,
            LeafNodeSource::KeyPackage(Lifetime::from_now(DEFAULT_KEY_PACKAGE_LIFETIME)),
            capabilities,
            Extensions::default(),
            None,
        )?;

        let mut key_package = KeyPackage {
            version,
            cipher_suite,
            init_key: init_key_pair.public_key.clone(),
            leaf_node,
            extensions,
            signature: Bytes::new(),
        };
        let tbs = key_package.to_be_signed()?;
        key_package.signature = crypto_provider.sign_with_label(
            cipher_suite,
            signature_key_pair.private_key(),
            b"KeyPackageTBS",
            &tbs,
        )?;

        Ok(Self {
            key_package,
            init_key_pair,
            encryption_key_pair,
            signature_key_pair,
        })
    }

    /// Key package with default capabilities for `crypto_provider` and no extensions.
    pub fn with_credential(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        credential: Credential,
        signature_key_pair: SignatureKeyPair,
    ) -> Result<Self> {
        Self::new(
            crypto_provider,
            ProtocolVersion::MLS10,
            cipher_suite,
            credential,
            signature_key_pair,
            Capabilities::with_crypto_provider(crypto_provider),
            Extensions::default(),
        )
    }
}
