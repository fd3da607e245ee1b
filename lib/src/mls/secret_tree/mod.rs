//! [RFC9420 Sec.9](https://www.rfc-editor.org/rfc/rfc9420.html#section-9) Secret Tree
//!
//! The secret tree derives, from the epoch's `encryption_secret`, one handshake and one
//! application hash ratchet per leaf. Secrets are deleted once consumed: a node secret as soon as
//! both children are derived, a ratchet key as soon as it was used. Keys of generations skipped by
//! an out-of-order message are kept until the message arrives.

#[cfg(test)]
mod secret_tree_test;

use std::collections::HashMap;

use bytes::BufMut;

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::ContentType;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::tree_math::{LeafIndex, NodeIndex, NumLeaves};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RatchetLabel {
    Handshake,
    Application,
}

impl RatchetLabel {
    fn label(self) -> &'static [u8] {
        match self {
            RatchetLabel::Handshake => b"handshake",
            RatchetLabel::Application => b"application",
        }
    }
}

impl From<ContentType> for RatchetLabel {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Application => RatchetLabel::Application,
            ContentType::Proposal | ContentType::Commit => RatchetLabel::Handshake,
        }
    }
}

/// AEAD key and nonce for one generation of a ratchet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RatchetKey {
    pub generation: u32,
    pub key: Secret,
    pub nonce: Secret,
}

/// One step of a hash ratchet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RatchetSecret {
    pub(crate) secret: Secret,
    pub(crate) generation: u32,
}

impl RatchetSecret {
    fn expand(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        label: &[u8],
        length: u16,
    ) -> Result<Secret> {
        let mut context = Vec::with_capacity(4);
        context.put_u32(self.generation);
        crypto_provider.expand_with_label(
            cipher_suite,
            self.secret.as_bytes(),
            label,
            &context,
            length,
        )
    }

    pub fn derive_key(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<Secret> {
        let length = crypto_provider.hpke(cipher_suite)?.aead_key_size();
        self.expand(crypto_provider, cipher_suite, b"key", length)
    }

    pub fn derive_nonce(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<Secret> {
        let length = crypto_provider.hpke(cipher_suite)?.aead_nonce_size();
        self.expand(crypto_provider, cipher_suite, b"nonce", length)
    }

    pub fn derive_next(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<Self> {
        let length = crypto_provider.hpke(cipher_suite)?.kdf_extract_size();
        Ok(Self {
            secret: self.expand(crypto_provider, cipher_suite, b"secret", length)?,
            generation: self.generation + 1,
        })
    }

    fn ratchet_key(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<RatchetKey> {
        Ok(RatchetKey {
            generation: self.generation,
            key: self.derive_key(crypto_provider, cipher_suite)?,
            nonce: self.derive_nonce(crypto_provider, cipher_suite)?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct LeafRatchet {
    current: RatchetSecret,
    skipped: HashMap<u32, RatchetKey>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SecretTree {
    cipher_suite: CipherSuite,
    num_leaves: NumLeaves,
    nodes: HashMap<NodeIndex, Secret>,
    ratchets: HashMap<(LeafIndex, RatchetLabel), LeafRatchet>,
    max_generation_gap: u32,
}

impl SecretTree {
    /// Tree for `num_leaves` leaves rooted at `encryption_secret`.
    pub fn new(
        cipher_suite: CipherSuite,
        num_leaves: NumLeaves,
        encryption_secret: &Secret,
        max_generation_gap: u32,
    ) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(num_leaves.root(), encryption_secret.clone());

        Self {
            cipher_suite,
            num_leaves,
            nodes,
            ratchets: HashMap::new(),
            max_generation_gap,
        }
    }

    /// Derives the node secrets from the closest stored ancestor down to `leaf_index`.
    fn derive_leaf_secret(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        leaf_index: LeafIndex,
    ) -> Result<Secret> {
        let target = leaf_index.node_index();
        if leaf_index.0 >= self.num_leaves.0 {
            return Err(Error::BlankLeaf(leaf_index));
        }

        let mut path = vec![target];
        path.extend(self.num_leaves.direct_path(target));
        let start = path
            .iter()
            .position(|node| self.nodes.contains_key(node))
            .ok_or(Error::BlankLeaf(leaf_index))?;

        let nh = crypto_provider.hpke(self.cipher_suite)?.kdf_extract_size();
        for node in path[1..=start].iter().rev() {
            let secret = self
                .nodes
                .remove(node)
                .ok_or(Error::BlankLeaf(leaf_index))?;
            let (left, _) = node.left();
            let (right, _) = node.right();
            for (child, label) in [(left, b"left".as_slice()), (right, b"right".as_slice())] {
                let child_secret = crypto_provider.expand_with_label(
                    self.cipher_suite,
                    secret.as_bytes(),
                    b"tree",
                    label,
                    nh,
                )?;
                self.nodes.insert(child, child_secret);
            }
        }

        self.nodes
            .remove(&target)
            .ok_or(Error::BlankLeaf(leaf_index))
    }

    /// Generation 0 of the `label` ratchet of a leaf.
    pub fn derive_ratchet_root(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        leaf_secret: &Secret,
        label: RatchetLabel,
    ) -> Result<RatchetSecret> {
        let nh = crypto_provider.hpke(cipher_suite)?.kdf_extract_size();
        Ok(RatchetSecret {
            secret: crypto_provider.expand_with_label(
                cipher_suite,
                leaf_secret.as_bytes(),
                label.label(),
                &[],
                nh,
            )?,
            generation: 0,
        })
    }

    fn ratchet(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        leaf_index: LeafIndex,
        label: RatchetLabel,
    ) -> Result<&mut LeafRatchet> {
        if !self.ratchets.contains_key(&(leaf_index, label)) {
            let leaf_secret = self.derive_leaf_secret(crypto_provider, leaf_index)?;
            for l in [RatchetLabel::Handshake, RatchetLabel::Application] {
                let current =
                    Self::derive_ratchet_root(crypto_provider, self.cipher_suite, &leaf_secret, l)?;
                self.ratchets.insert(
                    (leaf_index, l),
                    LeafRatchet {
                        current,
                        skipped: HashMap::new(),
                    },
                );
            }
        }

        self.ratchets
            .get_mut(&(leaf_index, label))
            .ok_or(Error::BlankLeaf(leaf_index))
    }

    /// Key for the next message sent from `leaf_index`.
    pub fn next_key(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        leaf_index: LeafIndex,
        label: RatchetLabel,
    ) -> Result<RatchetKey> {
        let cipher_suite = self.cipher_suite;
        let ratchet = self.ratchet(crypto_provider, leaf_index, label)?;
        let key = ratchet.current.ratchet_key(crypto_provider, cipher_suite)?;
        ratchet.current = ratchet.current.derive_next(crypto_provider, cipher_suite)?;
        Ok(key)
    }

    /// Key of `generation` for a message received from `leaf_index`.
    ///
    /// Each key is handed out once. Keys of the generations jumped over are kept for messages that
    /// arrive out of order.
    pub fn key_for_generation(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        leaf_index: LeafIndex,
        label: RatchetLabel,
        generation: u32,
    ) -> Result<RatchetKey> {
        let cipher_suite = self.cipher_suite;
        let max_generation_gap = self.max_generation_gap;
        let ratchet = self.ratchet(crypto_provider, leaf_index, label)?;

        if generation < ratchet.current.generation {
            return ratchet
                .skipped
                .remove(&generation)
                .ok_or(Error::GenerationInThePast(generation));
        }

        if generation - ratchet.current.generation > max_generation_gap {
            return Err(Error::GenerationTooFarInFuture(generation));
        }

        while ratchet.current.generation < generation {
            let skipped = ratchet.current.ratchet_key(crypto_provider, cipher_suite)?;
            ratchet.skipped.insert(skipped.generation, skipped);
            ratchet.current = ratchet.current.derive_next(crypto_provider, cipher_suite)?;
        }

        let key = ratchet.current.ratchet_key(crypto_provider, cipher_suite)?;
        ratchet.current = ratchet.current.derive_next(crypto_provider, cipher_suite)?;
        Ok(key)
    }
}
