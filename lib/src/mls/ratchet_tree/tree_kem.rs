//! [RFC9420 Sec.7.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.4)-
//! [Sec.7.6](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.6) Synchronizing views of the
//! tree through `UpdatePath`s.

use std::collections::{HashMap, HashSet};

use bytes::{Buf, BufMut, Bytes};

use crate::mls::crypto::key_pair::{HPKEKeyPair, SignatureKeyPair};
use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider};
use crate::mls::crypto::{HPKEPublicKey, Secret};
use crate::mls::framing::MlsGroupId;
use crate::mls::ratchet_tree::leaf_node::{LeafNode, LeafNodeSource, TreePosition};
use crate::mls::ratchet_tree::parent_node::ParentNode;
use crate::mls::ratchet_tree::{Node, RatchetTree};
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_slice, serialize_opaque_vec, serialize_slice,
    Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::{LeafIndex, NodeIndex};

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct HPKECiphertext {
    pub kem_output: Bytes,
    pub ciphertext: Bytes,
}

impl Deserializer for HPKECiphertext {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            kem_output: deserialize_opaque_vec(buf)?,
            ciphertext: deserialize_opaque_vec(buf)?,
        })
    }
}

impl Serializer for HPKECiphertext {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.kem_output, buf)?;
        serialize_opaque_vec(&self.ciphertext, buf)
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct UpdatePathNode {
    pub encryption_key: HPKEPublicKey,
    /// One ciphertext per node in the resolution of the copath child, in resolution order.
    pub encrypted_path_secret: Vec<HPKECiphertext>,
}

impl Deserializer for UpdatePathNode {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            encryption_key: HPKEPublicKey::deserialize(buf)?,
            encrypted_path_secret: deserialize_slice(buf)?,
        })
    }
}

impl Serializer for UpdatePathNode {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.encryption_key.serialize(buf)?;
        serialize_slice(&self.encrypted_path_secret, buf)
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct UpdatePath {
    pub leaf_node: LeafNode,
    /// One entry per node of the committer's filtered direct path.
    pub nodes: Vec<UpdatePathNode>,
}

impl Deserializer for UpdatePath {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            leaf_node: LeafNode::deserialize(buf)?,
            nodes: deserialize_slice(buf)?,
        })
    }
}

impl Serializer for UpdatePath {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.leaf_node.serialize(buf)?;
        serialize_slice(&self.nodes, buf)
    }
}

/// HPKE private keys this member holds for nodes of the tree.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct TreePrivateKeys {
    keys: HashMap<NodeIndex, HPKEKeyPair>,
}

impl TreePrivateKeys {
    /// Private keys of a member that only knows its own leaf key.
    pub fn from_leaf(leaf_index: LeafIndex, key_pair: HPKEKeyPair) -> Self {
        let mut keys = HashMap::new();
        keys.insert(leaf_index.node_index(), key_pair);
        Self { keys }
    }

    pub fn get(&self, node: NodeIndex) -> Option<&HPKEKeyPair> {
        self.keys.get(&node)
    }

    pub(crate) fn insert(&mut self, node: NodeIndex, key_pair: HPKEKeyPair) {
        self.keys.insert(node, key_pair);
    }

    /// Drops keys whose node was blanked or replaced in `tree`.
    pub(crate) fn prune(&mut self, tree: &RatchetTree) {
        self.keys.retain(|node, key_pair| {
            tree.get(*node)
                .is_some_and(|n| *n.encryption_key() == key_pair.public_key)
        });
    }
}

/// Path secrets generated by the committer, one per node of its filtered direct path.
pub(crate) struct GeneratedPath {
    pub(crate) path_secrets: Vec<(NodeIndex, Secret)>,
    pub(crate) commit_secret: Secret,
}

/// Output of deriving the path from a decrypted path secret upwards.
pub(crate) struct DerivedPath {
    pub(crate) key_pairs: Vec<(NodeIndex, HPKEKeyPair)>,
    pub(crate) commit_secret: Secret,
}

fn derive_node_key_pair(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    path_secret: &Secret,
) -> Result<HPKEKeyPair> {
    let node_secret = crypto_provider.derive_secret(cipher_suite, path_secret.as_bytes(), b"node")?;
    crypto_provider.derive_key_pair(cipher_suite, node_secret.as_bytes())
}

fn next_path_secret(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    path_secret: &Secret,
) -> Result<Secret> {
    crypto_provider.derive_secret(cipher_suite, path_secret.as_bytes(), b"path")
}

impl RatchetTree {
    /// Replaces the committer's leaf and direct path with fresh keys.
    ///
    /// Returns the path secrets to encrypt, the new private keys are stored in `private_keys`.
    pub(crate) fn apply_own_path(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        group_id: &MlsGroupId,
        leaf_index: LeafIndex,
        signature_key_pair: &SignatureKeyPair,
        private_keys: &mut TreePrivateKeys,
    ) -> Result<GeneratedPath> {
        let old_leaf = self
            .get_leaf(leaf_index)
            .ok_or(Error::BlankLeaf(leaf_index))?
            .clone();
        let filtered_direct_path = self.filtered_direct_path(leaf_index);

        let leaf_secret = crypto_provider.generate_secret(cipher_suite)?;
        let leaf_key_pair = derive_node_key_pair(crypto_provider, cipher_suite, &leaf_secret)?;

        let mut path_secret = leaf_secret;
        let mut path_secrets = Vec::with_capacity(filtered_direct_path.len());
        let mut key_pairs = Vec::with_capacity(filtered_direct_path.len());
        for node in &filtered_direct_path {
            path_secret = next_path_secret(crypto_provider, cipher_suite, &path_secret)?;
            key_pairs.push((
                *node,
                derive_node_key_pair(crypto_provider, cipher_suite, &path_secret)?,
            ));
            path_secrets.push((*node, path_secret.clone()));
        }
        let commit_secret = next_path_secret(crypto_provider, cipher_suite, &path_secret)?;

        self.blank_direct_path(leaf_index);
        for (node, key_pair) in &key_pairs {
            self.set(
                *node,
                Some(Node::Parent(ParentNode {
                    encryption_key: key_pair.public_key.clone(),
                    parent_hash: Bytes::new(),
                    unmerged_leaves: vec![],
                })),
            );
        }
        let parent_hash = self.set_path_parent_hashes(crypto_provider, cipher_suite, leaf_index)?;

        let leaf_node = LeafNode::new(
            crypto_provider,
            cipher_suite,
            leaf_key_pair.public_key.clone(),
            old_leaf.credential,
            signature_key_pair,
            LeafNodeSource::Commit(parent_hash),
            old_leaf.capabilities,
            old_leaf.extensions,
            Some(&TreePosition {
                group_id: group_id.clone(),
                leaf_index,
            }),
        )?;
        self.set(leaf_index.node_index(), Some(Node::Leaf(leaf_node)));

        private_keys.prune(self);
        private_keys.insert(leaf_index.node_index(), leaf_key_pair);
        for (node, key_pair) in key_pairs {
            private_keys.insert(node, key_pair);
        }

        Ok(GeneratedPath {
            path_secrets,
            commit_secret,
        })
    }

    /// Encrypts every path secret to the resolution of the matching copath child, skipping the
    /// leaves in `excluded` (members added by the same commit).
    pub(crate) fn encrypt_path_secrets(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        leaf_index: LeafIndex,
        path: &GeneratedPath,
        excluded: &HashSet<LeafIndex>,
        group_context: &[u8],
    ) -> Result<UpdatePath> {
        let leaf_node = self
            .get_leaf(leaf_index)
            .ok_or(Error::BlankLeaf(leaf_index))?
            .clone();

        let copath = self.filtered_direct_path_with_copath(leaf_index);
        if copath.len() != path.path_secrets.len() {
            return Err(Error::InvalidUpdatePathLength);
        }

        let mut nodes = Vec::with_capacity(copath.len());
        for ((node, copath_child), (_, path_secret)) in copath.iter().zip(&path.path_secrets) {
            let encryption_key = self
                .get(*node)
                .ok_or(Error::InvalidUpdatePathLength)?
                .encryption_key()
                .clone();

            let mut encrypted_path_secret = vec![];
            for recipient in self.copath_resolution(*copath_child, excluded) {
                let public_key = self
                    .get(recipient)
                    .ok_or(Error::InvalidUpdatePathLength)?
                    .encryption_key();
                let (kem_output, ciphertext) = crypto_provider.encrypt_with_label(
                    cipher_suite,
                    public_key,
                    b"UpdatePathNode",
                    group_context,
                    path_secret.as_bytes(),
                )?;
                encrypted_path_secret.push(HPKECiphertext {
                    kem_output,
                    ciphertext,
                });
            }

            nodes.push(UpdatePathNode {
                encryption_key,
                encrypted_path_secret,
            });
        }

        Ok(UpdatePath { leaf_node, nodes })
    }

    fn copath_resolution(
        &self,
        copath_child: NodeIndex,
        excluded: &HashSet<LeafIndex>,
    ) -> Vec<NodeIndex> {
        self.resolution(copath_child)
            .into_iter()
            .filter(|node| match node.leaf_index() {
                (leaf_index, true) => !excluded.contains(&leaf_index),
                _ => true,
            })
            .collect()
    }

    /// Merges the public part of a received `UpdatePath` and checks the committer's new leaf.
    ///
    /// [RFC9420 Sec.7.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.5)
    pub(crate) fn merge_update_path(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        group_id: &MlsGroupId,
        sender: LeafIndex,
        update_path: &UpdatePath,
    ) -> Result<()> {
        let filtered_direct_path = self.filtered_direct_path(sender);
        if filtered_direct_path.len() != update_path.nodes.len() {
            return Err(Error::InvalidUpdatePathLength);
        }

        let position = TreePosition {
            group_id: group_id.clone(),
            leaf_index: sender,
        };
        update_path
            .leaf_node
            .verify_signature(crypto_provider, cipher_suite, Some(&position))?;
        let expected_parent_hash = update_path
            .leaf_node
            .parent_hash()
            .ok_or(Error::InvalidLeafNode)?;

        self.blank_direct_path(sender);
        for (node, path_node) in filtered_direct_path.iter().zip(&update_path.nodes) {
            self.set(
                *node,
                Some(Node::Parent(ParentNode {
                    encryption_key: path_node.encryption_key.clone(),
                    parent_hash: Bytes::new(),
                    unmerged_leaves: vec![],
                })),
            );
        }
        let parent_hash = self.set_path_parent_hashes(crypto_provider, cipher_suite, sender)?;
        if parent_hash != *expected_parent_hash {
            return Err(Error::InvalidParentHash);
        }

        self.set(
            sender.node_index(),
            Some(Node::Leaf(update_path.leaf_node.clone())),
        );

        Ok(())
    }

    /// Decrypts the path secret meant for `own_leaf` from a merged `UpdatePath`.
    ///
    /// Returns the position of the secret in the committer's filtered direct path.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn decrypt_path_secret(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        sender: LeafIndex,
        own_leaf: LeafIndex,
        update_path: &UpdatePath,
        private_keys: &TreePrivateKeys,
        excluded: &HashSet<LeafIndex>,
        group_context: &[u8],
    ) -> Result<(usize, Secret)> {
        let num_leaves = self.num_leaves();
        let own_node = own_leaf.node_index();

        let (position, copath_child) = self
            .filtered_direct_path_with_copath(sender)
            .into_iter()
            .enumerate()
            .find(|(_, (_, copath_child))| num_leaves.is_in_subtree(*copath_child, own_node))
            .map(|(position, (_, copath_child))| (position, copath_child))
            .ok_or(Error::NoDecryptablePathSecret)?;

        let (index, key_pair) = self
            .copath_resolution(copath_child, excluded)
            .into_iter()
            .enumerate()
            .find_map(|(index, node)| private_keys.get(node).map(|key_pair| (index, key_pair)))
            .ok_or(Error::NoDecryptablePathSecret)?;

        let ciphertext = update_path
            .nodes
            .get(position)
            .and_then(|node| node.encrypted_path_secret.get(index))
            .ok_or(Error::NoDecryptablePathSecret)?;

        let path_secret = crypto_provider.decrypt_with_label(
            cipher_suite,
            key_pair.private_key.as_bytes(),
            b"UpdatePathNode",
            group_context,
            &ciphertext.kem_output,
            &ciphertext.ciphertext,
        )?;

        Ok((position, Secret::new(path_secret.to_vec())))
    }

    /// Derives the key pairs of the committer's filtered direct path from position `start`
    /// upwards and checks them against the public keys in the tree.
    pub(crate) fn derive_path_keys(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        sender: LeafIndex,
        start: usize,
        path_secret: Secret,
    ) -> Result<DerivedPath> {
        let filtered_direct_path = self.filtered_direct_path(sender);
        let mut key_pairs = vec![];
        let mut path_secret = path_secret;

        for (i, node) in filtered_direct_path.iter().enumerate().skip(start) {
            if i > start {
                path_secret = next_path_secret(crypto_provider, cipher_suite, &path_secret)?;
            }
            let key_pair = derive_node_key_pair(crypto_provider, cipher_suite, &path_secret)?;
            let expected = self.get(*node).ok_or(Error::PathKeyMismatch)?.encryption_key();
            if key_pair.public_key != *expected {
                return Err(Error::PathKeyMismatch);
            }
            key_pairs.push((*node, key_pair));
        }

        let commit_secret = next_path_secret(crypto_provider, cipher_suite, &path_secret)?;

        Ok(DerivedPath {
            key_pairs,
            commit_secret,
        })
    }

    /// Position in the filtered direct path of `sender` of the lowest node that is also an
    /// ancestor of `leaf_index`.
    pub(crate) fn common_ancestor_position(
        &self,
        sender: LeafIndex,
        leaf_index: LeafIndex,
    ) -> Option<usize> {
        let num_leaves = self.num_leaves();
        self.filtered_direct_path(sender)
            .into_iter()
            .position(|node| num_leaves.is_in_subtree(node, leaf_index.node_index()))
    }
}
