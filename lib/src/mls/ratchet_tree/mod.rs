//! [RFC9420 Sec.7](https://www.rfc-editor.org/rfc/rfc9420.html#section-7) Ratchet Tree Operations
//!
//! The tree is kept full: its array always holds `NumLeaves::width()` slots, a `None` slot being a
//! blank node. On the wire trailing blank nodes are stripped.


use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, HPKEPublicKey};
use crate::mls::key_schedule::GroupContext;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_optional, deserialize_u8, deserialize_vector, serialize_opaque_vec,
    serialize_optional, serialize_vector, Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::{LeafIndex, NodeIndex, NumLeaves};

pub mod leaf_node;
pub mod parent_node;
pub mod tree_kem;

use leaf_node::{LeafNode, LeafNodeSource, TreePosition};
use parent_node::ParentNode;

#[derive(Debug, Clone, Eq, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum Node {
    Leaf(LeafNode),
    Parent(ParentNode),
}

impl Node {
    pub fn encryption_key(&self) -> &HPKEPublicKey {
        match self {
            Node::Leaf(leaf) => &leaf.encryption_key,
            Node::Parent(parent) => &parent.encryption_key,
        }
    }

    /// Parent hash stored in the node, `None` for leaves not produced by a commit.
    pub fn parent_hash(&self) -> Option<&Bytes> {
        match self {
            Node::Leaf(leaf) => leaf.parent_hash(),
            Node::Parent(parent) => Some(&parent.parent_hash),
        }
    }
}

impl Deserializer for Node {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(Node::Leaf(LeafNode::deserialize(buf)?)),
            0x02 => Ok(Node::Parent(ParentNode::deserialize(buf)?)),
            v => Err(Error::InvalidNodeTypeValue(v)),
        }
    }
}

impl Serializer for Node {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        match self {
            Node::Leaf(leaf) => {
                buf.put_u8(0x01);
                leaf.serialize(buf)
            }
            Node::Parent(parent) => {
                buf.put_u8(0x02);
                parent.serialize(buf)
            }
        }
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct RatchetTree(pub(crate) Vec<Option<Node>>);

impl Deserializer for RatchetTree {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let mut nodes = vec![];
        deserialize_vector(buf, |b: &mut Bytes| -> Result<()> {
            if deserialize_optional(b)? {
                nodes.push(Some(Node::deserialize(b)?));
            } else {
                nodes.push(None);
            }
            Ok(())
        })?;

        // A serialized tree ends with a non-blank leaf
        if nodes.len() % 2 == 0 || !matches!(nodes.last(), Some(Some(Node::Leaf(_)))) {
            return Err(Error::InvalidLeafNode);
        }

        let num_leaves = u32::try_from(nodes.len() / 2 + 1).map_err(|_| Error::InvalidLeafNode)?;
        let width = NumLeaves::new(num_leaves).width() as usize;
        nodes.resize(width, None);

        let tree = Self(nodes);
        for (index, node) in tree.0.iter().enumerate() {
            let is_leaf = index % 2 == 0;
            match node {
                Some(Node::Leaf(_)) if !is_leaf => return Err(Error::InvalidLeafNode),
                Some(Node::Parent(_)) if is_leaf => return Err(Error::InvalidLeafNode),
                _ => {}
            }
        }

        Ok(tree)
    }
}

impl Serializer for RatchetTree {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        let len = self
            .0
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);

        serialize_vector(len, buf, |i: usize, b: &mut BytesMut| -> Result<()> {
            match &self.0[i] {
                Some(node) => {
                    serialize_optional(true, b)?;
                    node.serialize(b)
                }
                None => serialize_optional(false, b),
            }
        })
    }
}

impl RatchetTree {
    /// A tree with a single leaf, the group creator.
    pub fn new(leaf_node: LeafNode) -> Self {
        Self(vec![Some(Node::Leaf(leaf_node))])
    }

    pub fn num_leaves(&self) -> NumLeaves {
        #[allow(clippy::cast_possible_truncation)]
        NumLeaves(((self.0.len() + 1) / 2) as u32)
    }

    pub fn get(&self, node: NodeIndex) -> Option<&Node> {
        self.0.get(node.0 as usize).and_then(Option::as_ref)
    }

    fn set(&mut self, node: NodeIndex, value: Option<Node>) {
        if let Some(slot) = self.0.get_mut(node.0 as usize) {
            *slot = value;
        }
    }

    pub fn get_leaf(&self, leaf_index: LeafIndex) -> Option<&LeafNode> {
        match self.get(leaf_index.node_index()) {
            Some(Node::Leaf(leaf)) => Some(leaf),
            _ => None,
        }
    }

    pub fn get_parent(&self, node: NodeIndex) -> Option<&ParentNode> {
        match self.get(node) {
            Some(Node::Parent(parent)) => Some(parent),
            _ => None,
        }
    }

    fn get_parent_mut(&mut self, node: NodeIndex) -> Option<&mut ParentNode> {
        match self.0.get_mut(node.0 as usize) {
            Some(Some(Node::Parent(parent))) => Some(parent),
            _ => None,
        }
    }

    /// Non-blank leaves with their index.
    #[allow(clippy::cast_possible_truncation)]
    pub fn leaves(&self) -> impl Iterator<Item = (LeafIndex, &LeafNode)> + '_ {
        self.0.iter().enumerate().filter_map(|(index, node)| match node {
            Some(Node::Leaf(leaf)) => Some((LeafIndex((index / 2) as u32), leaf)),
            _ => None,
        })
    }

    pub fn member_count(&self) -> usize {
        self.leaves().count()
    }

    /// Index of the leaf equal to `leaf_node`.
    pub fn find_leaf(&self, leaf_node: &LeafNode) -> Option<LeafIndex> {
        self.leaves()
            .find(|(_, leaf)| *leaf == leaf_node)
            .map(|(index, _)| index)
    }

    /// Adds a leaf in the leftmost blank slot, extending the tree if it is full.
    ///
    /// [RFC9420 Sec.7.7](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.7)
    pub fn add_leaf(&mut self, leaf_node: LeafNode) -> LeafIndex {
        let num_leaves = self.num_leaves();
        let leaf_index = (0..num_leaves.0)
            .map(LeafIndex)
            .find(|li| self.get(li.node_index()).is_none())
            .unwrap_or(LeafIndex(num_leaves.0));

        if leaf_index.0 >= num_leaves.0 {
            let width = NumLeaves(num_leaves.0 * 2).width() as usize;
            self.0.resize(width, None);
        }

        self.set(leaf_index.node_index(), Some(Node::Leaf(leaf_node)));

        let num_leaves = self.num_leaves();
        for node in num_leaves.direct_path(leaf_index.node_index()) {
            if let Some(parent) = self.get_parent_mut(node) {
                parent.unmerged_leaves.push(leaf_index);
            }
        }

        leaf_index
    }

    /// Replaces the leaf and blanks its direct path.
    pub fn update_leaf(&mut self, leaf_index: LeafIndex, leaf_node: LeafNode) -> Result<()> {
        if self.get_leaf(leaf_index).is_none() {
            return Err(Error::BlankLeaf(leaf_index));
        }
        self.set(leaf_index.node_index(), Some(Node::Leaf(leaf_node)));
        self.blank_direct_path(leaf_index);
        Ok(())
    }

    /// Blanks the leaf and its direct path, then truncates the tree.
    pub fn remove_leaf(&mut self, leaf_index: LeafIndex) -> Result<()> {
        if self.get_leaf(leaf_index).is_none() {
            return Err(Error::BlankLeaf(leaf_index));
        }
        self.set(leaf_index.node_index(), None);
        self.blank_direct_path(leaf_index);
        self.truncate();
        Ok(())
    }

    fn blank_direct_path(&mut self, leaf_index: LeafIndex) {
        for node in self.num_leaves().direct_path(leaf_index.node_index()) {
            self.set(node, None);
        }
    }

    /// Halves the tree as long as the right subtree of the root is blank.
    fn truncate(&mut self) {
        loop {
            let num_leaves = self.num_leaves().0;
            if num_leaves <= 1 {
                return;
            }
            let left_width = (num_leaves - 1) as usize;
            if self.0[left_width + 1..].iter().any(Option::is_some) {
                return;
            }
            self.0.truncate(left_width);
        }
    }

    /// [RFC9420 Sec.4.1.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-4.1.1) The
    /// resolution of a node is the minimal set of non-blank nodes covering its subtree.
    pub fn resolution(&self, node: NodeIndex) -> Vec<NodeIndex> {
        match self.get(node) {
            Some(Node::Leaf(_)) => vec![node],
            Some(Node::Parent(parent)) => {
                let mut resolution = vec![node];
                resolution.extend(parent.unmerged_leaves.iter().map(|li| li.node_index()));
                resolution
            }
            None => {
                let (left, ok) = node.left();
                if !ok {
                    return vec![];
                }
                let (right, _) = node.right();
                let mut resolution = self.resolution(left);
                resolution.extend(self.resolution(right));
                resolution
            }
        }
    }

    /// Direct path of the leaf paired with the copath child of each node.
    fn direct_path_with_copath(&self, leaf_index: LeafIndex) -> Vec<(NodeIndex, NodeIndex)> {
        let num_leaves = self.num_leaves();
        let mut child = leaf_index.node_index();
        let mut path = vec![];
        for parent in num_leaves.direct_path(child) {
            let (sibling, _) = num_leaves.sibling(child);
            path.push((parent, sibling));
            child = parent;
        }
        path
    }

    /// Direct path nodes whose copath child has a non-empty resolution, with that copath child.
    pub(crate) fn filtered_direct_path_with_copath(
        &self,
        leaf_index: LeafIndex,
    ) -> Vec<(NodeIndex, NodeIndex)> {
        self.direct_path_with_copath(leaf_index)
            .into_iter()
            .filter(|(_, copath)| !self.resolution(*copath).is_empty())
            .collect()
    }

    /// [RFC9420 Sec.4.1.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-4.1.2)
    pub fn filtered_direct_path(&self, leaf_index: LeafIndex) -> Vec<NodeIndex> {
        self.filtered_direct_path_with_copath(leaf_index)
            .into_iter()
            .map(|(node, _)| node)
            .collect()
    }

    /// [RFC9420 Sec.7.8](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.8) Tree hash of the
    /// root.
    pub fn compute_root_tree_hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<Bytes> {
        let root = self.num_leaves().root();
        self.compute_tree_hash(crypto_provider, cipher_suite, root, &HashSet::new())
    }

    /// Tree hash of the subtree under `node`, computed as if the leaves in `excluded` were blank
    /// and absent from every unmerged-leaves list.
    fn compute_tree_hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        node: NodeIndex,
        excluded: &HashSet<LeafIndex>,
    ) -> Result<Bytes> {
        let mut buf = BytesMut::new();

        if let (leaf_index, true) = node.leaf_index() {
            buf.put_u8(0x01);
            leaf_index.serialize(&mut buf)?;
            match self.get_leaf(leaf_index) {
                Some(leaf) if !excluded.contains(&leaf_index) => {
                    serialize_optional(true, &mut buf)?;
                    leaf.serialize(&mut buf)?;
                }
                _ => serialize_optional(false, &mut buf)?,
            }
        } else {
            let (left, _) = node.left();
            let (right, _) = node.right();
            let left_hash = self.compute_tree_hash(crypto_provider, cipher_suite, left, excluded)?;
            let right_hash =
                self.compute_tree_hash(crypto_provider, cipher_suite, right, excluded)?;

            buf.put_u8(0x02);
            match self.get_parent(node) {
                Some(parent) => {
                    serialize_optional(true, &mut buf)?;
                    let mut parent = parent.clone();
                    parent.unmerged_leaves.retain(|li| !excluded.contains(li));
                    parent.serialize(&mut buf)?;
                }
                None => serialize_optional(false, &mut buf)?,
            }
            serialize_opaque_vec(&left_hash, &mut buf)?;
            serialize_opaque_vec(&right_hash, &mut buf)?;
        }

        crypto_provider.digest(cipher_suite, &buf)
    }

    /// [RFC9420 Sec.7.9](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.9) Parent hash of
    /// `parent` as seen from the child opposite to `sibling`.
    pub(crate) fn compute_parent_hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        parent: NodeIndex,
        sibling: NodeIndex,
    ) -> Result<Bytes> {
        let parent_node = self.get_parent(parent).ok_or(Error::InvalidParentHash)?;
        let excluded = parent_node.unmerged_leaves.iter().copied().collect();
        let original_sibling_tree_hash =
            self.compute_tree_hash(crypto_provider, cipher_suite, sibling, &excluded)?;

        let mut buf = BytesMut::new();
        parent_node.encryption_key.serialize(&mut buf)?;
        serialize_opaque_vec(&parent_node.parent_hash, &mut buf)?;
        serialize_opaque_vec(&original_sibling_tree_hash, &mut buf)?;

        crypto_provider.digest(cipher_suite, &buf)
    }

    /// Sets the parent hashes along the filtered direct path of `leaf_index` from the root down
    /// and returns the parent hash the leaf itself must carry.
    pub(crate) fn set_path_parent_hashes(
        &mut self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        leaf_index: LeafIndex,
    ) -> Result<Bytes> {
        let mut parent_hash = Bytes::new();
        for (node, copath) in self
            .filtered_direct_path_with_copath(leaf_index)
            .into_iter()
            .rev()
        {
            let parent = self.get_parent_mut(node).ok_or(Error::InvalidParentHash)?;
            parent.parent_hash = parent_hash;
            parent_hash = self.compute_parent_hash(crypto_provider, cipher_suite, node, copath)?;
        }
        Ok(parent_hash)
    }

    /// Every non-blank parent node must be parent-hash valid relative to one of its children.
    ///
    /// [RFC9420 Sec.7.9.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.9.2)
    pub fn verify_parent_hashes(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<()> {
        for (index, node) in self.0.iter().enumerate() {
            let Some(Node::Parent(parent)) = node else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let node = NodeIndex(index as u32);
            let (left, _) = node.left();
            let (right, _) = node.right();
            let unmerged: Vec<NodeIndex> = parent
                .unmerged_leaves
                .iter()
                .map(|li| li.node_index())
                .collect();

            let mut valid = false;
            for (child, sibling) in [(left, right), (right, left)] {
                let expected =
                    self.compute_parent_hash(crypto_provider, cipher_suite, node, sibling)?;
                valid = self
                    .resolution(child)
                    .into_iter()
                    .filter(|d| !unmerged.contains(d))
                    .filter_map(|d| self.get(d).and_then(Node::parent_hash))
                    .any(|parent_hash| *parent_hash == expected);
                if valid {
                    break;
                }
            }

            if !valid {
                return Err(Error::InvalidParentHash);
            }
        }

        Ok(())
    }

    /// Checks a tree received from outside the group against the group context.
    ///
    /// [RFC9420 Sec.12.4.3.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.3.1)
    pub fn verify_integrity(
        &self,
        crypto_provider: &impl CryptoProvider,
        group_context: &GroupContext,
    ) -> Result<()> {
        let cipher_suite = group_context.cipher_suite;

        if self.compute_root_tree_hash(crypto_provider, cipher_suite)? != group_context.tree_hash {
            return Err(Error::TreeHashMismatch);
        }

        self.verify_parent_hashes(crypto_provider, cipher_suite)?;

        let mut signature_keys = HashSet::new();
        let mut encryption_keys = HashSet::new();
        for (leaf_index, leaf) in self.leaves() {
            let position = TreePosition {
                group_id: group_context.group_id.clone(),
                leaf_index,
            };
            let position = match leaf.leaf_node_source {
                LeafNodeSource::KeyPackage(_) => None,
                LeafNodeSource::Update | LeafNodeSource::Commit(_) => Some(&position),
            };
            leaf.verify_signature(crypto_provider, cipher_suite, position)?;

            if !leaf.capabilities.cipher_suites.contains(&cipher_suite)
                || !leaf.capabilities.versions.contains(&group_context.version)
            {
                return Err(Error::InvalidLeafNode);
            }
            if !signature_keys.insert(leaf.signature_key.clone()) {
                return Err(Error::InvalidLeafNode);
            }
        }

        for node in self.0.iter().flatten() {
            if !encryption_keys.insert(node.encryption_key().clone()) {
                return Err(Error::InvalidLeafNode);
            }
        }

        Ok(())
    }
}
