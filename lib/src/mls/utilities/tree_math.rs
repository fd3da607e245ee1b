//! [RFC9420 Appendix C](https://www.rfc-editor.org/rfc/rfc9420.html#appendix-C) Array-based trees
//!
//! The ratchet tree is a left-balanced binary tree stored in an array: leaves live at even
//! indices, parent nodes at odd ones. In MLS the tree is always full, i.e. the number of leaves
//! is a power of two.

use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut};

use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{Deserializer, Serializer};

/// Number of leaves of a tree.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NumLeaves(pub u32);

/// Index of a leaf, counting leaves only.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LeafIndex(pub u32);

/// Index of a node in the array representation.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

fn log2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    31 - x.leading_zeros()
}

impl NumLeaves {
    /// Smallest full tree holding `n` leaves.
    pub fn new(n: u32) -> Self {
        NumLeaves(n.max(1).next_power_of_two())
    }

    /// Number of nodes in the array.
    pub fn width(self) -> u32 {
        if self.0 == 0 {
            0
        } else {
            2 * (self.0 - 1) + 1
        }
    }

    pub fn root(self) -> NodeIndex {
        NodeIndex((1 << log2(self.width())) - 1)
    }

    /// Returns the parent of `x`, `false` if `x` is the root.
    pub fn parent(self, x: NodeIndex) -> (NodeIndex, bool) {
        if x == self.root() {
            return (x, false);
        }
        let k = x.level();
        let b = (x.0 >> (k + 1)) & 1;
        (NodeIndex((x.0 | (1 << k)) ^ (b << (k + 1))), true)
    }

    /// Returns the sibling of `x`, `false` if `x` is the root.
    pub fn sibling(self, x: NodeIndex) -> (NodeIndex, bool) {
        let (p, ok) = self.parent(x);
        if !ok {
            return (x, false);
        }
        if x.0 < p.0 {
            p.right()
        } else {
            p.left()
        }
    }

    /// Nodes between `x` and the root, excluding `x` and including the root.
    pub fn direct_path(self, x: NodeIndex) -> Vec<NodeIndex> {
        let mut path = Vec::new();
        let mut node = x;
        loop {
            let (parent, ok) = self.parent(node);
            if !ok {
                break;
            }
            path.push(parent);
            node = parent;
        }
        path
    }

    /// Siblings of `x` and of every node of its direct path except the root.
    pub fn copath(self, x: NodeIndex) -> Vec<NodeIndex> {
        let mut path = vec![x];
        path.extend(self.direct_path(x));
        path.pop();

        path.into_iter()
            .filter_map(|node| match self.sibling(node) {
                (sibling, true) => Some(sibling),
                _ => None,
            })
            .collect()
    }

    /// Returns whether `x` is in the subtree rooted at `ancestor`.
    pub fn is_in_subtree(self, ancestor: NodeIndex, x: NodeIndex) -> bool {
        let k = ancestor.level();
        let lower = (ancestor.0 >> (k + 1)) << (k + 1);
        let upper = lower + (1 << (k + 1)) - 2;
        lower <= x.0 && x.0 <= upper
    }
}

impl NodeIndex {
    pub fn level(self) -> u32 {
        (!self.0).trailing_zeros()
    }

    pub fn is_leaf(self) -> bool {
        self.0 % 2 == 0
    }

    /// Left child, `false` for a leaf.
    pub fn left(self) -> (NodeIndex, bool) {
        let k = self.level();
        if k == 0 {
            return (self, false);
        }
        (NodeIndex(self.0 ^ (1 << (k - 1))), true)
    }

    /// Right child, `false` for a leaf.
    pub fn right(self) -> (NodeIndex, bool) {
        let k = self.level();
        if k == 0 {
            return (self, false);
        }
        (NodeIndex(self.0 ^ (3 << (k - 1))), true)
    }

    /// Leaf index of this node, `false` for a parent node.
    pub fn leaf_index(self) -> (LeafIndex, bool) {
        if !self.is_leaf() {
            return (LeafIndex(0), false);
        }
        (LeafIndex(self.0 >> 1), true)
    }
}

impl LeafIndex {
    pub fn new(index: u32) -> Self {
        LeafIndex(index)
    }

    pub fn node_index(self) -> NodeIndex {
        NodeIndex(2 * self.0)
    }
}

impl Display for LeafIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deserializer for LeafIndex {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall);
        }
        Ok(LeafIndex(buf.get_u32()))
    }
}

impl Serializer for LeafIndex {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u32(self.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_leaf_tree_relations() {
        let n = NumLeaves(8);
        assert_eq!(n.width(), 15);
        assert_eq!(n.root(), NodeIndex(7));
        assert_eq!(NodeIndex(5).level(), 1);
        assert_eq!(NodeIndex(7).left(), (NodeIndex(3), true));
        assert_eq!(NodeIndex(7).right(), (NodeIndex(11), true));
        assert_eq!(n.parent(NodeIndex(4)), (NodeIndex(5), true));
        assert!(!n.parent(NodeIndex(7)).1);
        assert_eq!(n.sibling(NodeIndex(4)), (NodeIndex(6), true));
        assert_eq!(
            n.direct_path(NodeIndex(0)),
            vec![NodeIndex(1), NodeIndex(3), NodeIndex(7)]
        );
        assert_eq!(
            n.copath(NodeIndex(0)),
            vec![NodeIndex(2), NodeIndex(5), NodeIndex(11)]
        );
    }

    #[test]
    fn single_leaf_tree_has_no_path() {
        let n = NumLeaves(1);
        assert_eq!(n.root(), NodeIndex(0));
        assert!(n.direct_path(NodeIndex(0)).is_empty());
        assert!(n.copath(NodeIndex(0)).is_empty());
    }

    #[test]
    fn subtree_membership() {
        let n = NumLeaves(8);
        assert!(n.is_in_subtree(NodeIndex(3), NodeIndex(6)));
        assert!(n.is_in_subtree(NodeIndex(3), NodeIndex(0)));
        assert!(!n.is_in_subtree(NodeIndex(3), NodeIndex(8)));
        assert!(n.is_in_subtree(NodeIndex(7), NodeIndex(14)));
        assert!(n.is_in_subtree(NodeIndex(4), NodeIndex(4)));
    }

    #[test]
    fn leaf_and_node_indices_convert() {
        assert_eq!(LeafIndex(3).node_index(), NodeIndex(6));
        assert_eq!(NodeIndex(6).leaf_index(), (LeafIndex(3), true));
        assert!(!NodeIndex(5).leaf_index().1);
    }
}
