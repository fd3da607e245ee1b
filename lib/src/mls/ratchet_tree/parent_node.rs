//! [RFC9420 Sec.7.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-7.1) Parent Node Contents

use bytes::{Buf, BufMut, Bytes};

use crate::mls::crypto::HPKEPublicKey;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_slice, serialize_opaque_vec, serialize_slice,
    Deserializer, Serializer,
};
use crate::mls::utilities::tree_math::LeafIndex;

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct ParentNode {
    pub encryption_key: HPKEPublicKey,
    pub parent_hash: Bytes,
    /// Leaves added below this node since its key was last set; they do not know its secret.
    pub unmerged_leaves: Vec<LeafIndex>,
}

impl Deserializer for ParentNode {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            encryption_key: HPKEPublicKey::deserialize(buf)?,
            parent_hash: deserialize_opaque_vec(buf)?,
            unmerged_leaves: deserialize_slice(buf)?,
        })
    }
}

impl Serializer for ParentNode {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.encryption_key.serialize(buf)?;
        serialize_opaque_vec(&self.parent_hash, buf)?;
        serialize_slice(&self.unmerged_leaves, buf)
    }
}
