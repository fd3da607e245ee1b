//! [RFC9420 Sec.12.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4) Commit

use bytes::{Buf, BufMut};

use crate::mls::framing::proposal::ProposalOrRef;
use crate::mls::ratchet_tree::tree_kem::UpdatePath;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_optional, deserialize_slice, serialize_optional, serialize_slice, Deserializer,
    Serializer,
};

/// A commit covers proposals, sent in the same message by value or earlier by reference, and an
/// optional path that refreshes the committer's keys.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Commit {
    pub proposals: Vec<ProposalOrRef>,
    pub path: Option<UpdatePath>,
}

impl Deserializer for Commit {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let proposals = deserialize_slice(buf)?;

        let path = if deserialize_optional(buf)? {
            Some(UpdatePath::deserialize(buf)?)
        } else {
            None
        };

        Ok(Self { proposals, path })
    }
}

impl Serializer for Commit {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_slice(&self.proposals, buf)?;
        serialize_optional(self.path.is_some(), buf)?;
        if let Some(update_path) = &self.path {
            update_path.serialize(buf)?;
        }

        Ok(())
    }
}
