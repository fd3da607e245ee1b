//! [RFC9420 Sec.13](https://www.rfc-editor.org/rfc/rfc9420.html#section-13) Extensibility

use bytes::{Buf, BufMut, Bytes};

use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_slice, deserialize_u16, serialize_opaque_vec,
    serialize_slice, Deserializer, Serializer,
};

pub mod list;

/// [RFC9420 Sec.17.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-17.3) MLS Extension Types
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ExtensionType {
    ApplicationId,
    RatchetTree,
    ExternalPub,
    Unknown(u16),
}

impl From<u16> for ExtensionType {
    fn from(v: u16) -> Self {
        match v {
            0x0001 => ExtensionType::ApplicationId,
            0x0002 => ExtensionType::RatchetTree,
            0x0004 => ExtensionType::ExternalPub,
            _ => ExtensionType::Unknown(v),
        }
    }
}

impl From<ExtensionType> for u16 {
    fn from(val: ExtensionType) -> u16 {
        match val {
            ExtensionType::ApplicationId => 0x0001,
            ExtensionType::RatchetTree => 0x0002,
            ExtensionType::ExternalPub => 0x0004,
            ExtensionType::Unknown(v) => v,
        }
    }
}

impl ExtensionType {
    /// Default extensions need not be listed in a leaf's capabilities.
    pub fn is_default(self) -> bool {
        !matches!(self, ExtensionType::Unknown(_))
    }
}

impl Deserializer for ExtensionType {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(deserialize_u16(buf)?.into())
    }
}

impl Serializer for ExtensionType {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u16((*self).into());
        Ok(())
    }
}

/// A single extension in serialized form.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub extension_data: Bytes,
}

impl Deserializer for Extension {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let extension_type = ExtensionType::deserialize(buf)?;
        let extension_data = deserialize_opaque_vec(buf)?;

        Ok(Self {
            extension_type,
            extension_data,
        })
    }
}

impl Serializer for Extension {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.extension_type.serialize(buf)?;
        serialize_opaque_vec(&self.extension_data, buf)
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Extensions(pub(crate) Vec<Extension>);

impl Extensions {
    pub fn new(extensions: Vec<Extension>) -> Self {
        Self(extensions)
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn find_extension_data(&self, extension_type: ExtensionType) -> Option<&Bytes> {
        self.0
            .iter()
            .find(|ext| ext.extension_type == extension_type)
            .map(|ext| &ext.extension_data)
    }

    pub fn extension_types(&self) -> impl Iterator<Item = ExtensionType> + '_ {
        self.0.iter().map(|ext| ext.extension_type)
    }
}

impl Deserializer for Extensions {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self(deserialize_slice(buf)?))
    }
}

impl Serializer for Extensions {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_slice(&self.0, buf)
    }
}

/// Application-defined identifier of a client, carried in leaf nodes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ApplicationIdExtension(pub Bytes);

/// The full ratchet tree, sent in `GroupInfo` so that joiners need no out-of-band tree.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RatchetTreeExtension {
    pub ratchet_tree: RatchetTree,
}

impl RatchetTreeExtension {
    pub fn new(ratchet_tree: RatchetTree) -> Self {
        Self { ratchet_tree }
    }
}
