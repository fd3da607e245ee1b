//! Typed view of the extensions this crate interprets. Anything else stays in its wire form.

use super::{ApplicationIdExtension, Extension, ExtensionType, Extensions, RatchetTreeExtension};
use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{Deserializer, Serializer};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MlsExtension {
    ApplicationId(ApplicationIdExtension),
    RatchetTree(RatchetTreeExtension),
    Other(Extension),
}

impl TryFrom<&MlsExtension> for Extension {
    type Error = Error;

    fn try_from(extension: &MlsExtension) -> Result<Self> {
        let (extension_type, extension_data) = match extension {
            MlsExtension::ApplicationId(ApplicationIdExtension(id)) => {
                (ExtensionType::ApplicationId, id.clone())
            }
            MlsExtension::RatchetTree(RatchetTreeExtension { ratchet_tree }) => {
                (ExtensionType::RatchetTree, ratchet_tree.serialize_detached()?)
            }
            MlsExtension::Other(extension) => return Ok(extension.clone()),
        };
        Ok(Extension {
            extension_type,
            extension_data,
        })
    }
}

impl TryFrom<Extension> for MlsExtension {
    type Error = Error;

    fn try_from(extension: Extension) -> Result<Self> {
        Ok(match extension.extension_type {
            ExtensionType::ApplicationId => {
                Self::ApplicationId(ApplicationIdExtension(extension.extension_data))
            }
            ExtensionType::RatchetTree => Self::RatchetTree(RatchetTreeExtension::new(
                RatchetTree::deserialize_exact(&extension.extension_data)?,
            )),
            _ => Self::Other(extension),
        })
    }
}

impl TryFrom<Vec<MlsExtension>> for Extensions {
    type Error = Error;

    fn try_from(extensions: Vec<MlsExtension>) -> Result<Self> {
        extensions
            .iter()
            .map(Extension::try_from)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl TryFrom<Extensions> for Vec<MlsExtension> {
    type Error = Error;

    fn try_from(extensions: Extensions) -> Result<Self> {
        extensions.0.into_iter().map(MlsExtension::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn unknown_extensions_keep_their_wire_form() -> Result<()> {
        let grease = Extension {
            extension_type: ExtensionType::from(0x0a0a),
            extension_data: Bytes::from_static(b"opaque"),
        };
        let extensions = Extensions::try_from(vec![
            MlsExtension::ApplicationId(ApplicationIdExtension(Bytes::from_static(b"client-1"))),
            MlsExtension::Other(grease.clone()),
        ])?;

        let decoded = Extensions::deserialize_exact(extensions.serialize_detached()?)?;
        let typed = Vec::<MlsExtension>::try_from(decoded)?;
        assert_eq!(
            typed,
            vec![
                MlsExtension::ApplicationId(ApplicationIdExtension(Bytes::from_static(b"client-1"))),
                MlsExtension::Other(grease),
            ]
        );
        Ok(())
    }
}
