use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::mls::crypto::provider::{Hash, HashScheme};
use crate::mls::utilities::error::{Error, Result};

/// `SHA-256` digests and `HMAC-SHA256` MACs, the hash of both supported cipher suites.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub(super) struct HashSchemeWrapper(pub(super) HashScheme);

impl Hash for HashSchemeWrapper {
    fn size(&self) -> usize {
        match self.0 {
            HashScheme::SHA256 => <Sha256 as Digest>::output_size(),
        }
    }

    fn digest(&self, data: &[u8]) -> Bytes {
        match self.0 {
            HashScheme::SHA256 => Bytes::copy_from_slice(&Sha256::digest(data)),
        }
    }

    fn mac(&self, key: &[u8], message: &[u8]) -> Result<Bytes> {
        match self.0 {
            HashScheme::SHA256 => {
                let mut hmac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .map_err(|err| Error::RustCryptoError(err.to_string()))?;
                hmac.update(message);
                Ok(Bytes::copy_from_slice(&hmac.finalize().into_bytes()))
            }
        }
    }
}
