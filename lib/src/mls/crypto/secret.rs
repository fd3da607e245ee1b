use std::fmt;

use bytes::{Buf, BufMut};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::mls::crypto::rng::random_bytes_vec;
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, serialize_opaque_vec, Deserializer, Serializer,
};

/// Container for secret bytes (key-schedule secrets, path secrets, private keys).
///
/// The buffer is overwritten with zeros when the value is dropped, comparison runs in constant
/// time and `Debug` never prints the content. Superseded epoch secrets are therefore wiped as soon
/// as the state holding them is replaced.
#[derive(Clone, Default, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// All-zero secret of the given length.
    pub fn zero(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Fresh random secret of the given length.
    pub fn random(len: usize) -> Self {
        Self(random_bytes_vec(len))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Secret {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}

impl Deserializer for Secret {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let bytes = deserialize_opaque_vec(buf)?;
        Ok(Self(bytes.to_vec()))
    }
}

impl Serializer for Secret {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_value() {
        let secret = Secret::new(vec![0xAB; 4]);
        assert!(!format!("{secret:?}").contains("171"));
    }

    #[test]
    fn zeroize_wipes_the_buffer() {
        let mut secret = Secret::new(vec![7; 32]);
        secret.zeroize();
        assert!(secret.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Secret::zero(32), Secret::zero(32));
        assert_ne!(Secret::zero(32), Secret::zero(16));
        assert_ne!(Secret::random(32), Secret::random(32));
    }
}
