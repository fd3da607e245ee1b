//! [RFC9420 Sec.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-5) Cryptographic Objects
//!
//! Public keys travel as opaque [`Key`] bytes, private keys stay in zeroized [`Secret`]s. The
//! primitives behind a cipher suite are reached through [`provider::CryptoProvider`].

use bytes::{Buf, BufMut, Bytes};
use std::ops::Deref;

use crate::mls::utilities::{
    error::Result,
    serde::{deserialize_opaque_vec, serialize_opaque_vec, Deserializer, Serializer},
};

pub mod cipher_suite;
pub mod config;
pub mod credential;
pub mod key_pair;
pub mod provider;
pub mod rng;
pub mod secret;

pub use secret::Secret;

/// Public key material as it appears on the wire, `opaque <V>`.
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new<T: Into<Bytes>>(bytes: T) -> Self {
        Self(bytes.into())
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl Deref for Key {
    type Target = Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serializer for Key {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.0, buf)
    }
}

impl Deserializer for Key {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        deserialize_opaque_vec(buf).map(Key)
    }
}

/// X25519 public key of a leaf, a parent node or a key package `init_key`.
pub type HPKEPublicKey = Key;
pub type HPKEPrivateKey = Secret;

/// Ed25519 verification key carried in a leaf node.
pub type SignaturePublicKey = Key;
pub type SignaturePrivateKey = Secret;

/// HPKE KEM identifier, from the IANA HPKE registry.
#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum Kem {
    #[default]
    KEM_X25519_HKDF_SHA256 = 0x0020,
}

/// HPKE KDF identifier. The same KDF drives the MLS key schedule.
#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum Kdf {
    #[default]
    KDF_HKDF_SHA256 = 0x0001,
}

/// HPKE AEAD identifier. The same AEAD protects private messages and the welcome.
#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum Aead {
    #[default]
    AEAD_AES128GCM = 0x0001,
    AEAD_CHACHA20POLY1305 = 0x0003,
}
