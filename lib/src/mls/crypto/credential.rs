//! [RFC9420 Sec.5.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.3) Credentials
//!
//! A credential binds the identity of a member to the signature key of its leaf. Only basic
//! credentials are understood; whether two credentials name the same client is decided by the
//! [`AuthenticationService`](crate::mls::auth::AuthenticationService).

use bytes::{Buf, BufMut, Bytes};
use std::ops::Deref;

use crate::mls::utilities::{
    error::{Error, Result},
    serde::{deserialize_opaque_vec, deserialize_u16, serialize_opaque_vec, Deserializer, Serializer},
};

const BASIC: u16 = 0x0001;

/// Credential type as listed in a leaf's capabilities. Types this crate cannot validate are
/// kept as [`CredentialType::Unknown`] so that capabilities round-trip.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CredentialType {
    #[default]
    Basic,
    Unknown(u16),
}

impl From<u16> for CredentialType {
    fn from(value: u16) -> Self {
        if value == BASIC {
            Self::Basic
        } else {
            Self::Unknown(value)
        }
    }
}

impl From<CredentialType> for u16 {
    fn from(credential_type: CredentialType) -> u16 {
        match credential_type {
            CredentialType::Basic => BASIC,
            CredentialType::Unknown(value) => value,
        }
    }
}

impl Serializer for CredentialType {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u16(u16::from(*self));
        Ok(())
    }
}

impl Deserializer for CredentialType {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        deserialize_u16(buf).map(Self::from)
    }
}

/// Application-defined identity bytes of a basic credential.
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub struct Identity(Bytes);

impl Identity {
    pub fn new<T: Into<Bytes>>(identity: T) -> Self {
        Self(identity.into())
    }
}

impl Deref for Identity {
    type Target = Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Credential {
    Basic(Identity),
}

impl Default for Credential {
    fn default() -> Self {
        Self::Basic(Identity::default())
    }
}

impl Credential {
    pub fn basic<T: Into<Bytes>>(identity: T) -> Self {
        Self::Basic(Identity::new(identity))
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Self::Basic(identity) => identity,
        }
    }

    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Basic(_) => CredentialType::Basic,
        }
    }
}

impl Serializer for Credential {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.credential_type().serialize(buf)?;
        match self {
            Self::Basic(identity) => serialize_opaque_vec(identity, buf),
        }
    }
}

impl Deserializer for Credential {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match CredentialType::deserialize(buf)? {
            CredentialType::Basic => Ok(Self::Basic(Identity(deserialize_opaque_vec(buf)?))),
            CredentialType::Unknown(_) => Err(Error::InvalidCredentialTypeValue),
        }
    }
}
