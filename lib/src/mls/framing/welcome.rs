//! [RFC9420 Sec.12.4.3.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.3.1) Joining
//! via Welcome Message

use bytes::{Buf, BufMut, Bytes};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::group_info::{GroupInfo, GroupSecrets};
use crate::mls::key_package::{KeyPackage, KeyPackageRef};
use crate::mls::ratchet_tree::tree_kem::HPKECiphertext;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_slice, serialize_opaque_vec, serialize_slice,
    Deserializer, Serializer,
};

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Welcome {
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) secrets: Vec<EncryptedGroupSecrets>,
    pub(crate) encrypted_group_info: Bytes,
}

impl Deserializer for Welcome {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let cipher_suite = CipherSuite::deserialize(buf)?;
        let secrets = deserialize_slice(buf)?;
        let encrypted_group_info = deserialize_opaque_vec(buf)?;

        Ok(Self {
            cipher_suite,
            secrets,
            encrypted_group_info,
        })
    }
}

impl Serializer for Welcome {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.cipher_suite.serialize(buf)?;
        serialize_slice(&self.secrets, buf)?;
        serialize_opaque_vec(&self.encrypted_group_info, buf)
    }
}

impl Welcome {
    /// Encrypts `group_info` under the welcome secret and the group secrets of every joiner to
    /// its key package's init key.
    pub(crate) fn new(
        crypto_provider: &impl CryptoProvider,
        welcome_secret: &[u8],
        group_info: &GroupInfo,
        joiners: &[(KeyPackage, GroupSecrets)],
    ) -> Result<Self> {
        let cipher_suite = group_info.cipher_suite();
        let (welcome_key, welcome_nonce) =
            Self::extract_key_and_nonce(welcome_secret, crypto_provider, cipher_suite)?;

        let encrypted_group_info = crypto_provider.hpke(cipher_suite)?.aead_seal(
            welcome_key.as_bytes(),
            welcome_nonce.as_bytes(),
            &group_info.serialize_detached()?,
            &[],
        )?;

        let mut secrets = Vec::with_capacity(joiners.len());
        for (key_package, group_secrets) in joiners {
            let (kem_output, ciphertext) = crypto_provider.encrypt_with_label(
                cipher_suite,
                &key_package.init_key,
                b"Welcome",
                &encrypted_group_info,
                &group_secrets.serialize_detached()?,
            )?;

            secrets.push(EncryptedGroupSecrets::new(
                key_package.generate_ref(crypto_provider)?,
                HPKECiphertext {
                    kem_output,
                    ciphertext,
                },
            ));
        }

        Ok(Self {
            cipher_suite,
            secrets,
            encrypted_group_info,
        })
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    /// Return the encrypted group secrets in this Welcome message.
    pub fn secrets(&self) -> &[EncryptedGroupSecrets] {
        self.secrets.as_ref()
    }

    /// Find `EncryptedGroupSecrets` based on a `KeyPackageRef`
    pub fn find_secret(&self, r: &KeyPackageRef) -> Option<&EncryptedGroupSecrets> {
        self.secrets.iter().find(|sec| &sec.new_member == r)
    }

    pub(crate) fn decrypt_group_secrets(
        &self,
        crypto_provider: &impl CryptoProvider,
        r: &KeyPackageRef,
        init_key_priv: &[u8],
    ) -> Result<GroupSecrets> {
        let sec = self
            .find_secret(r)
            .ok_or(Error::EncryptedGroupSecretsNotFoundForProvidedKeyPackageRef)?;

        let raw_group_secrets = crypto_provider.decrypt_with_label(
            self.cipher_suite,
            init_key_priv,
            b"Welcome",
            &self.encrypted_group_info,
            &sec.encrypted_group_secrets.kem_output,
            &sec.encrypted_group_secrets.ciphertext,
        )?;

        GroupSecrets::deserialize_exact(&raw_group_secrets)
    }

    /// `welcome_key` and `welcome_nonce` derived from the welcome secret.
    pub(crate) fn extract_key_and_nonce(
        welcome_secret: &[u8],
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
    ) -> Result<(Secret, Secret)> {
        let aead_nonce_size = crypto_provider.hpke(cipher_suite)?.aead_nonce_size();
        let welcome_nonce = crypto_provider.expand_with_label(
            cipher_suite,
            welcome_secret,
            b"nonce",
            &[],
            aead_nonce_size,
        )?;

        let aead_key_size = crypto_provider.hpke(cipher_suite)?.aead_key_size();
        let welcome_key = crypto_provider.expand_with_label(
            cipher_suite,
            welcome_secret,
            b"key",
            &[],
            aead_key_size,
        )?;

        Ok((welcome_key, welcome_nonce))
    }

    pub(crate) fn decrypt_group_info(
        &self,
        crypto_provider: &impl CryptoProvider,
        welcome_secret: &[u8],
    ) -> Result<GroupInfo> {
        let (welcome_key, welcome_nonce) =
            Self::extract_key_and_nonce(welcome_secret, crypto_provider, self.cipher_suite)?;

        let raw_group_info = crypto_provider.hpke(self.cipher_suite)?.aead_open(
            welcome_key.as_bytes(),
            welcome_nonce.as_bytes(),
            &self.encrypted_group_info,
            &[],
        )?;

        GroupInfo::deserialize_exact(&raw_group_info)
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct EncryptedGroupSecrets {
    new_member: KeyPackageRef,
    encrypted_group_secrets: HPKECiphertext,
}

impl Deserializer for EncryptedGroupSecrets {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let new_member = KeyPackageRef::deserialize(buf)?;
        let encrypted_group_secrets = HPKECiphertext::deserialize(buf)?;

        Ok(Self {
            new_member,
            encrypted_group_secrets,
        })
    }
}

impl Serializer for EncryptedGroupSecrets {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.new_member.serialize(buf)?;
        self.encrypted_group_secrets.serialize(buf)
    }
}

impl EncryptedGroupSecrets {
    /// Create a new `EncryptedGroupSecrets`
    pub fn new(new_member: KeyPackageRef, encrypted_group_secrets: HPKECiphertext) -> Self {
        Self {
            new_member,
            encrypted_group_secrets,
        }
    }

    /// Return `KeyPackageRef` of encrypted group secrets
    pub fn new_member(&self) -> &KeyPackageRef {
        &self.new_member
    }
}
