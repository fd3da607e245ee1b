//! Crypto provider abstraction.
//!
//! A [`CryptoProvider`] exposes the three primitive families of a cipher suite ([`Hash`],
//! [`Hpke`], [`Signature`]); the labeled constructions of
//! [RFC9420 Sec.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-5) are provided methods on
//! top of them, so that every provider derives keys the same way.

use bytes::{BufMut, Bytes, BytesMut};
use subtle::ConstantTimeEq;

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::key_pair::{HPKEKeyPair, SignatureKeyPair};
use crate::mls::crypto::secret::Secret;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::serialize_opaque_vec;

pub use super::{Aead, Kdf, Kem};

mod rust;

pub use rust::RustCryptoProvider;

/// Every label used with [`CryptoProvider::expand_with_label`],
/// [`CryptoProvider::sign_with_label`] and [`CryptoProvider::encrypt_with_label`] is prefixed
/// with this string.
pub const MLS_LABEL_PREFIX: &[u8] = b"MLS 1.0 ";

#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashScheme {
    #[default]
    SHA256,
}

#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum SignatureScheme {
    #[default]
    ED25519 = 0x0807,
}

#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct HpkeSuite {
    pub kem: Kem,
    pub kdf: Kdf,
    pub aead: Aead,
}

pub trait Hash: Send + Sync {
    fn size(&self) -> usize;

    fn digest(&self, data: &[u8]) -> Bytes;

    fn mac(&self, key: &[u8], message: &[u8]) -> Result<Bytes>;
}

pub trait Hpke: Send + Sync {
    fn hpke_suite(&self) -> HpkeSuite;

    fn kem_derive_key_pair(&self, ikm: &[u8]) -> Result<HPKEKeyPair>;

    /// HPKE `SealBase`, returns `(kem_output, ciphertext)`.
    fn hpke_seal(
        &self,
        public_key: &[u8],
        info: &[u8],
        additional_data: &[u8],
        plaintext: &[u8],
    ) -> Result<(Bytes, Bytes)>;

    /// HPKE `OpenBase`.
    fn hpke_open(
        &self,
        private_key: &[u8],
        kem_output: &[u8],
        info: &[u8],
        additional_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Bytes>;

    fn kdf_expand(&self, secret: &[u8], info: &[u8], length: u16) -> Result<Secret>;

    fn kdf_extract(&self, secret: &[u8], salt: &[u8]) -> Result<Secret>;

    fn kdf_extract_size(&self) -> u16;

    fn aead_key_size(&self) -> u16;

    fn aead_nonce_size(&self) -> u16;

    fn aead_open(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        additional_data: &[u8],
    ) -> Result<Bytes>;

    fn aead_seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        additional_data: &[u8],
    ) -> Result<Bytes>;
}

pub trait Signature: Send + Sync {
    fn signature_key_pair(&self) -> Result<SignatureKeyPair>;

    fn signature_scheme(&self) -> SignatureScheme;

    fn sign(&self, sign_key: &[u8], message: &[u8]) -> Result<Bytes>;

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()>;
}

fn mls_label(label: &[u8]) -> Vec<u8> {
    let mut full = MLS_LABEL_PREFIX.to_vec();
    full.extend_from_slice(label);
    full
}

pub trait CryptoProvider: Send + Sync {
    fn supports(&self, cipher_suite: CipherSuite) -> bool;

    fn supported(&self) -> Vec<CipherSuite>;

    fn hash(&self, cipher_suite: CipherSuite) -> Result<&dyn Hash>;

    fn hpke(&self, cipher_suite: CipherSuite) -> Result<&dyn Hpke>;

    fn signature(&self, cipher_suite: CipherSuite) -> Result<&dyn Signature>;

    /// `KDF.Nh`, the output size of the cipher suite's hash.
    fn hash_size(&self, cipher_suite: CipherSuite) -> Result<usize> {
        Ok(self.hash(cipher_suite)?.size())
    }

    fn digest(&self, cipher_suite: CipherSuite, data: &[u8]) -> Result<Bytes> {
        Ok(self.hash(cipher_suite)?.digest(data))
    }

    fn sign_mac(&self, cipher_suite: CipherSuite, key: &[u8], message: &[u8]) -> Result<Bytes> {
        self.hash(cipher_suite)?.mac(key, message)
    }

    /// Recomputes the MAC and compares it with `tag` in constant time.
    fn verify_mac(
        &self,
        cipher_suite: CipherSuite,
        key: &[u8],
        message: &[u8],
        tag: &[u8],
    ) -> Result<bool> {
        let expected = self.sign_mac(cipher_suite, key, message)?;
        Ok(bool::from(expected.as_ref().ct_eq(tag)))
    }

    /// [RFC9420 Sec.5.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.2)
    /// `RefHash(label, value) = Hash(RefHashInput)`
    fn ref_hash(&self, cipher_suite: CipherSuite, label: &[u8], value: &[u8]) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        serialize_opaque_vec(label, &mut buf)?;
        serialize_opaque_vec(value, &mut buf)?;
        self.digest(cipher_suite, &buf)
    }

    /// `KDF.Extract(salt, ikm)`
    fn extract(&self, cipher_suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Result<Secret> {
        self.hpke(cipher_suite)?.kdf_extract(ikm, salt)
    }

    /// [RFC9420 Sec.8](https://www.rfc-editor.org/rfc/rfc9420.html#section-8)
    ///
    /// ```text
    /// ExpandWithLabel(Secret, Label, Context, Length) =
    ///     KDF.Expand(Secret, KDFLabel, Length)
    /// ```
    fn expand_with_label(
        &self,
        cipher_suite: CipherSuite,
        secret: &[u8],
        label: &[u8],
        context: &[u8],
        length: u16,
    ) -> Result<Secret> {
        let mut kdf_label = BytesMut::new();
        kdf_label.put_u16(length);
        serialize_opaque_vec(&mls_label(label), &mut kdf_label)?;
        serialize_opaque_vec(context, &mut kdf_label)?;

        self.hpke(cipher_suite)?
            .kdf_expand(secret, &kdf_label, length)
    }

    /// `DeriveSecret(Secret, Label) = ExpandWithLabel(Secret, Label, "", KDF.Nh)`
    fn derive_secret(
        &self,
        cipher_suite: CipherSuite,
        secret: &[u8],
        label: &[u8],
    ) -> Result<Secret> {
        let length = self.hpke(cipher_suite)?.kdf_extract_size();
        self.expand_with_label(cipher_suite, secret, label, &[], length)
    }

    fn derive_key_pair(&self, cipher_suite: CipherSuite, ikm: &[u8]) -> Result<HPKEKeyPair> {
        self.hpke(cipher_suite)?.kem_derive_key_pair(ikm)
    }

    /// Fresh HPKE key pair derived from random input keying material.
    fn generate_key_pair(&self, cipher_suite: CipherSuite) -> Result<HPKEKeyPair> {
        let ikm = self.generate_secret(cipher_suite)?;
        self.derive_key_pair(cipher_suite, ikm.as_bytes())
    }

    /// Random secret of `KDF.Nh` bytes, also used for PSK nonces.
    fn generate_secret(&self, cipher_suite: CipherSuite) -> Result<Secret> {
        Ok(Secret::random(self.hash_size(cipher_suite)?))
    }

    /// [RFC9420 Sec.5.1.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.1.2)
    /// `SignWithLabel(SignatureKey, Label, Content)`
    fn sign_with_label(
        &self,
        cipher_suite: CipherSuite,
        sign_key: &[u8],
        label: &[u8],
        content: &[u8],
    ) -> Result<Bytes> {
        let mut sign_content = BytesMut::new();
        serialize_opaque_vec(&mls_label(label), &mut sign_content)?;
        serialize_opaque_vec(content, &mut sign_content)?;

        self.signature(cipher_suite)?
            .sign(sign_key, &sign_content)
    }

    fn verify_with_label(
        &self,
        cipher_suite: CipherSuite,
        verify_key: &[u8],
        label: &[u8],
        content: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let mut sign_content = BytesMut::new();
        serialize_opaque_vec(&mls_label(label), &mut sign_content)?;
        serialize_opaque_vec(content, &mut sign_content)?;

        self.signature(cipher_suite)?
            .verify(verify_key, &sign_content, signature)
            .map_err(|_| Error::InvalidSignature)
    }

    /// [RFC9420 Sec.5.1.3](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.1.3)
    /// `EncryptWithLabel(PublicKey, Label, Context, Plaintext)`, returns `(kem_output, ciphertext)`
    fn encrypt_with_label(
        &self,
        cipher_suite: CipherSuite,
        public_key: &[u8],
        label: &[u8],
        context: &[u8],
        plaintext: &[u8],
    ) -> Result<(Bytes, Bytes)> {
        let mut encrypt_context = BytesMut::new();
        serialize_opaque_vec(&mls_label(label), &mut encrypt_context)?;
        serialize_opaque_vec(context, &mut encrypt_context)?;

        self.hpke(cipher_suite)?
            .hpke_seal(public_key, &encrypt_context, &[], plaintext)
    }

    fn decrypt_with_label(
        &self,
        cipher_suite: CipherSuite,
        private_key: &[u8],
        label: &[u8],
        context: &[u8],
        kem_output: &[u8],
        ciphertext: &[u8],
    ) -> Result<Bytes> {
        let mut encrypt_context = BytesMut::new();
        serialize_opaque_vec(&mls_label(label), &mut encrypt_context)?;
        serialize_opaque_vec(context, &mut encrypt_context)?;

        self.hpke(cipher_suite)?
            .hpke_open(private_key, kem_output, &encrypt_context, &[], ciphertext)
    }
}
