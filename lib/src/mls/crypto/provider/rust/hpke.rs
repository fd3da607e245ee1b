use aead::{consts::U12, generic_array::GenericArray, AeadInPlace, KeyInit};
use aes_gcm::Aes128Gcm;
use bytes::Bytes;
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use hpke::{Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable};
use sha2::Sha256;

use crate::mls::crypto::rng::get_rng;
use crate::mls::crypto::key_pair::HPKEKeyPair;
use crate::mls::crypto::provider::HpkeSuite;
use crate::mls::crypto::{provider, Aead, Kdf, Key, Secret};
use crate::mls::utilities::error::{Error, Result};

type X25519 = hpke::kem::X25519HkdfSha256;

#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub(super) struct HpkeSuiteWrapper(pub(super) HpkeSuite);

fn crypto_error(err: impl ToString) -> Error {
    Error::RustCryptoError(err.to_string())
}

impl HpkeSuiteWrapper {
    fn seal_x25519<A: hpke::aead::Aead>(
        public_key: &[u8],
        info: &[u8],
        additional_data: &[u8],
        plaintext: &[u8],
    ) -> Result<(Bytes, Bytes)> {
        let public_key =
            <X25519 as KemTrait>::PublicKey::from_bytes(public_key).map_err(crypto_error)?;
        let (encapped_key, ciphertext) = hpke::single_shot_seal::<A, hpke::kdf::HkdfSha256, X25519, _>(
            &OpModeS::Base,
            &public_key,
            info,
            plaintext,
            additional_data,
            &mut get_rng(),
        )
        .map_err(crypto_error)?;

        Ok((
            Bytes::from(encapped_key.to_bytes().to_vec()),
            Bytes::from(ciphertext),
        ))
    }

    fn open_x25519<A: hpke::aead::Aead>(
        private_key: &[u8],
        kem_output: &[u8],
        info: &[u8],
        additional_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Bytes> {
        let private_key =
            <X25519 as KemTrait>::PrivateKey::from_bytes(private_key).map_err(crypto_error)?;
        let encapped_key =
            <X25519 as KemTrait>::EncappedKey::from_bytes(kem_output).map_err(crypto_error)?;
        let plaintext = hpke::single_shot_open::<A, hpke::kdf::HkdfSha256, X25519>(
            &OpModeR::Base,
            &private_key,
            &encapped_key,
            info,
            ciphertext,
            additional_data,
        )
        .map_err(crypto_error)?;

        Ok(Bytes::from(plaintext))
    }
}

fn aead_in_place<C: KeyInit + AeadInPlace<NonceSize = U12>>(
    key: &[u8],
    nonce: &[u8],
    data: &[u8],
    additional_data: &[u8],
    seal: bool,
) -> Result<Bytes> {
    if nonce.len() != 12 {
        return Err(Error::InvalidKeyLength);
    }
    let cipher = C::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)?;
    let nonce = GenericArray::from_slice(nonce);

    let mut in_out = data.to_vec();
    if seal {
        cipher
            .encrypt_in_place(nonce, additional_data, &mut in_out)
            .map_err(crypto_error)?;
    } else {
        cipher
            .decrypt_in_place(nonce, additional_data, &mut in_out)
            .map_err(crypto_error)?;
    }

    Ok(Bytes::from(in_out))
}

impl provider::Hpke for HpkeSuiteWrapper {
    fn hpke_suite(&self) -> HpkeSuite {
        self.0
    }

    fn kem_derive_key_pair(&self, ikm: &[u8]) -> Result<HPKEKeyPair> {
        match self.0.kem {
            provider::Kem::KEM_X25519_HKDF_SHA256 => {
                let (private_key, public_key) = X25519::derive_keypair(ikm);
                Ok(HPKEKeyPair {
                    private_key: Secret::new(private_key.to_bytes().to_vec()),
                    public_key: Key::new(public_key.to_bytes().to_vec()),
                })
            }
        }
    }

    fn hpke_seal(
        &self,
        public_key: &[u8],
        info: &[u8],
        additional_data: &[u8],
        plaintext: &[u8],
    ) -> Result<(Bytes, Bytes)> {
        match self.0.aead {
            Aead::AEAD_AES128GCM => Self::seal_x25519::<hpke::aead::AesGcm128>(
                public_key,
                info,
                additional_data,
                plaintext,
            ),
            Aead::AEAD_CHACHA20POLY1305 => Self::seal_x25519::<hpke::aead::ChaCha20Poly1305>(
                public_key,
                info,
                additional_data,
                plaintext,
            ),
        }
    }

    fn hpke_open(
        &self,
        private_key: &[u8],
        kem_output: &[u8],
        info: &[u8],
        additional_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Bytes> {
        match self.0.aead {
            Aead::AEAD_AES128GCM => Self::open_x25519::<hpke::aead::AesGcm128>(
                private_key,
                kem_output,
                info,
                additional_data,
                ciphertext,
            ),
            Aead::AEAD_CHACHA20POLY1305 => Self::open_x25519::<hpke::aead::ChaCha20Poly1305>(
                private_key,
                kem_output,
                info,
                additional_data,
                ciphertext,
            ),
        }
    }

    fn kdf_expand(&self, secret: &[u8], info: &[u8], length: u16) -> Result<Secret> {
        let mut out = vec![0u8; length as usize];

        match self.0.kdf {
            Kdf::KDF_HKDF_SHA256 => {
                let hkdf = Hkdf::<Sha256>::from_prk(secret).map_err(crypto_error)?;
                hkdf.expand(info, &mut out).map_err(crypto_error)?;
            }
        };

        Ok(Secret::new(out))
    }

    fn kdf_extract(&self, secret: &[u8], salt: &[u8]) -> Result<Secret> {
        match self.0.kdf {
            Kdf::KDF_HKDF_SHA256 => {
                let mut m = <Hmac<Sha256> as Mac>::new_from_slice(salt).map_err(crypto_error)?;
                m.update(secret);
                Ok(Secret::new(m.finalize().into_bytes().to_vec()))
            }
        }
    }

    fn kdf_extract_size(&self) -> u16 {
        match self.0.kdf {
            Kdf::KDF_HKDF_SHA256 => 32,
        }
    }

    // key_size returns the size in bytes of the keys used by the AEAD cipher.
    fn aead_key_size(&self) -> u16 {
        match self.0.aead {
            Aead::AEAD_AES128GCM => 16,
            Aead::AEAD_CHACHA20POLY1305 => 32,
        }
    }

    // nonce_size returns the size in bytes of the nonce used by the AEAD cipher.
    fn aead_nonce_size(&self) -> u16 {
        match self.0.aead {
            Aead::AEAD_AES128GCM | Aead::AEAD_CHACHA20POLY1305 => 12,
        }
    }

    fn aead_open(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        additional_data: &[u8],
    ) -> Result<Bytes> {
        match self.0.aead {
            Aead::AEAD_AES128GCM => {
                aead_in_place::<Aes128Gcm>(key, nonce, ciphertext, additional_data, false)
            }
            Aead::AEAD_CHACHA20POLY1305 => {
                aead_in_place::<ChaCha20Poly1305>(key, nonce, ciphertext, additional_data, false)
            }
        }
    }

    fn aead_seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        additional_data: &[u8],
    ) -> Result<Bytes> {
        match self.0.aead {
            Aead::AEAD_AES128GCM => {
                aead_in_place::<Aes128Gcm>(key, nonce, plaintext, additional_data, true)
            }
            Aead::AEAD_CHACHA20POLY1305 => {
                aead_in_place::<ChaCha20Poly1305>(key, nonce, plaintext, additional_data, true)
            }
        }
    }
}
