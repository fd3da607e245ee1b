mod hash;
mod hpke;
mod signature;

use self::hash::HashSchemeWrapper;
use self::hpke::HpkeSuiteWrapper;
use self::signature::SignatureSchemeWrapper;
use super::{
    Aead, CipherSuite, CryptoProvider, Hash, HashScheme, Hpke, HpkeSuite, Kdf, Kem, Signature,
    SignatureScheme,
};
use crate::mls::utilities::error::{Error, Result};

struct CipherSuiteDescription {
    cipher_suite: CipherSuite,
    hash: HashSchemeWrapper,
    hpke: HpkeSuiteWrapper,
    signature: SignatureSchemeWrapper,
}

static CIPHER_SUITE_DESCRIPTIONS: [CipherSuiteDescription; 2] = [
    CipherSuiteDescription {
        cipher_suite: CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519,
        hash: HashSchemeWrapper(HashScheme::SHA256),
        hpke: HpkeSuiteWrapper(HpkeSuite {
            kem: Kem::KEM_X25519_HKDF_SHA256,
            kdf: Kdf::KDF_HKDF_SHA256,
            aead: Aead::AEAD_AES128GCM,
        }),
        signature: SignatureSchemeWrapper(SignatureScheme::ED25519),
    },
    CipherSuiteDescription {
        cipher_suite: CipherSuite::MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519,
        hash: HashSchemeWrapper(HashScheme::SHA256),
        hpke: HpkeSuiteWrapper(HpkeSuite {
            kem: Kem::KEM_X25519_HKDF_SHA256,
            kdf: Kdf::KDF_HKDF_SHA256,
            aead: Aead::AEAD_CHACHA20POLY1305,
        }),
        signature: SignatureSchemeWrapper(SignatureScheme::ED25519),
    },
];

fn description(cipher_suite: CipherSuite) -> Result<&'static CipherSuiteDescription> {
    CIPHER_SUITE_DESCRIPTIONS
        .iter()
        .find(|description| description.cipher_suite == cipher_suite)
        .ok_or(Error::UnsupportedCipherSuite)
}

/// [RustCrypto](https://github.com/RustCrypto) based crypto provider
#[derive(Default, Debug, Clone, Copy)]
pub struct RustCryptoProvider;

impl CryptoProvider for RustCryptoProvider {
    fn supports(&self, cipher_suite: CipherSuite) -> bool {
        description(cipher_suite).is_ok()
    }

    fn supported(&self) -> Vec<CipherSuite> {
        CIPHER_SUITE_DESCRIPTIONS
            .iter()
            .map(|description| description.cipher_suite)
            .collect()
    }

    fn hash(&self, cipher_suite: CipherSuite) -> Result<&dyn Hash> {
        Ok(&description(cipher_suite)?.hash)
    }

    fn hpke(&self, cipher_suite: CipherSuite) -> Result<&dyn Hpke> {
        Ok(&description(cipher_suite)?.hpke)
    }

    fn signature(&self, cipher_suite: CipherSuite) -> Result<&dyn Signature> {
        Ok(&description(cipher_suite)?.signature)
    }
}
