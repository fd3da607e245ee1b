use crate::mls::crypto::provider::SignatureScheme;
use crate::mls::crypto::{HPKEPrivateKey, HPKEPublicKey, SignaturePrivateKey, SignaturePublicKey};

/// HPKE key pair, used for init keys, leaf/parent encryption keys and the external key.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct HPKEKeyPair {
    pub private_key: HPKEPrivateKey,
    pub public_key: HPKEPublicKey,
}

pub type EncryptionKeyPair = HPKEKeyPair;

#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct SignatureKeyPair {
    pub private_key: SignaturePrivateKey,
    pub public_key: SignaturePublicKey,
    pub signature_scheme: SignatureScheme,
}

impl SignatureKeyPair {
    pub fn private_key(&self) -> &[u8] {
        self.private_key.as_bytes()
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        &self.public_key
    }
}
