use serde::{Deserialize, Serialize};

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::framing::ProtocolVersion;

/// Protocol version and cipher suite a group runs with.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
}

impl CryptoConfig {
    pub fn new(version: ProtocolVersion, cipher_suite: CipherSuite) -> Self {
        Self {
            version,
            cipher_suite,
        }
    }

    pub fn with_cipher_suite(cipher_suite: CipherSuite) -> Self {
        Self {
            version: ProtocolVersion::MLS10,
            cipher_suite,
        }
    }
}
