use serde::{Deserialize, Serialize};

use crate::mls::{
    crypto::config::CryptoConfig,
    extensibility::{list::MlsExtension, Extensions},
    utilities::error::Result,
};

/// Number of past resumption PSKs a group keeps by default.
pub const DEFAULT_RESUMPTION_PSK_HISTORY: usize = 5;

/// How far ahead of the current ratchet generation a received message may be by default.
pub const DEFAULT_MAX_GENERATION_GAP: u32 = 1000;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub(crate) crypto_config: CryptoConfig,
    #[serde(skip)]
    pub(crate) extensions: Extensions,
    pub(crate) resumption_psk_history: usize,
    pub(crate) max_generation_gap: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            crypto_config: CryptoConfig::default(),
            extensions: Extensions::default(),
            resumption_psk_history: DEFAULT_RESUMPTION_PSK_HISTORY,
            max_generation_gap: DEFAULT_MAX_GENERATION_GAP,
        }
    }
}

impl GroupConfig {
    /// Create a group config builder
    pub fn builder() -> GroupConfigBuilder {
        GroupConfigBuilder::new()
    }

    pub fn crypto_config(&self) -> CryptoConfig {
        self.crypto_config
    }

    /// Extensions of the initial group context.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn resumption_psk_history(&self) -> usize {
        self.resumption_psk_history
    }

    pub fn max_generation_gap(&self) -> u32 {
        self.max_generation_gap
    }

    /// Same settings for a group resumed with another version, cipher suite and extensions.
    pub(crate) fn resumed(&self, crypto_config: CryptoConfig, extensions: Extensions) -> Self {
        Self {
            crypto_config,
            extensions,
            ..self.clone()
        }
    }
}

#[derive(Default, Debug)]
pub struct GroupConfigBuilder {
    group_config: GroupConfig,
    extensions: Vec<MlsExtension>,
}

impl GroupConfigBuilder {
    /// Create a group config
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with crypto config
    #[must_use]
    pub fn with_crypto_config(mut self, crypto_config: CryptoConfig) -> Self {
        self.group_config.crypto_config = crypto_config;
        self
    }

    /// Build with extensions
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<MlsExtension>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Build with the number of past resumption PSKs to keep
    #[must_use]
    pub fn with_resumption_psk_history(mut self, resumption_psk_history: usize) -> Self {
        self.group_config.resumption_psk_history = resumption_psk_history;
        self
    }

    /// Build with the maximum ratchet generation gap accepted from a sender
    #[must_use]
    pub fn with_max_generation_gap(mut self, max_generation_gap: u32) -> Self {
        self.group_config.max_generation_gap = max_generation_gap;
        self
    }

    /// Finalize and build the group config
    pub fn build(self) -> Result<GroupConfig> {
        let mut group_config = self.group_config;
        group_config.extensions = Extensions::try_from(self.extensions)?;
        Ok(group_config)
    }
}
