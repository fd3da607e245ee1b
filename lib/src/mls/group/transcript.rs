use bytes::Bytes;

use crate::mls::{
    crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret},
    key_schedule::{ConfirmedTranscriptHashInput, InterimTranscriptHashInput},
    utilities::error::{CommitError, Result},
};

/// As described in <https://www.rfc-editor.org/rfc/rfc9420.html#name-transcript-hashes>
///
/// "A `confirmed_transcript_hash` that represents a transcript over the whole history
/// of Commit messages, up to and including the signature of the most recent Commit."
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfirmedTranscriptHash {
    pub(crate) confirmed_hash: Bytes,
    pub(crate) interim_hash: Bytes,
}

impl Default for ConfirmedTranscriptHash {
    fn default() -> Self {
        // https://www.rfc-editor.org/rfc/rfc9420.html#section-8.2-7
        // ```
        // confirmed_transcript_hash_[0] = ""; /* zero-length octet string */
        // interim_transcript_hash_[0] = ""; /* zero-length octet string */
        // ```
        Self {
            confirmed_hash: Bytes::new(),
            interim_hash: Bytes::new(),
        }
    }
}

impl ConfirmedTranscriptHash {
    /// Completes the transcript of an epoch once its confirmation tag is known.
    ///
    /// ```text
    /// interim_transcript_hash_[epoch] =
    ///     Hash(confirmed_transcript_hash_[epoch] || InterimTranscriptHashInput_[epoch]);
    /// ```
    pub(crate) fn from_confirmed(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        confirmed_hash: Bytes,
        confirmation_tag: &Bytes,
    ) -> Result<Self> {
        let interim_hash = update_interim_transcript_hash(
            crypto_provider,
            cipher_suite,
            &confirmed_hash,
            confirmation_tag,
        )?;

        Ok(Self {
            confirmed_hash,
            interim_hash,
        })
    }

    /// Confirmed hash of the epoch a commit creates. The interim hash needs the confirmation tag
    /// of that epoch, see [`Self::from_confirmed`].
    ///
    /// ```text
    /// confirmed_transcript_hash_[epoch] =
    ///     Hash(interim_transcript_hash_[epoch - 1] || ConfirmedTranscriptHashInput_[epoch]);
    /// ```
    pub(crate) fn next_confirmed_hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        input: &ConfirmedTranscriptHashInput,
    ) -> Result<Bytes> {
        update_confirmed_transcript_hash(crypto_provider, cipher_suite, &self.interim_hash, input)
    }

    pub fn confirmed_hash(&self) -> &Bytes {
        &self.confirmed_hash
    }

    pub fn interim_hash(&self) -> &Bytes {
        &self.interim_hash
    }
}

/// `Hash(interim_transcript_hash_before || ConfirmedTranscriptHashInput)`
pub fn update_confirmed_transcript_hash(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    interim_before: &[u8],
    input: &ConfirmedTranscriptHashInput,
) -> Result<Bytes> {
    input.hash(crypto_provider, cipher_suite, interim_before)
}

/// `Hash(confirmed_transcript_hash_after || InterimTranscriptHashInput)`
pub fn update_interim_transcript_hash(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    confirmed_after: &[u8],
    confirmation_tag: &Bytes,
) -> Result<Bytes> {
    InterimTranscriptHashInput {
        confirmation_tag: confirmation_tag.clone(),
    }
    .hash(crypto_provider, cipher_suite, confirmed_after)
}

/// Checks `confirmation_tag` against `MAC(confirmation_key, confirmed_transcript_hash)` in
/// constant time.
pub fn verify_confirmation_tag(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    confirmation_key: &Secret,
    confirmed_hash: &[u8],
    confirmation_tag: &[u8],
) -> Result<()> {
    if crypto_provider.verify_mac(
        cipher_suite,
        confirmation_key.as_bytes(),
        confirmed_hash,
        confirmation_tag,
    )? {
        Ok(())
    } else {
        Err(CommitError::InvalidConfirmationTag.into())
    }
}
