//! [RFC9420 Sec.8](https://www.rfc-editor.org/rfc/rfc9420.html#section-8) Key Schedule
//!
//! ```text
//!                     init_secret_[n-1]
//!                           |
//!                           |
//!                           V
//!     commit_secret --> KDF.Extract
//!                           |
//!                           |
//!                           V
//!                   ExpandWithLabel(., "joiner", GroupContext_[n], KDF.Nh)
//!                           |
//!                           |
//!                           V
//!                      joiner_secret
//!                           |
//!                           |
//!                           V
//! psk_secret (or 0) --> KDF.Extract
//!                           |
//!                           |
//!                           +--> DeriveSecret(., "welcome")
//!                           |    = welcome_secret
//!                           |
//!                           V
//!                   ExpandWithLabel(., "epoch", GroupContext_[n], KDF.Nh)
//!                           |
//!                           |
//!                           V
//!                      epoch_secret
//!                           |
//!                           |
//!                           +--> DeriveSecret(., <label>)
//!                           |    = <secret>
//!                           |
//!                           V
//!                     DeriveSecret(., "init")
//!                           |
//!                           |
//!                           V
//!                     init_secret_[n]
//! ```

#[cfg(test)]
mod key_schedule_test;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::crypto::key_pair::HPKEKeyPair;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::crypto::Secret;
use crate::mls::extensibility::Extensions;
use crate::mls::framing::{FramedContent, MlsGroupId, ProtocolVersion, WireFormat};
use crate::mls::utilities::error::Result;
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_u64, serialize_opaque_vec, Deserializer, Serializer,
};

pub const LABEL_JOINER: &[u8] = b"joiner";
pub const LABEL_WELCOME: &[u8] = b"welcome";
pub const LABEL_EPOCH: &[u8] = b"epoch";
pub const LABEL_SENDER_DATA: &[u8] = b"sender data";
pub const LABEL_ENCRYPTION: &[u8] = b"encryption";
pub const LABEL_EXPORTER: &[u8] = b"exporter";
pub const LABEL_EXPORTED: &[u8] = b"exported";
pub const LABEL_EXTERNAL: &[u8] = b"external";
pub const LABEL_CONFIRM: &[u8] = b"confirm";
pub const LABEL_MEMBERSHIP: &[u8] = b"membership";
pub const LABEL_RESUMPTION: &[u8] = b"resumption";
pub const LABEL_AUTHENTICATION: &[u8] = b"authentication";
pub const LABEL_INIT: &[u8] = b"init";

/// [RFC9420 Sec.8.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.1) Group Context
///
/// A new value is built for every epoch, the previous one is never modified.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct GroupContext {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub group_id: MlsGroupId,
    pub epoch: u64,
    pub tree_hash: Bytes,
    pub confirmed_transcript_hash: Bytes,
    pub extensions: Extensions,
}

impl GroupContext {
    /// Context of the epoch following this one.
    #[must_use]
    pub fn next(&self, tree_hash: Bytes, confirmed_transcript_hash: Bytes) -> Self {
        Self {
            version: self.version,
            cipher_suite: self.cipher_suite,
            group_id: self.group_id.clone(),
            epoch: self.epoch + 1,
            tree_hash,
            confirmed_transcript_hash,
            extensions: self.extensions.clone(),
        }
    }
}

impl Deserializer for GroupContext {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(Self {
            version: ProtocolVersion::deserialize(buf)?,
            cipher_suite: CipherSuite::deserialize(buf)?,
            group_id: deserialize_opaque_vec(buf)?,
            epoch: deserialize_u64(buf)?,
            tree_hash: deserialize_opaque_vec(buf)?,
            confirmed_transcript_hash: deserialize_opaque_vec(buf)?,
            extensions: Extensions::deserialize(buf)?,
        })
    }
}

impl Serializer for GroupContext {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.version.serialize(buf)?;
        self.cipher_suite.serialize(buf)?;
        serialize_opaque_vec(&self.group_id, buf)?;
        buf.put_u64(self.epoch);
        serialize_opaque_vec(&self.tree_hash, buf)?;
        serialize_opaque_vec(&self.confirmed_transcript_hash, buf)?;
        self.extensions.serialize(buf)
    }
}

/// [RFC9420 Sec.8.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.2)
/// `ConfirmedTranscriptHashInput`
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct ConfirmedTranscriptHashInput {
    pub wire_format: WireFormat,
    pub content: FramedContent,
    pub signature: Bytes,
}

impl Serializer for ConfirmedTranscriptHashInput {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.wire_format.serialize(buf)?;
        self.content.serialize(buf)?;
        serialize_opaque_vec(&self.signature, buf)
    }
}

impl ConfirmedTranscriptHashInput {
    /// `Hash(interim_transcript_hash_[epoch - 1] || ConfirmedTranscriptHashInput_[epoch])`
    pub fn hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        interim_transcript_hash_before: &[u8],
    ) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_slice(interim_transcript_hash_before);
        self.serialize(&mut buf)?;
        crypto_provider.digest(cipher_suite, &buf)
    }
}

/// [RFC9420 Sec.8.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.2)
/// `InterimTranscriptHashInput`
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct InterimTranscriptHashInput {
    pub confirmation_tag: Bytes,
}

impl Serializer for InterimTranscriptHashInput {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        serialize_opaque_vec(&self.confirmation_tag, buf)
    }
}

impl InterimTranscriptHashInput {
    /// `Hash(confirmed_transcript_hash_[epoch] || InterimTranscriptHashInput_[epoch])`
    pub fn hash(
        &self,
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        confirmed_transcript_hash: &[u8],
    ) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_slice(confirmed_transcript_hash);
        self.serialize(&mut buf)?;
        crypto_provider.digest(cipher_suite, &buf)
    }
}

/// Secrets of one epoch, all derived from `epoch_secret`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeySchedule {
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) epoch_secret: Secret,
    pub(crate) sender_data_secret: Secret,
    pub(crate) encryption_secret: Secret,
    pub(crate) exporter_secret: Secret,
    pub(crate) external_secret: Secret,
    pub(crate) external_key_pair: HPKEKeyPair,
    pub(crate) confirmation_key: Secret,
    pub(crate) membership_key: Secret,
    pub(crate) resumption_psk: Secret,
    pub(crate) epoch_authenticator: Secret,
    pub(crate) init_secret: Secret,
}

/// Result of advancing the key schedule by one epoch.
#[derive(Debug, Clone)]
pub struct EpochSecrets {
    pub key_schedule: KeySchedule,
    pub joiner_secret: Secret,
    pub welcome_secret: Secret,
}

fn member_secret(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    joiner_secret: &Secret,
    psk_secret: &Secret,
) -> Result<Secret> {
    crypto_provider.extract(cipher_suite, joiner_secret.as_bytes(), psk_secret.as_bytes())
}

/// `welcome_secret = DeriveSecret(Extract(joiner_secret, psk_secret), "welcome")`
pub fn extract_welcome_secret(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    joiner_secret: &Secret,
    psk_secret: &Secret,
) -> Result<Secret> {
    let member_secret = member_secret(crypto_provider, cipher_suite, joiner_secret, psk_secret)?;
    crypto_provider.derive_secret(cipher_suite, member_secret.as_bytes(), LABEL_WELCOME)
}

impl KeySchedule {
    /// Runs the whole schedule from the previous epoch's init secret.
    ///
    /// `group_context` is the context of the new epoch.
    pub fn next_epoch(
        crypto_provider: &impl CryptoProvider,
        init_secret: &Secret,
        commit_secret: &Secret,
        group_context: &GroupContext,
        psk_secret: &Secret,
    ) -> Result<EpochSecrets> {
        let cipher_suite = group_context.cipher_suite;
        let serialized_context = group_context.serialize_detached()?;

        let pre_joiner = crypto_provider.extract(
            cipher_suite,
            init_secret.as_bytes(),
            commit_secret.as_bytes(),
        )?;
        let joiner_secret = crypto_provider.expand_with_label(
            cipher_suite,
            pre_joiner.as_bytes(),
            LABEL_JOINER,
            &serialized_context,
            crypto_provider.hpke(cipher_suite)?.kdf_extract_size(),
        )?;

        let welcome_secret =
            extract_welcome_secret(crypto_provider, cipher_suite, &joiner_secret, psk_secret)?;
        let key_schedule =
            Self::from_joiner_secret(crypto_provider, &joiner_secret, psk_secret, group_context)?;

        Ok(EpochSecrets {
            key_schedule,
            joiner_secret,
            welcome_secret,
        })
    }

    /// Derives the epoch secrets from a joiner secret, as a new member does from a `Welcome`.
    pub fn from_joiner_secret(
        crypto_provider: &impl CryptoProvider,
        joiner_secret: &Secret,
        psk_secret: &Secret,
        group_context: &GroupContext,
    ) -> Result<Self> {
        let cipher_suite = group_context.cipher_suite;
        let member_secret = member_secret(crypto_provider, cipher_suite, joiner_secret, psk_secret)?;
        let epoch_secret = crypto_provider.expand_with_label(
            cipher_suite,
            member_secret.as_bytes(),
            LABEL_EPOCH,
            &group_context.serialize_detached()?,
            crypto_provider.hpke(cipher_suite)?.kdf_extract_size(),
        )?;

        Self::from_epoch_secret(crypto_provider, cipher_suite, epoch_secret)
    }

    /// Derives every child secret of `epoch_secret`.
    pub fn from_epoch_secret(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        epoch_secret: Secret,
    ) -> Result<Self> {
        let derive = |label: &[u8]| {
            crypto_provider.derive_secret(cipher_suite, epoch_secret.as_bytes(), label)
        };

        let external_secret = derive(LABEL_EXTERNAL)?;
        let external_key_pair =
            crypto_provider.derive_key_pair(cipher_suite, external_secret.as_bytes())?;

        Ok(Self {
            cipher_suite,
            sender_data_secret: derive(LABEL_SENDER_DATA)?,
            encryption_secret: derive(LABEL_ENCRYPTION)?,
            exporter_secret: derive(LABEL_EXPORTER)?,
            external_secret,
            external_key_pair,
            confirmation_key: derive(LABEL_CONFIRM)?,
            membership_key: derive(LABEL_MEMBERSHIP)?,
            resumption_psk: derive(LABEL_RESUMPTION)?,
            epoch_authenticator: derive(LABEL_AUTHENTICATION)?,
            init_secret: derive(LABEL_INIT)?,
            epoch_secret,
        })
    }

    /// Schedule of a freshly created group, seeded with a random epoch secret.
    pub fn initial(crypto_provider: &impl CryptoProvider, cipher_suite: CipherSuite) -> Result<Self> {
        let epoch_secret = crypto_provider.generate_secret(cipher_suite)?;
        Self::from_epoch_secret(crypto_provider, cipher_suite, epoch_secret)
    }

    /// [RFC9420 Sec.8.5](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.5) Exporters
    ///
    /// ```text
    /// MLS-Exporter(Label, Context, Length) =
    ///        ExpandWithLabel(DeriveSecret(exporter_secret, Label),
    ///                          "exported", Hash(Context), Length)
    /// ```
    pub fn mls_exporter(
        &self,
        crypto_provider: &impl CryptoProvider,
        label: &[u8],
        context: &[u8],
        length: u16,
    ) -> Result<Secret> {
        let secret =
            crypto_provider.derive_secret(self.cipher_suite, self.exporter_secret.as_bytes(), label)?;
        let context_hash = crypto_provider.digest(self.cipher_suite, context)?;
        crypto_provider.expand_with_label(
            self.cipher_suite,
            secret.as_bytes(),
            LABEL_EXPORTED,
            &context_hash,
            length,
        )
    }

    /// `confirmation_tag = MAC(confirmation_key, confirmed_transcript_hash)`
    pub fn confirmation_tag(
        &self,
        crypto_provider: &impl CryptoProvider,
        confirmed_transcript_hash: &[u8],
    ) -> Result<Bytes> {
        crypto_provider.sign_mac(
            self.cipher_suite,
            self.confirmation_key.as_bytes(),
            confirmed_transcript_hash,
        )
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn init_secret(&self) -> &Secret {
        &self.init_secret
    }

    pub fn sender_data_secret(&self) -> &Secret {
        &self.sender_data_secret
    }

    pub fn encryption_secret(&self) -> &Secret {
        &self.encryption_secret
    }

    pub fn membership_key(&self) -> &Secret {
        &self.membership_key
    }

    pub fn confirmation_key(&self) -> &Secret {
        &self.confirmation_key
    }

    pub fn resumption_psk(&self) -> &Secret {
        &self.resumption_psk
    }

    pub fn epoch_authenticator(&self) -> &Secret {
        &self.epoch_authenticator
    }

    pub fn external_key_pair(&self) -> &HPKEKeyPair {
        &self.external_key_pair
    }
}
