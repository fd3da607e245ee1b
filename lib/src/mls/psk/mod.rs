//! [RFC9420 Sec.8.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.4) Pre-Shared Keys
//!
//! PSKs are injected into the key schedule through `psk_secret`. External PSKs come from the
//! application through [`PskLookup`], resumption PSKs are the `resumption_psk` of an earlier
//! epoch of this group or of the group being resumed.


use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::framing::MlsGroupId;
use crate::mls::utilities::error::{Error, PskError, Result};
use crate::mls::utilities::serde::{
    deserialize_opaque_vec, deserialize_u64, deserialize_u8, serialize_opaque_vec, Deserializer,
    Serializer,
};

/// [RFC9420 Sec.8.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.4) `ResumptionPSKUsage`
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ResumptionPskUsage {
    #[default]
    Application = 0x01,
    ReInit = 0x02,
    Branch = 0x03,
}

impl Deserializer for ResumptionPskUsage {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        match deserialize_u8(buf)? {
            0x01 => Ok(ResumptionPskUsage::Application),
            0x02 => Ok(ResumptionPskUsage::ReInit),
            0x03 => Ok(ResumptionPskUsage::Branch),
            v => Err(Error::InvalidResumptionPskUsageValue(v)),
        }
    }
}

impl Serializer for ResumptionPskUsage {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        buf.put_u8(*self as u8);
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Psk {
    External {
        psk_id: Bytes,
    },
    Resumption {
        usage: ResumptionPskUsage,
        psk_group_id: MlsGroupId,
        psk_epoch: u64,
    },
}

impl Default for Psk {
    fn default() -> Self {
        Psk::External {
            psk_id: Bytes::new(),
        }
    }
}

/// [RFC9420 Sec.8.4](https://www.rfc-editor.org/rfc/rfc9420.html#section-8.4) `PreSharedKeyID`
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub struct PreSharedKeyId {
    pub psk: Psk,
    pub psk_nonce: Bytes,
}

impl PreSharedKeyId {
    /// External PSK id with a fresh nonce.
    pub fn external<T: Into<Bytes>>(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        psk_id: T,
    ) -> Result<Self> {
        Ok(Self {
            psk: Psk::External {
                psk_id: psk_id.into(),
            },
            psk_nonce: fresh_nonce(crypto_provider, cipher_suite)?,
        })
    }

    /// Resumption PSK id with a fresh nonce.
    pub fn resumption(
        crypto_provider: &impl CryptoProvider,
        cipher_suite: CipherSuite,
        usage: ResumptionPskUsage,
        psk_group_id: MlsGroupId,
        psk_epoch: u64,
    ) -> Result<Self> {
        Ok(Self {
            psk: Psk::Resumption {
                usage,
                psk_group_id,
                psk_epoch,
            },
            psk_nonce: fresh_nonce(crypto_provider, cipher_suite)?,
        })
    }

    pub fn resumption_usage(&self) -> Option<ResumptionPskUsage> {
        match &self.psk {
            Psk::Resumption { usage, .. } => Some(*usage),
            Psk::External { .. } => None,
        }
    }
}

fn fresh_nonce(crypto_provider: &impl CryptoProvider, cipher_suite: CipherSuite) -> Result<Bytes> {
    let nonce = crypto_provider.generate_secret(cipher_suite)?;
    Ok(Bytes::copy_from_slice(nonce.as_bytes()))
}

impl Deserializer for PreSharedKeyId {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let psk = match deserialize_u8(buf)? {
            0x01 => Psk::External {
                psk_id: deserialize_opaque_vec(buf)?,
            },
            0x02 => Psk::Resumption {
                usage: ResumptionPskUsage::deserialize(buf)?,
                psk_group_id: deserialize_opaque_vec(buf)?,
                psk_epoch: deserialize_u64(buf)?,
            },
            v => return Err(Error::InvalidPskTypeValue(v)),
        };

        Ok(Self {
            psk,
            psk_nonce: deserialize_opaque_vec(buf)?,
        })
    }
}

impl Serializer for PreSharedKeyId {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        match &self.psk {
            Psk::External { psk_id } => {
                buf.put_u8(0x01);
                serialize_opaque_vec(psk_id, buf)?;
            }
            Psk::Resumption {
                usage,
                psk_group_id,
                psk_epoch,
            } => {
                buf.put_u8(0x02);
                usage.serialize(buf)?;
                serialize_opaque_vec(psk_group_id, buf)?;
                buf.put_u64(*psk_epoch);
            }
        }
        serialize_opaque_vec(&self.psk_nonce, buf)
    }
}

/// `PSKLabel`, binds each PSK to its position in the list.
struct PskLabel<'a> {
    id: &'a PreSharedKeyId,
    index: u16,
    count: u16,
}

impl Serializer for PskLabel<'_> {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut,
    {
        self.id.serialize(buf)?;
        buf.put_u16(self.index);
        buf.put_u16(self.count);
        Ok(())
    }
}

/// A PSK id together with its secret.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolvedPsk {
    pub id: PreSharedKeyId,
    pub secret: Secret,
}

/// Folds the PSKs, in order, into `psk_secret`. An empty list gives the all-zero secret.
///
/// ```text
/// psk_extracted_[i] = KDF.Extract(0, psk_[i])
/// psk_input_[i] = ExpandWithLabel(psk_extracted_[i], "derived psk", PSKLabel, KDF.Nh)
/// psk_secret_[i] = KDF.Extract(psk_input_[i], psk_secret_[i-1])
/// ```
pub fn calculate_psk_secret(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    psks: &[ResolvedPsk],
) -> Result<Secret> {
    let nh = crypto_provider.hpke(cipher_suite)?.kdf_extract_size();
    let zero = Secret::zero(nh as usize);
    let count = u16::try_from(psks.len()).map_err(|_| PskError::TooMany)?;

    let mut psk_secret = zero.clone();
    for (index, psk) in (0u16..).zip(psks) {
        let extracted = crypto_provider.extract(cipher_suite, zero.as_bytes(), psk.secret.as_bytes())?;

        let mut label = BytesMut::new();
        PskLabel {
            id: &psk.id,
            index,
            count,
        }
        .serialize(&mut label)?;

        let psk_input = crypto_provider.expand_with_label(
            cipher_suite,
            extracted.as_bytes(),
            b"derived psk",
            &label,
            nh,
        )?;
        psk_secret =
            crypto_provider.extract(cipher_suite, psk_input.as_bytes(), psk_secret.as_bytes())?;
    }

    Ok(psk_secret)
}

/// Checks the PSK ids of one commit or welcome.
///
/// `resumption` is the kind of resumption the commit performs, `None` for a regular commit.
pub fn validate_psk_ids(
    crypto_provider: &impl CryptoProvider,
    cipher_suite: CipherSuite,
    ids: &[PreSharedKeyId],
    resumption: Option<ResumptionPskUsage>,
) -> Result<()> {
    let nh = crypto_provider.hash_size(cipher_suite)?;
    let mut seen = HashSet::new();
    let mut resumption_count = 0;

    for id in ids {
        if id.psk_nonce.len() != nh {
            return Err(PskError::InvalidNonceLength {
                expected: nh,
                got: id.psk_nonce.len(),
            }
            .into());
        }

        if !seen.insert(&id.psk) {
            return Err(PskError::Duplicate.into());
        }

        match id.resumption_usage() {
            Some(ResumptionPskUsage::Application) | None => {}
            Some(usage) => {
                if resumption != Some(usage) {
                    return Err(PskError::UsageMismatch.into());
                }
                resumption_count += 1;
            }
        }
    }

    if resumption.is_some() && resumption_count != 1 {
        return Err(PskError::MissingResumptionPsk.into());
    }

    Ok(())
}

/// Source of PSK secrets the group does not hold itself.
#[async_trait]
pub trait PskLookup: Send + Sync {
    async fn resolve_psk(&self, id: &PreSharedKeyId) -> std::result::Result<Secret, PskError>;
}

/// [`PskLookup`] backed by maps, keyed by external PSK id and by `(group id, epoch)`.
#[derive(Default, Debug, Clone)]
pub struct InMemoryPskStore {
    external: HashMap<Bytes, Secret>,
    resumption: HashMap<(MlsGroupId, u64), Secret>,
}

impl InMemoryPskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_external<T: Into<Bytes>>(&mut self, psk_id: T, secret: Secret) {
        self.external.insert(psk_id.into(), secret);
    }

    pub fn insert_resumption(&mut self, group_id: MlsGroupId, epoch: u64, secret: Secret) {
        self.resumption.insert((group_id, epoch), secret);
    }
}

#[async_trait]
impl PskLookup for InMemoryPskStore {
    async fn resolve_psk(&self, id: &PreSharedKeyId) -> std::result::Result<Secret, PskError> {
        let secret = match &id.psk {
            Psk::External { psk_id } => self.external.get(psk_id),
            Psk::Resumption {
                psk_group_id,
                psk_epoch,
                ..
            } => self.resumption.get(&(psk_group_id.clone(), *psk_epoch)),
        };
        secret.cloned().ok_or(PskError::NotFound)
    }
}

/// Bounded list of the latest resumption PSKs of a group, oldest first.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct ResumptionPskHistory {
    max_len: usize,
    entries: VecDeque<(u64, Secret)>,
}

impl ResumptionPskHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            entries: VecDeque::with_capacity(max_len),
        }
    }

    /// Records the resumption PSK of `epoch`, dropping the oldest entry when full.
    pub fn push(&mut self, epoch: u64, secret: Secret) {
        if self.max_len == 0 {
            return;
        }
        while self.entries.len() >= self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back((epoch, secret));
    }

    pub fn get(&self, epoch: u64) -> Option<&Secret> {
        self.entries
            .iter()
            .find(|(e, _)| *e == epoch)
            .map(|(_, secret)| secret)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves PSK ids for a group: its own resumption PSKs come from `own`, the resumption PSK of a
/// group being resumed from `source`, everything else from `lookup`.
pub(crate) struct PskResolver<'a, L: PskLookup + ?Sized> {
    pub(crate) own: Option<(&'a MlsGroupId, &'a ResumptionPskHistory)>,
    pub(crate) source: Option<(&'a MlsGroupId, u64, &'a Secret)>,
    pub(crate) lookup: &'a L,
}

impl<L: PskLookup + ?Sized> PskResolver<'_, L> {
    fn local(&self, psk: &Psk) -> Option<std::result::Result<Secret, PskError>> {
        let Psk::Resumption {
            psk_group_id,
            psk_epoch,
            ..
        } = psk
        else {
            return None;
        };

        if let Some((group_id, epoch, secret)) = self.source {
            if group_id == psk_group_id && epoch == *psk_epoch {
                return Some(Ok(secret.clone()));
            }
        }

        match self.own {
            Some((group_id, history)) if group_id == psk_group_id => Some(
                history
                    .get(*psk_epoch)
                    .cloned()
                    .ok_or(PskError::NotFound),
            ),
            _ => None,
        }
    }

    pub(crate) async fn resolve(&self, ids: &[PreSharedKeyId]) -> Result<Vec<ResolvedPsk>> {
        let mut resolved = Vec::with_capacity(ids.len());

        for id in ids {
            let secret = match self.local(&id.psk) {
                Some(secret) => secret?,
                None => self.lookup.resolve_psk(id).await?,
            };

            log::debug!("resolved PSK {:?}", id.psk);
            resolved.push(ResolvedPsk {
                id: id.clone(),
                secret,
            });
        }

        Ok(resolved)
    }
}
