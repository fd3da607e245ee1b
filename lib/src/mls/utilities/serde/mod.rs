//! [RFC9420 Sec.2.1.2](https://www.rfc-editor.org/rfc/rfc9420.html#section-2.1.2) TLS presentation
//! language codec
//!
//! Every structure of the protocol implements [`Serializer`] and [`Deserializer`]. Vectors are
//! prefixed with their length in bytes as a variable-length integer of at most 30 bits.


use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::mls::utilities::error::{Error, Result};

const VARINT_MAX: u32 = (1 << 30) - 1;

#[inline]
fn ensure_remaining<B: Buf>(buf: &B, len: usize) -> Result<()> {
    if buf.remaining() < len {
        Err(Error::BufferTooSmall)
    } else {
        Ok(())
    }
}

/// Reads a variable-length integer. The two high bits of the first byte give the length (1, 2 or
/// 4 bytes) and the value must use the shortest of them.
#[inline]
pub fn deserialize_varint<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure_remaining(buf, 1)?;
    let first = buf.get_u8();

    let len: usize = match first >> 6 {
        0 => return Ok(u32::from(first)),
        1 => 2,
        2 => 4,
        _ => return Err(Error::InvalidVariableLengthIntegerPrefix),
    };
    ensure_remaining(buf, len - 1)?;

    let value = (1..len).fold(u32::from(first & 0x3f), |value, _| {
        (value << 8) | u32::from(buf.get_u8())
    });
    let minimum = if len == 2 { 1 << 6 } else { 1 << 14 };
    if value < minimum {
        return Err(Error::MinimumEncodingWasNotUsed);
    }

    Ok(value)
}

#[allow(clippy::cast_possible_truncation)] // range checked by each arm
#[inline]
pub fn serialize_varint<B: BufMut>(n: u32, buf: &mut B) -> Result<()> {
    match n {
        0..=0x3f => buf.put_u8(n as u8),
        0x40..=0x3fff => buf.put_u16(0x4000 | n as u16),
        0x4000..=VARINT_MAX => buf.put_u32(0x8000_0000 | n),
        _ => return Err(Error::VarintExceeds30Bits),
    }
    Ok(())
}

#[inline]
pub fn deserialize_opaque_vec<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = deserialize_varint(buf)? as usize;
    ensure_remaining(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

#[inline]
pub fn serialize_opaque_vec<B: BufMut>(v: &[u8], buf: &mut B) -> Result<()> {
    let len = u32::try_from(v.len()).map_err(|_| Error::OpaqueSizeExceedsMaximumValueOfU32)?;
    serialize_varint(len, buf)?;
    buf.put_slice(v);
    Ok(())
}

/// Reads a length-prefixed vector and calls `f` until its body is consumed.
#[inline]
pub fn deserialize_vector<B: Buf>(
    buf: &mut B,
    mut f: impl FnMut(&mut Bytes) -> Result<()>,
) -> Result<()> {
    let mut body = deserialize_opaque_vec(buf)?;
    while body.has_remaining() {
        f(&mut body)?;
    }
    Ok(())
}

/// Writes `n` items through `f` into a scratch buffer, then emits it with its length prefix.
#[inline]
pub fn serialize_vector<B: BufMut>(
    n: usize,
    buf: &mut B,
    mut f: impl FnMut(usize, &mut BytesMut) -> Result<()>,
) -> Result<()> {
    let mut body = BytesMut::new();
    for i in 0..n {
        f(i, &mut body)?;
    }
    serialize_opaque_vec(&body, buf)
}

#[inline]
pub fn deserialize_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

#[inline]
pub fn deserialize_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16())
}

#[inline]
pub fn deserialize_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

#[inline]
pub fn deserialize_u64<B: Buf>(buf: &mut B) -> Result<u64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_u64())
}

#[inline]
pub fn serialize_slice<T: Serializer, B: BufMut>(items: &[T], buf: &mut B) -> Result<()> {
    serialize_vector(items.len(), buf, |i, body| items[i].serialize(body))
}

#[inline]
pub fn deserialize_slice<T: Deserializer, B: Buf>(buf: &mut B) -> Result<Vec<T>> {
    let mut items = vec![];
    deserialize_vector(buf, |body| {
        items.push(T::deserialize(body)?);
        Ok(())
    })?;
    Ok(items)
}

/// Presence byte of an `optional<T>`.
#[inline]
pub fn deserialize_optional<B: Buf>(buf: &mut B) -> Result<bool> {
    match deserialize_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::InvalidOptionalValue),
    }
}

#[inline]
pub fn serialize_optional<B: BufMut>(present: bool, buf: &mut B) -> Result<()> {
    buf.put_u8(u8::from(present));
    Ok(())
}

pub trait Deserializer {
    fn deserialize<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf;

    /// Decodes from the start of `buf`. Trailing bytes are ignored, private message content is
    /// followed by zero padding.
    fn deserialize_exact(buf: impl AsRef<[u8]>) -> Result<Self>
    where
        Self: Sized,
    {
        let mut buf = buf.as_ref();
        Self::deserialize(&mut buf)
    }
}

pub trait Serializer {
    fn serialize<B>(&self, buf: &mut B) -> Result<()>
    where
        Self: Sized,
        B: BufMut;

    fn serialize_detached(&self) -> Result<Bytes>
    where
        Self: Sized,
    {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf)?;
        Ok(buf.freeze())
    }
}
