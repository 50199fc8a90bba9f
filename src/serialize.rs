//! Value serialization support.
//!
//! The trie's [`serialize`](crate::TrieMap::serialize) and
//! [`deserialize`](crate::TrieMap::deserialize) methods write a stable
//! little-endian format to any [`std::io::Write`] / [`std::io::Read`].
//! Map values go through the [`SerializeValue`] trait, implemented here
//! for the fixed-width primitives, `bool`, `String`, `Vec<u8>` and `()`.

use std::io::Read;
use std::io::Write;

use crate::error::Error;

/// A value that can be written to and read back from a byte stream.
///
/// Implementations must round-trip exactly: `deserialize(serialize(v)) ==
/// v`. Variable-length payloads should be length-prefixed the way the
/// provided `String` and `Vec<u8>` implementations are.
pub trait SerializeValue: Sized {
    /// Writes `self` to `writer`.
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error>;

    /// Reads a value previously written by [`serialize`](Self::serialize).
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

macro_rules! impl_serialize_int {
    ($($ty:ty),*) => {
        $(
            impl SerializeValue for $ty {
                #[inline]
                fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
                    writer.write_all(&self.to_le_bytes())?;
                    Ok(())
                }

                #[inline]
                fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
                    let mut buffer = [0u8; core::mem::size_of::<$ty>()];
                    reader.read_exact(&mut buffer)?;
                    Ok(<$ty>::from_le_bytes(buffer))
                }
            }
        )*
    };
}

impl_serialize_int!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl SerializeValue for usize {
    #[inline]
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u64).serialize(writer)
    }

    #[inline]
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let value = u64::deserialize(reader)?;
        usize::try_from(value).map_err(|_| Error::Corrupted("usize value out of range"))
    }
}

impl SerializeValue for isize {
    #[inline]
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as i64).serialize(writer)
    }

    #[inline]
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let value = i64::deserialize(reader)?;
        isize::try_from(value).map_err(|_| Error::Corrupted("isize value out of range"))
    }
}

impl SerializeValue for bool {
    #[inline]
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u8).serialize(writer)
    }

    #[inline]
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
        match u8::deserialize(reader)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::Corrupted("invalid bool byte")),
        }
    }
}

impl SerializeValue for () {
    #[inline]
    fn serialize<W: Write>(&self, _writer: &mut W) -> Result<(), Error> {
        Ok(())
    }

    #[inline]
    fn deserialize<R: Read>(_reader: &mut R) -> Result<Self, Error> {
        Ok(())
    }
}

impl SerializeValue for Vec<u8> {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len_prefixed(writer, self)
    }

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_len_prefixed(reader)
    }
}

impl SerializeValue for String {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len_prefixed(writer, self.as_bytes())
    }

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let bytes = read_len_prefixed(reader)?;
        String::from_utf8(bytes).map_err(|_| Error::Corrupted("string is not valid utf-8"))
    }
}

#[inline]
pub(crate) fn write_len_prefixed<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), Error> {
    (bytes.len() as u64).serialize(writer)?;
    writer.write_all(bytes)?;
    Ok(())
}

#[inline]
pub(crate) fn read_len_prefixed<R: Read>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let len = read_length(reader)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Reads a `u64` length field and checks it fits in `usize`.
#[inline]
pub(crate) fn read_length<R: Read>(reader: &mut R) -> Result<usize, Error> {
    let len = u64::deserialize(reader)?;
    usize::try_from(len).map_err(|_| Error::Corrupted("length field out of range"))
}
