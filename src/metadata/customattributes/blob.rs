//! Cursor-based reading and writing of custom attribute blobs.
//!
//! Both directions implement the primitive encodings of ECMA-335 II.23.2/II.23.3: little-endian
//! fixed-width values, compressed unsigned integers and `SerString` (packed length followed by
//! UTF-8 bytes, with `0xFF` standing for a null string).

use crate::{Error, Result};

/// Fixed-width little-endian values
pub trait BlobValue: Sized {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Decodes from exactly `SIZE` bytes
    fn from_le(bytes: &[u8]) -> Self;
    /// Appends the encoding
    fn write_le(&self, out: &mut Vec<u8>);
}

macro_rules! impl_blob_value {
    ($($ty:ty),*) => {
        $(
            impl BlobValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut buffer = [0u8; std::mem::size_of::<$ty>()];
                    buffer.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buffer)
                }

                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_blob_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Reads values from a blob, tracking the current position
pub struct BlobReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    /// Create a new reader at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        BlobReader { data, position: 0 }
    }

    /// Current position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Returns `true` if there is more data available to read
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Reads a little-endian value
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the blob ends first.
    pub fn read_le<T: BlobValue>(&mut self) -> Result<T> {
        let bytes = self.read_bytes(T::SIZE)?;
        Ok(T::from_le(bytes))
    }

    /// Peeks at the next byte
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] at the end of the blob.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(Error::OutOfBounds)
    }

    /// Reads `length` raw bytes
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the blob ends first.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(Error::OutOfBounds)?;
        let bytes = self.data.get(self.position..end).ok_or(Error::OutOfBounds)?;
        self.position = end;
        Ok(bytes)
    }

    /// Reads a compressed unsigned integer (II.23.2)
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] or [`Error::Malformed`] for an invalid lead byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Reads a `SerString`; `None` for the null string
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] or [`Error::Malformed`] for invalid UTF-8.
    pub fn read_ser_string(&mut self) -> Result<Option<String>> {
        if self.peek_byte()? == 0xFF {
            self.position += 1;
            return Ok(None);
        }

        let length = self.read_compressed_uint()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| {
                malformed_error!(
                    "Invalid UTF-8 string at offset {}: {}",
                    start,
                    e.utf8_error()
                )
            })
    }
}

/// Appends encoded values to a growing blob
#[derive(Default)]
pub struct BlobWriter {
    data: Vec<u8>,
}

impl BlobWriter {
    /// Create an empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a little-endian value
    pub fn write_le<T: BlobValue>(&mut self, value: T) {
        value.write_le(&mut self.data);
    }

    /// Appends a compressed unsigned integer (II.23.2)
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for values above `0x1FFF_FFFF`.
    pub fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        if value < 0x80 {
            self.data.push(value as u8);
        } else if value < 0x4000 {
            self.data.push(0x80 | (value >> 8) as u8);
            self.data.push(value as u8);
        } else if value < 0x2000_0000 {
            self.data.push(0xC0 | (value >> 24) as u8);
            self.data.push((value >> 16) as u8);
            self.data.push((value >> 8) as u8);
            self.data.push(value as u8);
        } else {
            return Err(malformed_error!("Value {} too large to compress", value));
        }
        Ok(())
    }

    /// Appends a `SerString`; `None` encodes the null string
    ///
    /// # Errors
    /// Propagates length encoding failures.
    pub fn write_ser_string(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            None => {
                self.data.push(0xFF);
                Ok(())
            }
            Some(text) => {
                let length = u32::try_from(text.len())
                    .map_err(|_| malformed_error!("String of {} bytes too long", text.len()))?;
                self.write_compressed_uint(length)?;
                self.data.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    /// Finishes writing and returns the blob
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_uint_widths() {
        for (value, width) in [(0x03u32, 1usize), (0x80, 2), (0x3FFF, 2), (0x4000, 4)] {
            let mut writer = BlobWriter::new();
            writer.write_compressed_uint(value).unwrap();
            let data = writer.into_inner();
            assert_eq!(data.len(), width);

            let mut reader = BlobReader::new(&data);
            assert_eq!(reader.read_compressed_uint().unwrap(), value);
            assert!(!reader.has_more_data());
        }
    }

    #[test]
    fn test_ser_string_null_and_text() {
        let mut writer = BlobWriter::new();
        writer.write_ser_string(None).unwrap();
        writer.write_ser_string(Some("Hello")).unwrap();
        let data = writer.into_inner();
        assert_eq!(data, [0xFF, 0x05, b'H', b'e', b'l', b'l', b'o']);

        let mut reader = BlobReader::new(&data);
        assert_eq!(reader.read_ser_string().unwrap(), None);
        assert_eq!(reader.read_ser_string().unwrap().as_deref(), Some("Hello"));
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = BlobReader::new(&[0x01]);
        assert!(matches!(reader.read_le::<u32>(), Err(Error::OutOfBounds)));
        assert_eq!(reader.remaining(), 1);
    }
}
