//! Length-prefixed field framing.
//!
//! Every variable-length field on the wire is written as a 4-byte big-endian
//! length followed by the field bytes. The codec and the config update request
//! are both built from these fields.

use bytes::{BufMut, BytesMut};

use crate::Error;

/// Maximum size of a single framed field (1 MB).
///
/// Principal and context objects are small; anything larger is rejected before
/// allocation.
pub const MAX_FIELD_SIZE: usize = 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Writes length-prefixed fields into a growable buffer.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a length-prefixed field.
    pub fn put_field(&mut self, field: &[u8]) -> Result<(), Error> {
        if field.len() > MAX_FIELD_SIZE {
            return Err(Error::InvalidMessage(format!(
                "field size {} exceeds maximum {}",
                field.len(),
                MAX_FIELD_SIZE
            )));
        }
        self.buf.reserve(LENGTH_PREFIX_SIZE + field.len());
        self.buf.put_u32(field.len() as u32);
        self.buf.put_slice(field);
        Ok(())
    }

    /// Append a bare big-endian count.
    pub fn put_count(&mut self, count: u32) {
        self.buf.put_u32(count);
    }

    /// Append raw bytes without a prefix (used for the trailing payload).
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Finish writing and return the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Reads length-prefixed fields from a borrowed slice.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader<'a> {
    data: &'a [u8],
}

impl<'a> FrameReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Read a big-endian count.
    pub fn read_count(&mut self) -> Result<u32, Error> {
        if self.data.len() < LENGTH_PREFIX_SIZE {
            return Err(Error::InvalidMessage(format!(
                "buffer too short for length prefix: {} < {}",
                self.data.len(),
                LENGTH_PREFIX_SIZE
            )));
        }
        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        header.copy_from_slice(&self.data[..LENGTH_PREFIX_SIZE]);
        self.data = &self.data[LENGTH_PREFIX_SIZE..];
        Ok(u32::from_be_bytes(header))
    }

    /// Read one length-prefixed field.
    pub fn read_field(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_count()? as usize;
        if len > MAX_FIELD_SIZE {
            return Err(Error::InvalidMessage(format!(
                "field length {} exceeds maximum {}",
                len, MAX_FIELD_SIZE
            )));
        }
        if self.data.len() < len {
            return Err(Error::InvalidMessage(format!(
                "field incomplete: have {}, need {}",
                self.data.len(),
                len
            )));
        }
        let (field, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(field)
    }

    /// Read a length-prefixed UTF-8 string field.
    pub fn read_str(&mut self) -> Result<&'a str, Error> {
        let field = self.read_field()?;
        std::str::from_utf8(field)
            .map_err(|e| Error::InvalidMessage(format!("field is not valid UTF-8: {}", e)))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_field_layout() {
        let mut writer = FrameWriter::new();
        writer.put_field(b"hello").unwrap();
        let bytes = writer.into_vec();

        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[4..], b"hello");
    }

    #[test]
    fn test_field_too_large() {
        let mut writer = FrameWriter::new();
        let field = vec![0u8; MAX_FIELD_SIZE + 1];
        assert!(writer.put_field(&field).is_err());
    }

    #[test]
    fn test_read_fields_in_order() {
        let mut writer = FrameWriter::new();
        writer.put_count(2);
        writer.put_field(b"roles").unwrap();
        writer.put_field(b"").unwrap();
        writer.put_raw(&[9, 9]);
        let bytes = writer.into_vec();

        let mut reader = FrameReader::new(&bytes);
        assert_eq!(reader.read_count().unwrap(), 2);
        assert_eq!(reader.read_str().unwrap(), "roles");
        assert_eq!(reader.read_field().unwrap(), b"");
        assert_eq!(reader.remaining(), &[9, 9]);
    }

    #[test]
    fn test_read_declared_length_beyond_buffer() {
        let data = [0, 0, 0, 10, 1, 2, 3];
        let mut reader = FrameReader::new(&data);
        assert!(reader.read_field().is_err());
    }

    #[test]
    fn test_read_length_over_maximum() {
        let too_large = (MAX_FIELD_SIZE as u32) + 1;
        let mut data = too_large.to_be_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);
        let mut reader = FrameReader::new(&data);
        assert!(reader.read_field().is_err());
    }

    #[test]
    fn test_read_prefix_too_short() {
        let mut reader = FrameReader::new(&[0, 0, 0]);
        assert!(reader.read_count().is_err());
    }

    #[test]
    fn test_invalid_utf8_field() {
        let mut writer = FrameWriter::new();
        writer.put_field(&[0xff, 0xfe]).unwrap();
        let bytes = writer.into_vec();
        let mut reader = FrameReader::new(&bytes);
        assert!(reader.read_str().is_err());
    }
}
