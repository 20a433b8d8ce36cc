//! Zero-copy record decoder
//!
//! The decoder takes a byte buffer and returns `Record` views that borrow the
//! original buffer. Only the 16-byte header is copied out; typed bodies are
//! decoded on demand with `Record::get`.

use crate::record::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("invalid record length: {0} words is shorter than the header")]
    InvalidLength(u8),

    #[error("truncated record: declared length {declared} exceeds buffer {actual}")]
    TruncatedRecord { declared: usize, actual: usize },

    #[error("unexpected rtype: expected 0x{expected:02x}, got 0x{actual:02x}")]
    UnexpectedRType { expected: u8, actual: u8 },

    #[error("record body too short for rtype 0x{rtype:02x}: need {need} bytes, have {have}")]
    BodyTooShort { rtype: u8, need: usize, have: usize },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A single record borrowed from a feed buffer
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    header: RecordHeader,
    bytes: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn rtype(&self) -> u8 {
        self.header.rtype
    }

    pub fn instrument_id(&self) -> u32 {
        self.header.instrument_id
    }

    /// Total size in bytes, header included
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Payload after the header
    pub fn body(&self) -> &'a [u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn is<T: RecordMessage>(&self) -> bool {
        self.header.rtype == T::RTYPE as u8
    }

    /// Decode the body as `T`
    pub fn get<T: RecordMessage>(&self) -> DecodeResult<T> {
        if !self.is::<T>() {
            return Err(DecodeError::UnexpectedRType {
                expected: T::RTYPE as u8,
                actual: self.header.rtype,
            });
        }
        if self.bytes.len() < T::SIZE {
            return Err(DecodeError::BodyTooShort {
                rtype: self.header.rtype,
                need: T::SIZE - HEADER_SIZE,
                have: self.bytes.len() - HEADER_SIZE,
            });
        }
        Ok(T::read_body(self.header, self.body()))
    }
}

/// Zero-copy decoder
pub struct RecordDecoder;

impl RecordDecoder {
    /// Parse a single record from the start of `buffer`
    /// Returns the record and the number of bytes consumed
    pub fn decode(buffer: &[u8]) -> DecodeResult<(Record<'_>, usize)> {
        if buffer.len() < HEADER_SIZE {
            return Err(DecodeError::BufferTooSmall {
                need: HEADER_SIZE,
                have: buffer.len(),
            });
        }

        let header = RecordHeader::read(buffer);
        let length = header.record_size();

        if length < HEADER_SIZE {
            return Err(DecodeError::InvalidLength(header.length));
        }
        if length > buffer.len() {
            return Err(DecodeError::TruncatedRecord {
                declared: length,
                actual: buffer.len(),
            });
        }

        let record = Record {
            header,
            bytes: &buffer[..length],
        };
        Ok((record, length))
    }

    /// Decode a stream of concatenated records
    /// Calls callback for each record; stops on error or if callback returns false
    pub fn decode_stream<F>(buffer: &[u8], mut callback: F) -> DecodeResult<usize>
    where
        F: FnMut(&Record<'_>) -> bool,
    {
        let mut offset = 0;
        let mut count = 0;

        while offset < buffer.len() {
            match Self::decode(&buffer[offset..]) {
                Ok((record, consumed)) => {
                    count += 1;
                    offset += consumed;
                    if !callback(&record) {
                        break;
                    }
                }
                Err(DecodeError::BufferTooSmall { .. }) => break, // trailing partial header
                Err(e) => return Err(e),
            }
        }

        Ok(count)
    }
}
