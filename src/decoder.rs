//! Byte-stream decoder for the binary module format
//!
//! This module provides the low-level decoding primitives the section
//! decoders are built on: varint reading, length-prefixed strings, opaque
//! byte ranges, and section framing with declared-size verification.
//!
//! Varint encoding format:
//! - 7 bits per byte, high bit as continuation flag
//! - u32 values only, at most 5 bytes, rejected on overflow
//! - Strings follow length-prefixed format
//!
//! All failures are reported as descriptive strings tagged with the byte
//! offset at which decoding stopped. The decoder never panics on malformed
//! input.

use crate::env::SectionId;

/// Bounds of a started section: payload start offset and declared size.
///
/// Returned by [`Decoder::start_section`] and consumed by
/// [`Decoder::finish_section`], which verifies that exactly `size` payload
/// bytes were read in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    /// Offset of the first payload byte.
    pub start: usize,
    /// Declared payload size in bytes.
    pub size: u32,
}

/// A cursor over a module's bytes
///
/// Holds a borrowed byte slice and a position; all reads advance the
/// position and fail with an offset-tagged message on truncation.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder positioned at the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Build an offset-tagged failure message
    pub fn fail<T>(&self, msg: &str) -> Result<T, String> {
        Err(format!("at offset {}: {}", self.pos, msg))
    }

    /// Current byte offset from the start of the module
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.pos
    }

    /// Whether the entire input has been consumed
    #[inline]
    pub fn done(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Number of bytes remaining
    #[inline]
    pub fn bytes_remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Read a single byte
    pub fn read_byte(&mut self) -> Result<u8, String> {
        match self.bytes.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(b)
            }
            None => self.fail("unexpected end of bytecode"),
        }
    }

    /// Peek the next byte without consuming it
    #[inline]
    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Read a little-endian u32
    pub fn read_u32_le(&mut self) -> Result<u32, String> {
        let raw = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a varint-encoded u32 (7 bits per byte, high bit continues)
    pub fn read_var_u32(&mut self) -> Result<u32, String> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = match self.bytes.get(self.pos) {
                Some(&b) => b,
                None => return self.fail("truncated varint"),
            };
            self.pos += 1;

            // The fifth byte may only carry the top four value bits, and
            // may not continue.
            if shift == 28 && byte > 0x0F {
                return self.fail("varint out of range");
            }
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read `n` raw bytes as a borrowed slice
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.bytes_remaining() < n {
            return self.fail("byte range extends past end of bytecode");
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, String> {
        let len = self.read_var_u32()? as usize;
        let raw = self.read_bytes(len)?;
        match std::str::from_utf8(raw) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => self.fail("string is not valid UTF-8"),
        }
    }

    /// Begin decoding a section
    ///
    /// Sections appear in strictly increasing id order. If the next section
    /// in the stream is not `id`, the section is absent and `None` is
    /// returned without consuming anything; a section with a lower id at
    /// this point means the stream is misordered and decoding fails.
    pub fn start_section(
        &mut self,
        id: SectionId,
        label: &str,
    ) -> Result<Option<SectionRange>, String> {
        let next = match self.peek_byte() {
            Some(b) => b,
            None => return Ok(None),
        };
        if next != id as u8 {
            if next < id as u8 {
                return self.fail(&format!("misplaced {} section", label));
            }
            return Ok(None);
        }
        self.pos += 1;

        let size = self.read_var_u32()?;
        if size as usize > self.bytes_remaining() {
            return self.fail(&format!("{} section size extends past end of bytecode", label));
        }
        Ok(Some(SectionRange {
            start: self.pos,
            size,
        }))
    }

    /// Finish a section, verifying the declared payload size was consumed
    pub fn finish_section(&mut self, range: SectionRange, label: &str) -> Result<(), String> {
        let consumed = self.pos - range.start;
        if consumed != range.size as usize {
            return self.fail(&format!("{} section byte size mismatch", label));
        }
        Ok(())
    }
}
