//! Annex B bitstream framing
//!
//! Splits a fully buffered elementary stream into NAL unit views by scanning
//! for `00 00 01` / `00 00 00 01` start codes. Views never own memory; they
//! index into the [`RawStream`] they came from.

use std::path::Path;

use bytes::Bytes;

use crate::error::{DecodeError, Result};
use crate::nal;

/// A NAL unit located inside a [`RawStream`].
///
/// `start` is the first payload byte (the NAL header), `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    pub start: usize,
    pub end: usize,
    /// `nal_unit_type` from the header byte, `None` for zero-length units.
    pub nal_type: Option<u8>,
}

impl NalUnit {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Locate the earliest start code at or after `from`.
///
/// Returns `(position, code_length)`; a 4-byte code wins over the 3-byte
/// code that overlaps it one byte later.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Find the NAL unit following `cursor`.
///
/// Returns the unit and the advanced cursor (just past the start code), or
/// `None` when no start code remains.
pub fn find_next_nal(data: &[u8], cursor: usize) -> Option<(NalUnit, usize)> {
    let (pos, code_len) = find_start_code(data, cursor)?;
    let start = pos + code_len;
    let end = find_start_code(data, start)
        .map(|(next, _)| next)
        .unwrap_or(data.len());

    let nal_type = (end > start).then(|| nal::nal_type(data[start]));
    Some((NalUnit { start, end, nal_type }, start))
}

/// An elementary stream held wholly in memory plus a read cursor.
#[derive(Debug, Clone)]
pub struct RawStream {
    data: Bytes,
    cursor: usize,
}

impl RawStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }

    /// Load a stream file. Missing, unreadable and empty files are `Io` errors.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| DecodeError::Io(format!("Cannot open file {}: {}", path.display(), e)))?;

        if data.is_empty() {
            return Err(DecodeError::Io(format!("Empty file: {}", path.display())));
        }

        tracing::info!("Loaded raw stream {}: {} bytes", path.display(), data.len());
        Ok(Self::new(data))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Payload bytes of a unit produced by this stream.
    pub fn nal_bytes(&self, nal: &NalUnit) -> &[u8] {
        &self.data[nal.start..nal.end]
    }

    /// Next unit without moving the cursor. Pair with [`RawStream::advance_to`].
    pub fn peek_nal(&self) -> Option<(NalUnit, usize)> {
        find_next_nal(&self.data, self.cursor)
    }

    pub fn advance_to(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.data.len());
    }

    pub fn next_nal(&mut self) -> Option<NalUnit> {
        let (nal, cursor) = self.peek_nal()?;
        self.cursor = cursor;
        tracing::trace!("NAL type={:?} range={}..{}", nal.nal_type, nal.start, nal.end);
        Some(nal)
    }

    /// All units from the start of the stream, ignoring the cursor.
    pub fn nal_units(&self) -> NalIter<'_> {
        NalIter {
            data: &self.data,
            cursor: 0,
        }
    }
}

/// Iterator over every NAL unit of a byte slice.
pub struct NalIter<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> NalIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }
}

impl Iterator for NalIter<'_> {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        let (nal, cursor) = find_next_nal(self.data, self.cursor)?;
        self.cursor = cursor;
        Some(nal)
    }
}
