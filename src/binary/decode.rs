// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The byte cursor (C1) and the low-level primitives every binary decoder
//! builds on: fixed-width reads, LEB128 integers, floats, and length-prefixed
//! UTF-8 strings. Every read borrows from the input it was constructed with;
//! nothing here allocates.

use crate::error::{Error, ErrorSink};
use crate::leb128::Leb128;

/// A forward-only cursor over a borrowed byte span (§4.1).
///
/// `Decoder` never copies: every multi-byte read returns a sub-slice of the
/// buffer it was constructed with, so the returned value's lifetime is tied
/// to the input, not to the `Decoder`.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Returns the leading `n` bytes, or reports `NotEnoughBytes` and
    /// returns `None` if fewer than `n` bytes remain.
    pub fn read_bytes(&mut self, n: usize, sink: &mut ErrorSink) -> Option<&'a [u8]> {
        if self.remaining() < n {
            sink.report(
                self.pos,
                Error::NotEnoughBytes {
                    needed: n,
                    available: self.remaining(),
                },
            );
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub fn read_byte(&mut self, sink: &mut ErrorSink) -> Option<u8> {
        self.read_bytes(1, sink).map(|b| b[0])
    }

    /// Decodes a LEB128 value of type `T` (§4.1), rejecting overlong
    /// encodings via [`crate::leb128`]'s sign-extension-consistency rule.
    pub fn read_leb128<T: Leb128>(&mut self, sink: &mut ErrorSink) -> Option<T> {
        let start = self.pos;
        let mut cursor = self.pos;
        let data = self.data;
        let result = crate::leb128::read::<T>(|| {
            let byte = *data.get(cursor)?;
            cursor += 1;
            Some(byte)
        });
        match result {
            Some(value) => {
                self.pos = cursor;
                Some(value)
            }
            None => {
                sink.report(start, Error::BadLeb128);
                None
            }
        }
    }

    pub fn read_u32(&mut self, sink: &mut ErrorSink) -> Option<u32> {
        self.read_leb128::<u32>(sink)
    }

    pub fn read_i32(&mut self, sink: &mut ErrorSink) -> Option<i32> {
        self.read_leb128::<i32>(sink)
    }

    pub fn read_i64(&mut self, sink: &mut ErrorSink) -> Option<i64> {
        self.read_leb128::<i64>(sink)
    }

    pub fn read_f32(&mut self, sink: &mut ErrorSink) -> Option<f32> {
        let bytes = self.read_bytes(4, sink)?;
        Some(f32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f64(&mut self, sink: &mut ErrorSink) -> Option<f64> {
        let bytes = self.read_bytes(8, sink)?;
        Some(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_v128(&mut self, sink: &mut ErrorSink) -> Option<[u8; 16]> {
        let bytes = self.read_bytes(16, sink)?;
        Some(bytes.try_into().unwrap())
    }

    /// A LEB128 length followed by that many raw bytes, validated as UTF-8
    /// (§4.1 "UTF-8 strings").
    pub fn read_string(&mut self, sink: &mut ErrorSink) -> Option<&'a str> {
        let len = self.read_u32(sink)? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len, sink)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s),
            Err(_) => {
                sink.report(start, Error::BadString);
                None
            }
        }
    }

    /// Splits off a sub-decoder over the next `n` bytes without advancing
    /// `self` past them in a way observable to the caller beyond the normal
    /// cursor advance; used to bound entity decoders to a declared length.
    pub fn split(&mut self, n: usize, sink: &mut ErrorSink) -> Option<Decoder<'a>> {
        let bytes = self.read_bytes(n, sink)?;
        Some(Decoder::new(bytes))
    }

    /// The bytes from the current position to the end of this decoder's
    /// span, without advancing the cursor. Used when a decoder was
    /// constructed over an already-bounded sub-span (e.g. via
    /// [`Decoder::split`]) and the remainder is wanted wholesale rather than
    /// incrementally.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let mut sink = ErrorSink::new();
        let mut dec = Decoder::new(&[0x2a, 0x00, 0x00, 0x00]);
        assert_eq!(dec.read_f32(&mut sink), Some(f32::from_bits(0x2a)));
    }

    #[test]
    fn not_enough_bytes_reports_diagnostic() {
        let mut sink = ErrorSink::new();
        let mut dec = Decoder::new(&[0x01]);
        assert_eq!(dec.read_bytes(4, &mut sink), None);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn string_round_trips_utf8() {
        let mut sink = ErrorSink::new();
        let mut data = vec![3u8];
        data.extend_from_slice(b"abc");
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.read_string(&mut sink), Some("abc"));
    }

    #[test]
    fn invalid_utf8_reports_bad_string() {
        let mut sink = ErrorSink::new();
        let mut data = vec![2u8];
        data.extend_from_slice(&[0xff, 0xfe]);
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.read_string(&mut sink), None);
        assert_eq!(sink.len(), 1);
    }
}
