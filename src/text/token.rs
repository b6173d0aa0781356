// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The text-format tokenizer (C6): a forward-only scanner over `&str`
//! producing one [`Token`] at a time. Comments (`;; ...` and nested
//! `(; ... ;)`) and whitespace are skipped between tokens; nothing here
//! allocates except string-literal decoding, which must unescape.

use crate::error::{Error, ErrorSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind<'a> {
    LPar,
    RPar,
    Id(&'a str),
    Keyword(&'a str),
    Reserved(&'a str),
    Nat(&'a str),
    Int(&'a str),
    Float(&'a str),
    /// The decoded (unescaped) bytes of a string literal. Borrowed only when
    /// the literal contained no escapes; otherwise this is produced by
    /// [`decode_string`] as an owned buffer the caller threads through the
    /// converter's side table instead.
    String(&'a str),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub offset: usize,
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '/'
                | ':'
                | '<'
                | '='
                | '>'
                | '?'
                | '@'
                | '\\'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}

/// A forward-only tokenizer over a source string (§4.6).
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_trivia(&mut self, sink: &mut ErrorSink) {
        loop {
            let rest = self.rest();
            if let Some(stripped) = rest.strip_prefix(";;") {
                let len = stripped.find('\n').map_or(stripped.len(), |i| i);
                self.pos += 2 + len;
                continue;
            }
            if rest.starts_with("(;") {
                let start = self.pos;
                let mut depth = 1usize;
                let mut cursor = &rest[2..];
                let mut consumed = 2;
                loop {
                    if let Some(i) = cursor.find("(;").or(None) {
                        let close = cursor.find(";)");
                        match close {
                            Some(j) if j < i => {
                                depth -= 1;
                                consumed += j + 2;
                                cursor = &cursor[j + 2..];
                            }
                            _ => {
                                depth += 1;
                                consumed += i + 2;
                                cursor = &cursor[i + 2..];
                            }
                        }
                    } else if let Some(j) = cursor.find(";)") {
                        depth -= 1;
                        consumed += j + 2;
                        cursor = &cursor[j + 2..];
                    } else {
                        sink.report(start, Error::BadString);
                        self.pos = self.src.len();
                        return;
                    }
                    if depth == 0 {
                        break;
                    }
                }
                self.pos += consumed;
                continue;
            }
            let mut chars = rest.char_indices();
            match chars.next() {
                Some((_, c)) if c.is_whitespace() => {
                    self.pos += c.len_utf8();
                }
                _ => break,
            }
        }
    }

    /// Reads the next token, reporting and skipping malformed string
    /// literals rather than aborting the whole scan.
    pub fn next(&mut self, sink: &mut ErrorSink) -> Token<'a> {
        self.skip_trivia(sink);
        let offset = self.pos;
        let rest = self.rest();
        if rest.is_empty() {
            return Token {
                kind: TokenKind::Eof,
                offset,
            };
        }
        if let Some(stripped) = rest.strip_prefix('(') {
            let _ = stripped;
            self.pos += 1;
            return Token {
                kind: TokenKind::LPar,
                offset,
            };
        }
        if let Some(stripped) = rest.strip_prefix(')') {
            let _ = stripped;
            self.pos += 1;
            return Token {
                kind: TokenKind::RPar,
                offset,
            };
        }
        if rest.starts_with('"') {
            return self.next_string(offset, sink);
        }
        let end = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
        if end == 0 {
            // An unrecognised single character: report and skip it so the
            // scan can continue onto the rest of the source.
            let mut chars = rest.chars();
            let c = chars.next().unwrap();
            sink.report(offset, Error::BadString);
            self.pos += c.len_utf8();
            return self.next(sink);
        }
        let text = &rest[..end];
        self.pos += end;
        let kind = classify_word(text);
        Token { kind, offset }
    }

    fn next_string(&mut self, offset: usize, sink: &mut ErrorSink) -> Token<'a> {
        let rest = self.rest();
        let mut idx = 1;
        let bytes = rest.as_bytes();
        loop {
            if idx >= bytes.len() {
                sink.report(offset, Error::BadString);
                self.pos = self.src.len();
                return Token {
                    kind: TokenKind::Eof,
                    offset,
                };
            }
            match bytes[idx] {
                b'"' => {
                    idx += 1;
                    break;
                }
                b'\\' => {
                    idx += 2;
                }
                _ => {
                    idx += 1;
                }
            }
        }
        let text = &rest[..idx];
        self.pos += idx;
        Token {
            kind: TokenKind::String(&text[1..text.len() - 1]),
            offset,
        }
    }
}

fn classify_word(text: &str) -> TokenKind<'_> {
    if let Some(name) = text.strip_prefix('$') {
        if !name.is_empty() {
            return TokenKind::Id(text);
        }
    }
    let first = text.chars().next().unwrap();
    if first.is_ascii_digit() || ((first == '+' || first == '-') && text.len() > 1) {
        let without_sign = text.strip_prefix(['+', '-']).unwrap_or(text);
        if without_sign.contains('.')
            || without_sign.contains("nan")
            || without_sign.contains("inf")
            || (without_sign.starts_with("0x") && without_sign.contains('p'))
        {
            return TokenKind::Float(text);
        }
        if first.is_ascii_digit() {
            return TokenKind::Nat(text);
        }
        return TokenKind::Int(text);
    }
    if first.is_ascii_lowercase() {
        return TokenKind::Keyword(text);
    }
    TokenKind::Reserved(text)
}

/// Unescapes a string literal's surface text (C-style escapes, `\xx` byte
/// escapes, and `\u{...}` codepoint escapes) into owned bytes.
pub fn decode_string(literal: &str, sink: &mut ErrorSink) -> Vec<u8> {
    let mut out = Vec::with_capacity(literal.len());
    let bytes = literal.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            sink.report(i, Error::BadString);
            break;
        }
        match bytes[i] {
            b't' => {
                out.push(b'\t');
                i += 1;
            }
            b'n' => {
                out.push(b'\n');
                i += 1;
            }
            b'r' => {
                out.push(b'\r');
                i += 1;
            }
            b'"' => {
                out.push(b'"');
                i += 1;
            }
            b'\'' => {
                out.push(b'\'');
                i += 1;
            }
            b'\\' => {
                out.push(b'\\');
                i += 1;
            }
            b'u' if bytes.get(i + 1) == Some(&b'{') => {
                let start = i + 2;
                let Some(close) = literal[start..].find('}') else {
                    sink.report(i, Error::BadString);
                    break;
                };
                let hex = &literal[start..start + close];
                match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => {
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                    None => sink.report(i, Error::BadString),
                }
                i = start + close + 1;
            }
            h1 if h1.is_ascii_hexdigit() => {
                let Some(h2) = bytes.get(i + 1).copied() else {
                    sink.report(i, Error::BadString);
                    break;
                };
                let hex = std::str::from_utf8(&bytes[i..i + 2]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => out.push(byte),
                    Err(_) => sink.report(i, Error::BadString),
                }
                let _ = h2;
                i += 2;
            }
            _ => {
                sink.report(i, Error::BadString);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_module_header() {
        let mut sink = ErrorSink::new();
        let mut tok = Tokenizer::new("(module $m)");
        assert_eq!(tok.next(&mut sink).kind, TokenKind::LPar);
        assert_eq!(tok.next(&mut sink).kind, TokenKind::Keyword("module"));
        assert_eq!(tok.next(&mut sink).kind, TokenKind::Id("$m"));
        assert_eq!(tok.next(&mut sink).kind, TokenKind::RPar);
        assert_eq!(tok.next(&mut sink).kind, TokenKind::Eof);
    }

    #[test]
    fn skips_line_and_block_comments() {
        let mut sink = ErrorSink::new();
        let mut tok = Tokenizer::new(";; hi\n(; nested (; comment ;) here ;)(module)");
        assert_eq!(tok.next(&mut sink).kind, TokenKind::LPar);
        assert_eq!(tok.next(&mut sink).kind, TokenKind::Keyword("module"));
    }

    #[test]
    fn decodes_hex_and_named_escapes() {
        let mut sink = ErrorSink::new();
        let decoded = decode_string("a\\74\\nb", &mut sink);
        assert_eq!(decoded, b"at\nb");
        assert!(sink.is_empty());
    }

    #[test]
    fn classifies_integers_and_floats() {
        assert_eq!(classify_word("42").is_nat(), true);
        assert_eq!(classify_word("-1").is_int(), true);
        assert_eq!(classify_word("1.5").is_float(), true);
    }

    impl<'a> TokenKind<'a> {
        fn is_nat(&self) -> bool {
            matches!(self, TokenKind::Nat(_))
        }
        fn is_int(&self) -> bool {
            matches!(self, TokenKind::Int(_))
        }
        fn is_float(&self) -> bool {
            matches!(self, TokenKind::Float(_))
        }
    }
}
