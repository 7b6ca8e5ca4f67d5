//! 5-bit text codec over three alphabets.
//!
//! The primary alphabet covers lowercase prose. Its last two codes are
//! escapes: code 30 means "next 5 bits index the uppercase alphabet" and
//! code 31 means "next 5 bits index the symbol alphabet". A literal `#` or
//! `*` is always written through the uppercase alphabet, so the escape codes
//! never stand for themselves.

use super::bits::{BitReader, BitWriter};
use crate::error::{ProtocolError, Result};

const SYMBOL_BITS: u8 = 5;

pub const PRIMARY: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz,\n /#*";
pub const UPPER: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ.?!@#*";
pub const SYMBOLS: &[u8; 32] = b"0123456789-_=&%+;'()[]{}\"|:\\<^~>";

const ESCAPE_UPPER: u32 = 30;
const ESCAPE_SYMBOLS: u32 = 31;

fn index_of(alphabet: &[u8; 32], c: char) -> Option<u32> {
    if !c.is_ascii() {
        return None;
    }
    alphabet.iter().position(|&b| b as char == c).map(|i| i as u32)
}

/// Pack `text` into the 5-bit representation.
///
/// Fails with [`ProtocolError::UnsupportedCharacter`] on the first character
/// none of the alphabets hold; callers fall back to literal UTF-8.
pub fn compress_text(text: &str) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();
    for c in text.chars() {
        match index_of(PRIMARY, c) {
            Some(code) if code < ESCAPE_UPPER => writer.write_bits(code, SYMBOL_BITS),
            _ => {
                if let Some(code) = index_of(UPPER, c) {
                    writer.write_bits(ESCAPE_UPPER, SYMBOL_BITS);
                    writer.write_bits(code, SYMBOL_BITS);
                } else if let Some(code) = index_of(SYMBOLS, c) {
                    writer.write_bits(ESCAPE_SYMBOLS, SYMBOL_BITS);
                    writer.write_bits(code, SYMBOL_BITS);
                } else {
                    return Err(ProtocolError::UnsupportedCharacter(c));
                }
            }
        }
    }
    Ok(writer.finish_packed())
}

/// Inverse of [`compress_text`]. An incomplete trailing group is ignored.
pub fn decompress_text(packed: &[u8]) -> String {
    let mut reader = BitReader::from_packed(packed);
    let mut out = String::new();
    while let Some(code) = reader.read_bits(SYMBOL_BITS) {
        let alphabet = match code {
            ESCAPE_UPPER => UPPER,
            ESCAPE_SYMBOLS => SYMBOLS,
            _ => {
                out.push(PRIMARY[code as usize] as char);
                continue;
            }
        };
        match reader.read_bits(SYMBOL_BITS) {
            Some(escaped) => out.push(alphabet[escaped as usize] as char),
            None => break,
        }
    }
    out
}
