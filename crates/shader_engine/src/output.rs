//! Compute output decoding
//!
//! Compute jobs write a fixed 64-byte block (set 1, binding 0). The block has
//! no inherent type; the caller picks an interpretation and the bytes are
//! reinterpreted as-is, never converted.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Size of the output block in bytes
pub const OUTPUT_SIZE: usize = 64;

/// Requested interpretation of the output block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// First word as `float`
    Float,
    /// First word as `int`
    Int,
    /// First four words as `vec4`
    Vec4,
    /// First four words as `ivec4`
    Ivec4,
    /// All sixteen words as `uint`
    #[default]
    Uints,
}

/// One interpretation of the output block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputValue {
    /// A single float
    Float(f32),
    /// A single signed integer
    Int(i32),
    /// Four floats
    Float4([f32; 4]),
    /// Four signed integers
    Int4([i32; 4]),
    /// Sixteen unsigned words
    Bytes([u32; 16]),
}

/// The 64-byte compute output block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStorage([u8; OUTPUT_SIZE]);

impl Default for OutputStorage {
    fn default() -> Self {
        Self([0; OUTPUT_SIZE])
    }
}

impl OutputStorage {
    /// Copy the block out of readback memory
    ///
    /// Shorter input is zero-padded; anything past 64 bytes is ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut block = [0; OUTPUT_SIZE];
        let len = bytes.len().min(OUTPUT_SIZE);
        block[..len].copy_from_slice(&bytes[..len]);
        Self(block)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; OUTPUT_SIZE] {
        &self.0
    }

    fn word(&self, index: usize) -> [u8; 4] {
        let start = index * 4;
        [self.0[start], self.0[start + 1], self.0[start + 2], self.0[start + 3]]
    }

    /// First word as a float
    pub fn as_float(&self) -> f32 {
        f32::from_ne_bytes(self.word(0))
    }

    /// First word as a signed integer
    pub fn as_int(&self) -> i32 {
        i32::from_ne_bytes(self.word(0))
    }

    /// First four words as floats
    pub fn as_vec4(&self) -> [f32; 4] {
        std::array::from_fn(|i| f32::from_ne_bytes(self.word(i)))
    }

    /// First four words as signed integers
    pub fn as_ivec4(&self) -> [i32; 4] {
        std::array::from_fn(|i| i32::from_ne_bytes(self.word(i)))
    }

    /// All sixteen words
    pub fn as_uints(&self) -> [u32; 16] {
        std::array::from_fn(|i| u32::from_ne_bytes(self.word(i)))
    }

    /// Decode the block as `kind`
    pub fn decode(&self, kind: OutputKind) -> OutputValue {
        match kind {
            OutputKind::Float => OutputValue::Float(self.as_float()),
            OutputKind::Int => OutputValue::Int(self.as_int()),
            OutputKind::Vec4 => OutputValue::Float4(self.as_vec4()),
            OutputKind::Ivec4 => OutputValue::Int4(self.as_ivec4()),
            OutputKind::Uints => OutputValue::Bytes(self.as_uints()),
        }
    }

    /// Text view of the sixteen words
    ///
    /// Each word is truncated to its low byte; bytes that are neither ASCII
    /// alphanumeric nor NUL are dropped. NULs are kept.
    pub fn chars_to_string(&self) -> String {
        self.as_uints()
            .iter()
            .map(|&word| word as u8)
            .filter(|&byte| byte.is_ascii_alphanumeric() || byte == 0)
            .map(char::from)
            .collect()
    }

    /// [`Self::chars_to_string`] without the NULs
    pub fn trimmed_text(&self) -> String {
        self.chars_to_string().chars().filter(|&c| c != '\0').collect()
    }

    /// Every interpretation, one per line
    pub fn report(&self) -> String {
        let [x, y, z, w] = self.as_vec4();
        let [a, b, c, d] = self.as_ivec4();

        let mut out = String::new();
        let _ = writeln!(out, "float: {:.6}", self.as_float());
        let _ = writeln!(out, "int  : {}", self.as_int());
        let _ = writeln!(out, "vec4 : vec4({:.6}, {:.6}, {:.6}, {:.6})", x, y, z, w);
        let _ = writeln!(out, "ivec4: ivec4({}, {}, {}, {})", a, b, c, d);
        let _ = write!(out, "chars: {}", self.trimmed_text());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn from_words(words: &[u32]) -> OutputStorage {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        OutputStorage::from_bytes(&bytes)
    }

    #[test]
    fn test_ok_text() {
        let storage = from_words(&[u32::from(b'O'), u32::from(b'K')]);
        assert!(storage.chars_to_string().starts_with("OK"));
        assert_eq!(storage.chars_to_string().len(), 16);
        assert_eq!(storage.trimmed_text(), "OK");
    }

    #[test]
    fn test_non_alphanumeric_dropped() {
        let storage = from_words(&[u32::from(b'H'), u32::from(b'!'), u32::from(b'i'), 0x100 + u32::from(b'7')]);
        // '!' is dropped, 0x137 truncates to '7'
        assert!(storage.chars_to_string().starts_with("Hi7\0"));
        assert_eq!(storage.chars_to_string().len(), 15);
    }

    #[test]
    fn test_float_reinterpretation() {
        let storage = from_words(&[1.5f32.to_bits(), 2.0f32.to_bits(), (-3.25f32).to_bits(), 0]);
        assert_relative_eq!(storage.as_float(), 1.5);
        assert_eq!(storage.as_vec4(), [1.5, 2.0, -3.25, 0.0]);
        assert_eq!(storage.as_int(), 1.5f32.to_bits() as i32);
    }

    #[test]
    fn test_int_vectors() {
        let storage = from_words(&[7, (-2i32) as u32, 0, 42]);
        assert_eq!(storage.as_int(), 7);
        assert_eq!(storage.as_ivec4(), [7, -2, 0, 42]);
        assert_eq!(storage.decode(OutputKind::Ivec4), OutputValue::Int4([7, -2, 0, 42]));
    }

    #[test]
    fn test_decode_tags() {
        let storage = from_words(&[3]);
        assert_eq!(storage.decode(OutputKind::Int), OutputValue::Int(3));
        match storage.decode(OutputKind::Uints) {
            OutputValue::Bytes(words) => assert_eq!(words[0], 3),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_short_input_zero_padded() {
        let storage = OutputStorage::from_bytes(&[1, 0, 0, 0]);
        assert_eq!(storage.as_uints()[0], u32::from_ne_bytes([1, 0, 0, 0]));
        assert_eq!(storage.as_uints()[15], 0);
    }

    #[test]
    fn test_report_layout() {
        let report = from_words(&[u32::from(b'O'), u32::from(b'K')]).report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("float: "));
        assert!(lines[3].starts_with("ivec4: ivec4(79, 75, 0, 0)"));
        assert_eq!(lines[4], "chars: OK");
    }
}
