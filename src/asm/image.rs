//! Program image files for Opal-16 code.
//!
//! The image format is text-based:
//! - One code word per line, written as four hex digits
//! - Lines starting with `;` are comments
//! - Blank lines are ignored
//!
//! For raw byte-stream interchange, code words serialize little-endian;
//! see [`words_to_bytes`] and [`bytes_to_words`].

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// A loaded program image.
#[derive(Debug, Clone, Default)]
pub struct ProgramImage {
    /// The code words.
    pub words: Vec<u16>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ProgramImage {
    /// Create a new empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code word.
    pub fn push(&mut self, word: u16, source: &str) {
        self.words.push(word);
        self.source_lines.push(source.to_string());
    }

    /// Number of code words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Parse image text into code words.
pub fn parse_image(text: &str) -> Result<ProgramImage, ImageError> {
    let mut image = ProgramImage::new();

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        // First token is the word; anything after it is commentary.
        let token = trimmed.split_whitespace().next().unwrap_or("");
        let word = u16::from_str_radix(token, 16).map_err(|_| ImageError::ParseError {
            line: idx + 1,
            message: format!("expected a 16-bit hex word, found `{}`", token),
        })?;

        image.push(word, trimmed);
    }

    Ok(image)
}

/// Render code words as image text.
pub fn format_image(words: &[u16]) -> String {
    let mut text = String::from("; Opal-16 program image\n");
    text.push_str(&format!("; {} words\n\n", words.len()));

    for (i, word) in words.iter().enumerate() {
        text.push_str(&format!("{:04X} ; 0x{:04X}\n", word, i * 2));
    }

    text
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| ImageError::IoError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut text = String::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ImageError::IoError(e.to_string()))?;
        text.push_str(&line);
        text.push('\n');
    }

    parse_image(&text)
}

/// Save code words to an image file.
pub fn save_image<P: AsRef<Path>>(path: P, words: &[u16]) -> Result<(), ImageError> {
    let mut file = std::fs::File::create(path.as_ref()).map_err(|e| ImageError::IoError(e.to_string()))?;
    file.write_all(format_image(words).as_bytes())
        .map_err(|e| ImageError::IoError(e.to_string()))
}

/// Serialize code words as a little-endian byte stream.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for &word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Deserialize a little-endian byte stream into code words.
pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u16>, ImageError> {
    if bytes.len() % 2 != 0 {
        return Err(ImageError::OddByteCount(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Errors that can occur during image operations.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("byte stream length {0} is not a whole number of words")]
    OddByteCount(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_roundtrip() {
        let words = vec![0xC12A, 0xFFFF, 0x0000];
        let text = format_image(&words);
        let image = parse_image(&text).unwrap();

        assert_eq!(image.words, words);
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let text = "; header\n\nC12A\nFFFF ; trailing note\n";
        let image = parse_image(text).unwrap();

        assert_eq!(image.words, vec![0xC12A, 0xFFFF]);
    }

    #[test]
    fn test_parse_rejects_bad_words() {
        let err = parse_image("C12A\nG000\n").unwrap_err();
        assert!(matches!(err, ImageError::ParseError { line: 2, .. }));
    }

    #[test]
    fn test_little_endian_byte_interchange() {
        let words = vec![0xC12A, 0xFFFF];
        let bytes = words_to_bytes(&words);

        assert_eq!(bytes, vec![0x2A, 0xC1, 0xFF, 0xFF]);
        assert_eq!(bytes_to_words(&bytes).unwrap(), words);
    }

    #[test]
    fn test_odd_byte_stream_is_rejected() {
        assert!(matches!(
            bytes_to_words(&[0x2A, 0xC1, 0xFF]),
            Err(ImageError::OddByteCount(3))
        ));
    }
}
