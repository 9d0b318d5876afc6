use miette::Result;

use crate::error;
use crate::span::{Span, SrcOffset};

/// Parsed program image, ready to be placed in memory starting at address zero.
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Parser for textual machine code listings.
///
/// The format is line-oriented: each line holds at most one instruction word of
/// up to eight binary digits. A `#` starts a comment running to the end of the
/// line, and blank lines are skipped.
pub struct ImgParser {
    src: &'static str,
}

impl ImgParser {
    pub fn new(src: &'static str) -> Self {
        ImgParser { src }
    }

    pub fn parse(self) -> Result<Image> {
        let mut bytes = Vec::new();
        let mut offs = 0;

        for line in self.src.split('\n') {
            let code = match line.split_once('#') {
                Some((code, _comment)) => code,
                None => line,
            };
            let word = code.trim();
            if !word.is_empty() {
                let start = offs + (code.len() - code.trim_start().len());
                let span = Span::new(SrcOffset(start), word.len());

                if word.contains(char::is_whitespace) {
                    return Err(error::parse_split_word(span, self.src));
                }
                if word.len() > 8 {
                    return Err(error::parse_word_too_long(span, self.src));
                }
                if !word.bytes().all(|b| matches!(b, b'0' | b'1')) {
                    return Err(error::parse_not_binary(span, self.src));
                }
                let byte = u8::from_str_radix(word, 2)
                    .map_err(|_| error::parse_not_binary(span, self.src))?;
                bytes.push(byte);
            }
            offs += line.len() + 1;
        }

        Ok(Image { bytes })
    }
}
