//! Output text encoding. Characters the target encoding cannot represent are dropped.

use crate::assemble::AssembleError;
use encoding_rs::{EncoderResult, Encoding, UTF_8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEncoding(&'static Encoding);

impl Default for OutputEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl OutputEncoding {
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// Look up a WHATWG label such as `utf-8`, `gbk`, `gb18030`, `big5`.
    pub fn for_label(label: &str) -> Result<Self, AssembleError> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|e| Self(e.output_encoding()))
            .ok_or_else(|| AssembleError::UnknownEncoding(label.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn is_utf8(&self) -> bool {
        self.0 == UTF_8
    }

    /// Encode `text`, skipping unmappable characters.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        if self.is_utf8() {
            return text.as_bytes().to_vec();
        }
        let mut encoder = self.0.new_encoder();
        let mut out = Vec::with_capacity(text.len() + 16);
        let mut rest = text;
        loop {
            let (result, read) =
                encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, true);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => out.reserve(rest.len().max(16) * 2),
                EncoderResult::Unmappable(_) => {}
            }
        }
        out
    }
}
