//! Token counting with the cl100k_base BPE
//!
//! The encoder is shared process-wide; building it is expensive so it is
//! done once behind a `Lazy`.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

static ENCODER: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base tables ship with the binary"));

/// Count BPE tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    ENCODER.encode_ordinary(text).len()
}

/// Encode `text` into BPE token ids.
pub fn encode(text: &str) -> Vec<usize> {
    ENCODER.encode_ordinary(text)
}

/// Decode BPE token ids back into text.
///
/// Slicing an encoded sequence can split a multi-byte character; the lossy
/// path keeps chunkers total instead of failing the whole document.
pub fn decode(tokens: &[usize]) -> String {
    ENCODER.decode(tokens.to_vec()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn non_empty_text_has_tokens() {
        assert!(count_tokens("a") > 0);
        assert!(count_tokens("hello world, this is a sentence.") > 0);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let tokens = encode(text);
        assert_eq!(decode(&tokens), text);
    }
}
