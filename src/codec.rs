//! Reversible payload obfuscation: repeating-key XOR over standard base64.
//!
//! This masks payloads from casual inspection only. It is not encryption and
//! must never be treated as a security boundary.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use thiserror::Error;

/// Standard alphabet; padding is emitted on encode and optional on decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty token")]
    Empty,

    #[error("token is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("decoded bytes are not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// XOR every byte with `key[i % key.len()]`. An empty key leaves the bytes untouched.
fn xor_in_place(bytes: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

/// Mask `plaintext` under `key` and return the base64 token.
pub fn encode(plaintext: &str, key: &str) -> String {
    let mut bytes = plaintext.as_bytes().to_vec();
    xor_in_place(&mut bytes, key.as_bytes());
    TOKEN_ENGINE.encode(bytes)
}

/// Recover the plaintext behind `token`.
///
/// With no key (or an empty one) the token is treated as plain base64, which
/// covers senders that skip the XOR step. Surrounding whitespace is ignored.
pub fn decode(token: &str, key: Option<&str>) -> Result<String, CodecError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CodecError::Empty);
    }
    let mut bytes = TOKEN_ENGINE.decode(token)?;
    if let Some(key) = key {
        xor_in_place(&mut bytes, key.as_bytes());
    }
    Ok(String::from_utf8(bytes)?)
}
