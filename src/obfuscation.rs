//! Hashing and encoding used by obfuscated ("CLIENT" format) and precomputed configurations.
use base64::{engine::general_purpose::STANDARD, Engine};

/// Lowercase hex MD5 of `input`.
pub(crate) fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input))
}

/// Lowercase hex MD5 of `salt` immediately followed by `input`.
pub(crate) fn salted_md5_hex(salt: &str, input: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(salt);
    ctx.consume(input);
    format!("{:x}", ctx.compute())
}

/// Failure to decode an obfuscated value.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Value is not valid base64.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    /// Decoded bytes are not valid UTF-8.
    #[error("decoded value is not valid UTF-8")]
    Utf8,
}

/// Decode standard (padded) base64 into a UTF-8 string.
pub(crate) fn decode_base64(value: &str) -> Result<String, DecodeError> {
    let bytes = STANDARD.decode(value)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)
}

#[cfg(test)]
pub(crate) fn encode_base64(value: &str) -> String {
    STANDARD.encode(value)
}
