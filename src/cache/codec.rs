//! Value Codec Module
//!
//! Values are opaque bytes; the store keeps them as standard base64 text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Result;

/// Encodes raw bytes to their base64 text form.
pub fn encode_value(value: &[u8]) -> String {
    STANDARD.encode(value)
}

/// Decodes stored base64 text back into raw bytes.
pub fn decode_value(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}
