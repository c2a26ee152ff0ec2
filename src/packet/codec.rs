//! Binary-to-text encoding for packet payloads.
//!
//! Standard base64 (RFC 4648 alphabet, `=` padding): 4 characters for every
//! 3 input bytes, no line breaks, safe to embed in a JSON string.

use base64::{engine::general_purpose, Engine as _};
use tracing::error;

/// Encoded length of `n` input bytes: `4 * ceil(n / 3)`.
pub fn encoded_len(n: usize) -> usize {
    4 * n.div_ceil(3)
}

/// Encode `bytes` as padded base64.
///
/// A length that disagrees with [`encoded_len`] means the encoder is broken;
/// it is logged and the output is returned anyway.
pub fn encode(bytes: &[u8]) -> String {
    let encoded = general_purpose::STANDARD.encode(bytes);
    let expected = encoded_len(bytes.len());
    if encoded.len() != expected {
        error!(
            expected,
            actual = encoded.len(),
            "base64 encoder produced an unexpected length"
        );
    }
    encoded
}

/// Decode padded base64, ignoring trailing NUL terminators.
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(text.trim_end_matches('\0'))
}
