//! Packet identifiers derived from creation timestamps.
//!
//! The identifier is `base64(sha1(timestamp))` where the timestamp is the
//! packet's `created_at` rendered with six decimal places. Identical
//! timestamps give identical identifiers; nothing random is involved.

use super::codec;
use sha1::{Digest, Sha1};

/// Render seconds since the epoch with microsecond precision.
pub fn format_timestamp(seconds: f64) -> String {
    format!("{:.6}", seconds)
}

/// Derive the packet identifier for a rendered timestamp.
///
/// Always 28 characters: a 20-byte SHA-1 digest in padded base64.
pub fn derive_iuid(timestamp: &str) -> String {
    let digest = Sha1::digest(timestamp.as_bytes());
    codec::encode(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(derive_iuid("abc"), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
        assert_eq!(derive_iuid("1700000000.123456"), "yBxmI97BrSMzkVZBd03OHAk/U6E=");
    }

    #[test]
    fn test_deterministic() {
        let timestamp = format_timestamp(1_700_000_000.5);
        assert_eq!(derive_iuid(&timestamp), derive_iuid(&timestamp));
    }

    #[test]
    fn test_distinct_timestamps_distinct_ids() {
        let a = derive_iuid(&format_timestamp(1_700_000_000.000001));
        let b = derive_iuid(&format_timestamp(1_700_000_000.000002));
        assert_ne!(a, b);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1.5), "1.500000");
        assert_eq!(format_timestamp(1_700_000_000.25), "1700000000.250000");
    }

    #[test]
    fn test_identifier_shape() {
        let iuid = derive_iuid("1700000000.000000");
        assert_eq!(iuid.len(), 28);
        assert_eq!(codec::decode(&iuid).unwrap().len(), 20);
    }
}
