//! Base64 helpers for wire transmission.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CryptoError;

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(text)
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Decode into a fixed-size array, rejecting any other length.
pub fn decode_array<const N: usize>(text: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode(text)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::Encoding(format!("expected {N} bytes, got {len}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let encoded = encode(b"murmur");
        assert_eq!(encoded, "bXVybXVy");
        assert_eq!(decode(&encoded).unwrap(), b"murmur");
    }

    #[test]
    fn test_rejects_bad_charset() {
        assert!(matches!(decode("not*base64"), Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_decode_array_length() {
        let encoded = encode([7u8; 12]);
        let arr: [u8; 12] = decode_array(&encoded).unwrap();
        assert_eq!(arr, [7u8; 12]);

        let short: Result<[u8; 16], _> = decode_array(&encoded);
        assert!(short.is_err());
    }
}
