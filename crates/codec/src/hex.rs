//! Hex helpers for the error path, where undecodable payloads are
//! archived as lowercase hex.

/// Lowercase hex encoding of `bytes`.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex string back into bytes. An odd-length input is
/// right-padded with '0' before decoding, so `"54321"` decodes as
/// `[0x54, 0x32, 0x10]`.
pub fn to_bytes(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    if s.len() % 2 == 1 {
        hex::decode(format!("{s}0"))
    } else {
        hex::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        assert_eq!(to_hex(&[0x0a, 0xff, 0x12, 0x38]), "0aff1238");
        assert_eq!(to_bytes("0aff1238").unwrap(), vec![0x0a, 0xff, 0x12, 0x38]);
    }

    #[test]
    fn odd_length_input_is_right_padded() {
        assert_eq!(to_bytes("54321").unwrap(), vec![0x54, 0x32, 0x10]);
    }

    #[test]
    fn invalid_digits_are_rejected() {
        assert!(to_bytes("zz").is_err());
    }
}
