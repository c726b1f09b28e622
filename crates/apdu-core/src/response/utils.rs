//! Small helpers for splitting raw response bytes into payload + status.

/// Split `bytes` into `((sw1, sw2), payload)`.
///
/// Fails if fewer than two bytes are present.
pub fn extract_response_parts(bytes: &[u8]) -> Result<((u8, u8), &[u8]), &'static str> {
    if bytes.len() < 2 {
        return Err("response shorter than two status bytes");
    }
    let split_at = bytes.len() - 2;
    let (payload, sw) = bytes.split_at(split_at);
    Ok(((sw[0], sw[1]), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_payload_and_status() {
        let ((sw1, sw2), payload) = extract_response_parts(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert_eq!((sw1, sw2), (0x90, 0x00));
        assert_eq!(payload, &[0x01, 0x02]);
    }

    #[test]
    fn rejects_too_short() {
        assert!(extract_response_parts(&[0x90]).is_err());
    }
}
