//! Common helper functions for devauth.

/// Performs a constant-time comparison of two byte strings.
/// Used when comparing authentication identifiers received from the network.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_identical() {
        assert!(constant_time_eq(b"device-a", b"device-a"));
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(&[0xff], &[0xff]));
    }

    #[test]
    fn test_constant_time_eq_different() {
        assert!(!constant_time_eq(b"device-a", b"device-b"));
        assert!(!constant_time_eq(&[0x00, 0x01], &[0x00, 0x02]));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn test_constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"much_longer_identifier"));
        assert!(!constant_time_eq(b"a", b""));
    }
}
