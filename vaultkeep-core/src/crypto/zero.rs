//! Zeroizing container for passwords and other short-lived secrets.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A byte buffer that is wiped when dropped.
///
/// Passwords travel through the gate and into blocking KDF tasks inside one
/// of these, so no plain `String` copy outlives the call.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureBuffer {
    data: Vec<u8>,
}

impl SecureBuffer {
    /// Create a new secure buffer from data
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the inner data (use carefully!)
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// View the contents as UTF-8, if they are
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl From<Vec<u8>> for SecureBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<String> for SecureBuffer {
    fn from(s: String) -> Self {
        Self { data: s.into_bytes() }
    }
}

impl From<&str> for SecureBuffer {
    fn from(s: &str) -> Self {
        Self {
            data: s.as_bytes().to_vec(),
        }
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer({} bytes)", self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_buffer_creation() {
        let buffer = SecureBuffer::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4, 5]);
        assert!(!buffer.is_empty());
        assert!(SecureBuffer::new(vec![]).is_empty());
    }

    #[test]
    fn test_secure_buffer_from_string() {
        let buffer = SecureBuffer::from("secret data".to_string());
        assert_eq!(buffer.as_str(), Some("secret data"));
    }

    #[test]
    fn test_non_utf8_has_no_str_view() {
        let buffer = SecureBuffer::new(vec![0xff, 0xfe]);
        assert_eq!(buffer.as_str(), None);
    }

    #[test]
    fn test_zeroize_clears_contents() {
        let mut buffer = SecureBuffer::from("secret");
        buffer.zeroize();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let buffer = SecureBuffer::from("hunter2");
        let rendered = format!("{:?}", buffer);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "SecureBuffer(7 bytes)");
    }
}
