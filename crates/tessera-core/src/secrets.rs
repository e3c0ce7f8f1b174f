//! Secure handling of the HuggingFace access token.
//!
//! Tokens reach us from config files, `HF_TOKEN` and the hub token file. None of
//! those paths may leak the value into logs or `Debug` output of `RunConfig`.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// A string that redacts its content in `Debug` and `Display`.
///
/// The value is only reachable through [`expose_secret`][SecretString::expose_secret].
///
/// # Example
///
/// ```
/// use tessera_core::SecretString;
///
/// let token = SecretString::new("hf_abcdef");
/// assert_eq!(format!("{:?}", token), "SecretString([REDACTED])");
/// assert_eq!(token.expose_secret(), "hf_abcdef");
/// ```
#[derive(Clone, Default)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    /// Wrap a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: secret.into(),
        }
    }

    /// Expose the secret value. Never log the result.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    /// True when the secret is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.inner.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        // Best-effort zeroing; the allocator may still hold copies from earlier reallocations.
        if !self.inner.is_empty() {
            // SAFETY: we own the buffer exclusively, the pointer is valid for `len`
            // bytes, and NUL bytes keep the string valid UTF-8.
            unsafe {
                let ptr = self.inner.as_mut_ptr();
                for i in 0..self.inner.len() {
                    std::ptr::write_volatile(ptr.add(i), 0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redact() {
        let secret = SecretString::new("hf_secret");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_expose() {
        let secret = SecretString::from("hf_secret".to_string());
        assert_eq!(secret.expose_secret(), "hf_secret");
    }

    #[test]
    fn test_blank() {
        assert!(SecretString::default().is_blank());
        assert!(SecretString::new("  ").is_blank());
        assert!(!SecretString::new("hf_x").is_blank());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let secret: SecretString = serde_yaml::from_str("hf_from_yaml").unwrap();
        assert_eq!(secret.expose_secret(), "hf_from_yaml");
    }
}
