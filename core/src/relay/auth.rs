//! Shared relay credential
//!
//! Generated once per process and handed to co-located companion
//! processes through a small JSON file.

use anyhow::{Context, Result};
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Token length in random bytes (hex-encoded on the wire)
pub const TOKEN_BYTES: usize = 32;

/// The process-wide shared secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken(String);

#[derive(Serialize)]
struct TokenFile<'a> {
    token: &'a str,
}

impl AuthToken {
    /// Fresh random token
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = Self(hex::encode(bytes));
        bytes.zeroize();
        token
    }

    /// Wrap a token obtained elsewhere (tests, fixed deployments)
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte-for-byte comparison in constant time
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Write `{"token": "..."}` to `path`, creating parent directories
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        let contents = serde_json::to_string_pretty(&TokenFile { token: &self.0 })
            .context("Failed to serialize token")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write token file {}", path.display()))?;
        Ok(())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random_hex() {
        let a = AuthToken::generate();
        let b = AuthToken::generate();

        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_matches() {
        let token = AuthToken::from_string("secret");

        assert!(token.matches("secret"));
        assert!(!token.matches("Secret"));
        assert!(!token.matches("secret "));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_debug_redacts() {
        let token = AuthToken::from_string("secret");
        assert!(!format!("{:?}", token).contains("secret"));
    }

    #[test]
    fn test_persist_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gateway_token.json");
        let token = AuthToken::generate();

        token.persist(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["token"], token.as_str());
    }
}
