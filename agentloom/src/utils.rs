//! Small shared helpers.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique, sortable-ish identifiers for workflow runs.
///
/// Ids combine wall-clock nanoseconds with a process-local counter and are
/// hashed so they carry no meaningful structure. Collisions would require
/// the same counter value at the same nanosecond in the same process.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a 16-hex-char identifier with the given prefix, e.g. `run-1a2b…`.
    pub fn generate(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(n.to_le_bytes());
        let digest = hasher.finalize();
        format!("{prefix}-{}", hex_prefix(&digest, 8))
    }
}

/// Render the first `n` bytes of `bytes` as lowercase hex.
#[must_use]
pub fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes
        .iter()
        .take(n)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Stable SHA-256 of arbitrary input.
#[must_use]
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let gen = IdGenerator::new();
        let a = gen.generate("run");
        let b = gen.generate("run");
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(sha256(b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), sha256(b"abd"));
    }

    #[test]
    fn hex_prefix_truncates() {
        let digest = sha256(b"abc");
        assert_eq!(hex_prefix(&digest, 4).len(), 8);
    }
}
