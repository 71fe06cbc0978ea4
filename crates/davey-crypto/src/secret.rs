//! Zeroizing container for derived secret material

use zeroize::Zeroize;

/// Owned secret bytes, wiped on drop.
///
/// Used for every derived value in the key schedule (epoch secrets, seeds,
/// sealed-box payloads). The `Debug` impl never prints the contents.
#[derive(Clone)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Wrap existing bytes. The caller's copy is moved, not duplicated.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copy a slice into a fresh secret.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }

    /// An all-zero secret of the given length.
    ///
    /// Used as the commit-secret placeholder for transitions that carry no
    /// fresh entropy of their own.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: vec![0u8; len] }
    }

    /// Borrow the secret bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the secret holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the secret and return the raw bytes.
    ///
    /// The caller takes over the wiping obligation.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<[u8; 32]> for Secret {
    fn from(bytes: [u8; 32]) -> Self {
        Self { bytes: bytes.to_vec() }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({} bytes)", self.bytes.len())
    }
}
