//! Message digests for checksum computation.
//!
//! A [`Digest`] is fed blocks in ascending offset order and finalized once.
//! MD5 is the algorithm named in stored checksum attributes; BLAKE3 is
//! offered for deployments that do not need interoperable attributes.

use hsmgate_core::{ChecksumAlgorithm, Result};
use md5::{Digest as _, Md5};

/// Incremental digest context
pub trait Digest: Send {
    /// Feed the next block
    ///
    /// # Errors
    ///
    /// Returns a `Digest` error if the context rejects the input.
    fn update(&mut self, data: &[u8]) -> Result<()>;

    /// Consume the context and return the raw digest bytes
    ///
    /// # Errors
    ///
    /// Returns a `Digest` error if the context cannot be finalized.
    fn finalize(self: Box<Self>) -> Result<Vec<u8>>;

    /// Algorithm name as stored in the `algorithm` attribute
    fn name(&self) -> &'static str;
}

/// MD5 digest
#[derive(Clone, Default)]
pub struct Md5Digest {
    hasher: Md5,
}

impl Md5Digest {
    /// Create an empty MD5 context
    #[must_use]
    pub fn new() -> Self {
        Self { hasher: Md5::new() }
    }
}

impl Digest for Md5Digest {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.hasher.update(data);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.hasher.finalize().to_vec())
    }

    fn name(&self) -> &'static str {
        ChecksumAlgorithm::Md5.name()
    }
}

/// BLAKE3 digest (256-bit output)
#[derive(Clone, Default)]
pub struct Blake3Digest {
    hasher: blake3::Hasher,
}

impl Blake3Digest {
    /// Create an empty BLAKE3 context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Digest for Blake3Digest {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.hasher.update(data);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.hasher.finalize().as_bytes().to_vec())
    }

    fn name(&self) -> &'static str {
        ChecksumAlgorithm::Blake3.name()
    }
}

/// Allocate a fresh context for `algorithm`
#[must_use]
pub fn new_digest(algorithm: ChecksumAlgorithm) -> Box<dyn Digest> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Digest::new()),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Digest::new()),
    }
}

/// Lowercase hexadecimal rendering of a digest
#[must_use]
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
