//! Incremental checksums and the checksum-verifying byte stream.
//!
//! The same [`ChecksumStream`] wrapper is used on the write path (hash what
//! is sent) and on the read path (verify what is received).
//!
//! # Finalization policy
//! A digest exists only after the wrapped stream has reported end-of-stream.
//! The hasher is finalized exactly once at that point and the result is
//! published through [`ChecksumHandle`]. Querying the handle earlier returns
//! `None`; it never blocks and never recomputes.

use blake2::Blake2b512;
use futures::Stream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use spanstore_common::{Error, Result};

use crate::provider::ByteStream;

/// Digest algorithm used for stored checksums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    /// SHA-256, 32-byte digest.
    #[default]
    Sha256,
    /// BLAKE2b-512, 64-byte digest.
    Blake2b,
}

impl ChecksumAlgorithm {
    /// Canonical algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake2b => "blake2b",
        }
    }

    /// Length of the raw digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 32,
            ChecksumAlgorithm::Blake2b => 64,
        }
    }

    /// Start an incremental hasher.
    pub fn checksummer(self) -> Checksummer {
        Checksummer::new(self)
    }

    /// Hash a complete buffer in one call.
    pub fn compute(self, data: &[u8]) -> Checksum {
        let mut hasher = self.checksummer();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A finalized digest.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    bytes: Vec<u8>,
}

impl Checksum {
    /// Parse a hex digest produced by `algorithm`.
    ///
    /// # Errors
    /// - `InvalidInput` if the string is not hex or has the wrong length
    pub fn from_hex(algorithm: ChecksumAlgorithm, hex: &str) -> Result<Self> {
        let expected_len = algorithm.digest_len() * 2;
        if hex.len() != expected_len {
            return Err(Error::InvalidInput(format!(
                "{} checksum must be {} hex chars, got {}",
                algorithm,
                expected_len,
                hex.len()
            )));
        }
        let mut bytes = Vec::with_capacity(algorithm.digest_len());
        for pair in hex.as_bytes().chunks(2) {
            let digits = std::str::from_utf8(pair)
                .map_err(|e| Error::InvalidInput(format!("Invalid checksum: {}", e)))?;
            let byte = u8::from_str_radix(digits, 16)
                .map_err(|e| Error::InvalidInput(format!("Invalid checksum '{}': {}", hex, e)))?;
            bytes.push(byte);
        }
        Ok(Self { algorithm, bytes })
    }

    /// Algorithm that produced this digest.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Checksum({}:{})", self.algorithm, &hex[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

enum HasherState {
    Sha256(Sha256),
    Blake2b(Box<Blake2b512>),
}

/// Incremental hash accumulator.
///
/// Advanced with [`Checksummer::update`] on every frame and consumed by
/// [`Checksummer::finalize`].
pub struct Checksummer {
    state: HasherState,
    bytes_hashed: u64,
}

impl Checksummer {
    /// Create a hasher for `algorithm`.
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let state = match algorithm {
            ChecksumAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake2b => HasherState::Blake2b(Box::new(Blake2b512::new())),
        };
        Self {
            state,
            bytes_hashed: 0,
        }
    }

    /// Feed bytes into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Blake2b(h) => h.update(data),
        }
        self.bytes_hashed += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Finish hashing.
    pub fn finalize(self) -> Checksum {
        match self.state {
            HasherState::Sha256(h) => Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                bytes: h.finalize().to_vec(),
            },
            HasherState::Blake2b(h) => Checksum {
                algorithm: ChecksumAlgorithm::Blake2b,
                bytes: (*h).finalize().to_vec(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct HandleState {
    digest: OnceLock<Checksum>,
    bytes_read: AtomicU64,
}

/// Shared view of a [`ChecksumStream`]'s progress and final digest.
///
/// Cloneable so the caller can keep it after handing the stream to a
/// consumer such as a backend upload.
#[derive(Debug, Clone, Default)]
pub struct ChecksumHandle {
    state: Arc<HandleState>,
}

impl ChecksumHandle {
    /// The digest, or `None` until the stream has reached end-of-stream.
    pub fn checksum(&self) -> Option<Checksum> {
        self.state.digest.get().cloned()
    }

    /// Hex digest, or `None` until end-of-stream.
    pub fn hex(&self) -> Option<String> {
        self.state.digest.get().map(Checksum::to_hex)
    }

    /// Whether the digest has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.state.digest.get().is_some()
    }

    /// Bytes that have passed through the stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.state.bytes_read.load(Ordering::Acquire)
    }

    fn record(&self, len: usize) -> u64 {
        self.state
            .bytes_read
            .fetch_add(len as u64, Ordering::AcqRel)
            + len as u64
    }

    fn publish(&self, checksum: Checksum) {
        let _ = self.state.digest.set(checksum);
    }
}

/// Byte stream wrapper that hashes every frame as it passes through.
///
/// When constructed with [`ChecksumStream::verifying`], the supplied digest
/// is authoritative: if the computed digest differs, the stream yields
/// `Error::ChecksumMismatch` as its final item instead of ending cleanly.
pub struct ChecksumStream {
    inner: ByteStream,
    hasher: Option<Checksummer>,
    expected: Option<Checksum>,
    expected_size: Option<u64>,
    context: String,
    handle: ChecksumHandle,
    finished: bool,
}

impl ChecksumStream {
    /// Compute a digest over exactly the bytes consumed.
    pub fn computing(inner: ByteStream, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            hasher: Some(algorithm.checksummer()),
            expected: None,
            expected_size: None,
            context: "stream".to_string(),
            handle: ChecksumHandle::default(),
            finished: false,
        }
    }

    /// Compute a digest and compare it against `expected` at end-of-stream.
    pub fn verifying(inner: ByteStream, expected: Checksum) -> Self {
        let mut stream = Self::computing(inner, expected.algorithm());
        stream.expected = Some(expected);
        stream
    }

    /// Also require exactly `size` bytes.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Label used in error messages.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Handle for reading the digest after the stream is consumed.
    pub fn handle(&self) -> ChecksumHandle {
        self.handle.clone()
    }

    /// Box the wrapper as a plain [`ByteStream`].
    pub fn boxed(self) -> ByteStream {
        Box::pin(self)
    }

    fn finalize(&mut self) -> Result<()> {
        let Some(hasher) = self.hasher.take() else {
            return Ok(());
        };
        let checksum = hasher.finalize();
        self.handle.publish(checksum.clone());

        let read = self.handle.bytes_read();
        if let Some(size) = self.expected_size {
            if read != size {
                return Err(Error::Integrity(format!(
                    "{}: expected {} bytes, received {}",
                    self.context, size, read
                )));
            }
        }

        if let Some(expected) = &self.expected {
            if expected != &checksum {
                return Err(Error::ChecksumMismatch {
                    context: self.context.clone(),
                    expected: expected.to_hex(),
                    actual: checksum.to_hex(),
                });
            }
        }
        Ok(())
    }
}

impl Stream for ChecksumStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frame))) => {
                let total = this.handle.record(frame.len());
                if let Some(size) = this.expected_size {
                    if total > size {
                        this.finished = true;
                        return Poll::Ready(Some(Err(Error::Integrity(format!(
                            "{}: received more than the expected {} bytes",
                            this.context, size
                        )))));
                    }
                }
                if let Some(hasher) = this.hasher.as_mut() {
                    hasher.update(&frame);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(this.finalize().err().map(Err))
            }
        }
    }
}
