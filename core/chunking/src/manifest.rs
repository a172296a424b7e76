//! Chunk manifest format.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spanstore_common::{ContentId, Error, Properties, Result};
use spanstore_storage::{Checksum, ChecksumAlgorithm, ContentProperties};

use crate::naming;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// One chunk of a chunked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Position in the logical stream, starting at zero.
    pub ordinal: u32,
    /// Id the chunk is stored under.
    pub chunk_id: ContentId,
    /// Size in bytes.
    pub size: u64,
    /// Checksum of the chunk bytes (hex).
    pub checksum: String,
}

/// Ordered descriptor of the chunks that make up one logical item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    pub version: u32,
    /// Logical content id.
    pub source_id: ContentId,
    /// Mimetype of the logical item.
    pub mimetype: String,
    /// Digest used for every checksum in the manifest.
    pub algorithm: ChecksumAlgorithm,
    /// Size of every chunk except possibly the last.
    pub max_chunk_size: u64,
    /// Size of the logical item.
    pub total_size: u64,
    /// Checksum of the logical item (hex).
    pub total_checksum: String,
    /// User properties of the logical item.
    #[serde(default)]
    pub properties: Properties,
    /// When the chunked write completed.
    pub created: DateTime<Utc>,
    /// Chunks in ordinal order.
    pub chunks: Vec<ChunkEntry>,
}

/// Number of chunks needed for `total` bytes with chunks of at most `max`.
pub fn chunk_count(total: u64, max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    total.div_ceil(max)
}

/// Size of chunk `ordinal` of a `total`-byte item.
pub fn chunk_size(total: u64, max: u64, ordinal: u64) -> u64 {
    let start = ordinal.saturating_mul(max);
    total.saturating_sub(start).min(max)
}

impl Manifest {
    /// Check the structural invariants.
    ///
    /// # Errors
    /// - `Integrity` describing the first violated invariant
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Integrity(format!("manifest of '{}': {}", self.source_id, msg)));

        if self.version != MANIFEST_VERSION {
            return fail(format!("unsupported version {}", self.version));
        }
        if self.max_chunk_size == 0 {
            return fail("max_chunk_size is zero".to_string());
        }
        let expected = chunk_count(self.total_size, self.max_chunk_size);
        if self.chunks.len() as u64 != expected {
            return fail(format!(
                "{} chunks listed, {} bytes at {} per chunk needs {}",
                self.chunks.len(),
                self.total_size,
                self.max_chunk_size,
                expected
            ));
        }
        if Checksum::from_hex(self.algorithm, &self.total_checksum).is_err() {
            return fail("unreadable total checksum".to_string());
        }

        let mut sum = 0u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.ordinal as usize != index {
                return fail(format!("chunk {} has ordinal {}", index, chunk.ordinal));
            }
            if chunk.chunk_id != naming::chunk_id(&self.source_id, chunk.ordinal)? {
                return fail(format!("chunk {} is named '{}'", index, chunk.chunk_id));
            }
            let size = chunk_size(self.total_size, self.max_chunk_size, index as u64);
            if chunk.size != size {
                return fail(format!(
                    "chunk {} is {} bytes, expected {}",
                    index, chunk.size, size
                ));
            }
            if Checksum::from_hex(self.algorithm, &chunk.checksum).is_err() {
                return fail(format!("chunk {} has an unreadable checksum", index));
            }
            sum += chunk.size;
        }
        if sum != self.total_size {
            return fail(format!("chunk sizes sum to {}, total is {}", sum, self.total_size));
        }
        Ok(())
    }

    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Upper bound on the serialized size of a manifest for a
    /// `total_size`-byte item cut into chunks of `max_chunk_size`.
    ///
    /// # Errors
    /// - `InvalidInput` if the chunk count does not fit a `u32` ordinal
    pub fn size_bound(
        source_id: &ContentId,
        mimetype: &str,
        properties: &Properties,
        algorithm: ChecksumAlgorithm,
        max_chunk_size: u64,
        total_size: u64,
    ) -> Result<u64> {
        // Timestamps serialize with a variable number of fractional digits.
        const TIMESTAMP_SLACK: u64 = 16;

        let placeholder = algorithm.compute(&[]).to_hex();
        let header = Manifest {
            version: MANIFEST_VERSION,
            source_id: source_id.clone(),
            mimetype: mimetype.to_string(),
            algorithm,
            max_chunk_size,
            total_size,
            total_checksum: placeholder.clone(),
            properties: properties.clone(),
            created: Utc::now(),
            chunks: Vec::new(),
        };
        let header_len = serde_json::to_vec(&header)?.len() as u64 + TIMESTAMP_SLACK;

        let count = chunk_count(total_size, max_chunk_size);
        let Some(last) = count.checked_sub(1) else {
            return Ok(header_len);
        };
        let last = u32::try_from(last).map_err(|_| {
            Error::InvalidInput(format!(
                "'{}' would need {} chunks of {} bytes",
                source_id, count, max_chunk_size
            ))
        })?;
        // The last ordinal has the widest id; every chunk is at most full size.
        let widest = ChunkEntry {
            ordinal: last,
            chunk_id: naming::chunk_id(source_id, last)?,
            size: max_chunk_size.min(total_size),
            checksum: placeholder,
        };
        let entry_len = serde_json::to_vec(&widest)?.len() as u64 + 1;
        Ok(header_len.saturating_add(count.saturating_mul(entry_len)))
    }

    /// Parse and validate a stored manifest.
    ///
    /// # Errors
    /// - `Integrity` if the document is malformed or violates an invariant
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| Error::Integrity(format!("unreadable manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Properties of the logical item, with `modified` taken from the
    /// stored manifest.
    pub fn content_properties(&self, modified: DateTime<Utc>) -> ContentProperties {
        ContentProperties {
            mimetype: self.mimetype.clone(),
            size: self.total_size,
            checksum: self.total_checksum.clone(),
            modified,
            properties: self.properties.clone(),
        }
    }

    /// The same manifest re-keyed to `target`, as written by a copy.
    pub fn renamed(&self, target: &ContentId) -> Result<Manifest> {
        let mut renamed = self.clone();
        renamed.source_id = target.clone();
        for chunk in &mut renamed.chunks {
            chunk.chunk_id = naming::chunk_id(target, chunk.ordinal)?;
        }
        renamed.created = Utc::now();
        Ok(renamed)
    }
}
