//! Splits one oversized stream into ordered chunks plus a manifest.
//!
//! The source is read forward only. At most one chunk is buffered at a time
//! so that a transient backend fault can re-send it; every upload goes
//! through a [`ChecksumStream`], and the checksum captured in flight must
//! match what the provider reports storing.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use spanstore_common::{ContentId, Error, Result, SpaceId};
use spanstore_storage::{
    frames, ByteStream, ChecksumAlgorithm, ChecksumStream, Checksummer, NewContent, RetryConfig,
    RetryExecutor, StorageProvider, DEFAULT_FRAME_SIZE,
};

use crate::manifest::{chunk_count, chunk_size, ChunkEntry, Manifest, MANIFEST_VERSION};
use crate::naming::{self, MANIFEST_MIMETYPE};

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Largest chunk, in bytes.
    pub max_chunk_size: u64,
    /// Retry policy for chunk and manifest uploads.
    pub retry: RetryConfig,
    /// Frame size used when streaming a buffered chunk.
    pub frame_size: usize,
}

impl ChunkerConfig {
    /// Configuration with default retry and frame size.
    pub fn new(max_chunk_size: u64) -> Self {
        Self {
            max_chunk_size,
            retry: RetryConfig::default(),
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the upload frame size.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }
}

/// Progress of one chunked write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    /// Nothing uploaded yet.
    Pending,
    /// Uploading chunk `ordinal` of `count`.
    Uploading { ordinal: u32, count: u32 },
    /// All chunks stored; writing the manifest.
    WritingManifest,
    /// Manifest stored.
    Complete,
    /// Stopped. Chunks up to `last_committed` remain stored.
    Failed { last_committed: Option<u32> },
}

/// Result of a completed chunked write.
#[derive(Debug, Clone)]
pub struct ChunkReport {
    /// Id the manifest was stored under.
    pub manifest_id: ContentId,
    /// The stored manifest.
    pub manifest: Manifest,
}

/// One chunked write.
///
/// Consumed by [`Chunker::chunk`]; build a new one per item.
pub struct Chunker {
    provider: Arc<dyn StorageProvider>,
    config: ChunkerConfig,
    retry: RetryExecutor,
    progress: Option<watch::Sender<ChunkState>>,
    cancel: CancellationToken,
}

impl Chunker {
    /// Create a chunker writing to `provider`.
    ///
    /// # Errors
    /// - `InvalidInput` if the chunk size is zero or exceeds the provider's
    ///   object limit
    pub fn new(provider: Arc<dyn StorageProvider>, config: ChunkerConfig) -> Result<Self> {
        if config.max_chunk_size == 0 {
            return Err(Error::InvalidInput(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.max_chunk_size > provider.max_object_size() {
            return Err(Error::InvalidInput(format!(
                "chunk size {} exceeds the {} byte object limit of '{}'",
                config.max_chunk_size,
                provider.max_object_size(),
                provider.name()
            )));
        }
        let retry = RetryExecutor::new(config.retry.clone());
        Ok(Self {
            provider,
            config,
            retry,
            progress: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Publish progress on `sender`.
    pub fn with_progress(mut self, sender: watch::Sender<ChunkState>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Stop when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn publish(&self, state: ChunkState) {
        if let Some(progress) = &self.progress {
            progress.send_replace(state);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled("chunked write cancelled".to_string()));
        }
        Ok(())
    }

    /// Check that the manifest for `new` will fit one object of the provider.
    ///
    /// # Errors
    /// - `InvalidInput` if the item needs more chunks than a manifest can
    ///   list within the provider's object limit
    pub fn check_manifest_fits(&self, id: &ContentId, new: &NewContent) -> Result<()> {
        let bound = Manifest::size_bound(
            id,
            &new.mimetype,
            &new.properties,
            self.provider.checksum_algorithm(),
            self.config.max_chunk_size,
            new.size,
        )?;
        let limit = self.provider.max_object_size();
        if bound > limit {
            return Err(Error::InvalidInput(format!(
                "manifest for {} chunks of '{}' could reach {} bytes, over the {} byte object limit of '{}'",
                chunk_count(new.size, self.config.max_chunk_size),
                id,
                bound,
                limit,
                self.provider.name()
            )));
        }
        Ok(())
    }

    /// Split `source` into chunks of `id` and store them, then the manifest.
    ///
    /// # Preconditions
    /// - `source` delivers exactly `new.size` bytes
    ///
    /// # Postconditions
    /// - On success the manifest is stored and lists every chunk
    /// - On failure the manifest is absent; chunks already stored are kept
    ///
    /// # Errors
    /// - `InvalidInput`, before anything is read or stored, if the manifest
    ///   would not fit (see [`Chunker::check_manifest_fits`])
    /// - `Partial { operation: "chunk", last_completed, .. }` wrapping the
    ///   cause, where `last_completed` is the last stored chunk
    pub async fn chunk(
        self,
        space: &SpaceId,
        id: &ContentId,
        source: ByteStream,
        new: NewContent,
    ) -> Result<ChunkReport> {
        self.check_manifest_fits(id, &new)?;
        self.publish(ChunkState::Pending);
        let mut last_committed = None;

        match self.run(space, id, source, new, &mut last_committed).await {
            Ok(report) => {
                self.publish(ChunkState::Complete);
                info!(
                    space = %space,
                    content = %id,
                    chunks = report.manifest.chunks.len(),
                    size = report.manifest.total_size,
                    "Chunked write complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.publish(ChunkState::Failed { last_committed });
                warn!(space = %space, content = %id, last_committed = ?last_committed, error = %e, "Chunked write failed");
                Err(Error::partial("chunk", last_committed, e))
            }
        }
    }

    async fn run(
        &self,
        space: &SpaceId,
        id: &ContentId,
        mut source: ByteStream,
        new: NewContent,
        last_committed: &mut Option<u32>,
    ) -> Result<ChunkReport> {
        let max = self.config.max_chunk_size;
        let count = u32::try_from(chunk_count(new.size, max)).map_err(|_| {
            Error::InvalidInput(format!(
                "{} bytes at {} bytes per chunk needs too many chunks",
                new.size, max
            ))
        })?;
        let algorithm = self.provider.checksum_algorithm();
        let mut total = algorithm.checksummer();
        let mut carry = Bytes::new();
        let mut chunks = Vec::new();

        for ordinal in 0..count {
            self.check_cancelled()?;
            let want = chunk_size(new.size, max, ordinal as u64);
            let data = fill(&mut source, &mut carry, want, new.size).await?;
            total.update(&data);

            self.publish(ChunkState::Uploading { ordinal, count });
            chunks.push(self.upload_chunk(space, id, ordinal, data, algorithm).await?);
            *last_committed = Some(ordinal);
        }

        ensure_exhausted(&mut source, &carry, new.size).await?;
        let total_checksum = finish_total(total, &new)?;

        self.check_cancelled()?;
        self.publish(ChunkState::WritingManifest);
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            source_id: id.clone(),
            mimetype: new.mimetype,
            algorithm,
            max_chunk_size: max,
            total_size: new.size,
            total_checksum,
            properties: new.properties,
            created: Utc::now(),
            chunks,
        };
        let manifest_id =
            write_manifest(self.provider.as_ref(), &self.retry, space, &manifest, self.config.frame_size)
                .await?;

        Ok(ChunkReport {
            manifest_id,
            manifest,
        })
    }

    async fn upload_chunk(
        &self,
        space: &SpaceId,
        parent: &ContentId,
        ordinal: u32,
        data: Bytes,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ChunkEntry> {
        let chunk_id = naming::chunk_id(parent, ordinal)?;
        let size = data.len() as u64;
        let provider = &self.provider;
        let cancel = &self.cancel;
        let frame_size = self.config.frame_size;
        let target = &chunk_id;

        // Re-sending the buffered chunk under the same name overwrites any
        // partial attempt, so transient faults can be retried.
        let checksum = self
            .retry
            .execute(move || {
                let data = data.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled("chunked write cancelled".to_string()));
                    }
                    let stream = ChecksumStream::computing(frames(data, frame_size), algorithm)
                        .with_expected_size(size)
                        .with_context(target.to_string());
                    let handle = stream.handle();
                    let stored = provider
                        .add_content(space, target, stream.boxed(), NewContent::new(size))
                        .await?;

                    let sent = handle.hex().ok_or_else(|| {
                        Error::Integrity(format!("{}: upload ended before end of stream", target))
                    })?;
                    if stored != sent {
                        return Err(Error::ChecksumMismatch {
                            context: target.to_string(),
                            expected: sent,
                            actual: stored,
                        });
                    }
                    Ok(sent)
                }
            })
            .await?;

        debug!(space = %space, chunk = %chunk_id, size, "Chunk stored");
        Ok(ChunkEntry {
            ordinal,
            chunk_id,
            size,
            checksum,
        })
    }
}

/// Read exactly `want` bytes from `source`, keeping any excess in `carry`.
async fn fill(source: &mut ByteStream, carry: &mut Bytes, want: u64, declared: u64) -> Result<Bytes> {
    let want = usize::try_from(want)
        .map_err(|_| Error::InvalidInput(format!("chunk of {} bytes cannot be buffered", want)))?;
    let mut buffer = BytesMut::with_capacity(want);

    while buffer.len() < want {
        if carry.is_empty() {
            match source.next().await {
                Some(frame) => *carry = frame?,
                None => {
                    return Err(Error::Integrity(format!(
                        "source ended before the declared {} bytes",
                        declared
                    )))
                }
            }
            continue;
        }
        let take = (want - buffer.len()).min(carry.len());
        buffer.extend_from_slice(&carry.split_to(take));
    }
    Ok(buffer.freeze())
}

async fn ensure_exhausted(source: &mut ByteStream, carry: &Bytes, declared: u64) -> Result<()> {
    let mut extra = !carry.is_empty();
    while !extra {
        match source.next().await {
            Some(frame) => extra = !frame?.is_empty(),
            None => break,
        }
    }
    if extra {
        return Err(Error::Integrity(format!(
            "source is longer than the declared {} bytes",
            declared
        )));
    }
    Ok(())
}

fn finish_total(total: Checksummer, new: &NewContent) -> Result<String> {
    let computed = total.finalize().to_hex();
    if let Some(expected) = &new.checksum {
        let expected = expected.to_ascii_lowercase();
        if expected != computed {
            return Err(Error::ChecksumMismatch {
                context: "chunked content".to_string(),
                expected,
                actual: computed,
            });
        }
    }
    Ok(computed)
}

/// Store `manifest` next to its chunks, returning the manifest id.
pub(crate) async fn write_manifest(
    provider: &dyn StorageProvider,
    retry: &RetryExecutor,
    space: &SpaceId,
    manifest: &Manifest,
    frame_size: usize,
) -> Result<ContentId> {
    let manifest_id = naming::manifest_id(&manifest.source_id)?;
    let body = manifest.to_bytes()?;
    let checksum = provider.checksum_algorithm().compute(&body).to_hex();
    let target = &manifest_id;
    let checksum = &checksum;

    retry
        .execute(move || {
            let body = body.clone();
            async move {
                let new = NewContent::new(body.len() as u64)
                    .with_mimetype(MANIFEST_MIMETYPE)
                    .with_checksum(checksum.clone());
                provider
                    .add_content(space, target, frames(body, frame_size), new)
                    .await
            }
        })
        .await?;

    debug!(space = %space, manifest = %manifest_id, chunks = manifest.chunks.len(), "Manifest stored");
    Ok(manifest_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stitcher::Stitcher;
    use crate::test_support::{
        fast_retry, memory_provider, pattern, space, FlakyProvider, OBJECT_LIMIT,
    };
    use spanstore_storage::read_to_bytes;

    fn id(s: &str) -> ContentId {
        ContentId::new(s).unwrap()
    }

    async fn stored_ids(provider: &dyn StorageProvider) -> Vec<String> {
        provider
            .list_content(&space(), None)
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn test_twenty_five_megabytes_in_ten_megabyte_chunks() {
        let provider = memory_provider(10_000_000).await;
        let data = pattern(25_000_000);

        let chunker = Chunker::new(provider.clone(), ChunkerConfig::new(10_000_000)).unwrap();
        let report = chunker
            .chunk(
                &space(),
                &id("movie.mp4"),
                frames(data.clone(), 1 << 20),
                NewContent::new(25_000_000).with_mimetype("video/mp4"),
            )
            .await
            .unwrap();

        let manifest = &report.manifest;
        let sizes: Vec<u64> = manifest.chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![10_000_000, 10_000_000, 5_000_000]);
        assert_eq!(manifest.total_size, 25_000_000);
        assert_eq!(
            manifest.total_checksum,
            ChecksumAlgorithm::Sha256.compute(&data).to_hex()
        );
        assert_eq!(report.manifest_id.as_str(), "movie.mp4.span-manifest");

        for entry in &manifest.chunks {
            let content = provider.get_content(&space(), &entry.chunk_id).await.unwrap();
            assert_eq!(content.properties.checksum, entry.checksum);
            assert_eq!(content.properties.size, entry.size);
        }
        let stored = provider
            .get_content(&space(), &report.manifest_id)
            .await
            .unwrap();
        assert_eq!(stored.properties.mimetype, MANIFEST_MIMETYPE);
        let parsed = Manifest::from_bytes(&read_to_bytes(stored.stream).await.unwrap()).unwrap();
        assert_eq!(&parsed, manifest);

        let stitched = Stitcher::new(provider)
            .with_total_verification(true)
            .stitch(space(), parsed)
            .unwrap();
        let stitched = read_to_bytes(stitched).await.unwrap();
        assert!(stitched == data);
        assert_eq!(
            ChecksumAlgorithm::Sha256.compute(&stitched).to_hex(),
            manifest.total_checksum
        );
    }

    async fn chunk_and_stitch(len: usize, max: u64) -> (Manifest, Bytes, Bytes) {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let data = pattern(len);
        let report = Chunker::new(provider.clone(), ChunkerConfig::new(max))
            .unwrap()
            .chunk(&space(), &id("clip"), frames(data.clone(), 4), NewContent::new(len as u64))
            .await
            .unwrap();
        let stitched = Stitcher::new(provider)
            .with_total_verification(true)
            .stitch(space(), report.manifest.clone())
            .unwrap();
        let stitched = read_to_bytes(stitched).await.unwrap();
        (report.manifest, data, stitched)
    }

    #[tokio::test]
    async fn test_empty_item_round_trips() {
        let (manifest, data, stitched) = chunk_and_stitch(0, 10).await;
        assert!(manifest.chunks.is_empty());
        assert!(stitched.is_empty());
        assert_eq!(
            manifest.total_checksum,
            ChecksumAlgorithm::Sha256.compute(&data).to_hex()
        );
    }

    #[tokio::test]
    async fn test_single_full_chunk_round_trips() {
        let (manifest, data, stitched) = chunk_and_stitch(10, 10).await;
        assert_eq!(manifest.chunks.len(), 1);
        assert_eq!(manifest.chunks[0].size, 10);
        assert_eq!(stitched, data);
        assert_eq!(
            ChecksumAlgorithm::Sha256.compute(&stitched).to_hex(),
            manifest.total_checksum
        );
    }

    #[tokio::test]
    async fn test_manifest_over_object_limit_fails_before_upload() {
        let provider = memory_provider(4096).await;
        let (tx, rx) = watch::channel(ChunkState::Complete);

        let err = Chunker::new(provider.clone(), ChunkerConfig::new(4096))
            .unwrap()
            .with_progress(tx)
            .chunk(&space(), &id("clip"), frames(pattern(163_840), 4096), NewContent::new(163_840))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.last_completed(), None);
        assert!(stored_ids(provider.as_ref()).await.is_empty());
        // Nothing started.
        assert_eq!(*rx.borrow(), ChunkState::Complete);
    }

    #[tokio::test]
    async fn test_manifest_just_under_object_limit_is_written() {
        let provider = memory_provider(4096).await;
        let data = pattern(20 * 4096);
        let report = Chunker::new(provider.clone(), ChunkerConfig::new(4096))
            .unwrap()
            .chunk(&space(), &id("clip"), frames(data.clone(), 4096), NewContent::new(20 * 4096))
            .await
            .unwrap();
        assert_eq!(report.manifest.chunks.len(), 20);
        assert!(report.manifest.to_bytes().unwrap().len() <= 4096);
    }

    #[tokio::test]
    async fn test_huge_chunk_count_rejected_without_reading() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let empty: ByteStream = Box::pin(futures::stream::empty::<Result<Bytes>>());

        let err = Chunker::new(provider.clone(), ChunkerConfig::new(1))
            .unwrap()
            .chunk(&space(), &id("huge"), empty, NewContent::new(4_000_000_000))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(stored_ids(provider.as_ref()).await.is_empty());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let report = Chunker::new(provider, ChunkerConfig::new(10))
            .unwrap()
            .chunk(&space(), &id("even"), frames(pattern(30), 7), NewContent::new(30))
            .await
            .unwrap();
        assert_eq!(report.manifest.chunks.len(), 3);
        assert!(report.manifest.chunks.iter().all(|c| c.size == 10));
    }

    #[tokio::test]
    async fn test_short_source_is_integrity_failure() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let err = Chunker::new(provider.clone(), ChunkerConfig::new(10))
            .unwrap()
            .chunk(&space(), &id("short"), frames(pattern(15), 4), NewContent::new(25))
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Integrity(_)));
        assert_eq!(err.last_completed(), Some(0));
        assert!(!provider
            .content_exists(&space(), &id("short.span-manifest"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_long_source_is_integrity_failure() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let err = Chunker::new(provider.clone(), ChunkerConfig::new(10))
            .unwrap()
            .chunk(&space(), &id("long"), frames(pattern(21), 4), NewContent::new(20))
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Integrity(_)));
        assert_eq!(err.last_completed(), Some(1));
        assert_eq!(
            stored_ids(provider.as_ref()).await,
            vec!["long.span-chunk-0000", "long.span-chunk-0001"]
        );
    }

    #[tokio::test]
    async fn test_transient_faults_are_retried() {
        let inner = memory_provider(OBJECT_LIMIT).await;
        let flaky = Arc::new(FlakyProvider::new(inner).with_transient_adds(2));

        let report = Chunker::new(flaky.clone(), ChunkerConfig::new(10).with_retry(fast_retry(3)))
            .unwrap()
            .chunk(&space(), &id("clip"), frames(pattern(25), 8), NewContent::new(25))
            .await
            .unwrap();

        assert_eq!(report.manifest.chunks.len(), 3);
        // Two failed attempts, three chunks, one manifest.
        assert_eq!(flaky.add_calls(), 6);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_not_retried() {
        let inner = memory_provider(OBJECT_LIMIT).await;
        let flaky = Arc::new(FlakyProvider::new(inner).with_wrong_checksums());

        let err = Chunker::new(flaky.clone(), ChunkerConfig::new(10).with_retry(fast_retry(3)))
            .unwrap()
            .chunk(&space(), &id("clip"), frames(pattern(25), 8), NewContent::new(25))
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::ChecksumMismatch { .. }));
        assert_eq!(err.last_completed(), None);
        assert_eq!(flaky.add_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_last_committed_ordinal() {
        let inner = memory_provider(OBJECT_LIMIT).await;
        let flaky = Arc::new(FlakyProvider::new(inner.clone()).with_failing_chunk(2));
        let (tx, rx) = watch::channel(ChunkState::Pending);

        let err = Chunker::new(flaky, ChunkerConfig::new(10).with_retry(fast_retry(2)))
            .unwrap()
            .with_progress(tx)
            .chunk(&space(), &id("clip"), frames(pattern(45), 10), NewContent::new(45))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Partial {
                operation: "chunk",
                last_completed: Some(1),
                ..
            }
        ));
        assert_eq!(
            *rx.borrow(),
            ChunkState::Failed {
                last_committed: Some(1)
            }
        );
        // No rollback: committed chunks stay, the manifest never appears.
        assert_eq!(
            stored_ids(inner.as_ref()).await,
            vec!["clip.span-chunk-0000", "clip.span-chunk-0001"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_leaves_no_manifest() {
        let inner = memory_provider(OBJECT_LIMIT).await;
        let token = CancellationToken::new();
        let flaky = Arc::new(FlakyProvider::new(inner.clone()).with_cancel_after_adds(1, token.clone()));

        let err = Chunker::new(flaky, ChunkerConfig::new(10))
            .unwrap()
            .with_cancellation(token)
            .chunk(&space(), &id("clip"), frames(pattern(35), 10), NewContent::new(35))
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Cancelled(_)));
        assert_eq!(err.last_completed(), Some(0));
        assert_eq!(stored_ids(inner.as_ref()).await, vec!["clip.span-chunk-0000"]);
    }

    #[tokio::test]
    async fn test_progress_reaches_complete() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let (tx, mut rx) = watch::channel(ChunkState::Pending);

        let chunker = Chunker::new(provider, ChunkerConfig::new(10))
            .unwrap()
            .with_progress(tx);
        chunker
            .chunk(&space(), &id("clip"), frames(pattern(25), 10), NewContent::new(25))
            .await
            .unwrap();

        assert_eq!(*rx.borrow_and_update(), ChunkState::Complete);
    }

    #[tokio::test]
    async fn test_caller_checksum_is_authoritative() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let wrong = ChecksumAlgorithm::Sha256.compute(b"something else").to_hex();

        let err = Chunker::new(provider.clone(), ChunkerConfig::new(10))
            .unwrap()
            .chunk(
                &space(),
                &id("clip"),
                frames(pattern(25), 10),
                NewContent::new(25).with_checksum(wrong),
            )
            .await
            .unwrap_err();

        assert!(err.is_integrity());
        assert!(!provider
            .content_exists(&space(), &id("clip.span-manifest"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_chunk_size_above_object_limit_rejected() {
        let provider = memory_provider(10).await;
        assert!(Chunker::new(provider.clone(), ChunkerConfig::new(11)).is_err());
        assert!(Chunker::new(provider, ChunkerConfig::new(0)).is_err());
    }

    #[tokio::test]
    async fn test_independent_items_chunk_concurrently() {
        let provider = memory_provider(OBJECT_LIMIT).await;
        let space = space();
        let (a_id, b_id) = (id("a"), id("b"));
        let a = Chunker::new(provider.clone(), ChunkerConfig::new(10))
            .unwrap()
            .chunk(&space, &a_id, frames(pattern(33), 5), NewContent::new(33));
        let b = Chunker::new(provider.clone(), ChunkerConfig::new(10))
            .unwrap()
            .chunk(&space, &b_id, frames(pattern(47), 6), NewContent::new(47));

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().manifest.chunks.len(), 4);
        assert_eq!(b.unwrap().manifest.chunks.len(), 5);
    }
}
