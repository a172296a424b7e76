//! Logical content API that chunks and stitches transparently.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use spanstore_common::{ContentId, Error, Result, SpaceId};
use spanstore_storage::{
    read_to_bytes, ByteStream, Checksum, ChecksumStream, Content, ContentProperties, NewContent,
    RetryConfig, RetryExecutor, StorageProvider, DEFAULT_FRAME_SIZE,
};

use crate::chunker::{write_manifest, ChunkState, Chunker, ChunkerConfig};
use crate::manifest::Manifest;
use crate::naming;
use crate::stitcher::Stitcher;

/// Default chunk size: 1 GiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Configuration for a [`ChunkedStore`].
#[derive(Debug, Clone)]
pub struct ChunkedStoreConfig {
    /// Preferred chunk size; capped at the provider's object limit.
    pub chunk_size: u64,
    /// Retry policy for chunk transfers.
    pub retry: RetryConfig,
    /// Check the aggregate checksum when stitching.
    pub verify_total: bool,
}

impl Default for ChunkedStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            verify_total: true,
        }
    }
}

/// Progress and cancellation hooks for one write.
#[derive(Debug, Default)]
pub struct WriteOptions {
    /// Receives chunking progress; untouched for direct writes.
    pub progress: Option<watch::Sender<ChunkState>>,
    /// Stops the write before the next backend call.
    pub cancel: CancellationToken,
}

/// Content store over one provider that hides chunking from callers.
///
/// Items larger than [`ChunkedStore::effective_chunk_size`] are stored as
/// chunks plus a manifest; everything else is stored as-is. Callers only
/// ever see logical ids.
#[derive(Clone)]
pub struct ChunkedStore {
    provider: Arc<dyn StorageProvider>,
    config: ChunkedStoreConfig,
    retry: RetryExecutor,
}

impl ChunkedStore {
    /// Create a store over `provider`.
    ///
    /// # Errors
    /// - `InvalidInput` if the chunk size is zero
    pub fn new(provider: Arc<dyn StorageProvider>, config: ChunkedStoreConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidInput(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        let retry = RetryExecutor::new(config.retry.clone());
        Ok(Self {
            provider,
            config,
            retry,
        })
    }

    /// Underlying provider.
    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    /// Largest item stored without chunking, and the chunk size used above it.
    pub fn effective_chunk_size(&self) -> u64 {
        self.config.chunk_size.min(self.provider.max_object_size())
    }

    /// Store a logical item, chunking it if needed.
    ///
    /// Returns the checksum of the logical content.
    pub async fn add_content(
        &self,
        space: &SpaceId,
        id: &ContentId,
        content: ByteStream,
        new: NewContent,
    ) -> Result<String> {
        self.add_content_with(space, id, content, new, WriteOptions::default())
            .await
    }

    /// [`ChunkedStore::add_content`] with progress and cancellation.
    ///
    /// Any previous representation of `id` is replaced. A direct write
    /// leaves the old item untouched until it succeeds. A chunked write
    /// keeps an old plain item until it succeeds, but an old chunked item
    /// shares its chunk names: its manifest is removed before the upload
    /// and, if the upload fails, its remaining chunks are removed too.
    ///
    /// # Errors
    /// - `InvalidInput` for ids reserved by the chunk naming scheme, or an
    ///   item whose manifest would not fit one object
    /// - `Partial { operation: "chunk", .. }` for a failed chunked write
    /// - Errors from the provider for direct writes
    pub async fn add_content_with(
        &self,
        space: &SpaceId,
        id: &ContentId,
        content: ByteStream,
        new: NewContent,
        options: WriteOptions,
    ) -> Result<String> {
        reject_reserved(id)?;
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled("write cancelled".to_string()));
        }

        let limit = self.effective_chunk_size();
        let manifest_id = naming::manifest_id(id)?;

        if new.size <= limit {
            let checksum = self.provider.add_content(space, id, content, new).await?;
            self.delete_if_present(space, &manifest_id).await?;
            self.remove_chunks(space, id, 0).await?;
            return Ok(checksum);
        }

        debug!(space = %space, content = %id, size = new.size, chunk_size = limit, "Chunking oversized item");
        let mut chunker = Chunker::new(
            self.provider.clone(),
            ChunkerConfig::new(limit).with_retry(self.config.retry.clone()),
        )?
        .with_cancellation(options.cancel);
        if let Some(progress) = options.progress {
            chunker = chunker.with_progress(progress);
        }
        chunker.check_manifest_fits(id, &new)?;

        let replaced = self.delete_if_present(space, &manifest_id).await?;
        let report = match chunker.chunk(space, id, content, new).await {
            Ok(report) => report,
            Err(e) => {
                if replaced {
                    self.discard_replaced_chunks(space, id, &e).await;
                }
                return Err(e);
            }
        };

        self.delete_if_present(space, id).await?;
        self.remove_chunks(space, id, report.manifest.chunks.len() as u32)
            .await?;
        Ok(report.manifest.total_checksum)
    }

    /// Open a logical item for reading.
    ///
    /// Chunked items are stitched lazily; plain items are re-verified
    /// against their stored checksum as they are read.
    pub async fn get_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content> {
        if let Some((manifest, properties)) = self.load_manifest(space, id).await? {
            let stream = Stitcher::new(self.provider.clone())
                .with_retry(self.config.retry.clone())
                .with_total_verification(self.config.verify_total)
                .stitch(space.clone(), manifest)?;
            return Ok(Content { stream, properties });
        }

        let content = self.provider.get_content(space, id).await?;
        let expected = Checksum::from_hex(
            self.provider.checksum_algorithm(),
            &content.properties.checksum,
        )?;
        let stream = ChecksumStream::verifying(content.stream, expected)
            .with_expected_size(content.properties.size)
            .with_context(format!("{}/{}", space, id))
            .boxed();
        Ok(Content {
            stream,
            properties: content.properties,
        })
    }

    /// Properties of a logical item.
    pub async fn get_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
    ) -> Result<ContentProperties> {
        match self.load_manifest(space, id).await? {
            Some((_, properties)) => Ok(properties),
            None => self.provider.get_content_properties(space, id).await,
        }
    }

    /// Whether a logical item exists.
    pub async fn content_exists(&self, space: &SpaceId, id: &ContentId) -> Result<bool> {
        Ok(self.is_chunked(space, id).await? || self.provider.content_exists(space, id).await?)
    }

    /// Whether `id` is stored as chunks.
    pub async fn is_chunked(&self, space: &SpaceId, id: &ContentId) -> Result<bool> {
        self.provider
            .content_exists(space, &naming::manifest_id(id)?)
            .await
    }

    /// Load the manifest of `id`, if it is chunked.
    pub async fn manifest(&self, space: &SpaceId, id: &ContentId) -> Result<Option<Manifest>> {
        Ok(self.load_manifest(space, id).await?.map(|(manifest, _)| manifest))
    }

    /// Delete a logical item.
    ///
    /// For a chunked item the manifest goes first, so the item disappears
    /// at once; its chunks are removed afterwards.
    pub async fn delete_content(&self, space: &SpaceId, id: &ContentId) -> Result<()> {
        if self.is_chunked(space, id).await? {
            self.provider
                .delete_content(space, &naming::manifest_id(id)?)
                .await?;
            let removed = self.remove_chunks(space, id, 0).await?;
            info!(space = %space, content = %id, chunks = removed, "Chunked content deleted");
            return Ok(());
        }
        self.provider.delete_content(space, id).await
    }

    /// List logical ids, hiding chunks and manifests.
    pub async fn list_content(&self, space: &SpaceId, prefix: Option<&str>) -> Result<Vec<ContentId>> {
        let mut ids = BTreeSet::new();
        for id in self.provider.list_content(space, prefix).await? {
            if let Some(parent) = naming::parse_manifest_id(id.as_str()) {
                ids.insert(ContentId::new(parent)?);
            } else if naming::parse_chunk_id(id.as_str()).is_none() {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Remove chunks of `id` that no manifest references.
    ///
    /// Cleans up after a failed or cancelled chunked write. Returns the
    /// number of chunks removed.
    pub async fn cleanup_chunks(&self, space: &SpaceId, id: &ContentId) -> Result<usize> {
        let keep = match self.load_manifest(space, id).await? {
            Some((manifest, _)) => manifest.chunks.len() as u32,
            None => 0,
        };
        self.remove_chunks(space, id, keep).await
    }

    /// Copy a logical item, re-keying chunks and manifest for the target.
    ///
    /// The source is resolved before the target is touched. A plain copy
    /// replaces the target only once it succeeds; a chunked copy replaces
    /// an old chunked target the way a chunked write does.
    ///
    /// Returns the checksum of the logical content.
    pub async fn copy_content(
        &self,
        src_space: &SpaceId,
        src_id: &ContentId,
        dst_space: &SpaceId,
        dst_id: &ContentId,
    ) -> Result<String> {
        reject_reserved(dst_id)?;
        if src_space == dst_space && src_id == dst_id {
            return Err(Error::InvalidInput(format!(
                "Cannot copy '{}' onto itself",
                src_id
            )));
        }
        let dst_manifest = naming::manifest_id(dst_id)?;

        let Some((manifest, _)) = self.load_manifest(src_space, src_id).await? else {
            let checksum = self
                .provider
                .copy_content(src_space, src_id, dst_space, dst_id)
                .await?;
            self.delete_if_present(dst_space, &dst_manifest).await?;
            self.remove_chunks(dst_space, dst_id, 0).await?;
            return Ok(checksum);
        };

        let copy = manifest.renamed(dst_id)?;
        let replaced = self.delete_if_present(dst_space, &dst_manifest).await?;
        if let Err(e) = self.copy_chunks(src_space, &manifest, dst_space, &copy).await {
            if replaced {
                self.discard_replaced_chunks(dst_space, dst_id, &e).await;
            }
            return Err(e);
        }
        write_manifest(
            self.provider.as_ref(),
            &self.retry,
            dst_space,
            &copy,
            DEFAULT_FRAME_SIZE,
        )
        .await?;

        self.delete_if_present(dst_space, dst_id).await?;
        self.remove_chunks(dst_space, dst_id, copy.chunks.len() as u32)
            .await?;
        info!(
            from = %format!("{}/{}", src_space, src_id),
            to = %format!("{}/{}", dst_space, dst_id),
            chunks = copy.chunks.len(),
            "Chunked content copied"
        );
        Ok(copy.total_checksum)
    }

    async fn copy_chunks(
        &self,
        src_space: &SpaceId,
        from: &Manifest,
        dst_space: &SpaceId,
        to: &Manifest,
    ) -> Result<()> {
        for (source, target) in from.chunks.iter().zip(&to.chunks) {
            let last = source.ordinal.checked_sub(1);
            let checksum = self
                .provider
                .copy_content(src_space, &source.chunk_id, dst_space, &target.chunk_id)
                .await
                .map_err(|e| Error::partial("copy", last, e))?;
            if checksum != source.checksum {
                return Err(Error::partial(
                    "copy",
                    last,
                    Error::ChecksumMismatch {
                        context: target.chunk_id.to_string(),
                        expected: source.checksum.clone(),
                        actual: checksum,
                    },
                ));
            }
        }
        Ok(())
    }

    /// Remove chunks of a replaced item that a failed rewrite did not reach.
    async fn discard_replaced_chunks(&self, space: &SpaceId, id: &ContentId, failed: &Error) {
        let keep = failed.last_completed().map_or(0, |last| last.saturating_add(1));
        match self.remove_chunks(space, id, keep).await {
            Ok(removed) => {
                warn!(space = %space, content = %id, removed, "Replaced chunked item lost to a failed rewrite")
            }
            Err(e) => {
                warn!(space = %space, content = %id, error = %e, "Failed to remove chunks of the replaced item")
            }
        }
    }

    async fn load_manifest(
        &self,
        space: &SpaceId,
        id: &ContentId,
    ) -> Result<Option<(Manifest, ContentProperties)>> {
        let manifest_id = naming::manifest_id(id)?;
        let content = match self.provider.get_content(space, &manifest_id).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let expected = Checksum::from_hex(
            self.provider.checksum_algorithm(),
            &content.properties.checksum,
        )?;
        let verified = ChecksumStream::verifying(content.stream, expected)
            .with_expected_size(content.properties.size)
            .with_context(manifest_id.to_string());
        let manifest = Manifest::from_bytes(&read_to_bytes(verified.boxed()).await?)?;
        if &manifest.source_id != id {
            return Err(Error::Integrity(format!(
                "manifest '{}' describes '{}'",
                manifest_id, manifest.source_id
            )));
        }

        let properties = manifest.content_properties(content.properties.modified);
        Ok(Some((manifest, properties)))
    }

    async fn delete_if_present(&self, space: &SpaceId, id: &ContentId) -> Result<bool> {
        match self.provider.delete_content(space, id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete chunks of `id` with ordinal `>= keep`.
    async fn remove_chunks(&self, space: &SpaceId, id: &ContentId, keep: u32) -> Result<usize> {
        let prefix = naming::chunk_prefix(id);
        let mut removed = 0;
        for chunk in self.provider.list_content(space, Some(&prefix)).await? {
            let Some((parent, ordinal)) = naming::parse_chunk_id(chunk.as_str()) else {
                continue;
            };
            if parent != id.as_str() || ordinal < keep {
                continue;
            }
            match self.delete_if_present(space, &chunk).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(space = %space, chunk = %chunk, error = %e, "Failed to remove chunk");
                    return Err(e);
                }
            }
        }
        if removed > 0 {
            debug!(space = %space, content = %id, removed, "Removed stale chunks");
        }
        Ok(removed)
    }
}

fn reject_reserved(id: &ContentId) -> Result<()> {
    if naming::is_reserved(id.as_str()) {
        return Err(Error::InvalidInput(format!(
            "'{}' uses a name reserved for chunk storage",
            id
        )));
    }
    Ok(())
}
