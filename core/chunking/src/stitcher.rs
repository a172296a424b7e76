//! Reassembles a chunked item into one lazy byte stream.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use spanstore_common::{Error, Result, SpaceId};
use spanstore_storage::{
    ByteStream, Checksum, ChecksumAlgorithm, ChecksumStream, Checksummer, DataSource, RetryConfig,
    RetryExecutor,
};

use crate::manifest::{ChunkEntry, Manifest};

/// Builds the read stream for one manifest.
///
/// Chunks are fetched strictly in order and only once the previous chunk
/// has been fully consumed; nothing is prefetched. Dropping the stream stops
/// all further fetches.
pub struct Stitcher<D: ?Sized> {
    source: Arc<D>,
    retry: RetryExecutor,
    verify_total: bool,
    cancel: CancellationToken,
}

impl<D: DataSource + ?Sized + 'static> Stitcher<D> {
    /// Create a stitcher reading chunks from `source`.
    pub fn new(source: Arc<D>) -> Self {
        Self {
            source,
            retry: RetryExecutor::default(),
            verify_total: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the retry policy for chunk fetches.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(retry);
        self
    }

    /// Also check the aggregate checksum against the manifest total.
    pub fn with_total_verification(mut self, verify: bool) -> Self {
        self.verify_total = verify;
        self
    }

    /// Stop fetching when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Stream the logical content described by `manifest`.
    ///
    /// No chunk is fetched until the stream is first polled.
    ///
    /// # Errors
    /// - `Integrity` if the manifest is invalid
    ///
    /// Stream items fail with `Partial { operation: "stitch", .. }` wrapping
    /// `NotFound` for a missing chunk, `ChecksumMismatch`/`Integrity` for a
    /// corrupt one, or `Cancelled`.
    pub fn stitch(self, space: SpaceId, manifest: Manifest) -> Result<ByteStream> {
        manifest.validate()?;
        let total = self.verify_total.then(|| manifest.algorithm.checksummer());

        let state = StitchState {
            source: self.source,
            retry: self.retry,
            cancel: self.cancel,
            space,
            manifest,
            next: 0,
            current: None,
            delivered: 0,
            last_completed: None,
            total,
            done: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            match state.next_frame().await {
                Some(Ok(frame)) => Some((Ok(frame), state)),
                Some(Err(e)) => {
                    state.done = true;
                    let err = Error::partial("stitch", state.last_completed, e);
                    Some((Err(err), state))
                }
                None => None,
            }
        })))
    }
}

struct StitchState<D: ?Sized> {
    source: Arc<D>,
    retry: RetryExecutor,
    cancel: CancellationToken,
    space: SpaceId,
    manifest: Manifest,
    next: usize,
    current: Option<(u32, ChecksumStream)>,
    delivered: u64,
    last_completed: Option<u32>,
    total: Option<Checksummer>,
    done: bool,
}

impl<D: DataSource + ?Sized> StitchState<D> {
    async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        loop {
            if let Some((ordinal, current)) = self.current.as_mut() {
                match current.next().await {
                    Some(Ok(frame)) => {
                        if frame.is_empty() {
                            continue;
                        }
                        self.delivered += frame.len() as u64;
                        if let Some(total) = self.total.as_mut() {
                            total.update(&frame);
                        }
                        return Some(Ok(frame));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        self.last_completed = Some(*ordinal);
                        self.current = None;
                        continue;
                    }
                }
            }

            let Some(entry) = self.manifest.chunks.get(self.next).cloned() else {
                return self.finish().err().map(Err);
            };
            if self.cancel.is_cancelled() {
                return Some(Err(Error::Cancelled("stitched read cancelled".to_string())));
            }
            // Borrow fields separately: the in-flight chunk stream is not
            // `Sync`, so `&self` must not be held across the fetch.
            let opened = open_chunk(
                &self.source,
                &self.retry,
                &self.space,
                self.manifest.algorithm,
                &entry,
            )
            .await;
            match opened {
                Ok(stream) => {
                    self.current = Some((entry.ordinal, stream));
                    self.next += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.done = true;
        if self.delivered != self.manifest.total_size {
            return Err(Error::Integrity(format!(
                "{}: delivered {} bytes, manifest lists {}",
                self.manifest.source_id, self.delivered, self.manifest.total_size
            )));
        }
        if let Some(total) = self.total.take() {
            let actual = total.finalize().to_hex();
            if actual != self.manifest.total_checksum {
                return Err(Error::ChecksumMismatch {
                    context: self.manifest.source_id.to_string(),
                    expected: self.manifest.total_checksum.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Fetch one chunk and wrap it in a stream verifying its checksum and size.
async fn open_chunk<D: DataSource + ?Sized>(
    source: &Arc<D>,
    retry: &RetryExecutor,
    space: &SpaceId,
    algorithm: ChecksumAlgorithm,
    entry: &ChunkEntry,
) -> Result<ChecksumStream> {
    let expected = Checksum::from_hex(algorithm, &entry.checksum)?;
    let id = &entry.chunk_id;

    let content = retry
        .execute(move || source.fetch_content(space, id))
        .await?;
    debug!(space = %space, chunk = %entry.chunk_id, size = entry.size, "Chunk opened");

    Ok(ChecksumStream::verifying(content.stream, expected)
        .with_expected_size(entry.size)
        .with_context(entry.chunk_id.to_string()))
}
