//! Shared fixtures for chunking tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use spanstore_common::{ContentId, Error, Properties, Result, SpaceId};
use spanstore_storage::{
    AdapterConfig, BackendAdapter, ByteStream, ChecksumAlgorithm, Content, ContentProperties,
    MemoryClient, NewContent, RetryConfig, RetrySettings, SpaceProperties, StorageProvider,
};

use crate::naming;

pub(crate) fn space() -> SpaceId {
    SpaceId::new("media").unwrap()
}

/// Deterministic non-repeating-looking test bytes.
pub(crate) fn pattern(len: usize) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
            .collect::<Vec<u8>>(),
    )
}

pub(crate) fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

/// Object limit roomy enough for the manifests of small test items.
pub(crate) const OBJECT_LIMIT: u64 = 4096;

/// Memory-backed provider with `media` created and no retry delays.
pub(crate) async fn memory_provider(max_object_size: u64) -> Arc<dyn StorageProvider> {
    let config = AdapterConfig::new("memory")
        .with_max_object_size(max_object_size)
        .with_retry(RetrySettings {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        });
    let adapter = BackendAdapter::new(config, MemoryClient::new()).unwrap();
    adapter.create_space(&space()).await.unwrap();
    Arc::new(adapter)
}

/// Fault-injecting wrapper around another provider.
pub(crate) struct FlakyProvider {
    inner: Arc<dyn StorageProvider>,
    transient_adds: AtomicU32,
    transient_gets: AtomicU32,
    failing_chunk: Option<u32>,
    wrong_checksums: bool,
    cancel_after: Option<(u32, CancellationToken)>,
    add_calls: AtomicU32,
    get_calls: AtomicU32,
    committed: AtomicU32,
}

impl FlakyProvider {
    pub(crate) fn new(inner: Arc<dyn StorageProvider>) -> Self {
        Self {
            inner,
            transient_adds: AtomicU32::new(0),
            transient_gets: AtomicU32::new(0),
            failing_chunk: None,
            wrong_checksums: false,
            cancel_after: None,
            add_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            committed: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` writes with a transient fault.
    pub(crate) fn with_transient_adds(self, n: u32) -> Self {
        self.transient_adds.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` reads with a transient fault.
    pub(crate) fn with_transient_gets(self, n: u32) -> Self {
        self.transient_gets.store(n, Ordering::SeqCst);
        self
    }

    /// Always fail writes of chunk `ordinal`.
    pub(crate) fn with_failing_chunk(mut self, ordinal: u32) -> Self {
        self.failing_chunk = Some(ordinal);
        self
    }

    /// Report a checksum that does not match the stored bytes.
    pub(crate) fn with_wrong_checksums(mut self) -> Self {
        self.wrong_checksums = true;
        self
    }

    /// Cancel `token` once `n` writes have succeeded.
    pub(crate) fn with_cancel_after_adds(mut self, n: u32, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub(crate) fn add_calls(&self) -> u32 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn max_object_size(&self) -> u64 {
        self.inner.max_object_size()
    }

    fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.inner.checksum_algorithm()
    }

    async fn list_spaces(&self) -> Result<Vec<SpaceId>> {
        self.inner.list_spaces().await
    }

    async fn create_space(&self, space: &SpaceId) -> Result<()> {
        self.inner.create_space(space).await
    }

    async fn delete_space(&self, space: &SpaceId) -> Result<()> {
        self.inner.delete_space(space).await
    }

    async fn space_exists(&self, space: &SpaceId) -> Result<bool> {
        self.inner.space_exists(space).await
    }

    async fn get_space_properties(&self, space: &SpaceId) -> Result<SpaceProperties> {
        self.inner.get_space_properties(space).await
    }

    async fn set_space_properties(&self, space: &SpaceId, properties: Properties) -> Result<()> {
        self.inner.set_space_properties(space, properties).await
    }

    async fn list_content(&self, space: &SpaceId, prefix: Option<&str>) -> Result<Vec<ContentId>> {
        self.inner.list_content(space, prefix).await
    }

    async fn add_content(
        &self,
        space: &SpaceId,
        id: &ContentId,
        content: ByteStream,
        new: NewContent,
    ) -> Result<String> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.transient_adds) {
            return Err(Error::StorageProvider("503 Slow Down".to_string()));
        }
        if let (Some(failing), Some((_, ordinal))) =
            (self.failing_chunk, naming::parse_chunk_id(id.as_str()))
        {
            if failing == ordinal {
                return Err(Error::StorageProvider("backend unavailable".to_string()));
            }
        }

        let stored = self.inner.add_content(space, id, content, new).await?;

        let committed = self.committed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = &self.cancel_after {
            if committed >= *n {
                token.cancel();
            }
        }
        if self.wrong_checksums {
            return Ok(stored.chars().rev().collect());
        }
        Ok(stored)
    }

    async fn get_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.transient_gets) {
            return Err(Error::StorageProvider("connection reset".to_string()));
        }
        self.inner.get_content(space, id).await
    }

    async fn get_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
    ) -> Result<ContentProperties> {
        self.inner.get_content_properties(space, id).await
    }

    async fn set_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
        properties: Properties,
    ) -> Result<()> {
        self.inner.set_content_properties(space, id, properties).await
    }

    async fn delete_content(&self, space: &SpaceId, id: &ContentId) -> Result<()> {
        self.inner.delete_content(space, id).await
    }

    async fn copy_content(
        &self,
        src_space: &SpaceId,
        src_id: &ContentId,
        dst_space: &SpaceId,
        dst_id: &ContentId,
    ) -> Result<String> {
        self.inner
            .copy_content(src_space, src_id, dst_space, dst_id)
            .await
    }

    fn supported_tasks(&self) -> Vec<String> {
        self.inner.supported_tasks()
    }

    async fn perform_task(&self, name: &str, params: &str) -> Result<String> {
        self.inner.perform_task(name, params).await
    }
}
