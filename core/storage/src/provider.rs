//! Storage provider trait definition.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use spanstore_common::{ContentId, Properties, Result, SpaceId};

use crate::checksum::ChecksumAlgorithm;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Frame size used when turning an in-memory buffer into a stream.
pub const DEFAULT_FRAME_SIZE: usize = 64 * 1024;

/// Mimetype assumed when a caller does not supply one.
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Properties of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceProperties {
    /// When the space was created.
    pub created: DateTime<Utc>,
    /// Number of stored items (chunks and manifests included).
    pub count: u64,
    /// User properties.
    #[serde(default)]
    pub properties: Properties,
}

/// Metadata describing a new content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContent {
    /// Content mimetype.
    pub mimetype: String,
    /// Declared size in bytes; the stream must deliver exactly this many.
    pub size: u64,
    /// Caller-supplied checksum (hex). When present it is authoritative.
    #[serde(default)]
    pub checksum: Option<String>,
    /// User properties stored alongside the content.
    #[serde(default)]
    pub properties: Properties,
}

impl NewContent {
    /// Content of `size` bytes with the default mimetype.
    pub fn new(size: u64) -> Self {
        Self {
            mimetype: DEFAULT_MIMETYPE.to_string(),
            size,
            checksum: None,
            properties: Properties::new(),
        }
    }

    /// Set the mimetype.
    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    /// Set the expected checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Set user properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// Properties of a stored content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProperties {
    /// Content mimetype.
    pub mimetype: String,
    /// Size in bytes.
    pub size: u64,
    /// Stored checksum (hex).
    pub checksum: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// User properties.
    #[serde(default)]
    pub properties: Properties,
}

/// A content item being read: its bytes plus its properties.
pub struct Content {
    /// Content bytes.
    pub stream: ByteStream,
    /// Stored properties.
    pub properties: ContentProperties,
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Storage provider trait implemented by every backend adapter.
///
/// All operations are async and use streams for data transfers.
/// Implementations must handle their own authentication and connection
/// pooling; callers never manage backend resources directly.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider-type tag (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Largest single object the backend accepts, in bytes.
    fn max_object_size(&self) -> u64;

    /// Digest used for stored checksums.
    fn checksum_algorithm(&self) -> ChecksumAlgorithm;

    /// List all spaces.
    async fn list_spaces(&self) -> Result<Vec<SpaceId>>;

    /// Create a space.
    ///
    /// # Errors
    /// - Space already exists
    async fn create_space(&self, space: &SpaceId) -> Result<()>;

    /// Delete a space together with its contents.
    ///
    /// # Errors
    /// - Space not found
    async fn delete_space(&self, space: &SpaceId) -> Result<()>;

    /// Check whether a space exists.
    async fn space_exists(&self, space: &SpaceId) -> Result<bool>;

    /// Get space properties.
    ///
    /// # Errors
    /// - Space not found
    async fn get_space_properties(&self, space: &SpaceId) -> Result<SpaceProperties>;

    /// Replace the user properties of a space.
    async fn set_space_properties(&self, space: &SpaceId, properties: Properties) -> Result<()>;

    /// List content ids in a space, optionally restricted to a prefix.
    async fn list_content(&self, space: &SpaceId, prefix: Option<&str>) -> Result<Vec<ContentId>>;

    /// Store content, replacing any item with the same id.
    ///
    /// # Preconditions
    /// - Space must exist
    /// - `content` delivers exactly `new.size` bytes
    /// - `new.size` does not exceed [`StorageProvider::max_object_size`]
    ///
    /// # Postconditions
    /// - Returns the stored checksum (hex)
    /// - If `new.checksum` is given and differs from the received bytes,
    ///   nothing is stored under `id`
    ///
    /// # Errors
    /// - Space not found
    /// - Checksum mismatch, size mismatch
    /// - Backend faults
    async fn add_content(
        &self,
        space: &SpaceId,
        id: &ContentId,
        content: ByteStream,
        new: NewContent,
    ) -> Result<String>;

    /// Open a content item for reading.
    ///
    /// # Errors
    /// - Space or content not found
    async fn get_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content>;

    /// Get content properties.
    async fn get_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
    ) -> Result<ContentProperties>;

    /// Replace the user properties of a content item.
    async fn set_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
        properties: Properties,
    ) -> Result<()>;

    /// Delete a content item.
    async fn delete_content(&self, space: &SpaceId, id: &ContentId) -> Result<()>;

    /// Copy a content item, returning the checksum of the copy.
    async fn copy_content(
        &self,
        src_space: &SpaceId,
        src_id: &ContentId,
        dst_space: &SpaceId,
        dst_id: &ContentId,
    ) -> Result<String>;

    /// Names of the maintenance tasks this provider accepts.
    fn supported_tasks(&self) -> Vec<String>;

    /// Dispatch a named maintenance task.
    ///
    /// # Errors
    /// - `UnsupportedAction` if no task is registered under `name`
    async fn perform_task(&self, name: &str, params: &str) -> Result<String>;

    /// Check whether a content item exists.
    async fn content_exists(&self, space: &SpaceId, id: &ContentId) -> Result<bool> {
        match self.get_content_properties(space, id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Read side of the contract, as consumed by the stitcher.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch one content item.
    async fn fetch_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content>;
}

#[async_trait]
impl<T: StorageProvider + ?Sized> DataSource for T {
    async fn fetch_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content> {
        self.get_content(space, id).await
    }
}

/// Turn an in-memory buffer into a stream of `frame_size` frames.
///
/// Frames share the buffer's allocation.
pub fn frames(data: Bytes, frame_size: usize) -> ByteStream {
    let frame_size = frame_size.max(1);
    let mut remaining = data;
    let mut parts = Vec::with_capacity(remaining.len() / frame_size + 1);
    while !remaining.is_empty() {
        let take = frame_size.min(remaining.len());
        parts.push(Ok(remaining.split_to(take)));
    }
    Box::pin(futures::stream::iter(parts))
}

/// Drain a stream into one buffer.
pub async fn read_to_bytes(mut stream: ByteStream) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(frame) = stream.next().await {
        buffer.extend_from_slice(&frame?);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_properties_serialization() {
        let props = ContentProperties {
            mimetype: "text/plain".to_string(),
            size: 1024,
            checksum: "abc123".to_string(),
            modified: Utc::now(),
            properties: Properties::from([("owner".to_string(), "ops".to_string())]),
        };

        let json = serde_json::to_string(&props).unwrap();
        let deserialized: ContentProperties = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, props);
    }

    #[test]
    fn test_new_content_builder() {
        let new = NewContent::new(10)
            .with_mimetype("image/png")
            .with_checksum("ff");
        assert_eq!(new.mimetype, "image/png");
        assert_eq!(new.checksum.as_deref(), Some("ff"));
        assert_eq!(NewContent::new(1).mimetype, DEFAULT_MIMETYPE);
    }

    #[tokio::test]
    async fn test_frames_split_and_rejoin() {
        let data = Bytes::from((0u8..=250).collect::<Vec<_>>());
        let mut stream = frames(data.clone(), 100);
        let mut sizes = Vec::new();
        let mut joined = BytesMut::new();
        while let Some(frame) = stream.next().await {
            let frame = frame.unwrap();
            sizes.push(frame.len());
            joined.extend_from_slice(&frame);
        }
        assert_eq!(sizes, vec![100, 100, 51]);
        assert_eq!(joined.freeze(), data);
    }

    #[tokio::test]
    async fn test_frames_empty() {
        let collected = read_to_bytes(frames(Bytes::new(), 8)).await.unwrap();
        assert!(collected.is_empty());
    }
}
