//! Object-store client capability consumed by [`BackendAdapter`].
//!
//! An `ObjectClient` is the thin layer that actually talks to a vendor
//! (or to memory, or to a local directory). It speaks in plain container and
//! key strings and knows nothing about spaces, chunking or tasks.
//!
//! [`BackendAdapter`]: crate::adapter::BackendAdapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spanstore_common::{Properties, Result};

use crate::adapter::Credentials;
use crate::checksum::ChecksumAlgorithm;
use crate::provider::{ByteStream, ContentProperties, SpaceProperties};

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key within its container.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Object mimetype.
    pub mimetype: String,
    /// Checksum computed by the backend (hex).
    pub checksum: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// User properties.
    #[serde(default)]
    pub properties: Properties,
}

impl From<ObjectInfo> for ContentProperties {
    fn from(info: ObjectInfo) -> Self {
        Self {
            mimetype: info.mimetype,
            size: info.size,
            checksum: info.checksum,
            modified: info.modified,
            properties: info.properties,
        }
    }
}

/// Metadata for a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name.
    pub name: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Number of objects currently stored.
    pub object_count: u64,
    /// User properties.
    #[serde(default)]
    pub properties: Properties,
}

impl From<ContainerInfo> for SpaceProperties {
    fn from(info: ContainerInfo) -> Self {
        Self {
            created: info.created,
            count: info.object_count,
            properties: info.properties,
        }
    }
}

/// Attributes supplied with an object upload.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    /// Object mimetype.
    pub mimetype: String,
    /// User properties.
    pub properties: Properties,
    /// Digest the backend reports its checksum in.
    pub algorithm: ChecksumAlgorithm,
}

/// Connection parameters handed to [`ObjectClient::authenticate`].
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    /// Authentication endpoint, if the backend uses one.
    pub auth_url: Option<&'a str>,
    /// Account credentials, if configured.
    pub credentials: Option<&'a Credentials>,
}

/// Low-level object store operations.
///
/// # Contract
/// - `put_object` is atomic: if `data` yields an error, nothing is stored
///   under `key` (a previous object with that key stays untouched).
/// - `put_object` overwrites an existing object with the same key.
/// - Missing containers/objects are reported as `Error::NotFound`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Client kind (e.g., "memory", "local").
    fn kind(&self) -> &str;

    /// Establish or validate a session with the backend.
    ///
    /// # Errors
    /// - `Authentication` if the backend rejects the credentials
    async fn authenticate(&self, auth: AuthContext<'_>) -> Result<()>;

    /// List container names.
    async fn list_containers(&self) -> Result<Vec<String>>;

    /// Create a container.
    async fn create_container(&self, name: &str) -> Result<()>;

    /// Delete a container and every object in it.
    async fn delete_container(&self, name: &str) -> Result<()>;

    /// Container metadata.
    async fn container_info(&self, name: &str) -> Result<ContainerInfo>;

    /// Replace container user properties.
    async fn set_container_properties(&self, name: &str, properties: Properties) -> Result<()>;

    /// List object keys, optionally restricted to a prefix, sorted.
    async fn list_objects(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Store an object.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: ByteStream,
        upload: ObjectUpload,
    ) -> Result<ObjectInfo>;

    /// Open an object for reading.
    async fn get_object(&self, container: &str, key: &str) -> Result<(ByteStream, ObjectInfo)>;

    /// Object metadata.
    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectInfo>;

    /// Replace object user properties.
    async fn set_object_properties(
        &self,
        container: &str,
        key: &str,
        properties: Properties,
    ) -> Result<()>;

    /// Delete an object.
    async fn delete_object(&self, container: &str, key: &str) -> Result<()>;

    /// Server-side copy.
    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<ObjectInfo>;
}
