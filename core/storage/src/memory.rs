//! In-memory object client for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use spanstore_common::{Error, Properties, Result};

use crate::adapter::Credentials;
use crate::client::{AuthContext, ContainerInfo, ObjectClient, ObjectInfo, ObjectUpload};
use crate::provider::{frames, read_to_bytes, ByteStream, DEFAULT_FRAME_SIZE};

/// In-memory object entry.
#[derive(Debug, Clone)]
struct Object {
    data: Bytes,
    info: ObjectInfo,
}

/// In-memory container.
#[derive(Debug, Clone)]
struct Container {
    created: DateTime<Utc>,
    properties: Properties,
    objects: BTreeMap<String, Object>,
}

type Containers = HashMap<String, Container>;

/// In-memory object client.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryClient {
    storage: Arc<RwLock<Containers>>,
    required: Option<Arc<Credentials>>,
}

impl MemoryClient {
    /// Create a new empty memory client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `credentials` in [`ObjectClient::authenticate`].
    pub fn with_required_credentials(mut self, credentials: Credentials) -> Self {
        self.required = Some(Arc::new(credentials));
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Containers>> {
        self.storage
            .read()
            .map_err(|_| Error::StorageProvider("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Containers>> {
        self.storage
            .write()
            .map_err(|_| Error::StorageProvider("memory store lock poisoned".to_string()))
    }
}

fn container_not_found(name: &str) -> Error {
    Error::NotFound(format!("Space not found: {}", name))
}

fn object_not_found(container: &str, key: &str) -> Error {
    Error::NotFound(format!("Content not found: {}/{}", container, key))
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn authenticate(&self, auth: AuthContext<'_>) -> Result<()> {
        match (&self.required, auth.credentials) {
            (None, _) => Ok(()),
            (Some(required), Some(given)) if required.as_ref() == given => Ok(()),
            (Some(_), Some(given)) => Err(Error::Authentication(format!(
                "Invalid credentials for user '{}'",
                given.username
            ))),
            (Some(_), None) => Err(Error::Authentication(
                "Credentials required".to_string(),
            )),
        }
    }

    async fn list_containers(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_container(&self, name: &str) -> Result<()> {
        let mut storage = self.write()?;
        if storage.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "Space already exists: {}",
                name
            )));
        }
        storage.insert(
            name.to_string(),
            Container {
                created: Utc::now(),
                properties: Properties::new(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        self.write()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| container_not_found(name))
    }

    async fn container_info(&self, name: &str) -> Result<ContainerInfo> {
        let storage = self.read()?;
        let container = storage.get(name).ok_or_else(|| container_not_found(name))?;
        Ok(ContainerInfo {
            name: name.to_string(),
            created: container.created,
            object_count: container.objects.len() as u64,
            properties: container.properties.clone(),
        })
    }

    async fn set_container_properties(&self, name: &str, properties: Properties) -> Result<()> {
        let mut storage = self.write()?;
        let container = storage
            .get_mut(name)
            .ok_or_else(|| container_not_found(name))?;
        container.properties = properties;
        Ok(())
    }

    async fn list_objects(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let storage = self.read()?;
        let container = storage
            .get(container)
            .ok_or_else(|| container_not_found(container))?;
        Ok(container
            .objects
            .keys()
            .filter(|key| prefix.is_none_or(|p| key.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: ByteStream,
        upload: ObjectUpload,
    ) -> Result<ObjectInfo> {
        if !self.read()?.contains_key(container) {
            return Err(container_not_found(container));
        }

        // Any stream error returns here, before the store is touched.
        let data = read_to_bytes(data).await?;

        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            mimetype: upload.mimetype,
            checksum: upload.algorithm.compute(&data).to_hex(),
            modified: Utc::now(),
            properties: upload.properties,
        };

        let mut storage = self.write()?;
        let target = storage
            .get_mut(container)
            .ok_or_else(|| container_not_found(container))?;
        target.objects.insert(
            key.to_string(),
            Object {
                data,
                info: info.clone(),
            },
        );
        Ok(info)
    }

    async fn get_object(&self, container: &str, key: &str) -> Result<(ByteStream, ObjectInfo)> {
        let object = {
            let storage = self.read()?;
            storage
                .get(container)
                .ok_or_else(|| container_not_found(container))?
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| object_not_found(container, key))?
        };
        Ok((frames(object.data, DEFAULT_FRAME_SIZE), object.info))
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectInfo> {
        let storage = self.read()?;
        storage
            .get(container)
            .ok_or_else(|| container_not_found(container))?
            .objects
            .get(key)
            .map(|object| object.info.clone())
            .ok_or_else(|| object_not_found(container, key))
    }

    async fn set_object_properties(
        &self,
        container: &str,
        key: &str,
        properties: Properties,
    ) -> Result<()> {
        let mut storage = self.write()?;
        let object = storage
            .get_mut(container)
            .ok_or_else(|| container_not_found(container))?
            .objects
            .get_mut(key)
            .ok_or_else(|| object_not_found(container, key))?;
        object.info.properties = properties;
        object.info.modified = Utc::now();
        Ok(())
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<()> {
        let mut storage = self.write()?;
        storage
            .get_mut(container)
            .ok_or_else(|| container_not_found(container))?
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| object_not_found(container, key))
    }

    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<ObjectInfo> {
        let mut storage = self.write()?;

        let source = storage
            .get(src_container)
            .ok_or_else(|| container_not_found(src_container))?
            .objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| object_not_found(src_container, src_key))?;

        let target = storage
            .get_mut(dst_container)
            .ok_or_else(|| container_not_found(dst_container))?;

        let mut info = source.info;
        info.key = dst_key.to_string();
        info.modified = Utc::now();
        target.objects.insert(
            dst_key.to_string(),
            Object {
                data: source.data,
                info: info.clone(),
            },
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;

    fn upload() -> ObjectUpload {
        ObjectUpload {
            mimetype: "text/plain".to_string(),
            properties: Properties::new(),
            algorithm: ChecksumAlgorithm::Sha256,
        }
    }

    async fn client_with_container() -> MemoryClient {
        let client = MemoryClient::new();
        client.create_container("bucket").await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_put_get() {
        let client = client_with_container().await;
        let data = Bytes::from_static(b"Hello, World!");

        let info = client
            .put_object("bucket", "greeting", frames(data.clone(), 4), upload())
            .await
            .unwrap();
        assert_eq!(info.size, 13);
        assert_eq!(
            info.checksum,
            ChecksumAlgorithm::Sha256.compute(&data).to_hex()
        );

        let (stream, head) = client.get_object("bucket", "greeting").await.unwrap();
        assert_eq!(read_to_bytes(stream).await.unwrap(), data);
        assert_eq!(head, info);
    }

    #[tokio::test]
    async fn test_failed_stream_stores_nothing() {
        let client = client_with_container().await;
        let failing: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::StorageProvider("dropped".to_string())),
        ]));

        assert!(client
            .put_object("bucket", "broken", failing, upload())
            .await
            .is_err());
        assert!(client.head_object("bucket", "broken").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_container() {
        let client = MemoryClient::new();
        let result = client
            .put_object("nope", "key", frames(Bytes::new(), 1), upload())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let client = client_with_container().await;
        for key in ["a/1", "a/2", "b/1"] {
            client
                .put_object("bucket", key, frames(Bytes::from_static(b"x"), 1), upload())
                .await
                .unwrap();
        }

        let listed = client.list_objects("bucket", Some("a/")).await.unwrap();
        assert_eq!(listed, vec!["a/1".to_string(), "a/2".to_string()]);
        assert_eq!(client.list_objects("bucket", None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let client = client_with_container().await;
        client.create_container("other").await.unwrap();
        client
            .put_object("bucket", "src", frames(Bytes::from_static(b"abc"), 8), upload())
            .await
            .unwrap();

        let copied = client
            .copy_object("bucket", "src", "other", "dst")
            .await
            .unwrap();
        assert_eq!(copied.key, "dst");

        client.delete_object("bucket", "src").await.unwrap();
        assert!(client.head_object("bucket", "src").await.is_err());
        assert!(client.head_object("other", "dst").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_container_fails() {
        let client = client_with_container().await;
        assert!(matches!(
            client.create_container("bucket").await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_required_credentials() {
        let client = MemoryClient::new()
            .with_required_credentials(Credentials::new("alice", "s3cret"));
        let good = Credentials::new("alice", "s3cret");
        let bad = Credentials::new("alice", "guess");

        let auth = |credentials| AuthContext {
            auth_url: None,
            credentials,
        };
        assert!(client.authenticate(auth(Some(&good))).await.is_ok());
        assert!(matches!(
            client.authenticate(auth(Some(&bad))).await,
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            client.authenticate(auth(None)).await,
            Err(Error::Authentication(_))
        ));
    }
}
