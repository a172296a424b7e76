//! Local filesystem object client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

use spanstore_common::{Error, Properties, Result, SpaceId};

use crate::checksum::ChecksumAlgorithm;
use crate::client::{AuthContext, ContainerInfo, ObjectClient, ObjectInfo, ObjectUpload};
use crate::provider::ByteStream;

const CONTAINER_FILE: &str = "container.json";
const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const STAGING_DIR: &str = "staging";

/// Characters kept verbatim in on-disk object names.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Longest encoded object name written to disk.
const MAX_ENCODED_KEY_LEN: usize = 240;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerRecord {
    created: DateTime<Utc>,
    #[serde(default)]
    properties: Properties,
}

/// Local filesystem object client.
///
/// Layout under `root`:
/// ```text
/// <container>/container.json
/// <container>/objects/<percent-encoded key>
/// <container>/meta/<percent-encoded key>.json
/// <container>/staging/<uuid>
/// ```
/// Uploads are written to `staging/` and renamed into place only after the
/// stream has been fully and successfully consumed.
pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    /// Create a new local client with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, name: &str) -> Result<PathBuf> {
        // Container names become directory names; only portable ids are allowed.
        SpaceId::new(name)?;
        Ok(self.root.join(name))
    }

    fn encode_key(key: &str) -> Result<String> {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        if encoded.is_empty() || encoded.len() > MAX_ENCODED_KEY_LEN {
            return Err(Error::InvalidInput(format!(
                "Content id '{}' is too long for the local backend",
                key
            )));
        }
        Ok(encoded)
    }

    fn decode_key(name: &str) -> Option<String> {
        percent_decode_str(name)
            .decode_utf8()
            .ok()
            .map(|s| s.into_owned())
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf> {
        Ok(self
            .container_dir(container)?
            .join(OBJECTS_DIR)
            .join(Self::encode_key(key)?))
    }

    fn meta_path(&self, container: &str, key: &str) -> Result<PathBuf> {
        Ok(self
            .container_dir(container)?
            .join(META_DIR)
            .join(format!("{}.json", Self::encode_key(key)?)))
    }

    fn staging_path(&self, container: &str) -> Result<PathBuf> {
        Ok(self
            .container_dir(container)?
            .join(STAGING_DIR)
            .join(Uuid::new_v4().to_string()))
    }

    async fn read_container(&self, name: &str) -> Result<ContainerRecord> {
        let path = self.container_dir(name)?.join(CONTAINER_FILE);
        match fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Space not found: {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(&self, container: &str, path: &Path, value: &T) -> Result<()> {
        let staging = self.staging_path(container)?;
        fs::write(&staging, serde_json::to_vec_pretty(value)?).await?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_meta(&self, container: &str, key: &str) -> Result<ObjectInfo> {
        self.read_container(container).await?;
        match fs::read(self.meta_path(container, key)?).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "Content not found: {}/{}",
                container, key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `data` into `staging`, returning its size and checksum.
    async fn write_staged(
        staging: &Path,
        mut data: ByteStream,
        algorithm: ChecksumAlgorithm,
    ) -> Result<(u64, String)> {
        let mut file = fs::File::create(staging).await?;
        let mut hasher = algorithm.checksummer();

        while let Some(frame) = data.next().await {
            let frame = frame?;
            hasher.update(&frame);
            file.write_all(&frame).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        let size = hasher.bytes_hashed();
        Ok((size, hasher.finalize().to_hex()))
    }
}

#[async_trait]
impl ObjectClient for LocalClient {
    fn kind(&self) -> &str {
        "local"
    }

    async fn authenticate(&self, _auth: AuthContext<'_>) -> Result<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Local root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if fs::try_exists(entry.path().join(CONTAINER_FILE)).await? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn create_container(&self, name: &str) -> Result<()> {
        let dir = self.container_dir(name)?;
        if fs::try_exists(dir.join(CONTAINER_FILE)).await? {
            return Err(Error::AlreadyExists(format!(
                "Space already exists: {}",
                name
            )));
        }

        for sub in [OBJECTS_DIR, META_DIR, STAGING_DIR] {
            fs::create_dir_all(dir.join(sub)).await?;
        }
        let record = ContainerRecord {
            created: Utc::now(),
            properties: Properties::new(),
        };
        self.write_json(name, &dir.join(CONTAINER_FILE), &record)
            .await
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        self.read_container(name).await?;
        fs::remove_dir_all(self.container_dir(name)?).await?;
        Ok(())
    }

    async fn container_info(&self, name: &str) -> Result<ContainerInfo> {
        let record = self.read_container(name).await?;
        let object_count = self.list_objects(name, None).await?.len() as u64;
        Ok(ContainerInfo {
            name: name.to_string(),
            created: record.created,
            object_count,
            properties: record.properties,
        })
    }

    async fn set_container_properties(&self, name: &str, properties: Properties) -> Result<()> {
        let mut record = self.read_container(name).await?;
        record.properties = properties;
        let path = self.container_dir(name)?.join(CONTAINER_FILE);
        self.write_json(name, &path, &record).await
    }

    async fn list_objects(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        self.read_container(container).await?;

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(self.container_dir(container)?.join(OBJECTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(key) = entry.file_name().to_str().and_then(Self::decode_key) else {
                warn!(path = %entry.path().display(), "Skipping undecodable object name");
                continue;
            };
            if prefix.is_none_or(|p| key.starts_with(p)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        data: ByteStream,
        upload: ObjectUpload,
    ) -> Result<ObjectInfo> {
        self.read_container(container).await?;
        let object_path = self.object_path(container, key)?;
        let staging = self.staging_path(container)?;

        let (size, checksum) = match Self::write_staged(&staging, data, upload.algorithm).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &object_path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        let info = ObjectInfo {
            key: key.to_string(),
            size,
            mimetype: upload.mimetype,
            checksum,
            modified: Utc::now(),
            properties: upload.properties,
        };
        self.write_json(container, &self.meta_path(container, key)?, &info)
            .await?;
        Ok(info)
    }

    async fn get_object(&self, container: &str, key: &str) -> Result<(ByteStream, ObjectInfo)> {
        let info = self.read_meta(container, key).await?;
        let file = match fs::File::open(self.object_path(container, key)?).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "Content not found: {}/{}",
                    container, key
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let stream = ReaderStream::new(file).map(|frame| frame.map_err(Error::from));
        Ok((Box::pin(stream), info))
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<ObjectInfo> {
        self.read_meta(container, key).await
    }

    async fn set_object_properties(
        &self,
        container: &str,
        key: &str,
        properties: Properties,
    ) -> Result<()> {
        let mut info = self.read_meta(container, key).await?;
        info.properties = properties;
        info.modified = Utc::now();
        self.write_json(container, &self.meta_path(container, key)?, &info)
            .await
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<()> {
        self.read_meta(container, key).await?;
        fs::remove_file(self.meta_path(container, key)?).await?;
        match fs::remove_file(self.object_path(container, key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<ObjectInfo> {
        let mut info = self.read_meta(src_container, src_key).await?;
        self.read_container(dst_container).await?;

        let staging = self.staging_path(dst_container)?;
        let copied = async {
            fs::copy(self.object_path(src_container, src_key)?, &staging).await?;
            fs::rename(&staging, self.object_path(dst_container, dst_key)?).await?;
            Ok::<(), Error>(())
        }
        .await;
        if let Err(e) = copied {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        info.key = dst_key.to_string();
        info.modified = Utc::now();
        self.write_json(dst_container, &self.meta_path(dst_container, dst_key)?, &info)
            .await?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{frames, read_to_bytes};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn upload() -> ObjectUpload {
        ObjectUpload {
            mimetype: "application/octet-stream".to_string(),
            properties: Properties::new(),
            algorithm: ChecksumAlgorithm::Sha256,
        }
    }

    async fn client() -> (TempDir, LocalClient) {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path()).unwrap();
        client.create_container("bucket").await.unwrap();
        (temp, client)
    }

    #[tokio::test]
    async fn test_local_put_get() {
        let (_temp, client) = client().await;
        let data = Bytes::from_static(b"Hello, Local!");

        let info = client
            .put_object("bucket", "docs/readme.txt", frames(data.clone(), 5), upload())
            .await
            .unwrap();
        assert_eq!(info.size, data.len() as u64);

        let (stream, head) = client.get_object("bucket", "docs/readme.txt").await.unwrap();
        assert_eq!(read_to_bytes(stream).await.unwrap(), data);
        assert_eq!(head.checksum, info.checksum);
    }

    #[tokio::test]
    async fn test_local_failed_upload_leaves_nothing() {
        let (temp, client) = client().await;
        let failing: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"half")),
            Err(Error::StorageProvider("reset".to_string())),
        ]));

        assert!(client
            .put_object("bucket", "broken", failing, upload())
            .await
            .is_err());
        assert!(client.head_object("bucket", "broken").await.unwrap_err().is_not_found());

        let staging = temp.path().join("bucket").join(STAGING_DIR);
        let mut entries = fs::read_dir(staging).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_list_and_delete() {
        let (_temp, client) = client().await;
        for key in ["a.span-chunk-0000", "a.span-chunk-0001", "b"] {
            client
                .put_object("bucket", key, frames(Bytes::from_static(b"x"), 1), upload())
                .await
                .unwrap();
        }

        let listed = client
            .list_objects("bucket", Some("a.span-chunk-"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        client.delete_object("bucket", "b").await.unwrap();
        assert_eq!(client.container_info("bucket").await.unwrap().object_count, 2);
        assert!(client.delete_object("bucket", "b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_rejects_path_traversal() {
        let (_temp, client) = client().await;
        assert!(client.create_container("../escape").await.is_err());

        // Keys are encoded, so separators and dots never reach the filesystem raw.
        client
            .put_object("bucket", "../../etc/passwd", frames(Bytes::from_static(b"x"), 1), upload())
            .await
            .unwrap();
        assert_eq!(
            client.list_objects("bucket", None).await.unwrap(),
            vec!["../../etc/passwd".to_string()]
        );
    }

    #[tokio::test]
    async fn test_local_copy_between_containers() {
        let (_temp, client) = client().await;
        client.create_container("backup").await.unwrap();
        client
            .put_object("bucket", "src", frames(Bytes::from_static(b"payload"), 3), upload())
            .await
            .unwrap();

        let copied = client
            .copy_object("bucket", "src", "backup", "dst")
            .await
            .unwrap();
        assert_eq!(copied.key, "dst");
        let (stream, _) = client.get_object("backup", "dst").await.unwrap();
        assert_eq!(read_to_bytes(stream).await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_integrity_scan_finds_corrupted_file() {
        use crate::maintenance::{
            register_maintenance, MaintenanceGroup, GET_INTEGRITY_SCAN, START_INTEGRITY_SCAN,
        };
        use crate::tasks::TaskRegistry;
        use std::sync::Arc;

        let (temp, client) = client().await;
        for key in ["good", "bad"] {
            client
                .put_object("bucket", key, frames(Bytes::from_static(b"original"), 4), upload())
                .await
                .unwrap();
        }
        let bad_path = temp.path().join("bucket").join(OBJECTS_DIR).join("bad");
        fs::write(&bad_path, b"tampered").await.unwrap();

        let mut registry = TaskRegistry::new();
        register_maintenance(
            &mut registry,
            Arc::new(client),
            ChecksumAlgorithm::Sha256,
            &[MaintenanceGroup::IntegrityScan],
        )
        .unwrap();

        let started = registry
            .perform(START_INTEGRITY_SCAN, r#"{"space_id":"bucket"}"#)
            .await
            .unwrap();
        let started: serde_json::Value = serde_json::from_str(&started).unwrap();
        let query = serde_json::json!({ "scan_id": started["scan_id"] }).to_string();

        let mut status = serde_json::Value::Null;
        for _ in 0..200 {
            let result = registry.perform(GET_INTEGRITY_SCAN, &query).await.unwrap();
            status = serde_json::from_str(&result).unwrap();
            if status["status"] != "running" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(status["status"], "completed");
        assert_eq!(status["checked"], 2);
        assert_eq!(status["corrupt"], serde_json::json!(["bad"]));
    }

    #[tokio::test]
    async fn test_local_containers_listed() {
        let (_temp, client) = client().await;
        client.create_container("archive").await.unwrap();
        assert_eq!(
            client.list_containers().await.unwrap(),
            vec!["archive".to_string(), "bucket".to_string()]
        );
        client.delete_container("archive").await.unwrap();
        assert!(client.container_info("archive").await.unwrap_err().is_not_found());
    }
}
