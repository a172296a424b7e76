//! Vendor-style maintenance tasks built on the [`ObjectClient`] capability.
//!
//! These handlers only trigger work: the integrity scan runs on a spawned
//! task and its progress is polled with a second task name.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spanstore_common::{ContentId, Error, Result, SpaceId};

use crate::checksum::{Checksum, ChecksumAlgorithm, ChecksumStream};
use crate::client::ObjectClient;
use crate::tasks::{Task, TaskHandler, TaskRegistry};

pub const SET_STORAGE_CLASS: &str = "set-storage-class";
pub const ENABLE_STREAMING: &str = "enable-streaming";
pub const DISABLE_STREAMING: &str = "disable-streaming";
pub const START_INTEGRITY_SCAN: &str = "start-integrity-scan";
pub const GET_INTEGRITY_SCAN: &str = "get-integrity-scan";

/// Object property recording the storage class.
pub const STORAGE_CLASS_PROPERTY: &str = "span-storage-class";
/// Space property set while streaming is enabled.
pub const STREAMING_PROPERTY: &str = "span-streaming";

/// Groups of maintenance tasks an adapter can be configured to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceGroup {
    /// `set-storage-class`
    StorageClass,
    /// `enable-streaming`, `disable-streaming`
    Streaming,
    /// `start-integrity-scan`, `get-integrity-scan`
    IntegrityScan,
}

/// Register the handlers for `groups` against `client`.
pub fn register_maintenance(
    registry: &mut TaskRegistry,
    client: Arc<dyn ObjectClient>,
    algorithm: ChecksumAlgorithm,
    groups: &[MaintenanceGroup],
) -> Result<()> {
    for group in groups {
        match group {
            MaintenanceGroup::StorageClass => registry.register(
                SET_STORAGE_CLASS,
                TaskHandler::handler(SetStorageClassTask {
                    client: client.clone(),
                }),
            )?,
            MaintenanceGroup::Streaming => {
                registry.register(
                    ENABLE_STREAMING,
                    TaskHandler::handler(StreamingTask {
                        client: client.clone(),
                        enable: true,
                    }),
                )?;
                registry.register(
                    DISABLE_STREAMING,
                    TaskHandler::handler(StreamingTask {
                        client: client.clone(),
                        enable: false,
                    }),
                )?;
            }
            MaintenanceGroup::IntegrityScan => {
                let tracker = ScanTracker::default();
                registry.register(
                    START_INTEGRITY_SCAN,
                    TaskHandler::handler(StartScanTask {
                        client: client.clone(),
                        algorithm,
                        tracker: tracker.clone(),
                    }),
                )?;
                registry.register(
                    GET_INTEGRITY_SCAN,
                    TaskHandler::handler(GetScanTask { tracker }),
                )?;
            }
        }
    }
    Ok(())
}

fn parse_params<T: serde::de::DeserializeOwned>(task: &str, params: &str) -> Result<T> {
    serde_json::from_str(params)
        .map_err(|e| Error::InvalidInput(format!("Invalid parameters for '{}': {}", task, e)))
}

#[derive(Debug, Deserialize)]
struct StorageClassParams {
    space_id: SpaceId,
    content_id: ContentId,
    storage_class: String,
}

struct SetStorageClassTask {
    client: Arc<dyn ObjectClient>,
}

#[async_trait]
impl Task for SetStorageClassTask {
    async fn perform(&self, params: &str) -> Result<String> {
        let params: StorageClassParams = parse_params(SET_STORAGE_CLASS, params)?;
        let class = params.storage_class.trim().to_ascii_lowercase();
        if class.is_empty() {
            return Err(Error::InvalidInput("storage_class cannot be empty".to_string()));
        }

        let space = params.space_id.as_str();
        let key = params.content_id.as_str();
        let mut properties = self.client.head_object(space, key).await?.properties;
        properties.insert(STORAGE_CLASS_PROPERTY.to_string(), class.clone());
        self.client.set_object_properties(space, key, properties).await?;

        info!(space, content = key, storage_class = %class, "Storage class change accepted");
        Ok(serde_json::json!({
            "status": "accepted",
            "space_id": space,
            "content_id": key,
            "storage_class": class,
        })
        .to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SpaceParams {
    space_id: SpaceId,
}

struct StreamingTask {
    client: Arc<dyn ObjectClient>,
    enable: bool,
}

#[async_trait]
impl Task for StreamingTask {
    async fn perform(&self, params: &str) -> Result<String> {
        let task = if self.enable {
            ENABLE_STREAMING
        } else {
            DISABLE_STREAMING
        };
        let params: SpaceParams = parse_params(task, params)?;
        let space = params.space_id.as_str();

        let mut properties = self.client.container_info(space).await?.properties;
        if self.enable {
            properties.insert(STREAMING_PROPERTY.to_string(), "enabled".to_string());
        } else {
            properties.remove(STREAMING_PROPERTY);
        }
        self.client.set_container_properties(space, properties).await?;

        info!(space, streaming = self.enable, "Streaming change accepted");
        Ok(serde_json::json!({
            "status": "accepted",
            "space_id": space,
            "streaming": self.enable,
        })
        .to_string())
    }
}

/// State of one integrity scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScanStatus {
    /// Still walking the space.
    Running { checked: u64 },
    /// Every object was re-read.
    Completed { checked: u64, corrupt: Vec<String> },
    /// The scan stopped on a backend error.
    Failed { checked: u64, error: String },
}

/// Finished scans kept for polling before the oldest are dropped.
const MAX_FINISHED_SCANS: usize = 64;

impl ScanStatus {
    fn is_finished(&self) -> bool {
        !matches!(self, ScanStatus::Running { .. })
    }
}

#[derive(Debug, Default)]
struct ScanTable {
    scans: HashMap<String, ScanStatus>,
    /// Finished scan ids, oldest first.
    finished: VecDeque<String>,
}

/// Scan progress by id. A finished scan is dropped once its final status
/// has been read, or when more than [`MAX_FINISHED_SCANS`] are waiting.
#[derive(Debug, Clone, Default)]
struct ScanTracker {
    table: Arc<RwLock<ScanTable>>,
}

impl ScanTracker {
    async fn set(&self, scan_id: &str, status: ScanStatus) {
        let mut table = self.table.write().await;
        if status.is_finished() {
            table.finished.push_back(scan_id.to_string());
            while table.finished.len() > MAX_FINISHED_SCANS {
                if let Some(oldest) = table.finished.pop_front() {
                    table.scans.remove(&oldest);
                }
            }
        }
        table.scans.insert(scan_id.to_string(), status);
    }

    async fn get(&self, scan_id: &str) -> Option<ScanStatus> {
        let mut table = self.table.write().await;
        let finished = table.scans.get(scan_id)?.is_finished();
        if !finished {
            return table.scans.get(scan_id).cloned();
        }
        table.finished.retain(|id| id != scan_id);
        table.scans.remove(scan_id)
    }
}

struct StartScanTask {
    client: Arc<dyn ObjectClient>,
    algorithm: ChecksumAlgorithm,
    tracker: ScanTracker,
}

#[async_trait]
impl Task for StartScanTask {
    async fn perform(&self, params: &str) -> Result<String> {
        let params: SpaceParams = parse_params(START_INTEGRITY_SCAN, params)?;
        let space = params.space_id.to_string();

        // Fail fast on a missing space instead of reporting it asynchronously.
        self.client.container_info(&space).await?;

        let scan_id = Uuid::new_v4().to_string();
        self.tracker
            .set(&scan_id, ScanStatus::Running { checked: 0 })
            .await;

        tokio::spawn(run_scan(
            self.client.clone(),
            self.algorithm,
            self.tracker.clone(),
            space.clone(),
            scan_id.clone(),
        ));

        info!(space = %space, scan_id = %scan_id, "Integrity scan started");
        Ok(serde_json::json!({
            "status": "started",
            "space_id": space,
            "scan_id": scan_id,
        })
        .to_string())
    }
}

async fn run_scan(
    client: Arc<dyn ObjectClient>,
    algorithm: ChecksumAlgorithm,
    tracker: ScanTracker,
    space: String,
    scan_id: String,
) {
    let mut checked = 0u64;
    let mut corrupt = Vec::new();

    let keys = match client.list_objects(&space, None).await {
        Ok(keys) => keys,
        Err(e) => {
            tracker
                .set(&scan_id, ScanStatus::Failed { checked, error: e.to_string() })
                .await;
            return;
        }
    };

    for key in keys {
        match verify_object(client.as_ref(), algorithm, &space, &key).await {
            Ok(()) => {}
            Err(e) if e.is_integrity() => {
                warn!(space = %space, content = %key, error = %e, "Integrity scan found corrupt object");
                corrupt.push(key);
            }
            Err(e) if e.is_not_found() => {
                debug!(space = %space, content = %key, "Object removed during scan");
                continue;
            }
            Err(e) => {
                tracker
                    .set(&scan_id, ScanStatus::Failed { checked, error: e.to_string() })
                    .await;
                return;
            }
        }
        checked += 1;
        tracker.set(&scan_id, ScanStatus::Running { checked }).await;
    }

    info!(space = %space, scan_id = %scan_id, checked, corrupt = corrupt.len(), "Integrity scan finished");
    tracker
        .set(&scan_id, ScanStatus::Completed { checked, corrupt })
        .await;
}

async fn verify_object(
    client: &dyn ObjectClient,
    algorithm: ChecksumAlgorithm,
    space: &str,
    key: &str,
) -> Result<()> {
    let (stream, info) = client.get_object(space, key).await?;
    let expected = Checksum::from_hex(algorithm, &info.checksum)
        .map_err(|e| Error::Integrity(format!("{}/{}: unreadable checksum: {}", space, key, e)))?;

    let mut verifying = ChecksumStream::verifying(stream, expected)
        .with_expected_size(info.size)
        .with_context(format!("{}/{}", space, key));
    while let Some(frame) = verifying.next().await {
        frame?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    scan_id: String,
}

struct GetScanTask {
    tracker: ScanTracker,
}

#[async_trait]
impl Task for GetScanTask {
    async fn perform(&self, params: &str) -> Result<String> {
        let params: ScanParams = parse_params(GET_INTEGRITY_SCAN, params)?;
        let status = self
            .tracker
            .get(&params.scan_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Scan not found: {}", params.scan_id)))?;

        let mut value = serde_json::to_value(&status)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("scan_id".to_string(), params.scan_id.into());
        }
        Ok(value.to_string())
    }
}
