//! Generic backend adapter.
//!
//! One [`BackendAdapter`] implementation serves every backend: the
//! vendor-specific part lives in an [`ObjectClient`], everything else
//! (checksum enforcement, retries, task dispatch) is driven by
//! [`AdapterConfig`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use spanstore_common::{ContentId, Error, Properties, Result, SpaceId};

use crate::checksum::{Checksum, ChecksumAlgorithm, ChecksumStream};
use crate::client::{AuthContext, ObjectClient, ObjectUpload};
use crate::maintenance::{register_maintenance, MaintenanceGroup};
use crate::provider::{
    ByteStream, Content, ContentProperties, NewContent, SpaceProperties, StorageProvider,
};
use crate::retry::{RetryConfig, RetryExecutor, RetrySettings};
use crate::tasks::TaskRegistry;

/// Default largest single object: 5 GiB.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Account credentials for a backend.
///
/// Cleared from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Secret.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn default_max_object_size() -> u64 {
    DEFAULT_MAX_OBJECT_SIZE
}

/// Configuration for one adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Provider-type tag (e.g., "memory", "local").
    pub provider_type: String,
    /// Authentication endpoint.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Account credentials.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Largest single object the backend accepts.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Digest used for stored checksums.
    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Retry policy for idempotent backend calls.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Maintenance task groups to expose.
    #[serde(default)]
    pub maintenance: Vec<MaintenanceGroup>,
    /// Client-specific options (e.g., local `root`).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl AdapterConfig {
    /// Configuration with defaults for `provider_type`.
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            auth_url: None,
            credentials: None,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            checksum_algorithm: ChecksumAlgorithm::default(),
            retry: RetrySettings::default(),
            maintenance: Vec::new(),
            options: serde_json::Value::Null,
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the largest single object size.
    pub fn with_max_object_size(mut self, size: u64) -> Self {
        self.max_object_size = size;
        self
    }

    /// Set the checksum algorithm.
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    /// Set retry settings.
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Enable maintenance task groups.
    pub fn with_maintenance(mut self, groups: impl IntoIterator<Item = MaintenanceGroup>) -> Self {
        self.maintenance.extend(groups);
        self
    }

    /// Set a client-specific option.
    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.options.is_object() {
            self.options = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(options) = self.options.as_object_mut() {
            options.insert(key.to_string(), value.into());
        }
        self
    }

    /// Read a string option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.provider_type.is_empty() {
            return Err(Error::InvalidInput("provider_type cannot be empty".to_string()));
        }
        if self.max_object_size == 0 {
            return Err(Error::InvalidInput(
                "max_object_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// [`StorageProvider`] over any [`ObjectClient`].
pub struct BackendAdapter<C: ObjectClient + 'static> {
    config: AdapterConfig,
    client: Arc<C>,
    tasks: TaskRegistry,
    retry: RetryExecutor,
}

impl<C: ObjectClient + 'static> BackendAdapter<C> {
    /// Build an adapter without contacting the backend.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: AdapterConfig, client: C) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(client);

        let mut tasks = TaskRegistry::new();
        register_maintenance(
            &mut tasks,
            client.clone(),
            config.checksum_algorithm,
            &config.maintenance,
        )?;
        let retry = RetryExecutor::new(RetryConfig::from(&config.retry));

        Ok(Self {
            config,
            client,
            tasks,
            retry,
        })
    }

    /// Build an adapter and authenticate against the backend.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - `Authentication` if the backend rejects the credentials
    pub async fn connect(config: AdapterConfig, client: C) -> Result<Self> {
        let adapter = Self::new(config, client)?;
        adapter.authenticate().await?;
        Ok(adapter)
    }

    /// Authenticate with the configured credentials.
    pub async fn authenticate(&self) -> Result<()> {
        let auth = AuthContext {
            auth_url: self.config.auth_url.as_deref(),
            credentials: self.config.credentials.as_ref(),
        };
        self.client.authenticate(auth).await?;
        debug!(provider = %self.config.provider_type, "Authenticated");
        Ok(())
    }

    /// Adapter configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Underlying object client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Task registry, for registering extra handlers.
    pub fn tasks_mut(&mut self) -> &mut TaskRegistry {
        &mut self.tasks
    }

    async fn discard(&self, space: &SpaceId, id: &ContentId) {
        if let Err(e) = self.client.delete_object(space.as_str(), id.as_str()).await {
            warn!(space = %space, content = %id, error = %e, "Failed to remove rejected upload");
        }
    }
}

#[async_trait]
impl<C: ObjectClient + 'static> StorageProvider for BackendAdapter<C> {
    fn name(&self) -> &str {
        &self.config.provider_type
    }

    fn max_object_size(&self) -> u64 {
        self.config.max_object_size
    }

    fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.config.checksum_algorithm
    }

    async fn list_spaces(&self) -> Result<Vec<SpaceId>> {
        let client = &self.client;
        let names = self.retry.execute(move || client.list_containers()).await?;
        Ok(names
            .into_iter()
            .filter_map(|name| match SpaceId::new(&name) {
                Ok(space) => Some(space),
                Err(_) => {
                    debug!(container = %name, "Skipping container with non-portable name");
                    None
                }
            })
            .collect())
    }

    async fn create_space(&self, space: &SpaceId) -> Result<()> {
        self.client.create_container(space.as_str()).await?;
        info!(space = %space, "Space created");
        Ok(())
    }

    async fn delete_space(&self, space: &SpaceId) -> Result<()> {
        self.client.delete_container(space.as_str()).await?;
        info!(space = %space, "Space deleted");
        Ok(())
    }

    async fn space_exists(&self, space: &SpaceId) -> Result<bool> {
        match self.get_space_properties(space).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_space_properties(&self, space: &SpaceId) -> Result<SpaceProperties> {
        let client = &self.client;
        let name = space.as_str();
        let info = self
            .retry
            .execute(move || client.container_info(name))
            .await?;
        Ok(info.into())
    }

    async fn set_space_properties(&self, space: &SpaceId, properties: Properties) -> Result<()> {
        self.client
            .set_container_properties(space.as_str(), properties)
            .await
    }

    async fn list_content(&self, space: &SpaceId, prefix: Option<&str>) -> Result<Vec<ContentId>> {
        let client = &self.client;
        let name = space.as_str();
        let keys = self
            .retry
            .execute(move || client.list_objects(name, prefix))
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| ContentId::new(key).ok())
            .collect())
    }

    async fn add_content(
        &self,
        space: &SpaceId,
        id: &ContentId,
        content: ByteStream,
        new: NewContent,
    ) -> Result<String> {
        if new.size > self.config.max_object_size {
            return Err(Error::InvalidInput(format!(
                "{} bytes exceeds the {} byte object limit of '{}'",
                new.size, self.config.max_object_size, self.config.provider_type
            )));
        }

        let algorithm = self.config.checksum_algorithm;
        let context = format!("{}/{}", space, id);
        let stream = match &new.checksum {
            Some(hex) => ChecksumStream::verifying(
                content,
                Checksum::from_hex(algorithm, &hex.to_ascii_lowercase())?,
            ),
            None => ChecksumStream::computing(content, algorithm),
        }
        .with_expected_size(new.size)
        .with_context(context.clone());
        let handle = stream.handle();

        let upload = ObjectUpload {
            mimetype: new.mimetype,
            properties: new.properties,
            algorithm,
        };
        let stored = self
            .client
            .put_object(space.as_str(), id.as_str(), stream.boxed(), upload)
            .await?;

        let Some(sent) = handle.hex() else {
            self.discard(space, id).await;
            return Err(Error::Integrity(format!(
                "{}: backend committed before end of stream",
                context
            )));
        };
        if stored.checksum != sent {
            self.discard(space, id).await;
            return Err(Error::ChecksumMismatch {
                context,
                expected: sent,
                actual: stored.checksum,
            });
        }

        info!(space = %space, content = %id, size = stored.size, "Content stored");
        Ok(stored.checksum)
    }

    async fn get_content(&self, space: &SpaceId, id: &ContentId) -> Result<Content> {
        let client = &self.client;
        let (name, key) = (space.as_str(), id.as_str());
        let (stream, info) = self
            .retry
            .execute(move || client.get_object(name, key))
            .await?;
        Ok(Content {
            stream,
            properties: info.into(),
        })
    }

    async fn get_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
    ) -> Result<ContentProperties> {
        let client = &self.client;
        let (name, key) = (space.as_str(), id.as_str());
        let info = self
            .retry
            .execute(move || client.head_object(name, key))
            .await?;
        Ok(info.into())
    }

    async fn set_content_properties(
        &self,
        space: &SpaceId,
        id: &ContentId,
        properties: Properties,
    ) -> Result<()> {
        self.client
            .set_object_properties(space.as_str(), id.as_str(), properties)
            .await
    }

    async fn delete_content(&self, space: &SpaceId, id: &ContentId) -> Result<()> {
        self.client
            .delete_object(space.as_str(), id.as_str())
            .await?;
        info!(space = %space, content = %id, "Content deleted");
        Ok(())
    }

    async fn copy_content(
        &self,
        src_space: &SpaceId,
        src_id: &ContentId,
        dst_space: &SpaceId,
        dst_id: &ContentId,
    ) -> Result<String> {
        let info = self
            .client
            .copy_object(
                src_space.as_str(),
                src_id.as_str(),
                dst_space.as_str(),
                dst_id.as_str(),
            )
            .await?;
        info!(
            from = %format!("{}/{}", src_space, src_id),
            to = %format!("{}/{}", dst_space, dst_id),
            "Content copied"
        );
        Ok(info.checksum)
    }

    fn supported_tasks(&self) -> Vec<String> {
        self.tasks.names()
    }

    async fn perform_task(&self, name: &str, params: &str) -> Result<String> {
        self.tasks.perform(name, params).await
    }
}
