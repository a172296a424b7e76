//! Storage provider abstraction for SpanStore.
//!
//! This crate defines the uniform [`StorageProvider`] contract, a generic
//! [`BackendAdapter`] that implements it over any [`ObjectClient`], and the
//! checksum, retry and task machinery shared by every backend.
//!
//! # Design Principles
//! - Provider isolation: vendor logic stays behind [`ObjectClient`]
//! - Async operations: All I/O operations are async
//! - Streaming support: content moves as byte streams, hashed in flight
//! - Unified error semantics: Consistent error types across providers

pub mod adapter;
pub mod checksum;
pub mod client;
pub mod local;
pub mod maintenance;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod tasks;

pub use adapter::{AdapterConfig, BackendAdapter, Credentials, DEFAULT_MAX_OBJECT_SIZE};
pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumHandle, ChecksumStream, Checksummer};
pub use client::{AuthContext, ContainerInfo, ObjectClient, ObjectInfo, ObjectUpload};
pub use local::LocalClient;
pub use maintenance::{MaintenanceGroup, ScanStatus};
pub use memory::MemoryClient;
pub use provider::{
    frames, read_to_bytes, ByteStream, Content, ContentProperties, DataSource, NewContent,
    SpaceProperties, StorageProvider, DEFAULT_FRAME_SIZE, DEFAULT_MIMETYPE,
};
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use retry::{RetryConfig, RetryExecutor, RetrySettings};
pub use tasks::{Task, TaskHandler, TaskRegistry, NOOP_TASK};

/// Adapter over the in-memory client.
pub type MemoryProvider = BackendAdapter<MemoryClient>;

/// Adapter over the local filesystem client.
pub type LocalProvider = BackendAdapter<LocalClient>;
