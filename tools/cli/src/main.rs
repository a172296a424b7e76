//! SpanStore CLI - Command line interface for content storage.
//!
//! This tool stores, reads and manages content on any configured backend,
//! chunking items that exceed the backend's object size limit.

mod config;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use spanstore_chunking::{ChunkState, ChunkedStore, ChunkedStoreConfig, WriteOptions};
use spanstore_common::{ContentId, Error, SpaceId};
use spanstore_storage::{create_default_registry, ByteStream, NewContent, RetryConfig, DEFAULT_MIMETYPE};

use crate::config::StoreConfig;

#[derive(Parser)]
#[command(name = "spanstore")]
#[command(about = "SpanStore - Checksummed, chunking content storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/spanstore/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend name from the configuration file.
    #[arg(short, long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List spaces.
    Spaces,

    /// Create a space.
    CreateSpace {
        /// Space id.
        space: SpaceId,
    },

    /// Delete a space and everything in it.
    DeleteSpace {
        /// Space id.
        space: SpaceId,
    },

    /// Show space properties.
    SpaceInfo {
        /// Space id.
        space: SpaceId,
    },

    /// List content in a space.
    List {
        /// Space id.
        space: SpaceId,

        /// Only ids starting with this prefix.
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Store a file.
    Put {
        /// Space id.
        space: SpaceId,

        /// Content id.
        id: ContentId,

        /// Source file.
        file: PathBuf,

        /// Content mimetype.
        #[arg(short, long, default_value = DEFAULT_MIMETYPE)]
        mimetype: String,

        /// Expected checksum (hex); the upload fails if it does not match.
        #[arg(long)]
        checksum: Option<String>,
    },

    /// Read content into a file.
    Get {
        /// Space id.
        space: SpaceId,

        /// Content id.
        id: ContentId,

        /// Destination file.
        output: PathBuf,
    },

    /// Show content properties.
    Info {
        /// Space id.
        space: SpaceId,

        /// Content id.
        id: ContentId,
    },

    /// Delete content.
    Delete {
        /// Space id.
        space: SpaceId,

        /// Content id.
        id: ContentId,
    },

    /// Copy content.
    Copy {
        /// Source space id.
        space: SpaceId,

        /// Source content id.
        id: ContentId,

        /// Destination content id.
        dest_id: ContentId,

        /// Destination space id (default: source space).
        #[arg(long)]
        dest_space: Option<SpaceId>,
    },

    /// Remove chunks left behind by an interrupted upload.
    Cleanup {
        /// Space id.
        space: SpaceId,

        /// Content id.
        id: ContentId,
    },

    /// List maintenance tasks the backend supports.
    Tasks,

    /// Run a maintenance task.
    Task {
        /// Task name.
        name: String,

        /// Task parameters (usually JSON).
        #[arg(default_value = "")]
        params: String,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "spanstore", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.unwrap_or_else(StoreConfig::default_path);
    let config = StoreConfig::load(&config_path)?;
    let store = open_store(&config, cli.backend.as_deref()).await?;

    match cli.command {
        Commands::Spaces => cmd_spaces(&store).await,
        Commands::CreateSpace { space } => cmd_create_space(&store, &space).await,
        Commands::DeleteSpace { space } => cmd_delete_space(&store, &space).await,
        Commands::SpaceInfo { space } => cmd_space_info(&store, &space).await,
        Commands::List { space, prefix } => cmd_list(&store, &space, prefix.as_deref()).await,
        Commands::Put {
            space,
            id,
            file,
            mimetype,
            checksum,
        } => cmd_put(&store, &space, &id, &file, mimetype, checksum).await,
        Commands::Get { space, id, output } => cmd_get(&store, &space, &id, &output).await,
        Commands::Info { space, id } => cmd_info(&store, &space, &id).await,
        Commands::Delete { space, id } => cmd_delete(&store, &space, &id).await,
        Commands::Copy {
            space,
            id,
            dest_id,
            dest_space,
        } => {
            let dest_space = dest_space.unwrap_or_else(|| space.clone());
            cmd_copy(&store, &space, &id, &dest_space, &dest_id).await
        }
        Commands::Cleanup { space, id } => cmd_cleanup(&store, &space, &id).await,
        Commands::Tasks => cmd_tasks(&store),
        Commands::Task { name, params } => cmd_task(&store, &name, &params).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Log to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn open_store(config: &StoreConfig, backend: Option<&str>) -> Result<ChunkedStore> {
    let adapter = config.backend(backend)?;
    let retry = RetryConfig::from(&adapter.retry);
    let provider_type = adapter.provider_type.clone();
    debug!(provider = %provider_type, "Resolving backend");

    let provider = create_default_registry()
        .resolve(adapter)
        .await
        .with_context(|| format!("Failed to open '{}' backend", provider_type))?;

    let store = ChunkedStore::new(
        provider,
        ChunkedStoreConfig {
            chunk_size: config.chunk_size,
            retry,
            verify_total: config.verify_total,
        },
    )?;
    Ok(store)
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; stopping after the current chunk");
            child.cancel();
        }
    });
    token
}

async fn cmd_spaces(store: &ChunkedStore) -> Result<()> {
    let spaces = store
        .provider()
        .list_spaces()
        .await
        .context("Failed to list spaces")?;

    if spaces.is_empty() {
        println!("No spaces.");
    }
    for space in spaces {
        println!("{}", space);
    }
    Ok(())
}

async fn cmd_create_space(store: &ChunkedStore, space: &SpaceId) -> Result<()> {
    store
        .provider()
        .create_space(space)
        .await
        .context("Failed to create space")?;
    println!("Space created: {}", space);
    Ok(())
}

async fn cmd_delete_space(store: &ChunkedStore, space: &SpaceId) -> Result<()> {
    store
        .provider()
        .delete_space(space)
        .await
        .context("Failed to delete space")?;
    println!("Space deleted: {}", space);
    Ok(())
}

async fn cmd_space_info(store: &ChunkedStore, space: &SpaceId) -> Result<()> {
    let props = store
        .provider()
        .get_space_properties(space)
        .await
        .context("Failed to read space properties")?;

    println!("Space Information:");
    println!("  ID: {}", space);
    println!("  Created: {}", props.created);
    println!("  Stored items: {}", props.count);
    for (key, value) in &props.properties {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

async fn cmd_list(store: &ChunkedStore, space: &SpaceId, prefix: Option<&str>) -> Result<()> {
    let ids = store
        .list_content(space, prefix)
        .await
        .context("Failed to list content")?;

    if ids.is_empty() {
        println!("Space is empty.");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

async fn cmd_put(
    store: &ChunkedStore,
    space: &SpaceId,
    id: &ContentId,
    file: &Path,
    mimetype: String,
    checksum: Option<String>,
) -> Result<()> {
    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let size = source.metadata().await?.len();
    let stream: ByteStream = Box::pin(ReaderStream::new(source).map(|frame| frame.map_err(Error::from)));

    let mut new = NewContent::new(size).with_mimetype(mimetype);
    if let Some(checksum) = checksum {
        new = new.with_checksum(checksum);
    }

    let (progress, mut states) = watch::channel(ChunkState::Pending);
    let reporter = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            if let ChunkState::Uploading { ordinal, count } = *states.borrow_and_update() {
                info!("Uploading chunk {}/{}", ordinal + 1, count);
            }
        }
    });

    let options = WriteOptions {
        progress: Some(progress),
        cancel: cancel_on_interrupt(),
    };
    let result = store.add_content_with(space, id, stream, new, options).await;
    let _ = reporter.await;

    let checksum = match result {
        Ok(checksum) => checksum,
        Err(e) => {
            if let Some(last) = e.last_completed() {
                eprintln!(
                    "Chunks up to {} were stored; run `spanstore cleanup {} {}` to remove them.",
                    last, space, id
                );
            }
            return Err(e).context("Failed to store content");
        }
    };

    let chunked = store.is_chunked(space, id).await?;
    println!("Stored {}/{} ({} bytes)", space, id, size);
    println!("  Checksum: {}", checksum);
    if chunked {
        println!("  Chunked: yes");
    }
    Ok(())
}

async fn cmd_get(store: &ChunkedStore, space: &SpaceId, id: &ContentId, output: &Path) -> Result<()> {
    let mut content = store
        .get_content(space, id)
        .await
        .context("Failed to open content")?;
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut written = 0u64;
    let copied = async {
        while let Some(frame) = content.stream.next().await {
            let frame = frame?;
            file.write_all(&frame).await?;
            written += frame.len() as u64;
        }
        file.flush().await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = copied {
        drop(file);
        let _ = tokio::fs::remove_file(output).await;
        return Err(e).context("Failed to read content");
    }

    println!("Wrote {} ({} bytes)", output.display(), written);
    Ok(())
}

async fn cmd_info(store: &ChunkedStore, space: &SpaceId, id: &ContentId) -> Result<()> {
    let props = store
        .get_content_properties(space, id)
        .await
        .context("Failed to read content properties")?;
    let manifest = store.manifest(space, id).await?;

    println!("Content Information:");
    println!("  ID: {}/{}", space, id);
    println!("  Mimetype: {}", props.mimetype);
    println!("  Size: {} bytes", props.size);
    println!("  Checksum: {}", props.checksum);
    println!("  Modified: {}", props.modified);
    if let Some(manifest) = manifest {
        println!(
            "  Chunks: {} x {} bytes max ({})",
            manifest.chunks.len(),
            manifest.max_chunk_size,
            manifest.algorithm
        );
    }
    for (key, value) in &props.properties {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

async fn cmd_delete(store: &ChunkedStore, space: &SpaceId, id: &ContentId) -> Result<()> {
    store
        .delete_content(space, id)
        .await
        .context("Failed to delete content")?;
    println!("Deleted: {}/{}", space, id);
    Ok(())
}

async fn cmd_copy(
    store: &ChunkedStore,
    space: &SpaceId,
    id: &ContentId,
    dest_space: &SpaceId,
    dest_id: &ContentId,
) -> Result<()> {
    let checksum = store
        .copy_content(space, id, dest_space, dest_id)
        .await
        .context("Failed to copy content")?;
    println!("Copied {}/{} to {}/{}", space, id, dest_space, dest_id);
    println!("  Checksum: {}", checksum);
    Ok(())
}

async fn cmd_cleanup(store: &ChunkedStore, space: &SpaceId, id: &ContentId) -> Result<()> {
    let removed = store
        .cleanup_chunks(space, id)
        .await
        .context("Failed to clean up chunks")?;
    println!("Removed {} orphaned chunk(s) of {}/{}", removed, space, id);
    Ok(())
}

fn cmd_tasks(store: &ChunkedStore) -> Result<()> {
    for task in store.provider().supported_tasks() {
        println!("{}", task);
    }
    Ok(())
}

async fn cmd_task(store: &ChunkedStore, name: &str, params: &str) -> Result<()> {
    let result = store
        .provider()
        .perform_task(name, params)
        .await
        .with_context(|| format!("Task '{}' failed", name))?;
    println!("{}", result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_put() {
        let cli = Cli::try_parse_from([
            "spanstore", "--backend", "archive", "put", "media", "clip.mp4", "/tmp/clip.mp4",
            "--mimetype", "video/mp4",
        ])
        .unwrap();
        assert_eq!(cli.backend.as_deref(), Some("archive"));
        match cli.command {
            Commands::Put { space, id, mimetype, .. } => {
                assert_eq!(space.as_str(), "media");
                assert_eq!(id.as_str(), "clip.mp4");
                assert_eq!(mimetype, "video/mp4");
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn test_invalid_space_rejected() {
        assert!(Cli::try_parse_from(["spanstore", "create-space", "Bad_Name"]).is_err());
    }

    #[tokio::test]
    async fn test_store_from_config() {
        let temp = tempfile::TempDir::new().unwrap();
        let raw = serde_json::json!({
            "chunk_size": 16,
            "backends": {
                "disk": { "provider_type": "local", "options": { "root": temp.path() } }
            }
        })
        .to_string();
        let config = StoreConfig::parse(&raw).unwrap();

        let store = open_store(&config, None).await.unwrap();
        assert_eq!(store.effective_chunk_size(), 16);
        assert_eq!(store.provider().name(), "local");
    }
}
