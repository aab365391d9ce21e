use std::path::Path;
use std::sync::Arc;

use crate::client::{HostPage, HostSnapshot, QueryClient, SnapshotFile, UreqTransport};
use crate::config::ResolvedClientConfig;
use crate::db::{KeyValueStore, SqliteStore};
use crate::error::{AmpooseError, Result};

pub fn open_store(path: &Path) -> Result<Arc<dyn KeyValueStore>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(SqliteStore::open(path)?))
}

/// The page requests are made on behalf of. Without a snapshot file, requests
/// go out with no session state at all.
pub fn host_page(config: &ResolvedClientConfig) -> Arc<dyn HostPage> {
    match &config.host_snapshot {
        Some(path) => {
            if !path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    "host snapshot not found; continuing without it"
                );
            }
            Arc::new(SnapshotFile::new(path))
        }
        None => Arc::new(HostSnapshot::default()),
    }
}

pub fn build_client(config: &ResolvedClientConfig, store: Arc<dyn KeyValueStore>) -> QueryClient {
    let host = host_page(config);
    let transport = UreqTransport::new(config.timeout(), config.user_agent.as_deref())
        .with_host(host.clone());
    QueryClient::new(transport, host, store, config.endpoint_config())
}

pub fn install_ctrlc<F>(handler: F) -> Result<()>
where
    F: Fn() + Send + 'static,
{
    ctrlc::set_handler(handler).map_err(|err| {
        AmpooseError::InvalidArgs(format!("Failed to install Ctrl+C handler: {err}"))
    })
}
