use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-store engines. Each store gets its own engine, ledger file
/// and notify hub. Store = database name from the pgwire connection.
pub struct StoreDirectory {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
}

impl StoreDirectory {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
        }
    }

    /// Get or lazily create an engine for the given store.
    pub fn get_or_create(&self, store: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(store) {
            return Ok(engine.value().clone());
        }
        if store.len() > MAX_STORE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "store name too long",
            ));
        }
        if self.engines.len() >= MAX_STORES {
            return Err(std::io::Error::other("too many stores"));
        }

        // Sanitize store name to prevent path traversal
        let safe_name: String = store
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty store name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        self.engines.insert(store.to_string(), engine.clone());
        metrics::gauge!(crate::observability::STORES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
