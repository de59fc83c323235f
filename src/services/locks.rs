//! Single-writer-per-document serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async mutex: at most one holder per document id at a time.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Releases the document lock when dropped.
#[derive(Debug)]
pub struct DocumentGuard {
    document_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl DocumentGuard {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, document_id: &str) -> DocumentGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the map still references are idle.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(document_id.to_string()).or_default().clone()
        };

        DocumentGuard {
            document_id: document_id.to_string(),
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of ids currently locked or waited on.
    pub fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|slot| Arc::strong_count(slot) > 1).count()
    }
}
