use std::sync::Arc;

use farmlink_store::{ChatStore, StoreError};

/// Run a synchronous store call on the blocking pool.
pub async fn with_store<T, F>(store: &Arc<dyn ChatStore>, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn ChatStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
}
