use std::sync::Arc;

use tracing::error;

use nightlife_db::Database;

use crate::error::{ApiError, ApiResult};

/// Run a blocking store call on the blocking pool.
///
/// `op` names the operation in logs. Store failures become
/// `StorageUnavailable`; the underlying error is logged, never returned.
pub async fn run<F, T>(db: &Arc<Database>, op: &'static str, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error in {}: {}", op, e);
            ApiError::Internal("Internal server error.".into())
        })?
        .map_err(|e| {
            error!("Storage failure in {}: {:#}", op, e);
            ApiError::StorageUnavailable("Storage is temporarily unavailable.".into())
        })
}
