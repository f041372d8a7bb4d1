// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deadlines for durable I/O.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::metrics;
use crate::storage::traits::StorageError;

/// Run a storage future, failing with [`StorageError::Timeout`] once `after` elapses.
pub async fn with_deadline<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?after, "Storage operation timed out");
            metrics::record_timeout(operation);
            Err(StorageError::Timeout { operation, after })
        }
    }
}
