//! Bounded external calls
//!
//! Every call that leaves the process goes through [`bounded`]. An elapsed
//! timer is reported as the error the call site would otherwise produce.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Default per-call limit
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `future` with a deadline. On expiry `classify` builds the error.
pub async fn bounded<T, F>(
    limit: Duration,
    operation: &str,
    classify: fn(String) -> AppError,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?limit, "External call timed out");
            Err(classify(format!(
                "{} timed out after {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
