use crate::rpc_manager::{LedgerError, LedgerResult};
use std::future::Future;
use std::time::Duration;

/// Race `operation` against a timer.
///
/// On timeout the caller stops waiting and gets `LedgerError::Timeout`. The
/// underlying request is not cancelled on the remote side: a write that
/// already reached the ledger may still land. Callers get at-most-once
/// attempt semantics per invocation, never exactly-once.
pub async fn with_timeout<Fut, T>(operation: &str, limit: Duration, fut: Fut) -> LedgerResult<T>
where
    Fut: Future<Output = LedgerResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
