use chrono::{DateTime, Utc};
use solana_client::client_error::ClientError;
use thiserror::Error;

/// Errors crossing the ledger boundary, including outcomes produced by the
/// resilience layer (timeouts, open circuit, exhausted retries).
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// The caller stopped waiting; the call itself may still land
    #[error("Timeout after {timeout_ms}ms ({operation})")]
    Timeout { operation: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded, either remote (429) or the local token bucket
    #[error("Rate limit exceeded ({context})")]
    RateLimited { context: String },

    /// Recent blockhash / reference data expired before the write landed
    #[error("Reference data expired (endpoint: {endpoint})")]
    ReferenceExpired { endpoint: String },

    /// Circuit breaker refused the call without attempting it
    #[error("Circuit breaker open, resets at {resets_at}")]
    CircuitOpen { resets_at: DateTime<Utc> },

    /// Retry budget spent on retryable failures
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<LedgerError>,
    },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request or response payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Fatal errors that should not be retried
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl LedgerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RateLimited { .. } => true,
            LedgerError::ReferenceExpired { .. } => true,

            // Retry on server errors (5xx) and remote throttling
            LedgerError::RpcResponse { code, .. } => match code {
                Some(c) => (500..600).contains(c) || *c == 429,
                None => false,
            },

            LedgerError::CircuitOpen { .. } => false,
            LedgerError::RetriesExhausted { .. } => false,
            LedgerError::InsufficientFunds { .. } => false,
            LedgerError::Unauthorized(_) => false,
            LedgerError::NotFound(_) => false,
            LedgerError::InvalidInput(_) => false,
            LedgerError::Fatal(_) => false,
        }
    }

    /// Whether the circuit breaker refused this call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, LedgerError::CircuitOpen { .. })
    }

    /// Whether this error says the endpoint itself is unhealthy.
    ///
    /// Data errors (undecodable payloads, unknown signatures, rejected
    /// arguments) come back from a working endpoint and leave the breaker alone.
    pub fn counts_against_breaker(&self) -> bool {
        match self.root() {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RateLimited { .. } => true,
            LedgerError::ReferenceExpired { .. } => true,
            LedgerError::Fatal(_) => true,

            LedgerError::RpcResponse { code, .. } => match code {
                Some(c) => (500..600).contains(c) || *c == 429,
                None => true,
            },

            LedgerError::CircuitOpen { .. } => false,
            LedgerError::InsufficientFunds { .. } => false,
            LedgerError::Unauthorized(_) => false,
            LedgerError::NotFound(_) => false,
            LedgerError::InvalidInput(_) => false,
            LedgerError::RetriesExhausted { .. } => true,
        }
    }

    /// Underlying error, looking through a retries-exhausted wrapper
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Classify a Solana client error by its message
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        let message = err.to_string();
        let err_str = message.to_lowercase();

        if err_str.contains("blockhash not found") || err_str.contains("block height exceeded") {
            LedgerError::ReferenceExpired {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("insufficient funds") || err_str.contains("insufficient lamports")
        {
            LedgerError::InsufficientFunds {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            LedgerError::RateLimited {
                context: endpoint.to_string(),
            }
        } else if err_str.contains("401") || err_str.contains("403") || err_str.contains("unauthorized")
        {
            LedgerError::Unauthorized(message)
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            LedgerError::Timeout {
                operation: endpoint.to_string(),
                timeout_ms: 0,
            }
        } else if err_str.contains("connection")
            || err_str.contains("error sending request")
            || err_str.contains("dns")
        {
            LedgerError::Transport {
                endpoint: endpoint.to_string(),
                message,
            }
        } else {
            // 5xx responses surface as "status code: 503" style text
            let code = err_str
                .split("status code:")
                .nth(1)
                .or_else(|| err_str.split("code:").nth(1))
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_matches(|c: char| !c.is_ascii_digit() && c != '-').parse::<i64>().ok());

            LedgerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message,
                code,
            }
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
