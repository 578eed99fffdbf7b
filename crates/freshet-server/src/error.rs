use thiserror::Error;

/// Errors raised by the deployment layer (Redis, HTTP, configuration).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] freshet_core::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unexpected reply from {script}: {message}")]
    UnexpectedReply {
        script: &'static str,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    pub fn unexpected_reply(script: &'static str, message: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            script,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<rmp_serde::encode::Error> for ServerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ServerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Classify for the retrying fetcher: transport failures may be retried,
/// everything else fails fast.
impl From<ServerError> for freshet_core::Error {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Core(inner) => inner,
            ServerError::Redis(ref inner) if is_transient_redis(inner) => {
                freshet_core::Error::transient(e.to_string())
            }
            ServerError::Pool(_) => freshet_core::Error::transient(e.to_string()),
            ServerError::Http(ref inner) if is_transient_http(inner) => {
                freshet_core::Error::transient(e.to_string())
            }
            ServerError::UnexpectedReply { .. } | ServerError::Codec(_) => {
                // A malformed reply is treated like a flaky upstream.
                freshet_core::Error::transient(e.to_string())
            }
            other => freshet_core::Error::permanent(other.to_string()),
        }
    }
}

fn is_transient_redis(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn is_transient_http(e: &reqwest::Error) -> bool {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        return true;
    }
    e.status().is_some_and(|s| s.is_server_error())
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_pass_through_unchanged() {
        let err: freshet_core::Error =
            ServerError::Core(freshet_core::Error::permanent("401 unauthorized")).into();
        assert!(matches!(err, freshet_core::Error::Permanent(_)));
    }

    #[test]
    fn malformed_replies_are_retryable() {
        let err: freshet_core::Error =
            ServerError::unexpected_reply("bulk_fetch_tickers", "odd number of elements").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("bulk_fetch_tickers"));
    }

    #[test]
    fn config_errors_are_permanent() {
        let err: freshet_core::Error = ServerError::config("missing url").into();
        assert!(!err.is_retryable());
    }
}
