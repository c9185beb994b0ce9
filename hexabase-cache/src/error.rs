use hexabase_common::error::{ErrorKind, HexabaseError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("value failed to (de)serialize: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

impl From<CacheError> for HexabaseError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Backend(msg) => {
                HexabaseError::new(ErrorKind::UpstreamRetryable, "CACHE_BACKEND_ERROR", msg)
            }
            CacheError::Codec(msg) => HexabaseError::new(ErrorKind::Internal, "CACHE_CODEC_ERROR", msg),
        }
    }
}
