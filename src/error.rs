use thiserror::Error;

/// When things go awry.
///
/// Per-query failures (`WireParse`, `Upstream`, `PowerInternal`) are never
/// fatal to the listener; only `Configuration` and `Bind` errors, surfaced
/// during startup, end the process (see SPEC_FULL.md §7).
#[derive(Debug, Error)]
pub enum SuperpowersError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("bind error: {0}")]
    Bind(#[source] std::io::Error),

    #[error("wire parse error: {0}")]
    WireParse(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("power error: {0}")]
    PowerInternal(String),

    #[error("refresh error: {0}")]
    Refresh(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl From<SuperpowersError> for std::io::Error {
    fn from(error: SuperpowersError) -> Self {
        match error {
            SuperpowersError::Io(err) => err,
            SuperpowersError::Bind(err) => err,
            other => std::io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SuperpowersError>;
