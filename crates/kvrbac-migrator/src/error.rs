use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("config error: {0}")]
    Config(#[from] kvrbac_config::ConfigError),

    #[error("unable to retrieve accessible subscriptions: {0}")]
    Subscriptions(#[from] kvrbac_directory::DirectoryError),

    #[error("no accessible subscriptions; check the signed-in identity")]
    NoSubscriptions,

    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json export error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("identity is blank")]
    Blank,

    #[error("identity not found: {0}")]
    NotFound(String),
}
