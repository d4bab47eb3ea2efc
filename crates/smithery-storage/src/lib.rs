pub mod entities;
pub mod metrics;
pub mod sqlite;
pub mod visibility;

pub use metrics::{
    MemoryMetricsStore, MetricsFilter, MetricsStore, MetricsSummary, TokenUsage, parse_time_param,
};
pub use sqlite::SqliteMetricsStore;
pub use visibility::{ModelVisibilityStore, VisibilityDescription};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid time value: {0}")]
    InvalidTime(String),
}
