// Error types shared by the offline pipeline and the prediction server.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FraudError>;

#[derive(Debug, Error)]
pub enum FraudError {
    /// Input rows that cannot be turned into transactions or features
    #[error("data error at row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("data error: input table is empty")]
    EmptyInput,

    #[error("data error: expected {expected} feature columns, got {actual}")]
    ColumnMismatch { expected: usize, actual: usize },

    /// The density detector needs at least `required` rows to form a neighbourhood
    #[error("configuration error: {required} rows needed for the neighbourhood, only {available} available")]
    InsufficientRows { required: usize, available: usize },

    #[error("fit error: feature column '{column}' has zero variance")]
    ZeroVariance { column: String },

    #[error("fit error: contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("neighbour search failed: {0}")]
    NeighbourSearch(String),

    #[error("bundle error: {0}")]
    Bundle(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("bundle codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl FraudError {
    pub fn invalid_row(row: usize, reason: impl Into<String>) -> Self {
        FraudError::InvalidRow {
            row,
            reason: reason.into(),
        }
    }
}
