use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A mutation referenced a ledger line outside the import it
    /// targets. Silently skipping such references would leave the
    /// caller believing the edit applied, so it aborts the batch.
    #[error("line {line_id} does not belong to import {import_id}")]
    ForeignLine { line_id: i64, import_id: i64 },

    #[error("line {line_id} does not carry fund code {fund_code:?}")]
    WrongFund { line_id: i64, fund_code: String },

    #[error("invalid fund rule pattern {pattern:?}: {source}")]
    InvalidRulePattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub(crate) fn corrupt(what: impl std::fmt::Display) -> Self {
        StorageError::Corrupt(what.to_string())
    }
}
