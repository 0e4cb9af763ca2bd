use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClvError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No transactions in data source")]
    EmptyDataset,

    #[error("Not enough customers to fit {model}: need {required}, got {found}")]
    InsufficientData {
        model:    &'static str,
        required: usize,
        found:    usize,
    },

    #[error("{model} fit did not converge after {iterations} iterations")]
    FitConvergence {
        model:      &'static str,
        iterations: usize,
    },

    #[error("Model not fitted yet")]
    ModelNotFitted,

    #[error("Customer '{customer_id}' not found")]
    CustomerNotFound { customer_id: String },

    #[error("Customer '{customer_id}' has no transactions")]
    NoTransactionHistory { customer_id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClvError {
    /// Stable category name, used by the runner in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_)                => "database",
            Self::Serialization(_)           => "serialization",
            Self::EmptyDataset               => "empty_dataset",
            Self::InsufficientData { .. }    => "insufficient_data",
            Self::FitConvergence { .. }      => "fit_convergence",
            Self::ModelNotFitted             => "model_not_fitted",
            Self::CustomerNotFound { .. }    => "customer_not_found",
            Self::NoTransactionHistory { .. }=> "no_transaction_history",
            Self::InvalidArgument(_)         => "invalid_argument",
            Self::Config(_)                  => "config",
            Self::Other(_)                   => "other",
        }
    }
}

pub type ClvResult<T> = Result<T, ClvError>;
