use esq_core::CompileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("connection '{0}' not found")]
    UnknownConnection(String),

    #[error("no previous query to paginate")]
    NoPreviousQuery,

    #[error("page {0} is out of range")]
    InvalidPage(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Failures of the backend round-trip, worth a user-visible retry.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http { .. })
    }
}
