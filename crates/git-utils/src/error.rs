/// Base error type for git-utils operations.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("date parse error: {0}")]
    DateParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
