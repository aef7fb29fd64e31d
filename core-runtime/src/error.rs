use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
