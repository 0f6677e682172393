use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("store i/o error: {0}")]
    Io(String),
    #[error("index corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
