use thiserror::Error;

#[derive(Debug, Error)]
pub enum SodalisError {
    #[error("empty embedding vector")]
    EmptyVector,
}

pub type Result<T> = std::result::Result<T, SodalisError>;
