use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnylistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Server binary is not executable: {0}")]
    BinaryPermission(String),

    #[error("List server is not reachable: no server address configured and no local server running")]
    ServerUnavailable,

    #[error("Request to {endpoint} failed with status {status}")]
    RequestFailed { endpoint: String, status: u16 },

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AnylistError>;
