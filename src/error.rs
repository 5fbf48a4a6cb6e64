use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiPulseError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("API request failed with status {status} after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CiPulseError>;
