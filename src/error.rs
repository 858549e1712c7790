use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("inspection failed: {0}")]
    Inspection(String),

    #[error("hardware detection failed: {0}")]
    Hardware(String),

    #[error("ffmpeg failed: {message}")]
    Ffmpeg {
        message: String,
        command: Vec<String>,
        stderr: String,
    },

    #[error("process exceeded timeout of {seconds}s")]
    Timeout { seconds: f64 },

    #[error("transcoding failed: {0}")]
    Transcoding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    NonRetryable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(format!("JSON serialization failed: {e}"))
    }
}

impl Error {
    pub fn ffmpeg(message: impl Into<String>, command: &[String], stderr: impl Into<String>) -> Self {
        Error::Ffmpeg {
            message: message.into(),
            command: command.to_vec(),
            stderr: stderr.into(),
        }
    }

    /// Errors that should stop a retry loop immediately.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Error::NonRetryable(_))
    }
}
