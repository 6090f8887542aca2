//! Error types for the virtual filesystem layer

use russh_sftp::protocol::StatusCode;
use thiserror::Error;

/// Errors surfaced by the filesystem facade and its components.
///
/// Authentication failures are retried once (via the credential prompt)
/// before they reach the caller; everything else propagates directly.
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for VfsError {
    fn from(err: russh::Error) -> Self {
        VfsError::ConnectionFailed(err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for VfsError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        use russh_sftp::client::error::Error as Inner;
        match err {
            Inner::Status(status) if status.status_code == StatusCode::NoSuchFile => {
                VfsError::NotFound(status.error_message)
            }
            Inner::Timeout => VfsError::ConnectionFailed("SFTP request timed out".to_string()),
            other => VfsError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<suppaftp::FtpError> for VfsError {
    fn from(err: suppaftp::FtpError) -> Self {
        use suppaftp::{FtpError, Status};
        match err {
            FtpError::UnexpectedResponse(ref response)
                if response.status == Status::FileUnavailable =>
            {
                VfsError::NotFound(err.to_string())
            }
            other => VfsError::ConnectionFailed(other.to_string()),
        }
    }
}
