use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParzError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid compression level: {0} (valid levels are 0-12)")]
    InvalidLevel(u32),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(String),

    #[error("Invalid thread count: {0}")]
    InvalidThreads(String),

    #[error("Invalid gzip data at byte {offset}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("Unexpected end of gzip stream at byte {offset} ({written} bytes written)")]
    PrematureEnd { offset: u64, written: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("WalkDir error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

impl ParzError {
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        ParzError::Config(msg.to_string())
    }

    pub fn invalid_argument<T: fmt::Display>(msg: T) -> Self {
        ParzError::InvalidArgument(msg.to_string())
    }

    pub fn format<T: fmt::Display>(offset: u64, reason: T) -> Self {
        ParzError::Format {
            offset,
            reason: reason.to_string(),
        }
    }

    /// True for errors that mean the compressed data itself is bad,
    /// as opposed to I/O or configuration problems.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            ParzError::Format { .. } | ParzError::PrematureEnd { .. }
        )
    }
}

pub type ParzResult<T> = Result<T, ParzError>;
