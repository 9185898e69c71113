// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Stampvault

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ExpertStatus;

/// Result type alias for Stampvault operations
pub type Result<T> = std::result::Result<T, StampvaultError>;

/// Stampvault error types
#[derive(Error, Debug)]
pub enum StampvaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Stored collection is unreadable: {0}")]
    StorageLoad(String),

    #[error("No stamp with id {0}")]
    NotFound(String),

    #[error("A stamp with id {0} is already in the collection")]
    DuplicateId(String),

    #[error("No scan item with id {0}")]
    ScanItemNotFound(String),

    #[error("Cannot move stamp {id} from '{from}' to '{to}'")]
    InvalidTransition {
        id: String,
        from: ExpertStatus,
        to: ExpertStatus,
    },
}

/// Failures reported by the analysis service boundary.
///
/// Classified once where the HTTP response is read; callers match on the
/// variant and never inspect the message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("API key rejected or lacks the required entitlement")]
    AuthInvalid,

    #[error("Rate limit or quota exhausted")]
    QuotaExhausted,

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
}

impl AnalysisError {
    /// Auth and quota failures stop a batch; everything else is per item
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, AnalysisError::AuthInvalid | AnalysisError::QuotaExhausted)
    }

    /// Stable code attached to failed scan items
    pub fn code(&self) -> ErrorCode {
        match self {
            AnalysisError::AuthInvalid => ErrorCode::KeyInvalid,
            AnalysisError::QuotaExhausted => ErrorCode::QuotaExhausted,
            AnalysisError::AnalysisFailed(_) => ErrorCode::AnalysisFailed,
        }
    }

    /// What the user should do about it
    pub fn hint(&self) -> &'static str {
        match self {
            AnalysisError::AuthInvalid => {
                "Check the API_KEY environment variable; the key must belong to a project with billing enabled"
            }
            AnalysisError::QuotaExhausted => "Wait a minute before scanning again",
            AnalysisError::AnalysisFailed(_) => "Retry the scan or add hints such as the country or catalog number",
        }
    }
}

/// Per-file ingestion failures; never abort the rest of the batch
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{path:?} is {size} bytes, above the {limit} byte limit")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Cannot read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn path(&self) -> &PathBuf {
        match self {
            IngestError::FileTooLarge { path, .. } => path,
            IngestError::Unreadable { path, .. } => path,
        }
    }
}

/// Error code stored on a scan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    KeyInvalid,
    QuotaExhausted,
    AnalysisFailed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::KeyInvalid => "KEY_INVALID",
            ErrorCode::QuotaExhausted => "QUOTA_EXHAUSTED",
            ErrorCode::AnalysisFailed => "ANALYSIS_FAILED",
        };
        f.write_str(s)
    }
}
