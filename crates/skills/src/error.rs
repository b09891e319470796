use std::{error::Error as StdError, fmt};

use serde::Serialize;

/// Machine-readable failure codes surfaced by the import flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorCode {
    /// Identifier or name already taken for the user.
    Conflict,
    /// Source location could not be parsed.
    InvalidUrl,
    /// Remote repository or archive does not exist.
    NotFound,
    /// Fetch failed for any other reason.
    DownloadFailed,
}

impl ImportErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "CONFLICT",
            Self::InvalidUrl => "INVALID_URL",
            Self::NotFound => "NOT_FOUND",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
        }
    }
}

impl fmt::Display for ImportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Import {
        code: ImportErrorCode,
        message: String,
    },
    #[error("Resource not found: {path}")]
    ResourceNotFound { path: String },
    #[error("skill not found: {id}")]
    SkillNotFound { id: String },
    #[error("skill with identifier \"{identifier}\" already exists")]
    DuplicateIdentifier { identifier: String },
    #[error("{message}")]
    InvalidInput { message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn import(code: ImportErrorCode, message: impl Into<String>) -> Self {
        Self::Import {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::import(ImportErrorCode::Conflict, message)
    }

    #[must_use]
    pub fn resource_not_found(path: impl Into<String>) -> Self {
        Self::ResourceNotFound { path: path.into() }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Import code carried by this error, if it belongs to the import
    /// taxonomy. A duplicate identifier rejected by the catalog counts as a
    /// conflict.
    pub fn code(&self) -> Option<ImportErrorCode> {
        match self {
            Self::Import { code, .. } => Some(*code),
            Self::DuplicateIdentifier { .. } => Some(ImportErrorCode::Conflict),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
