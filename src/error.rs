use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Domain error taxonomy. Every failure surfaces with enough context
/// (entity id, field name, variable name) for an actionable message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("template render error: {0}")]
    TemplateRender(String),

    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }
}
