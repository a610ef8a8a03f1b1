use thiserror::Error;

/// Errors raised while restructuring a document.
///
/// Nothing is written to the output until every stage succeeded, so any of these
/// leaves the source document untouched.
#[derive(Debug, Error)]
pub enum TocError {
    /// Malformed entries or configuration. Generation stops before any page is inserted.
    #[error("Invalid input: {0}")]
    Input(String),

    /// A required font could not be loaded.
    #[error("Font unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TocError {
    pub fn input(message: impl Into<String>) -> Self {
        TocError::Input(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TocError>;

/// Outcome of a failed or abandoned page render.
///
/// `Clone` so one result can be handed to every caller waiting on the same page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Failed to render page {page}: {reason}")]
    Failed { page: u32, reason: String },

    /// The render was superseded or the queue was cleared.
    #[error("Render cancelled")]
    Cancelled,
}
