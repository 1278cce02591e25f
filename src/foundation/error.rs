/// Convenience result type used across Aperio.
pub type AperioResult<T> = Result<T, AperioError>;

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum AperioError {
    /// Invalid configuration or request data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors in the capture/synchronization layer.
    #[error("capture error: {0}")]
    Capture(String),

    /// Errors while compositing a frame.
    #[error("composition error: {0}")]
    Composition(String),

    /// Errors in the export/encode path.
    #[error("export error: {0}")]
    Export(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AperioError {
    /// Build an [`AperioError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build an [`AperioError::Capture`] value.
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Build an [`AperioError::Composition`] value.
    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Build an [`AperioError::Export`] value.
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Build an [`AperioError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
