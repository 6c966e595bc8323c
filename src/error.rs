use thiserror::Error;

/// Typed error hierarchy for every caller-facing operation.
///
/// Serializes as a plain string so a UI collaborator receives the same
/// `"error message"` string it displays, while Rust code still gets typed
/// variants that can be matched or propagated with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed required field; raised before any write happens.
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

/// Collapse an operation result into the caller's status string:
/// empty on success, the error's message otherwise.
pub fn status_message<T>(result: &Result<T, AppError>) -> String {
    match result {
        Ok(_) => String::new(),
        Err(e) => e.to_string(),
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        // Validation failures raised inside the store layer keep their kind.
        match e.downcast::<AppError>() {
            Ok(app) => app,
            Err(e) => AppError::Database(format!("{:#}", e)),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}
