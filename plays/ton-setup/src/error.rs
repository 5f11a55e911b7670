//! Error taxonomy for a provisioning run.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T, E = SetupError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SetupError {
    /// Bad or missing input, reported before anything on disk is touched.
    #[error("invalid setup parameters: {0}")]
    Validation(String),

    /// A previous installation is in the way and `--force` was not given.
    #[error("{0}, fix the problem or specify --force flag")]
    PreexistingState(String),

    #[error("{tool} failed: {reason}{}", fmt_output(.stderr))]
    ExternalTool {
        tool: String,
        reason: String,
        stderr: String,
    },

    #[error("{tool} did not finish within {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("node is not responding: {0}")]
    Verification(String),

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("cannot use document {}: {source}", path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object at the top level")]
    NotAnObject,
}

fn fmt_output(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n  output: {stderr}")
    }
}

impl SetupError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn document(path: impl Into<PathBuf>, source: impl Into<DocumentError>) -> Self {
        Self::Document {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, reason: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            reason: reason.into(),
            stderr: stderr.into(),
        }
    }
}

/// Attach a human readable context to `std::io` failures.
pub trait IoContext<T> {
    fn with_path(self, what: &str, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, what: &str, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| SetupError::io(format!("{what} {}", path.display()), e))
    }
}
