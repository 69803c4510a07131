use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a [`Session`](crate::session::Session).
///
/// Only `Authentication` aborts a run; every other variant is scoped to
/// the item being fetched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unable to fetch {url}: status code {status}")]
    Status { url: String, status: u16 },

    #[error("page structure mismatch at {url}: {detail}")]
    Structure { url: String, detail: String },

    #[error("network error for {url}: {detail}")]
    Network { url: String, detail: String },

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn network(url: &str, err: impl std::fmt::Display) -> Self {
        SessionError::Network {
            url: url.to_owned(),
            detail: err.to_string(),
        }
    }
}

/// Errors that end a mirror crawl or a tree run.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Authentication(SessionError),

    #[error("unable to load the root page: {0}")]
    Root(SessionError),

    #[error("cannot prepare target {path}: {source}")]
    Target {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    #[error("invalid site profile: {0}")]
    Profile(String),

    #[error("tree file {path}: {detail}")]
    TreeFile { path: PathBuf, detail: String },
}

impl MirrorError {
    pub fn target(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Target {
            path: path.into(),
            source,
        }
    }
}
