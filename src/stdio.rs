use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

/// Defines where a standard stream points once the service daemonizes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stdio {
    /// Redirects the stream to `/dev/null`. Default option.
    #[default]
    Devnull,
    /// Appends the stream to the file at the given path, creating it if needed.
    File(PathBuf),
    /// Keeps the original stream (useful for debugging, but not recommended for production).
    Keep,
}

impl Stdio {
    /// Creates a configuration that discards all output.
    pub fn devnull() -> Self {
        Stdio::Devnull
    }

    /// Opens the redirection target, or `None` when the stream is kept as is.
    pub(crate) fn open(&self) -> io::Result<Option<File>> {
        match self {
            Stdio::Devnull => OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/null")
                .map(Some),
            Stdio::File(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Some),
            Stdio::Keep => Ok(None),
        }
    }
}

impl From<PathBuf> for Stdio {
    fn from(path: PathBuf) -> Self {
        Stdio::File(path)
    }
}

impl From<&str> for Stdio {
    fn from(path: &str) -> Self {
        Stdio::File(PathBuf::from(path))
    }
}
