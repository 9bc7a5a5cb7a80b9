use std::io;
use std::path::{Path, PathBuf};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An open/read/write/remove on `path` failed.
    #[error("failed to {op} {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A manifest line could not be tokenized.
    #[error("{}:{line}: malformed manifest line: {reason}", path.display())]
    Format { path: PathBuf, line: usize, reason: String },

    #[error("manifest {} is locked by another run", path.display())]
    Locked { path: PathBuf },

    #[error("failed to spawn hash worker {id}")]
    Spawn {
        id: usize,
        #[source]
        source: io::Error,
    },

    #[error("hash worker pool has no running workers")]
    PoolDisconnected,
}

impl Error {
    /// Adapter for `map_err` that tags an io error with the operation and path.
    pub(crate) fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
        move |source| Error::Io { op, path: path.to_path_buf(), source }
    }
}
