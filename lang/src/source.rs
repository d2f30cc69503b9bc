use std::{
    fmt::Display,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

pub const EXTENSION: &str = "pds";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("file {path:?} is not a (.pds) dango script file")]
    WrongExtension { path: PathBuf },

    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct File {
    pub path: PathBuf,
    pub source: String,
    /// Last modification time, in milliseconds since the epoch.
    pub modified: u64,
}

impl File {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            return Err(LoadError::WrongExtension { path });
        }

        let io_error = |source| LoadError::Io {
            path: path.clone(),
            source,
        };
        let source = std::fs::read_to_string(&path).map_err(io_error)?;
        let metadata = std::fs::metadata(&path).map_err(io_error)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(File {
            path,
            source,
            modified,
        })
    }

    pub fn in_memory(name: &str, source: impl Into<String>) -> Self {
        File {
            path: PathBuf::from(name),
            source: source.into(),
            modified: 0,
        }
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 1-based position of a token in its source text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub row: usize,
    pub column: usize,
}

impl Location {
    pub fn new(row: usize, column: usize) -> Self {
        Location { row, column }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}, char {}", self.row, self.column)
    }
}
