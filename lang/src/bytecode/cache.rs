//! Compiled programs persisted as one JSON file per script, invalidated by
//! the script's modification time.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::File;

use super::Code;

pub const FORMAT_VERSION: u32 = 1;
pub const EXTENSION: &str = "pdbc";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("could not read cache file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("could not create cache directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("could not write cache file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("could not encode bytecode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct EntryRef<'a> {
    version: u32,
    source: &'a str,
    bytecode: &'a Code,
    mtime: u64,
}

#[derive(Deserialize)]
struct Entry {
    version: u32,
    source: String,
    bytecode: Code,
    mtime: u64,
}

/// The cache file contents for `code` compiled from `file`.
pub fn encode(file: &File, code: &Code) -> Result<String, CacheError> {
    let name = file.name();
    let entry = EntryRef {
        version: FORMAT_VERSION,
        source: &name,
        bytecode: code,
        mtime: file.modified,
    };
    Ok(serde_json::to_string_pretty(&entry)?)
}

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Cache { dir: dir.into() }
    }

    /// `$LOCALAPPDATA/pure-dango/.pdbccache`, or the same under the current
    /// directory when that variable is unset.
    pub fn default_dir() -> PathBuf {
        let base = std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("pure-dango").join(".pdbccache")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file: &File) -> PathBuf {
        self.dir.join(format!("{}.{}", file.stem(), EXTENSION))
    }

    /// The cached code for `file` if there is a usable entry. Missing,
    /// stale, and unreadable entries are all misses.
    pub fn load(&self, file: &File) -> Result<Option<Code>, CacheError> {
        let path = self.path_for(file);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "cache miss");
                return Ok(None);
            }
            Err(source) => return Err(CacheError::Read { path, source }),
        };

        let entry: Entry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(?path, %error, "discarding undecodable cache entry");
                return Ok(None);
            }
        };
        if entry.version != FORMAT_VERSION || entry.mtime != file.modified {
            debug!(
                ?path,
                version = entry.version,
                mtime = entry.mtime,
                "discarding stale cache entry"
            );
            return Ok(None);
        }

        debug!(
            ?path,
            source = %entry.source,
            words = entry.bytecode.len(),
            "cache hit"
        );
        Ok(Some(entry.bytecode))
    }

    pub fn store(&self, file: &File, code: &Code) -> Result<PathBuf, CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(file);
        let text = encode(file, code)?;
        std::fs::write(&path, text).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(?path, "stored bytecode");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;

    use super::*;
    use crate::bytecode::{Constant, Function, Op, Word};

    fn scratch(name: &str) -> Cache {
        let dir = std::env::temp_dir()
            .join("dango-cache-tests")
            .join(format!("{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Cache::new(dir)
    }

    fn sample() -> Code {
        let f = Function {
            name: "f".to_owned(),
            parameters: vec!["n".to_owned()],
            code: Code {
                words: vec![Word::op(Op::Load), Word::Name("n".to_owned()), Word::op(Op::Return)],
            },
        };
        Code {
            words: vec![
                Word::op(Op::Push),
                Word::Const(Constant::Integer(BigInt::from(2).pow(80))),
                Word::op(Op::Push),
                Word::Const(Constant::Function(Rc::new(f))),
                Word::op(Op::Halt),
            ],
        }
    }

    #[test]
    fn stores_then_loads() {
        let cache = scratch("roundtrip");
        let mut file = File::in_memory("dir/prog.pds", "");
        file.modified = 1234;

        assert!(cache.load(&file).unwrap().is_none());
        let path = cache.store(&file, &sample()).unwrap();
        assert!(path.ends_with("prog.pdbc"));
        assert_eq!(cache.load(&file).unwrap(), Some(sample()));
    }

    #[test]
    fn modified_source_is_a_miss() {
        let cache = scratch("stale");
        let mut file = File::in_memory("prog.pds", "");
        file.modified = 1;
        cache.store(&file, &sample()).unwrap();

        file.modified = 2;
        assert!(cache.load(&file).unwrap().is_none());
    }

    #[test]
    fn garbage_and_old_versions_are_misses() {
        let cache = scratch("garbage");
        let file = File::in_memory("prog.pds", "");
        std::fs::create_dir_all(cache.dir()).unwrap();

        std::fs::write(cache.path_for(&file), "{ not json").unwrap();
        assert!(cache.load(&file).unwrap().is_none());

        let old = encode(&file, &sample())
            .unwrap()
            .replace("\"version\": 1", "\"version\": 0");
        std::fs::write(cache.path_for(&file), old).unwrap();
        assert!(cache.load(&file).unwrap().is_none());
    }

    #[test]
    fn entry_layout() {
        let mut file = File::in_memory("a/b.pds", "");
        file.modified = 42;
        let json: serde_json::Value =
            serde_json::from_str(&encode(&file, &Code::default()).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["source"], "b.pds");
        assert_eq!(json["mtime"], 42);
        assert!(json["bytecode"]["words"].is_array());
    }
}
