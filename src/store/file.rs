use super::{KvStore, StoreError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files named after their percent-encoded key.
const EXTENSION: &str = "kv";
/// Files named by key digest; the first line holds the encoded key.
const HASHED_EXTENSION: &str = "kvh";
/// Longest encoded key used directly as a file name, leaving room for the
/// suffix under the common 255-byte limit.
const MAX_NAME_LEN: usize = 200;

/// Directory-backed store, one file per key.
///
/// Short keys become the percent-encoded file name plus a `.kv` suffix, so
/// any key is a safe single path component. Longer keys are stored under the
/// hex SHA-256 of the key with a `.kvh` suffix, and the file starts with the
/// encoded key on its own line. The optional quota counts bytes on disk.
/// Writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    capacity: Option<usize>,
}

enum Slot {
    Named(PathBuf),
    Hashed(PathBuf),
}

impl Slot {
    fn path(&self) -> &Path {
        match self {
            Slot::Named(path) | Slot::Hashed(path) => path,
        }
    }
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, capacity: Option<usize>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), ?capacity, "file store opened");
        Ok(Self { dir, capacity })
    }

    fn slot_for(&self, key: &str) -> Slot {
        let encoded = urlencoding::encode(key);
        if encoded.len() <= MAX_NAME_LEN {
            Slot::Named(self.dir.join(format!("{encoded}.{EXTENSION}")))
        } else {
            let digest = Sha256::digest(key.as_bytes());
            Slot::Hashed(self.dir.join(format!("{digest:x}.{HASHED_EXTENSION}")))
        }
    }

    fn is_store_file(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == EXTENSION || ext == HASHED_EXTENSION)
    }

    /// Recover the key a store file holds.
    fn key_for(path: &Path) -> Result<Option<String>, StoreError> {
        let Some(ext) = path.extension() else {
            return Ok(None);
        };

        if ext == EXTENSION {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                return Ok(None);
            };
            Ok(urlencoding::decode(stem).ok().map(|k| k.into_owned()))
        } else if ext == HASHED_EXTENSION {
            let contents = match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Ok(split_hashed(&contents).map(|(key, _)| key))
        } else {
            Ok(None)
        }
    }

    /// Total bytes of store files, excluding `skip`.
    fn used_bytes(&self, skip: &Path) -> Result<usize, StoreError> {
        let mut used = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == skip || !Self::is_store_file(&path) {
                continue;
            }
            used += entry.metadata()?.len() as usize;
        }
        Ok(used)
    }
}

/// Split a hashed file into its decoded key and value.
fn split_hashed(contents: &str) -> Option<(String, &str)> {
    let (encoded, value) = contents.split_once('\n')?;
    let key = urlencoding::decode(encoded).ok()?.into_owned();
    Some((key, value))
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let slot = self.slot_for(key);
        let contents = match fs::read_to_string(slot.path()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(match slot {
            Slot::Named(_) => Some(contents),
            Slot::Hashed(_) => match split_hashed(&contents) {
                Some((stored, value)) if stored == key => Some(value.to_owned()),
                _ => None,
            },
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let slot = self.slot_for(key);
        let contents = match slot {
            Slot::Named(_) => value.to_owned(),
            Slot::Hashed(_) => format!("{}\n{value}", urlencoding::encode(key)),
        };
        let path = slot.path();

        if let Some(capacity) = self.capacity {
            let projected = self.used_bytes(path)? + contents.len();
            if projected > capacity {
                return Err(StoreError::QuotaExceeded {
                    needed: contents.len(),
                    capacity,
                });
            }
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.slot_for(key).path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            if let Some(key) = Self::key_for(&entry?.path())? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
