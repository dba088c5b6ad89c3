//! [`CommandStore`] implementations.
//!
//! - [`FileCommandStore`] keeps one file per code in a directory, named after
//!   the code (`tv_on.ir`), containing the raw bytes exactly as captured.
//! - [`MemoryCommandStore`] keeps codes in a map, for tests and dry runs.
//!
//! Neither store scopes codes per device: `list_names` returns every stored
//! name for any device.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use allone_core::domain::ir_code::IR_EXTENSION;
use allone_core::IrCodeName;
use tracing::debug;

use crate::application::ports::{CommandStore, StoreError};

/// Codes stored as files in one directory.
#[derive(Debug, Clone)]
pub struct FileCommandStore {
    directory: PathBuf,
}

impl FileCommandStore {
    /// The directory is created on first `put`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &IrCodeName) -> PathBuf {
        self.directory.join(name.as_str())
    }
}

fn io_error(name: impl Into<String>, source: io::Error) -> StoreError {
    StoreError::Io {
        name: name.into(),
        source,
    }
}

impl CommandStore for FileCommandStore {
    fn get(&self, name: &IrCodeName) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(name)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(name.as_str(), e)),
        }
    }

    fn put(&self, name: &IrCodeName, raw: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| io_error(self.directory.display().to_string(), e))?;
        let path = self.path_for(name);
        std::fs::write(&path, raw).map_err(|e| io_error(name.as_str(), e))?;
        debug!("stored {} bytes at {}", raw.len(), path.display());
        Ok(())
    }

    fn list_names(&self, _device: Option<SocketAddr>) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(self.directory.display().to_string(), e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(self.directory.display().to_string(), e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(IR_EXTENSION) && IrCodeName::parse(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Codes held in memory.
#[derive(Debug, Default)]
pub struct MemoryCommandStore {
    codes: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-filled with `(name, raw)` pairs.
    pub fn with_codes<I, N>(codes: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        Self {
            codes: RwLock::new(codes.into_iter().map(|(n, raw)| (n.into(), raw)).collect()),
        }
    }
}

impl CommandStore for MemoryCommandStore {
    fn get(&self, name: &IrCodeName) -> Result<Option<Vec<u8>>, StoreError> {
        let codes = self.codes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(codes.get(name.as_str()).cloned())
    }

    fn put(&self, name: &IrCodeName, raw: &[u8]) -> Result<(), StoreError> {
        self.codes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), raw.to_vec());
        Ok(())
    }

    fn list_names(&self, _device: Option<SocketAddr>) -> Result<Vec<String>, StoreError> {
        let codes = self.codes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(codes.keys().cloned().collect())
    }
}
