//! JSON file storage backend
//!
//! The whole store is written as one document. Writes go to a sibling
//! `.tmp` file that is then renamed over the database, so a crash mid-save
//! leaves the previous file intact.

use serde::{Deserialize, Serialize};
use soul_core::types::EntryRecord;
use soul_core::{Result, SoulError, StorageBackend};
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current document format version
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    entries: &'a [EntryRecord],
}

#[derive(Deserialize)]
struct Document {
    version: u32,
    entries: Vec<EntryRecord>,
}

/// Stores entries in a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl StorageBackend for JsonFileBackend {
    fn save(&self, records: &[EntryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| SoulError::save(format!("{}: {}", parent.display(), e)))?;
        }

        let temp = self.temp_path();
        let write = || -> Result<()> {
            let mut writer = BufWriter::new(fs::File::create(&temp)?);
            serde_json::to_writer(
                &mut writer,
                &DocumentRef {
                    version: FORMAT_VERSION,
                    entries: records,
                },
            )?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| SoulError::Io(e.into_error()))?
                .sync_all()?;
            fs::rename(&temp, &self.path)?;
            Ok(())
        };

        write().map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&temp) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", temp.display(), cleanup);
                }
            }
            SoulError::save(format!("{}: {}", self.path.display(), e))
        })?;

        debug!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Vec<EntryRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No database at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(SoulError::access(self.path.display().to_string(), e)),
        };

        let document: Document = serde_json::from_reader(BufReader::new(file))?;
        if document.version > FORMAT_VERSION {
            return Err(SoulError::unsupported(format!(
                "database format {} is newer than {}",
                document.version, FORMAT_VERSION
            )));
        }
        Ok(document.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soul_core::types::{EntryType, PropType, Value};
    use tempfile::TempDir;

    fn record(location: &str, title: &str) -> EntryRecord {
        let mut record = EntryRecord::new(EntryType::Song, location);
        record.insert(PropType::Title, &Value::from(title));
        record.insert(PropType::PlayCount, &Value::ULong(4));
        record
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("library.json"));
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested").join("library.json"));

        backend
            .save(&[record("file:///a.mp3", "A"), record("file:///b.mp3", "B")])
            .unwrap();
        backend.save(&[record("file:///c.mp3", "C")]).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded, vec![record("file:///c.mp3", "C")]);
        assert!(!backend.temp_path().exists());
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        fs::write(&path, r#"{"version": 99, "entries": []}"#).unwrap();

        let err = JsonFileBackend::new(&path).load().unwrap_err();
        assert!(matches!(err, SoulError::UnsupportedFormat(_)));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonFileBackend::new(&path).load().is_err());
    }
}
