/// Local filesystem access for the database workers
use crate::error::MetadataError;
use crate::uri;
use soul_core::types::FileStat;
use soul_core::FileIo;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Supported audio file extensions by default
const DEFAULT_EXTENSIONS: [&str; 9] = ["mp3", "flac", "ogg", "opus", "wav", "m4a", "aac", "aif", "aiff"];

/// [`FileIo`] over `file://` URIs
#[derive(Debug, Clone)]
pub struct LocalFileIo {
    /// Extensions `list_files` reports (lowercase, without dot)
    extensions: Vec<String>,
    follow_links: bool,
}

impl LocalFileIo {
    pub fn new() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            follow_links: true,
        }
    }

    /// Only list files with these extensions; an empty list lists everything
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    fn wanted(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl Default for LocalFileIo {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIo for LocalFileIo {
    fn stat(&self, uri: &str) -> soul_core::Result<FileStat> {
        let path = uri::to_path(uri)?;
        let metadata = fs::metadata(&path).map_err(|e| MetadataError::io(uri, e))?;
        if !metadata.is_file() {
            return Err(soul_core::SoulError::access(uri, "not a regular file"));
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Ok(FileStat {
            size: metadata.len(),
            mtime,
        })
    }

    fn exists(&self, uri: &str) -> bool {
        uri::to_path(uri).map(|p| p.exists()).unwrap_or(false)
    }

    fn list_files(&self, uri: &str) -> soul_core::Result<Vec<String>> {
        let root = uri::to_path(uri)?;
        if !root.is_dir() {
            return Err(soul_core::SoulError::access(uri, "not a directory"));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(self.follow_links) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path below {}: {}", uri, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.wanted(entry.path()) {
                continue;
            }
            match uri::from_path(entry.path()) {
                Some(file) => files.push(file),
                None => warn!("Cannot express {} as a URI", entry.path().display()),
            }
        }
        files.sort();

        debug!("Found {} files below {}", files.len(), uri);
        Ok(files)
    }
}
