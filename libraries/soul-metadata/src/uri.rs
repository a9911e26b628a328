/// Conversion between `file://` URIs and local paths
use crate::error::{MetadataError, Result};
use std::path::{Path, PathBuf};
use url::Url;

/// Local path of a `file://` URI
pub fn to_path(uri: &str) -> Result<PathBuf> {
    Url::parse(uri)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| MetadataError::NotLocal(uri.to_string()))
}

/// `file://` URI of an absolute path
pub fn from_path(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}
