/// Metadata-specific errors
use thiserror::Error;

/// Result type alias using `MetadataError`
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Metadata error types
#[derive(Error, Debug)]
pub enum MetadataError {
    /// URI is not a local file URI
    #[error("Not a local file: {0}")]
    NotLocal(String),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Tag writing error
    #[error("Tag writing error: {uri}: {reason}")]
    WriteError { uri: String, reason: String },

    /// I/O error
    #[error("{uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    /// Lofty error
    #[error("{uri}: {source}")]
    Lofty {
        uri: String,
        #[source]
        source: lofty::error::LoftyError,
    },
}

impl MetadataError {
    pub(crate) fn io(uri: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(uri.to_string())
        } else {
            Self::Io {
                uri: uri.to_string(),
                source,
            }
        }
    }

    pub(crate) fn lofty(uri: &str, source: lofty::error::LoftyError) -> Self {
        match source.kind() {
            lofty::error::ErrorKind::UnknownFormat | lofty::error::ErrorKind::FileDecoding(_) => {
                Self::UnsupportedFormat(uri.to_string())
            }
            lofty::error::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::FileNotFound(uri.to_string())
            }
            _ => Self::Lofty {
                uri: uri.to_string(),
                source,
            },
        }
    }
}

impl From<MetadataError> for soul_core::SoulError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnsupportedFormat(uri) => soul_core::SoulError::unsupported(uri),
            MetadataError::WriteError { .. } => soul_core::SoulError::save(err.to_string()),
            MetadataError::NotLocal(ref uri) | MetadataError::FileNotFound(ref uri) => {
                soul_core::SoulError::access(uri.clone(), &err)
            }
            MetadataError::Io { ref uri, .. } | MetadataError::Lofty { ref uri, .. } => {
                soul_core::SoulError::access(uri.clone(), &err)
            }
        }
    }
}
