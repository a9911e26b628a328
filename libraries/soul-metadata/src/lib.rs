//! Soul DB Metadata
//!
//! Local file collaborators for the Soul DB engine.
//!
//! This crate provides:
//! - Tag reading and writing (MP3, FLAC, OGG, WAV, AAC, OPUS) via lofty
//! - File stat and recursive directory listing over `file://` URIs
//!
//! # Example
//!
//! ```rust,no_run
//! use soul_metadata::{LocalFileIo, LoftyMetadataReader};
//! use soul_core::{FileIo, MetadataReader};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = LoftyMetadataReader::new();
//! let metadata = reader.load("file:///music/song.mp3")?;
//! println!("{} ({} fields)", metadata.mime, metadata.fields.len());
//!
//! let files = LocalFileIo::new().list_files("file:///music")?;
//! # Ok(())
//! # }
//! ```

mod error;
mod file_io;
mod reader;
pub mod uri;

pub use error::{MetadataError, Result};
pub use file_io::LocalFileIo;
pub use reader::LoftyMetadataReader;
