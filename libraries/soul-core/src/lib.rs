//! Soul DB Core
//!
//! Schema types, traits, and error handling shared by the Soul DB engine and
//! its I/O collaborators.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Schema**: `PropType` and its descriptor table, `Value`, `EntryType`
//! - **Collaborator Traits**: `MetadataReader`, `FileIo`, `StorageBackend`
//! - **Text Folding**: case/diacritic folding and collation keys
//! - **Error Handling**: Unified `SoulError` and `Result` types
//!
//! # Example
//!
//! ```rust
//! use soul_core::types::{PropType, Value};
//!
//! let prop = PropType::from_name("artist").unwrap();
//! assert_eq!(prop, PropType::Artist);
//! assert!(prop.check(&Value::from("Nina Simone")).is_ok());
//! assert!(prop.check(&Value::ULong(3)).is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod text;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SoulError};
pub use traits::{FileIo, MetadataReader, StorageBackend};

pub use types::{
    EntryRecord, EntryType, FileStat, MetadataLoad, PropKind, PropType, PropertyDescriptor,
    Value,
};
