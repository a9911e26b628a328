/// Entry categories
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Podcast post download finished
pub const PODCAST_STATUS_COMPLETE: u64 = 100;
/// Podcast post download failed
pub const PODCAST_STATUS_ERROR: u64 = 101;
/// Podcast post queued for download
pub const PODCAST_STATUS_WAITING: u64 = 102;
/// Podcast post download paused
pub const PODCAST_STATUS_PAUSED: u64 = 103;

/// Category of an entry
///
/// The built-in categories are closed; applications can add their own
/// through `Custom`, keyed by a unique name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
    /// Local audio file
    #[default]
    Song,
    /// Internet radio station
    RadioStation,
    /// Podcast feed (channel)
    PodcastFeed,
    /// Single podcast episode
    PodcastPost,
    /// File that could not be imported
    ImportError,
    /// File explicitly ignored by the library
    Ignore,
    /// Application-registered type
    Custom(Arc<str>),
}

impl EntryType {
    /// All built-in types
    pub const BUILTIN: [EntryType; 6] = [
        EntryType::Song,
        EntryType::RadioStation,
        EntryType::PodcastFeed,
        EntryType::PodcastPost,
        EntryType::ImportError,
        EntryType::Ignore,
    ];

    /// Stable external name
    pub fn name(&self) -> &str {
        match self {
            Self::Song => "song",
            Self::RadioStation => "iradio",
            Self::PodcastFeed => "podcast-feed",
            Self::PodcastPost => "podcast-post",
            Self::ImportError => "import-error",
            Self::Ignore => "ignore",
            Self::Custom(name) => name,
        }
    }

    /// Resolve a name; unknown names become `Custom`
    pub fn from_name(name: &str) -> Self {
        Self::BUILTIN
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .unwrap_or_else(|| Self::Custom(Arc::from(name)))
    }

    /// Whether entries of this type carry the podcast extension block
    pub fn has_extension(&self) -> bool {
        matches!(self, Self::PodcastFeed | Self::PodcastPost)
    }

    /// Whether this is one of the built-in categories
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for EntryType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<EntryType> for String {
    fn from(entry_type: EntryType) -> Self {
        entry_type.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_resolve_to_themselves() {
        for t in EntryType::BUILTIN {
            assert_eq!(EntryType::from_name(t.name()), t);
            assert!(t.is_builtin());
        }
    }

    #[test]
    fn unknown_name_becomes_custom() {
        let t = EntryType::from_name("audiobook");
        assert_eq!(t, EntryType::Custom(Arc::from("audiobook")));
        assert_eq!(t.name(), "audiobook");
        assert!(!t.has_extension());
    }

    #[test]
    fn only_podcast_types_have_extension() {
        assert!(EntryType::PodcastFeed.has_extension());
        assert!(EntryType::PodcastPost.has_extension());
        assert!(!EntryType::Song.has_extension());
        assert!(!EntryType::RadioStation.has_extension());
    }

    #[test]
    fn serializes_as_name() {
        let json = serde_json::to_string(&EntryType::RadioStation).unwrap();
        assert_eq!(json, "\"iradio\"");
        let back: EntryType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntryType::RadioStation);
    }
}
