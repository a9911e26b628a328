/// Property identifiers and the descriptor table
///
/// Every property is described once in `DESCRIPTORS`, indexed by the
/// property id. Storage layout, value kind, external name and mirror
/// derivation are all looked up from there.
use crate::error::{Result, SoulError};
use crate::text;
use crate::types::{PropKind, Value};
use chrono::{Datelike, NaiveDate, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// Property identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropType {
    /// Entry category
    Type,
    /// Track title
    Title,
    /// Genre name
    Genre,
    /// Track artist
    Artist,
    /// Album title
    Album,
    /// Album artist
    AlbumArtist,
    /// Composer
    Composer,
    /// Track number within the disc
    TrackNumber,
    /// Number of tracks on the disc
    TrackTotal,
    /// Disc number
    DiscNumber,
    /// Number of discs
    DiscTotal,
    /// Duration in seconds
    Duration,
    /// File size in bytes
    FileSize,
    /// Unique location URI
    Location,
    /// URI of the volume the entry lives on
    Mountpoint,
    /// Last modification time of the file
    Mtime,
    /// When the entry was first added
    FirstSeen,
    /// When the file was last found present
    LastSeen,
    /// Rating between 0 and 5
    Rating,
    /// Number of times played
    PlayCount,
    /// When the entry was last played
    LastPlayed,
    /// Bitrate in kbit/s
    Bitrate,
    /// Release date as a day number (0001-01-01 is day 1, 0 is unknown)
    Date,
    /// ReplayGain track gain
    TrackGain,
    /// ReplayGain track peak
    TrackPeak,
    /// ReplayGain album gain
    AlbumGain,
    /// ReplayGain album peak
    AlbumPeak,
    /// MIME type of the media
    MediaType,
    /// Entry is hidden (e.g. its volume is unmounted)
    Hidden,
    /// Last playback error message
    PlaybackError,
    /// Free-form comment
    Comment,
    /// Beats per minute
    Bpm,
    /// MusicBrainz recording id
    MusicbrainzTrackId,
    /// MusicBrainz artist id
    MusicbrainzArtistId,
    /// MusicBrainz release id
    MusicbrainzAlbumId,
    /// MusicBrainz album artist id
    MusicbrainzAlbumArtistId,
    /// Collation key of the title
    TitleSortKey,
    /// Collation key of the genre
    GenreSortKey,
    /// Collation key of the artist
    ArtistSortKey,
    /// Collation key of the album
    AlbumSortKey,
    /// Collation key of the album artist
    AlbumArtistSortKey,
    /// Collation key of the composer
    ComposerSortKey,
    /// Folded title
    TitleFolded,
    /// Folded genre
    GenreFolded,
    /// Folded artist
    ArtistFolded,
    /// Folded album
    AlbumFolded,
    /// Folded album artist
    AlbumArtistFolded,
    /// Folded composer
    ComposerFolded,
    /// Human-readable last played time
    LastPlayedStr,
    /// Human-readable first seen time
    FirstSeenStr,
    /// Human-readable last seen time
    LastSeenStr,
    /// Release year derived from the date
    Year,
    /// Free-text search over the folded text fields
    SearchMatch,
    /// Podcast download status
    Status,
    /// Podcast description
    Description,
    /// Podcast subtitle
    Subtitle,
    /// Podcast summary
    Summary,
    /// Podcast language
    Lang,
    /// Podcast copyright
    Copyright,
    /// Podcast image URI
    Image,
    /// Podcast post publication time
    PostTime,
}

/// How a mirrored property is derived from its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorRole {
    /// Collation key of a string
    SortKey,
    /// Case/diacritic folded string
    Folded,
    /// "%Y-%m-%d %H:%M" rendering of a timestamp, "Never" for 0
    TimeString,
    /// Year of a day number
    Year,
}

impl MirrorRole {
    /// Compute the mirrored value from the source value
    pub fn derive(self, source: &Value) -> Value {
        match self {
            Self::SortKey => Value::string(text::sort_key(source.as_str().unwrap_or_default())),
            Self::Folded => Value::string(text::fold(source.as_str().unwrap_or_default())),
            Self::TimeString => Value::string(format_time(source.as_u64().unwrap_or(0))),
            Self::Year => Value::ULong(date_to_year(source.as_u64().unwrap_or(0))),
        }
    }
}

/// Where a property's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Fixed vector shared by all entry types
    Common,
    /// Extension block carried only by some entry types
    Extension,
    /// Stored, but recomputed whenever `source` changes
    Mirror {
        /// Property this one is derived from
        source: PropType,
        /// Derivation
        role: MirrorRole,
    },
    /// Computed on read, never stored
    Synthetic,
}

/// Static description of one property
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
    /// Property id
    pub prop: PropType,
    /// Stable external name
    pub name: &'static str,
    /// Value kind
    pub kind: PropKind,
    /// Storage class
    pub storage: Storage,
}

/// Slot of a property inside an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Index into the common vector
    Common(usize),
    /// Index into the extension block
    Extension(usize),
    /// Not stored
    Synthetic,
}

const fn common(prop: PropType, name: &'static str, kind: PropKind) -> PropertyDescriptor {
    PropertyDescriptor {
        prop,
        name,
        kind,
        storage: Storage::Common,
    }
}

const fn extension(prop: PropType, name: &'static str, kind: PropKind) -> PropertyDescriptor {
    PropertyDescriptor {
        prop,
        name,
        kind,
        storage: Storage::Extension,
    }
}

const fn mirror(
    prop: PropType,
    name: &'static str,
    kind: PropKind,
    source: PropType,
    role: MirrorRole,
) -> PropertyDescriptor {
    PropertyDescriptor {
        prop,
        name,
        kind,
        storage: Storage::Mirror { source, role },
    }
}

use MirrorRole::{Folded, SortKey, TimeString};
use PropKind::{Boolean, Double, Timestamp, ULong};
use PropType as P;

static DESCRIPTORS: [PropertyDescriptor; PropType::COUNT] = [
    common(P::Type, "type", PropKind::EntryType),
    common(P::Title, "title", PropKind::String),
    common(P::Genre, "genre", PropKind::String),
    common(P::Artist, "artist", PropKind::String),
    common(P::Album, "album", PropKind::String),
    common(P::AlbumArtist, "album-artist", PropKind::String),
    common(P::Composer, "composer", PropKind::String),
    common(P::TrackNumber, "track-number", ULong),
    common(P::TrackTotal, "track-total", ULong),
    common(P::DiscNumber, "disc-number", ULong),
    common(P::DiscTotal, "disc-total", ULong),
    common(P::Duration, "duration", ULong),
    common(P::FileSize, "file-size", ULong),
    common(P::Location, "location", PropKind::String),
    common(P::Mountpoint, "mountpoint", PropKind::String),
    common(P::Mtime, "mtime", Timestamp),
    common(P::FirstSeen, "first-seen", Timestamp),
    common(P::LastSeen, "last-seen", Timestamp),
    common(P::Rating, "rating", Double),
    common(P::PlayCount, "play-count", ULong),
    common(P::LastPlayed, "last-played", Timestamp),
    common(P::Bitrate, "bitrate", ULong),
    common(P::Date, "date", ULong),
    common(P::TrackGain, "replaygain-track-gain", Double),
    common(P::TrackPeak, "replaygain-track-peak", Double),
    common(P::AlbumGain, "replaygain-album-gain", Double),
    common(P::AlbumPeak, "replaygain-album-peak", Double),
    common(P::MediaType, "media-type", PropKind::String),
    common(P::Hidden, "hidden", Boolean),
    common(P::PlaybackError, "playback-error", PropKind::String),
    common(P::Comment, "comment", PropKind::String),
    common(P::Bpm, "beats-per-minute", Double),
    common(P::MusicbrainzTrackId, "mb-trackid", PropKind::String),
    common(P::MusicbrainzArtistId, "mb-artistid", PropKind::String),
    common(P::MusicbrainzAlbumId, "mb-albumid", PropKind::String),
    common(P::MusicbrainzAlbumArtistId, "mb-albumartistid", PropKind::String),
    mirror(P::TitleSortKey, "title-sort-key", PropKind::String, P::Title, SortKey),
    mirror(P::GenreSortKey, "genre-sort-key", PropKind::String, P::Genre, SortKey),
    mirror(P::ArtistSortKey, "artist-sort-key", PropKind::String, P::Artist, SortKey),
    mirror(P::AlbumSortKey, "album-sort-key", PropKind::String, P::Album, SortKey),
    mirror(P::AlbumArtistSortKey, "album-artist-sort-key", PropKind::String, P::AlbumArtist, SortKey),
    mirror(P::ComposerSortKey, "composer-sort-key", PropKind::String, P::Composer, SortKey),
    mirror(P::TitleFolded, "title-folded", PropKind::String, P::Title, Folded),
    mirror(P::GenreFolded, "genre-folded", PropKind::String, P::Genre, Folded),
    mirror(P::ArtistFolded, "artist-folded", PropKind::String, P::Artist, Folded),
    mirror(P::AlbumFolded, "album-folded", PropKind::String, P::Album, Folded),
    mirror(P::AlbumArtistFolded, "album-artist-folded", PropKind::String, P::AlbumArtist, Folded),
    mirror(P::ComposerFolded, "composer-folded", PropKind::String, P::Composer, Folded),
    mirror(P::LastPlayedStr, "last-played-str", PropKind::String, P::LastPlayed, TimeString),
    mirror(P::FirstSeenStr, "first-seen-str", PropKind::String, P::FirstSeen, TimeString),
    mirror(P::LastSeenStr, "last-seen-str", PropKind::String, P::LastSeen, TimeString),
    mirror(P::Year, "year", ULong, P::Date, MirrorRole::Year),
    PropertyDescriptor {
        prop: P::SearchMatch,
        name: "search-match",
        kind: PropKind::String,
        storage: Storage::Synthetic,
    },
    extension(P::Status, "status", ULong),
    extension(P::Description, "description", PropKind::String),
    extension(P::Subtitle, "subtitle", PropKind::String),
    extension(P::Summary, "summary", PropKind::String),
    extension(P::Lang, "lang", PropKind::String),
    extension(P::Copyright, "copyright", PropKind::String),
    extension(P::Image, "image", PropKind::String),
    extension(P::PostTime, "post-time", Timestamp),
];

/// Folded text fields consulted by `SearchMatch`
pub const SEARCH_FIELDS: [PropType; 6] = [
    PropType::TitleFolded,
    PropType::ArtistFolded,
    PropType::AlbumFolded,
    PropType::GenreFolded,
    PropType::AlbumArtistFolded,
    PropType::ComposerFolded,
];

fn mirror_table() -> &'static [Vec<PropType>] {
    static TABLE: OnceLock<Vec<Vec<PropType>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![Vec::new(); PropType::COUNT];
        for desc in &DESCRIPTORS {
            if let Storage::Mirror { source, .. } = desc.storage {
                table[source.index()].push(desc.prop);
            }
        }
        table
    })
}

impl PropType {
    /// Number of properties
    pub const COUNT: usize = 61;

    /// Number of properties stored in the common vector
    pub const COMMON_COUNT: usize = PropType::SearchMatch as usize;

    /// Number of properties stored in the extension block
    pub const EXTENSION_COUNT: usize = PropType::COUNT - PropType::Status as usize;

    /// Every property in id order
    pub fn all() -> impl Iterator<Item = PropType> {
        DESCRIPTORS.iter().map(|d| d.prop)
    }

    /// Array index of this property
    pub fn index(self) -> usize {
        self as usize
    }

    /// Descriptor for this property
    pub fn descriptor(self) -> &'static PropertyDescriptor {
        &DESCRIPTORS[self.index()]
    }

    /// Stable external name
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Value kind
    pub fn kind(self) -> PropKind {
        self.descriptor().kind
    }

    /// Look a property up by its external name
    pub fn from_name(name: &str) -> Result<Self> {
        DESCRIPTORS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.prop)
            .ok_or_else(|| SoulError::UnknownProperty(name.to_string()))
    }

    /// Where the value lives inside an entry
    pub fn slot(self) -> Slot {
        match self.descriptor().storage {
            Storage::Common | Storage::Mirror { .. } => Slot::Common(self.index()),
            Storage::Extension => Slot::Extension(self.index() - PropType::Status as usize),
            Storage::Synthetic => Slot::Synthetic,
        }
    }

    /// Carried only by entry types with an extension block
    pub fn is_type_specific(self) -> bool {
        matches!(self.descriptor().storage, Storage::Extension)
    }

    /// Derived from another property or computed on read
    pub fn is_derived(self) -> bool {
        matches!(
            self.descriptor().storage,
            Storage::Mirror { .. } | Storage::Synthetic
        )
    }

    /// Written by the persistence layer
    pub fn is_persistent(self) -> bool {
        !self.is_derived() && self != PropType::Location && self != PropType::Type
    }

    /// Source property if this is a mirror
    pub fn mirror_source(self) -> Option<PropType> {
        match self.descriptor().storage {
            Storage::Mirror { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Mirror derivation if this is a mirror
    pub fn mirror_role(self) -> Option<MirrorRole> {
        match self.descriptor().storage {
            Storage::Mirror { role, .. } => Some(role),
            _ => None,
        }
    }

    /// Properties mirrored from this one
    pub fn mirrors(self) -> &'static [PropType] {
        &mirror_table()[self.index()]
    }

    /// Whether values of this property are stored folded
    pub fn is_folded(self) -> bool {
        self.mirror_role() == Some(MirrorRole::Folded)
    }

    /// The folded mirror of this property, if any
    pub fn folded_mirror(self) -> Option<PropType> {
        self.mirrors().iter().copied().find(|m| m.is_folded())
    }

    /// The collation key mirror of this property, if any
    pub fn sort_key_mirror(self) -> Option<PropType> {
        self.mirrors()
            .iter()
            .copied()
            .find(|m| m.mirror_role() == Some(MirrorRole::SortKey))
    }

    /// Check that `value` may be stored in this property
    pub fn check(self, value: &Value) -> Result<()> {
        if value.kind() == self.kind() {
            Ok(())
        } else {
            Err(SoulError::TypeMismatch {
                property: self.name(),
                expected: self.kind(),
                found: value.kind(),
            })
        }
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for PropType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for PropType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        PropType::from_name(&name).map_err(serde::de::Error::custom)
    }
}

/// Year of a day number, 0 when unknown
pub fn date_to_year(day: u64) -> u64 {
    if day == 0 {
        return 0;
    }
    i32::try_from(day)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map(|d| d.year().max(0) as u64)
        .unwrap_or(0)
}

/// Day number of a calendar date
pub fn date_to_day(year: i32, month: u32, day: u32) -> Option<u64> {
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.num_days_from_ce().max(0) as u64)
}

/// First and last day number of `year`
pub fn year_bounds(year: u64) -> Option<(u64, u64)> {
    let year = i32::try_from(year).ok().filter(|y| *y > 0)?;
    Some((date_to_day(year, 1, 1)?, date_to_day(year, 12, 31)?))
}

fn format_time(seconds: u64) -> String {
    if seconds == 0 {
        return "Never".to_string();
    }
    i64::try_from(seconds)
        .ok()
        .and_then(|s| chrono::Local.timestamp_opt(s, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
