/// Metadata reader implementation using lofty
use crate::error::MetadataError;
use crate::uri;
use lofty::{AudioFile, FileType, ItemKey, Probe, TagExt, TaggedFileExt};
use soul_core::types::{date_to_day, date_to_year, MetadataLoad, PropType, Value};
use soul_core::MetadataReader;
use tracing::{debug, trace};

/// Text tags and the properties they fill
const TEXT_KEYS: [(ItemKey, PropType); 10] = [
    (ItemKey::TrackTitle, PropType::Title),
    (ItemKey::TrackArtist, PropType::Artist),
    (ItemKey::AlbumTitle, PropType::Album),
    (ItemKey::AlbumArtist, PropType::AlbumArtist),
    (ItemKey::Genre, PropType::Genre),
    (ItemKey::Composer, PropType::Composer),
    (ItemKey::Comment, PropType::Comment),
    (ItemKey::MusicBrainzRecordingId, PropType::MusicbrainzTrackId),
    (ItemKey::MusicBrainzArtistId, PropType::MusicbrainzArtistId),
    (ItemKey::MusicBrainzReleaseId, PropType::MusicbrainzAlbumId),
];

/// Numeric tags
const NUMBER_KEYS: [(ItemKey, PropType); 4] = [
    (ItemKey::TrackNumber, PropType::TrackNumber),
    (ItemKey::TrackTotal, PropType::TrackTotal),
    (ItemKey::DiscNumber, PropType::DiscNumber),
    (ItemKey::DiscTotal, PropType::DiscTotal),
];

/// ReplayGain tags
const GAIN_KEYS: [(ItemKey, PropType); 4] = [
    (ItemKey::ReplayGainTrackGain, PropType::TrackGain),
    (ItemKey::ReplayGainTrackPeak, PropType::TrackPeak),
    (ItemKey::ReplayGainAlbumGain, PropType::AlbumGain),
    (ItemKey::ReplayGainAlbumPeak, PropType::AlbumPeak),
];

/// Metadata reader using the lofty library
pub struct LoftyMetadataReader;

impl LoftyMetadataReader {
    /// Create a new metadata reader
    pub fn new() -> Self {
        Self
    }

    /// Extract typed fields from lofty tag
    fn extract_from_tag(tag: &lofty::Tag, mut load: MetadataLoad) -> MetadataLoad {
        for (key, prop) in &TEXT_KEYS {
            if let Some(text) = tag.get_string(key).map(str::trim).filter(|t| !t.is_empty()) {
                load = load.with(*prop, text);
            }
        }

        for (key, prop) in &NUMBER_KEYS {
            if let Some(number) = tag.get_string(key).and_then(parse_number) {
                load = load.with(*prop, number);
            }
        }

        for (key, prop) in &GAIN_KEYS {
            if let Some(gain) = tag.get_string(key).and_then(parse_gain) {
                load = load.with(*prop, gain);
            }
        }

        let date = tag
            .get_string(&ItemKey::RecordingDate)
            .or_else(|| tag.get_string(&ItemKey::Year))
            .and_then(parse_date);
        if let Some(day) = date {
            load = load.with(PropType::Date, day);
        }

        load
    }
}

impl Default for LoftyMetadataReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataReader for LoftyMetadataReader {
    fn load(&self, uri: &str) -> soul_core::Result<MetadataLoad> {
        let path = uri::to_path(uri)?;
        if !path.exists() {
            return Err(MetadataError::FileNotFound(uri.to_string()).into());
        }

        // Probe and read the file
        let tagged_file = lofty::read_from_path(&path).map_err(|e| MetadataError::lofty(uri, e))?;

        let properties = tagged_file.properties();
        let mut load = MetadataLoad::new(mime_type(tagged_file.file_type()))
            .with(PropType::Duration, properties.duration().as_secs());
        if let Some(bitrate) = properties.audio_bitrate() {
            load = load.with(PropType::Bitrate, u64::from(bitrate));
        }

        // Get primary tag or first tag (if available)
        let load = match tagged_file.primary_tag().or_else(|| tagged_file.tags().first()) {
            Some(tag) => Self::extract_from_tag(tag, load),
            None => {
                trace!("{} has no tags", uri);
                load
            }
        };

        debug!("Read {} fields from {}", load.fields.len(), uri);
        Ok(load)
    }

    fn save(&self, uri: &str, fields: &[(PropType, Value)]) -> soul_core::Result<()> {
        let path = uri::to_path(uri)?;
        if !path.exists() {
            return Err(MetadataError::FileNotFound(uri.to_string()).into());
        }

        let mut tagged_file = Probe::open(&path)
            .and_then(|probe| probe.read())
            .map_err(|e| MetadataError::lofty(uri, e))?;

        // Get or create the primary tag
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(lofty::Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| MetadataError::WriteError {
                uri: uri.to_string(),
                reason: format!("cannot create {:?} tag", tag_type),
            })?;

        for (prop, value) in fields {
            let Some(key) = item_key(*prop) else {
                trace!("No tag for {}", prop);
                continue;
            };
            let text = match (*prop, value) {
                (PropType::Date, Value::ULong(0)) => None,
                (PropType::Date, Value::ULong(day)) => Some(date_to_year(*day).to_string()),
                (_, Value::ULong(0)) => None,
                (_, Value::ULong(n)) => Some(n.to_string()),
                (_, Value::String(s)) if s.is_empty() => None,
                (_, Value::String(s)) => Some(s.to_string()),
                _ => continue,
            };
            match text {
                Some(text) => {
                    tag.insert_text(key, text);
                }
                None => {
                    tag.remove_key(&key);
                }
            }
        }

        // Save the tag to the file
        tag.save_to_path(&path)
            .map_err(|e: lofty::error::LoftyError| MetadataError::WriteError {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Wrote tags to {}", uri);
        Ok(())
    }
}

fn item_key(prop: PropType) -> Option<ItemKey> {
    if prop == PropType::Date {
        return Some(ItemKey::RecordingDate);
    }
    TEXT_KEYS
        .iter()
        .chain(NUMBER_KEYS.iter())
        .find(|(_, p)| *p == prop)
        .map(|(key, _)| key.clone())
}

fn mime_type(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Mpeg => "audio/mpeg",
        FileType::Flac => "audio/flac",
        FileType::Vorbis => "audio/ogg",
        FileType::Opus => "audio/opus",
        FileType::Wav => "audio/wav",
        FileType::Mp4 => "audio/mp4",
        FileType::Aac => "audio/aac",
        FileType::Aiff => "audio/aiff",
        FileType::Ape => "audio/ape",
        _ => "application/octet-stream",
    }
}

/// Parse "3" or "3/12"
fn parse_number(s: &str) -> Option<u64> {
    s.split('/').next()?.trim().parse().ok()
}

/// Parse a gain value from a string (e.g., "-5.23 dB" -> -5.23)
fn parse_gain(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix(" dB").unwrap_or(s);
    let s = s.strip_suffix("dB").unwrap_or(s);
    s.trim().parse().ok()
}

/// Day number of "YYYY", "YYYY-MM" or "YYYY-MM-DD"
fn parse_date(s: &str) -> Option<u64> {
    let mut parts = s.trim().splitn(3, '-');
    let year: i32 = parts.next()?.get(..4)?.parse().ok()?;
    let month = parts.next().and_then(|m| m.parse().ok()).unwrap_or(1);
    let day = parts
        .next()
        .and_then(|d| d.get(..2).unwrap_or(d).parse().ok())
        .unwrap_or(1);
    date_to_day(year, month, day).or_else(|| date_to_day(year, 1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_nonexistent_file_returns_access_error() {
        let reader = LoftyMetadataReader::new();
        let result = reader.load("file:///nonexistent/file.mp3");
        assert!(matches!(result, Err(soul_core::SoulError::AccessError { .. })));
    }

    #[test]
    fn parses_partial_dates() {
        assert_eq!(parse_date("1999"), date_to_day(1999, 1, 1));
        assert_eq!(parse_date("1999-07"), date_to_day(1999, 7, 1));
        assert_eq!(parse_date("1999-07-21T10:00:00"), date_to_day(1999, 7, 21));
        assert_eq!(parse_date("99"), None);
    }

    #[test]
    fn parses_numbers_and_gains() {
        assert_eq!(parse_number("3/12"), Some(3));
        assert_eq!(parse_number(" 7 "), Some(7));
        assert_eq!(parse_number("x"), None);
        assert_eq!(parse_gain("-5.23 dB"), Some(-5.23));
        assert_eq!(parse_gain("1.5dB"), Some(1.5));
    }

    #[test]
    fn date_writes_as_recording_date() {
        assert_eq!(item_key(PropType::Date), Some(ItemKey::RecordingDate));
        assert_eq!(item_key(PropType::Title), Some(ItemKey::TrackTitle));
        assert_eq!(item_key(PropType::PlayCount), None);
    }
}
