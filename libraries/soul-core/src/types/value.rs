/// Typed property values
use crate::error::{Result, SoulError};
use crate::types::EntryType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Semantic type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropKind {
    /// UTF-8 text
    String,
    /// True/false flag
    Boolean,
    /// Unsigned integer (counts, sizes, day numbers)
    ULong,
    /// Floating point (ratings, gains)
    Double,
    /// Seconds since the Unix epoch
    Timestamp,
    /// Entry category
    EntryType,
}

impl fmt::Display for PropKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::ULong => "ulong",
            Self::Double => "double",
            Self::Timestamp => "timestamp",
            Self::EntryType => "entry-type",
        };
        f.write_str(name)
    }
}

/// A single property value
///
/// Strings are reference counted so that entry snapshots and query copies
/// share text instead of duplicating it.
#[derive(Debug, Clone)]
pub enum Value {
    /// Text value
    String(Arc<str>),
    /// Flag value
    Boolean(bool),
    /// Unsigned integer value
    ULong(u64),
    /// Floating point value
    Double(f64),
    /// Seconds since the Unix epoch
    Timestamp(u64),
    /// Entry category
    EntryType(EntryType),
}

fn shared_empty() -> &'static Arc<str> {
    static EMPTY: OnceLock<Arc<str>> = OnceLock::new();
    EMPTY.get_or_init(|| Arc::from(""))
}

impl Value {
    /// The shared empty string
    pub fn empty_string() -> Self {
        Self::String(Arc::clone(shared_empty()))
    }

    /// Build a string value, reusing the shared empty string when possible
    pub fn string(text: impl AsRef<str>) -> Self {
        let text = text.as_ref();
        if text.is_empty() {
            Self::empty_string()
        } else {
            Self::String(Arc::from(text))
        }
    }

    /// Default value for a property kind
    pub fn default_for(kind: PropKind) -> Self {
        match kind {
            PropKind::String => Self::empty_string(),
            PropKind::Boolean => Self::Boolean(false),
            PropKind::ULong => Self::ULong(0),
            PropKind::Double => Self::Double(0.0),
            PropKind::Timestamp => Self::Timestamp(0),
            PropKind::EntryType => Self::EntryType(EntryType::Song),
        }
    }

    /// Kind of this value
    pub fn kind(&self) -> PropKind {
        match self {
            Self::String(_) => PropKind::String,
            Self::Boolean(_) => PropKind::Boolean,
            Self::ULong(_) => PropKind::ULong,
            Self::Double(_) => PropKind::Double,
            Self::Timestamp(_) => PropKind::Timestamp,
            Self::EntryType(_) => PropKind::EntryType,
        }
    }

    /// Borrow the text of a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned integer or timestamp as `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::ULong(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Flag value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Entry category
    pub fn as_entry_type(&self) -> Option<&EntryType> {
        match self {
            Self::EntryType(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this value equals the default for its kind
    pub fn is_default(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::Boolean(b) => !b,
            Self::ULong(v) | Self::Timestamp(v) => *v == 0,
            // -0.0 is a distinct value under the total order
            Self::Double(v) => v.to_bits() == 0,
            Self::EntryType(t) => *t == EntryType::Song,
        }
    }

    /// Text encoding used for persistence and query serialization
    ///
    /// Flags encode as `1`/`0`, numbers as decimal, entry types by name.
    /// Doubles use the shortest representation that parses back exactly.
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.to_string(),
            Self::Boolean(b) => (if *b { "1" } else { "0" }).to_string(),
            Self::ULong(v) | Self::Timestamp(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::EntryType(t) => t.name().to_string(),
        }
    }

    /// Decode the text encoding produced by [`Value::to_text`]
    pub fn from_text(kind: PropKind, text: &str) -> Result<Self> {
        let invalid = || SoulError::invalid_value(kind.to_string(), text);
        Ok(match kind {
            PropKind::String => Self::string(text),
            PropKind::Boolean => match text.trim() {
                "1" | "true" | "TRUE" => Self::Boolean(true),
                "0" | "false" | "FALSE" | "" => Self::Boolean(false),
                _ => return Err(invalid()),
            },
            PropKind::ULong => Self::ULong(text.trim().parse().map_err(|_| invalid())?),
            PropKind::Timestamp => Self::Timestamp(text.trim().parse().map_err(|_| invalid())?),
            PropKind::Double => Self::Double(text.trim().parse().map_err(|_| invalid())?),
            PropKind::EntryType => {
                let name = text.trim();
                if name.is_empty() {
                    return Err(invalid());
                }
                Self::EntryType(EntryType::from_name(name))
            }
        })
    }

    fn rank(&self) -> u8 {
        match self {
            Self::String(_) => 0,
            Self::Boolean(_) => 1,
            Self::ULong(_) => 2,
            Self::Double(_) => 3,
            Self::Timestamp(_) => 4,
            Self::EntryType(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: values of different kinds order by kind, doubles use
/// `f64::total_cmp`.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::ULong(a), Self::ULong(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => {
                a.cmp(b)
            }
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::EntryType(a), Self::EntryType(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::String(s) => s.hash(state),
            Self::Boolean(b) => b.hash(state),
            Self::ULong(v) | Self::Timestamp(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::EntryType(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{}\"", s),
            other => f.write_str(&other.to_text()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::ULong(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<EntryType> for Value {
    fn from(t: EntryType) -> Self {
        Self::EntryType(t)
    }
}
