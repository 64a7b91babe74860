//! Parsed `INFO` snapshots.
//!
//! A snapshot is the complete field mapping of one `INFO` reply for one server
//! at one point in time, plus per-logical-database statistics derived from the
//! `db<N>` fields. Snapshots are immutable once constructed; every poll cycle
//! produces a wholly new snapshot that supersedes the previous one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Matches the statistics inside a `db<N>` field value, e.g.
/// `keys=17741,expires=75,avg_ttl=31403559156782`.
fn database_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"keys=(?P<keys>\d+),expires=(?P<expires>\d+)").unwrap())
}

/// A single `INFO` field value with a closed set of runtime types.
///
/// Numeric coercion only happens when it is lossless: a value whose canonical
/// re-serialization differs from the wire text (leading zeroes, exponents and
/// the like) stays a string verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn parse(raw: &str) -> Self {
        if let Ok(int) = raw.parse::<i64>() {
            if int.to_string() == raw {
                return FieldValue::Int(int);
            }
        }

        if let Ok(boolean) = raw.parse::<bool>() {
            if boolean.to_string() == raw {
                return FieldValue::Bool(boolean);
            }
        }

        if let Ok(float) = raw.parse::<f64>() {
            if float.to_string() == raw {
                return FieldValue::Float(float);
            }
        }

        FieldValue::Str(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Key count statistics for one logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub keys: u64,
    pub expires: u64,
}

/// One immutable, fully parsed `INFO` result.
///
/// An error condition is represented as a degenerate snapshot carrying a
/// single `error` field with the failure message, not as a distinct type;
/// subscribers check [`InfoSnapshot::error`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct InfoSnapshot {
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub database: BTreeMap<String, DatabaseStats>,
}

impl InfoSnapshot {
    /// Builds a snapshot from the flat field mapping produced by reply framing.
    ///
    /// Fields named `db<N>` additionally contribute a [`DatabaseStats`] entry
    /// when their value matches the `keys=,expires=` pattern; the raw field is
    /// kept in the mapping either way.
    pub fn new(raw_fields: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut fields = BTreeMap::new();
        let mut database = BTreeMap::new();

        for (key, value) in raw_fields {
            if is_database_field(&key) {
                if let Some(stats) = parse_database_value(&value) {
                    database.insert(key.clone(), stats);
                }
            }

            fields.insert(key, FieldValue::parse(&value));
        }

        InfoSnapshot { fields, database }
    }

    /// The degenerate snapshot for a failed poll cycle.
    pub fn error_snapshot(message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("error".to_string(), FieldValue::Str(message.into()));

        InfoSnapshot {
            fields,
            database: BTreeMap::new(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.fields.get("error").and_then(FieldValue::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

fn is_database_field(key: &str) -> bool {
    key.strip_prefix("db")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_database_value(value: &str) -> Option<DatabaseStats> {
    let captures = database_pattern().captures(value)?;

    Some(DatabaseStats {
        keys: captures["keys"].parse().ok()?,
        expires: captures["expires"].parse().ok()?,
    })
}
