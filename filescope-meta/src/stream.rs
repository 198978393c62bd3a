//! Per-stream metadata record.
//!
//! A file yields one or more streams: a plain image has one, a video container
//! has the container itself plus one stream per track. Every stream carries the
//! same fixed keys (`index`, `mimetype`, `version`, `stream_type`) and an open
//! bag of format-specific fields that checkers fill by key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{UNAV, is_concrete};

/// Coarse kind of content a stream holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StreamType {
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "text", alias = "char")]
    Text,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "other")]
    Other,
    #[default]
    #[serde(rename = "(:unav)")]
    Unav,
}

impl StreamType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Other => "other",
            Self::Unav => UNAV,
        }
    }

    #[must_use]
    pub fn is_concrete(self) -> bool {
        self != Self::Unav
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known stream type.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown stream type '{0}'")]
pub struct ParseStreamTypeError(pub String);

impl FromStr for StreamType {
    type Err = ParseStreamTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Self::Binary),
            "text" | "char" => Ok(Self::Text),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "other" => Ok(Self::Other),
            UNAV => Ok(Self::Unav),
            other => Err(ParseStreamTypeError(other.to_owned())),
        }
    }
}

/// Metadata of one content stream.
///
/// Field names `index`, `mimetype`, `version` and `stream_type` are reserved;
/// [`MetadataStream::set`] routes them to the typed members instead of the bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataStream {
    /// Position of the stream within the file, unique per result.
    pub index: usize,
    pub mimetype: String,
    pub version: String,
    pub stream_type: StreamType,
    /// Format-specific fields (codec, charset, dimensions, ...).
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    /// Keys the producing checker asserts authoritatively.
    #[serde(skip)]
    important: BTreeSet<String>,
}

/// A disagreement found while merging two streams with the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    pub index: usize,
    pub key: String,
    /// Value that stayed in the merged stream.
    pub kept: String,
    /// Value that was discarded.
    pub rejected: String,
}

impl fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conflict with values '{}' and '{}' for '{}' in stream {}.",
            self.kept, self.rejected, self.key, self.index
        )
    }
}

enum MergeOutcome {
    Unchanged,
    Replaced,
    Conflict { kept: String, rejected: String },
}

/// Decide what happens to one key when `incoming` meets `existing`.
fn merge_value(
    existing: &str,
    existing_important: bool,
    incoming: &str,
    incoming_important: bool,
) -> MergeOutcome {
    if !is_concrete(incoming) || existing == incoming {
        return MergeOutcome::Unchanged;
    }
    if !is_concrete(existing) || (incoming_important && !existing_important) {
        return MergeOutcome::Replaced;
    }
    MergeOutcome::Conflict {
        kept: existing.to_owned(),
        rejected: incoming.to_owned(),
    }
}

impl MetadataStream {
    /// A stream whose every fixed value is still unresolved.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            mimetype: UNAV.to_owned(),
            version: UNAV.to_owned(),
            stream_type: StreamType::Unav,
            fields: BTreeMap::new(),
            important: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_stream_type(mut self, stream_type: StreamType) -> Self {
        self.stream_type = stream_type;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Mark `key` as authoritative for this stream.
    #[must_use]
    pub fn important(mut self, key: &str) -> Self {
        self.important.insert(key.to_owned());
        self
    }

    /// Set a value by key. Reserved keys update the typed members; an
    /// unparseable `stream_type` becomes `Other`. `index` is ignored.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            "index" => {}
            "mimetype" => self.mimetype = value,
            "version" => self.version = value,
            "stream_type" => {
                self.stream_type = value.parse().unwrap_or(StreamType::Other);
            }
            _ => {
                self.fields.insert(key.to_owned(), value);
            }
        }
    }

    /// Look a value up by key, reserved keys included.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "mimetype" => Some(&self.mimetype),
            "version" => Some(&self.version),
            "stream_type" => Some(self.stream_type.as_str()),
            _ => self.fields.get(key).map(String::as_str),
        }
    }

    #[must_use]
    pub fn is_important(&self, key: &str) -> bool {
        self.important.contains(key)
    }

    /// Fold `other` (same index, produced by a later checker) into `self`.
    ///
    /// A concrete incoming value replaces a placeholder, an `UNAV` never
    /// replaces anything, and two different concrete values keep the existing
    /// one unless only the incoming one is important. Every kept-over-rejected
    /// decision between concrete values is returned as a [`FieldConflict`].
    pub fn merge(&mut self, other: &Self) -> Vec<FieldConflict> {
        let mut conflicts = Vec::new();
        let mut keys: Vec<&str> = vec!["mimetype", "version", "stream_type"];
        keys.extend(other.fields.keys().map(String::as_str));

        for key in keys {
            let incoming = other.get(key).unwrap_or(UNAV);
            let existing = self.get(key).unwrap_or(UNAV).to_owned();
            match merge_value(
                &existing,
                self.is_important(key),
                incoming,
                other.is_important(key),
            ) {
                MergeOutcome::Unchanged => {
                    if other.is_important(key) && existing == incoming {
                        self.important.insert(key.to_owned());
                    }
                }
                MergeOutcome::Replaced => {
                    self.set(key, incoming);
                    if other.is_important(key) {
                        self.important.insert(key.to_owned());
                    }
                }
                MergeOutcome::Conflict { kept, rejected } => conflicts.push(FieldConflict {
                    index: self.index,
                    key: key.to_owned(),
                    kept,
                    rejected,
                }),
            }
        }
        conflicts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::UNAP;

    #[test]
    fn test_new_stream_is_unresolved() {
        let stream = MetadataStream::new(3);
        assert_eq!(stream.index, 3);
        assert_eq!(stream.mimetype, UNAV);
        assert_eq!(stream.version, UNAV);
        assert_eq!(stream.stream_type, StreamType::Unav);
        assert!(stream.fields.is_empty());
    }

    #[test]
    fn test_set_routes_reserved_keys() {
        let stream = MetadataStream::new(0)
            .with_field("mimetype", "image/png")
            .with_field("stream_type", "image")
            .with_field("width", "16");
        assert_eq!(stream.mimetype, "image/png");
        assert_eq!(stream.stream_type, StreamType::Image);
        assert_eq!(stream.get("width"), Some("16"));
        assert!(!stream.fields.contains_key("mimetype"));
    }

    #[test]
    fn test_stream_type_parse() {
        assert_eq!("char".parse::<StreamType>().unwrap(), StreamType::Text);
        assert_eq!(UNAV.parse::<StreamType>().unwrap(), StreamType::Unav);
        assert!("hologram".parse::<StreamType>().is_err());
    }

    // ---- merge ----

    #[test]
    fn test_merge_concrete_replaces_unav() {
        let mut base = MetadataStream::new(0).with_mimetype("video/mp4");
        let incoming = MetadataStream::new(0)
            .with_version(UNAP)
            .with_field("codec_name", "AVC");
        let conflicts = base.merge(&incoming);
        assert!(conflicts.is_empty());
        assert_eq!(base.mimetype, "video/mp4");
        assert_eq!(base.version, UNAP);
        assert_eq!(base.get("codec_name"), Some("AVC"));
    }

    #[test]
    fn test_merge_unav_never_overwrites() {
        let mut base = MetadataStream::new(0)
            .with_version("1.4")
            .with_stream_type(StreamType::Binary);
        let incoming = MetadataStream::new(0).with_field("charset", UNAV);
        assert!(base.merge(&incoming).is_empty());
        assert_eq!(base.version, "1.4");
        assert_eq!(base.stream_type, StreamType::Binary);
        assert_eq!(base.get("charset"), None);
    }

    #[test]
    fn test_merge_conflict_keeps_existing() {
        let mut base = MetadataStream::new(1).with_version("1.0");
        let incoming = MetadataStream::new(1).with_version("2.0");
        let conflicts = base.merge(&incoming);
        assert_eq!(base.version, "1.0");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].to_string(),
            "Conflict with values '1.0' and '2.0' for 'version' in stream 1."
        );
    }

    #[test]
    fn test_merge_important_overrides_plain_value() {
        let mut base = MetadataStream::new(0).with_version("1.7");
        let incoming = MetadataStream::new(0)
            .with_version("A-2b")
            .important("version");
        assert!(base.merge(&incoming).is_empty());
        assert_eq!(base.version, "A-2b");
        assert!(base.is_important("version"));

        let later = MetadataStream::new(0).with_version("1.7");
        assert_eq!(base.merge(&later).len(), 1);
        assert_eq!(base.version, "A-2b");
    }

    // ---- serde ----

    #[test]
    fn test_round_trip_preserves_identity_tuple() {
        let stream = MetadataStream::new(2)
            .with_mimetype("audio/mpeg")
            .with_version("1")
            .with_stream_type(StreamType::Audio)
            .with_field("sampling_frequency", "44.1");
        let json = serde_json::to_value(&stream).unwrap();
        assert_eq!(json["index"], 2);
        assert_eq!(json["stream_type"], "audio");
        assert_eq!(json["sampling_frequency"], "44.1");

        let parsed: MetadataStream = serde_json::from_value(json).unwrap();
        assert_eq!(
            (parsed.index, parsed.mimetype.as_str(), parsed.version.as_str(), parsed.stream_type),
            (2, "audio/mpeg", "1", StreamType::Audio)
        );
        assert_eq!(parsed.fields, stream.fields);
    }

    #[test]
    fn test_unav_stream_type_serializes_as_sentinel() {
        let json = serde_json::to_value(MetadataStream::new(0)).unwrap();
        assert_eq!(json["stream_type"], UNAV);
        assert_eq!(json["mimetype"], UNAV);
    }
}
