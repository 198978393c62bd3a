//! Reduction of many checker results into one file-level answer.

use std::collections::BTreeMap;

use filescope_meta::{MetadataStream, UNAV, WellFormed, is_concrete};

use crate::checker::{CheckerId, CheckerResult};

pub const VERSION_UNRESOLVED: &str = "File format version can not be resolved.";

/// Merged view of a sequence of checker results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub mimetype: String,
    pub version: String,
    pub well_formed: WellFormed,
    pub streams: BTreeMap<usize, MetadataStream>,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
}

/// Merge streams by index in execution order.
///
/// Returns the merged streams and one message per conflict between
/// concrete values.
#[must_use]
pub fn merge_streams(results: &[CheckerResult]) -> (BTreeMap<usize, MetadataStream>, Vec<String>) {
    let mut streams: BTreeMap<usize, MetadataStream> = BTreeMap::new();
    let mut conflicts = Vec::new();
    for stream in results.iter().flat_map(|r| &r.streams) {
        match streams.get_mut(&stream.index) {
            Some(existing) => {
                conflicts.extend(existing.merge(stream).iter().map(ToString::to_string));
            }
            None => {
                streams.insert(stream.index, stream.clone());
            }
        }
    }
    (streams, conflicts)
}

/// A version claim from one checker's primary stream.
struct Candidate<'a> {
    checker: CheckerId,
    version: &'a str,
    important: bool,
}

/// Outcome of version resolution: the version and an optional message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionResolution {
    pub version: String,
    pub message: Option<String>,
}

/// Resolve the file format version.
///
/// Only checkers whose stream 0 mimetype is `UNAV` or equals `mimetype`
/// take part. Important versions, when present, are the only candidates.
/// No candidate keeps the predefined version. Exactly one distinct value is
/// adopted. Several distinct values resolve to `UNAV`.
#[must_use]
pub fn resolve_version(
    results: &[CheckerResult],
    mimetype: &str,
    predefined: Option<&str>,
) -> VersionResolution {
    let mut candidates: Vec<Candidate<'_>> = results
        .iter()
        .filter_map(|result| {
            let stream = result.primary_stream()?;
            let relevant = !is_concrete(&stream.mimetype) || stream.mimetype == mimetype;
            (relevant && is_concrete(&stream.version)).then(|| Candidate {
                checker: result.checker,
                version: stream.version.as_str(),
                important: stream.is_important("version"),
            })
        })
        .collect();
    if candidates.iter().any(|c| c.important) {
        candidates.retain(|c| c.important);
    }

    let mut distinct: Vec<&Candidate<'_>> = Vec::new();
    for candidate in &candidates {
        if !distinct.iter().any(|d| d.version == candidate.version) {
            distinct.push(candidate);
        }
    }

    match distinct.as_slice() {
        [] => VersionResolution {
            version: predefined
                .filter(|v| is_concrete(v))
                .unwrap_or(UNAV)
                .to_owned(),
            message: None,
        },
        [only] => VersionResolution {
            version: only.version.to_owned(),
            message: predefined.is_none().then(|| {
                format!("File format version resolved by checker {}.", only.checker)
            }),
        },
        _ => VersionResolution {
            version: UNAV.to_owned(),
            message: Some(VERSION_UNRESOLVED.to_owned()),
        },
    }
}

/// Reduce checker results, in execution order, into one answer.
#[must_use]
pub fn aggregate(results: &[CheckerResult], predefined_version: Option<&str>) -> Aggregate {
    let mut messages: Vec<String> = results.iter().flat_map(|r| r.messages.clone()).collect();
    let errors: Vec<String> = results.iter().flat_map(|r| r.errors.clone()).collect();
    let well_formed = WellFormed::reduce(results.iter().map(|r| r.well_formed));

    let (mut streams, conflicts) = merge_streams(results);
    messages.extend(conflicts);

    let mimetype = streams
        .get(&0)
        .map_or_else(|| UNAV.to_owned(), |s| s.mimetype.clone());
    let resolution = resolve_version(results, &mimetype, predefined_version);
    messages.extend(resolution.message);

    streams
        .entry(0)
        .or_insert_with(|| MetadataStream::new(0).with_mimetype(mimetype.as_str()))
        .version
        .clone_from(&resolution.version);

    Aggregate {
        mimetype,
        version: resolution.version,
        well_formed,
        streams,
        messages,
        errors,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use filescope_meta::{StreamType, UNAP};

    fn result(checker: CheckerId, stream: MetadataStream, well_formed: WellFormed) -> CheckerResult {
        let mut result = CheckerResult::new(checker);
        result.push_stream(stream);
        result.well_formed = well_formed;
        result
    }

    fn stream(mimetype: &str, version: &str) -> MetadataStream {
        MetadataStream::new(0).with_mimetype(mimetype).with_version(version)
    }

    // ---- version resolution ----

    #[test]
    fn test_single_candidate_is_adopted() {
        let results = [
            result("A", stream("application/pdf", "1.4"), WellFormed::True),
            result("B", stream("application/pdf", UNAV), WellFormed::True),
        ];
        let resolution = resolve_version(&results, "application/pdf", None);
        assert_eq!(resolution.version, "1.4");
        assert_eq!(
            resolution.message.as_deref(),
            Some("File format version resolved by checker A.")
        );
    }

    #[test]
    fn test_no_message_with_predefined_version() {
        let results = [result("A", stream("application/pdf", "1.4"), WellFormed::True)];
        let resolution = resolve_version(&results, "application/pdf", Some("1.4"));
        assert_eq!(resolution.version, "1.4");
        assert_eq!(resolution.message, None);
    }

    #[test]
    fn test_conflicting_candidates() {
        let results = [
            result("A", stream("application/pdf", "1.4"), WellFormed::True),
            result("B", stream("application/pdf", "1.7"), WellFormed::True),
        ];
        let resolution = resolve_version(&results, "application/pdf", None);
        assert_eq!(resolution.version, UNAV);
        assert_eq!(resolution.message.as_deref(), Some(VERSION_UNRESOLVED));
    }

    #[test]
    fn test_same_version_twice_is_one_candidate() {
        let results = [
            result("A", stream("image/png", "1.2"), WellFormed::True),
            result("B", stream(UNAV, "1.2"), WellFormed::Unknown),
        ];
        assert_eq!(resolve_version(&results, "image/png", None).version, "1.2");
    }

    #[test]
    fn test_other_mimetype_is_ignored() {
        let results = [
            result("A", stream("application/pdf", "1.4"), WellFormed::True),
            result("B", stream("image/png", "1.2"), WellFormed::False),
        ];
        assert_eq!(resolve_version(&results, "application/pdf", None).version, "1.4");
    }

    #[test]
    fn test_important_candidates_win() {
        let results = [
            result("A", stream("application/pdf", "1.7"), WellFormed::True),
            result(
                "B",
                stream("application/pdf", "A-2b").important("version"),
                WellFormed::True,
            ),
        ];
        assert_eq!(resolve_version(&results, "application/pdf", None).version, "A-2b");
    }

    #[test]
    fn test_no_candidates_keeps_predefined() {
        let results = [result("A", stream("text/plain", UNAV), WellFormed::True)];
        assert_eq!(resolve_version(&results, "text/plain", Some("1.0")).version, "1.0");
        assert_eq!(resolve_version(&results, "text/plain", None).version, UNAV);
    }

    // ---- aggregation ----

    #[test]
    fn test_aggregate_merges_and_reduces() {
        let results = [
            result(
                "TextfileChecker",
                stream("text/plain", UNAP).with_stream_type(StreamType::Text),
                WellFormed::True,
            ),
            result(
                "TextEncodingChecker",
                stream("text/plain", UNAP).with_field("charset", "UTF-8"),
                WellFormed::Unknown,
            ),
        ];
        let aggregate = aggregate(&results, None);
        assert_eq!(aggregate.mimetype, "text/plain");
        assert_eq!(aggregate.version, UNAP);
        assert_eq!(aggregate.well_formed, WellFormed::True);
        let merged = &aggregate.streams[&0];
        assert_eq!(merged.stream_type, StreamType::Text);
        assert_eq!(merged.get("charset"), Some("UTF-8"));
    }

    #[test]
    fn test_aggregate_records_mimetype_conflict() {
        let results = [
            result("A", stream("video/mp4", UNAV), WellFormed::True),
            result("B", stream("video/quicktime", UNAV), WellFormed::True),
        ];
        let aggregate = aggregate(&results, None);
        assert_eq!(aggregate.mimetype, "video/mp4");
        assert!(aggregate.messages.iter().any(|m| m.contains("for 'mimetype'")));
        assert!(aggregate.errors.is_empty());
    }

    #[test]
    fn test_aggregate_without_streams_gets_stream_zero() {
        let mut only = CheckerResult::new("FileExists");
        only.error("File x does not exist.");
        only.well_formed = WellFormed::False;
        let aggregate = aggregate(&[only], None);
        assert_eq!(aggregate.streams.len(), 1);
        assert_eq!(aggregate.streams[&0].mimetype, UNAV);
        assert_eq!(aggregate.well_formed, WellFormed::False);
    }

    #[test]
    fn test_aggregate_concatenates_in_order() {
        let mut first = CheckerResult::new("A");
        first.message("a1");
        first.error("e1");
        let mut second = CheckerResult::new("B");
        second.message("b1");
        second.error("e1");
        let aggregate = aggregate(&[first, second], None);
        assert_eq!(aggregate.messages, vec!["a1", "b1"]);
        assert_eq!(aggregate.errors, vec!["e1", "e1"]);
    }
}
