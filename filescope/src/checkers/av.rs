//! Audio and video checkers backed by MediaInfo and FFprobe.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::PathBuf;

use filescope_meta::{MetadataStream, StreamType, UNAV};
use serde::Deserialize;
use serde_json::Value;

use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::shell;

/// Container formats. Their general track becomes stream 0.
const CONTAINERS: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/x-matroska",
    "video/MP2T",
    "video/MP1S",
    "video/MP2P",
    "video/avi",
    "video/dv",
    "audio/mp4",
];

/// Mimetypes handled by both audio/video checkers.
const AV_MIMETYPES: [&str; 13] = [
    "video/mpeg",
    "video/mp4",
    "video/quicktime",
    "video/x-matroska",
    "video/MP2T",
    "video/MP1S",
    "video/MP2P",
    "video/avi",
    "video/dv",
    "audio/mpeg",
    "audio/x-wav",
    "audio/mp4",
    "audio/flac",
];

/// One capability row per audio/video mimetype, shaped like `template`.
const fn av_rows(template: CapabilityEntry) -> [CapabilityEntry; AV_MIMETYPES.len()] {
    let mut rows = [template; AV_MIMETYPES.len()];
    let mut n = 0;
    while n < rows.len() {
        rows[n].mimetype = AV_MIMETYPES[n];
        n += 1;
    }
    rows
}

fn family_stream_type(mimetype: &str) -> StreamType {
    if mimetype.starts_with("audio/") {
        StreamType::Audio
    } else {
        StreamType::Video
    }
}

/// Render a JSON scalar the way MediaInfo and FFprobe print them.
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---- MediaInfo ----

#[derive(Debug, Deserialize)]
struct MediainfoOutput {
    media: Option<MediainfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediainfoMedia {
    #[serde(default)]
    track: Vec<BTreeMap<String, Value>>,
}

/// Mimetype and version of a single MediaInfo track.
fn track_format(track: &BTreeMap<String, Value>) -> (String, String) {
    let format = scalar(track.get("Format")).unwrap_or_default();
    let version = scalar(track.get("Format_Version"))
        .map(|v| v.trim_start_matches("Version").trim().to_owned())
        .filter(|v| !v.is_empty());
    let mimetype = match format.as_str() {
        "AVC" => "video/h264",
        "HEVC" => "video/h265",
        "MPEG Video" => "video/mpeg",
        "MPEG-4 Visual" => "video/mp4v-es",
        "FFV1" => "video/x-ffv",
        "AAC" => "audio/aac",
        "MPEG Audio" => "audio/mpeg",
        "PCM" => "audio/x-wav",
        "FLAC" => "audio/flac",
        "AC-3" => "audio/ac3",
        _ => UNAV,
    };
    (mimetype.to_owned(), version.unwrap_or_else(|| UNAV.to_owned()))
}

fn track_stream(index: usize, track: &BTreeMap<String, Value>) -> MetadataStream {
    let (mimetype, version) = track_format(track);
    let stream_type = match track.get("@type").and_then(Value::as_str) {
        Some("Video") => StreamType::Video,
        Some("Audio") => StreamType::Audio,
        _ => StreamType::Other,
    };
    let mut stream = MetadataStream::new(index)
        .with_mimetype(mimetype)
        .with_version(version)
        .with_stream_type(stream_type);
    for (key, field) in [
        ("Format", "codec_name"),
        ("Width", "width"),
        ("Height", "height"),
        ("FrameRate", "frame_rate"),
        ("Duration", "duration"),
        ("BitRate", "bit_rate"),
        ("SamplingRate", "sampling_frequency"),
        ("Channels", "num_channels"),
        ("BitDepth", "bits_per_sample"),
    ] {
        if let Some(value) = scalar(track.get(key)) {
            stream = stream.with_field(field, value);
        }
    }
    stream
}

fn is_av_track(track: &BTreeMap<String, Value>) -> bool {
    matches!(
        track.get("@type").and_then(Value::as_str),
        Some("Video" | "Audio")
    )
}

/// Build streams from MediaInfo tracks.
///
/// Containers report their general track as stream 0. Single-stream files
/// report their first audio or video track as stream 0, carrying the
/// file's own mimetype.
fn mediainfo_streams(mimetype: &str, tracks: &[BTreeMap<String, Value>]) -> Vec<MetadataStream> {
    let general = tracks
        .iter()
        .find(|t| t.get("@type").and_then(Value::as_str) == Some("General"));
    let others: Vec<&BTreeMap<String, Value>> = tracks
        .iter()
        .filter(|t| t.get("@type").and_then(Value::as_str) != Some("General"))
        .collect();

    let mut streams = Vec::new();
    if CONTAINERS.contains(&mimetype) {
        let mut container = MetadataStream::new(0)
            .with_mimetype(mimetype)
            .with_version(UNAV)
            .with_stream_type(StreamType::Other);
        if let Some(general) = general {
            for (key, field) in [("Format", "codec_name"), ("Duration", "duration")] {
                if let Some(value) = scalar(general.get(key)) {
                    container = container.with_field(field, value);
                }
            }
        }
        streams.push(container);
        streams.extend(
            others
                .iter()
                .enumerate()
                .map(|(n, track)| track_stream(n + 1, track)),
        );
    } else {
        for (n, track) in others.iter().enumerate() {
            let mut stream = track_stream(n, track);
            if n == 0 {
                stream.mimetype = mimetype.to_owned();
                stream.stream_type = family_stream_type(mimetype);
            }
            streams.push(stream);
        }
    }
    streams
}

/// Stream metadata for audio and video files.
pub struct MediainfoChecker {
    mediainfo: PathBuf,
}

impl MediainfoChecker {
    const CAPABILITIES: &'static [CapabilityEntry] =
        &av_rows(CapabilityEntry::new("").priority(priority::METADATA));

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            mediainfo: config.mediainfo.clone(),
        }
    }
}

impl Checker for MediainfoChecker {
    fn id(&self) -> CheckerId {
        "MediainfoChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let output = match shell::run(
            &self.mediainfo,
            &[OsStr::new("--Output=JSON"), ctx.path.as_os_str()],
        ) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                result.fail(&output.into_failure(&self.mediainfo));
                return result.finish(ctx.check_wellformed);
            }
            Err(failure) => {
                result.fail(&failure);
                return result.finish(ctx.check_wellformed);
            }
        };
        let parsed: MediainfoOutput = match serde_json::from_str(&output.stdout) {
            Ok(parsed) => parsed,
            Err(e) => {
                result.fail(&CheckerFailure::Parse {
                    tool: "mediainfo".to_owned(),
                    message: e.to_string(),
                });
                return result.finish(ctx.check_wellformed);
            }
        };
        let tracks = parsed.media.map(|m| m.track).unwrap_or_default();
        if !tracks.iter().any(is_av_track) {
            result.error("No audio or video tracks found.");
            return result.finish(ctx.check_wellformed);
        }

        let mimetype = ctx.mimetype.unwrap_or(UNAV);
        for stream in mediainfo_streams(mimetype, &tracks) {
            result.push_stream(stream);
        }
        result.message("The file was analyzed successfully.");
        result.finish(ctx.check_wellformed)
    }
}

// ---- FFprobe ----

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<BTreeMap<String, Value>>,
    #[serde(default)]
    format: BTreeMap<String, Value>,
}

/// Decodability check for audio and video files.
pub struct FfprobeChecker {
    ffprobe: PathBuf,
}

impl FfprobeChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &av_rows(
        CapabilityEntry::new("")
            .validation_only()
            .priority(priority::STRUCTURE),
    );

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            ffprobe: config.ffprobe.clone(),
        }
    }
}

impl Checker for FfprobeChecker {
    fn id(&self) -> CheckerId {
        "FfprobeChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let output = match shell::run(
            &self.ffprobe,
            &[
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_format"),
                OsStr::new("-show_streams"),
                OsStr::new("-of"),
                OsStr::new("json"),
                ctx.path.as_os_str(),
            ],
        ) {
            Ok(output) => output,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        for line in output.stderr_lines() {
            result.error(line.to_owned());
        }
        if !output.success() && result.errors.is_empty() {
            result.error(format!("FFprobe failed with {}.", output.status_text()));
        }
        let probe: FfprobeOutput = serde_json::from_str(&output.stdout).unwrap_or_default();
        if probe.streams.is_empty() && result.errors.is_empty() {
            result.error("No audio or video tracks found.");
        }
        if result.errors.is_empty() {
            result.message("The file was analyzed successfully.");
        }

        let mimetype = ctx.mimetype.unwrap_or(UNAV);
        let mut stream = MetadataStream::new(0)
            .with_mimetype(mimetype)
            .with_stream_type(if CONTAINERS.contains(&mimetype) {
                StreamType::Other
            } else {
                family_stream_type(mimetype)
            });
        if let Some(name) = scalar(probe.format.get("format_name")) {
            stream = stream.with_field("format_name", name);
        }
        if let Some(count) = scalar(probe.format.get("nb_streams")) {
            stream = stream.with_field("nb_streams", count);
        }
        result.push_stream(stream);
        result.finish(true)
    }
}
