use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::{is_raw_segment, ParsedSourceInput, RequestHeaders, TrackDescriptor, TrackKind};

type JsonObject = Map<String, Value>;

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static pattern compiles"))
}

fn http_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?i)^https?://")
}

fn prefix_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?i)^(video|v|audio|a)\s*[:|]\s*(.+)$")
}

fn audio_hint_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(
        &CELL,
        r"[/_.\-](audio|aac|opus|mp4a)[/_.\-]|[?&](type|stream)=audio(&|$)",
    )
}

fn video_hint_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(
        &CELL,
        r"[/_.\-](video|avc|hev|h264|h265|vp9|av01)[/_.\-]|[?&](type|stream)=video(&|$)",
    )
}

fn is_http_url(value: &str) -> bool {
    http_pattern().is_match(value.trim())
}

/// Guesses the track kind from a `mime` query parameter, then from
/// `type=`/`stream=` parameters or codec tokens in the path.
pub fn infer_track_from_url(url: &str) -> TrackKind {
    if let Ok(parsed) = Url::parse(url) {
        let mime = parsed
            .query_pairs()
            .find(|(key, _)| key == "mime")
            .map(|(_, value)| value.to_lowercase());
        if let Some(mime) = mime {
            if mime.starts_with("audio/") {
                return TrackKind::Audio;
            }
            if mime.starts_with("video/") {
                return TrackKind::Video;
            }
        }
    }

    let lower = url.to_lowercase();
    if audio_hint_pattern().is_match(&lower) {
        TrackKind::Audio
    } else if video_hint_pattern().is_match(&lower) {
        TrackKind::Video
    } else {
        TrackKind::Auto
    }
}

/// Turns free-form user input into track descriptors. Never fails: input
/// that cannot be understood yields no entries.
pub fn parse_source_input(input: &str) -> ParsedSourceInput {
    if let Some(object) = json_object(input) {
        if let Some(parsed) = parse_compact_manifest(&object) {
            debug!(entries = parsed.entries.len(), "parsed compact source manifest");
            return parsed;
        }
        let parsed = parse_extractor_manifest(&object);
        debug!(entries = parsed.entries.len(), "parsed extractor manifest");
        return parsed;
    }

    ParsedSourceInput {
        entries: parse_lines(input),
        duration_seconds: None,
        title: None,
        from_structured_manifest: false,
    }
}

fn json_object(input: &str) -> Option<JsonObject> {
    let trimmed = input.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn parse_lines(input: &str) -> Vec<TrackDescriptor> {
    let entries: Vec<TrackDescriptor> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect();

    // A bare two-link paste is almost always "video, then audio". Two raw
    // segments are one track's sequence and stay unresolved.
    let unlabelled = entries.iter().all(|entry| entry.track == TrackKind::Auto);
    let segment_pair = entries.iter().all(|entry| is_raw_segment(&entry.url));
    if entries.len() == 2 && unlabelled && !segment_pair {
        let mut entries = entries;
        entries[0].track = TrackKind::Video;
        entries[1].track = TrackKind::Audio;
        return entries;
    }
    entries
}

fn parse_line(line: &str) -> Option<TrackDescriptor> {
    let Some(captures) = prefix_pattern().captures(line) else {
        if !is_http_url(line) {
            return None;
        }
        return Some(TrackDescriptor::new(line, infer_track_from_url(line)));
    };

    let url = captures.get(2)?.as_str().trim();
    if !is_http_url(url) {
        return None;
    }
    let marker = captures.get(1)?.as_str().to_lowercase();
    let track = if marker == "audio" || marker == "a" {
        TrackKind::Audio
    } else {
        TrackKind::Video
    };
    Some(TrackDescriptor::new(url, track))
}

fn extract_headers(raw: Option<&Value>) -> Option<RequestHeaders> {
    let object = raw?.as_object()?;
    let headers: RequestHeaders = object
        .iter()
        .filter(|(key, _)| !key.is_empty())
        .filter_map(|(key, value)| match value {
            Value::String(value) if !value.is_empty() => Some((key.clone(), value.clone())),
            _ => None,
        })
        .collect();
    if headers.is_empty() {
        None
    } else {
        Some(headers)
    }
}

fn trimmed_string(raw: Option<&Value>) -> Option<String> {
    raw.and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn positive_seconds(raw: Option<&Value>) -> Option<f64> {
    raw.and_then(Value::as_f64)
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn parse_compact_manifest(payload: &JsonObject) -> Option<ParsedSourceInput> {
    let sources = payload.get("sources")?.as_array()?;
    let entries: Vec<TrackDescriptor> = sources
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|source| {
            let url = trimmed_string(source.get("url"))?;
            if !is_http_url(&url) {
                return None;
            }
            let track = match source.get("track").and_then(Value::as_str) {
                Some("video") => TrackKind::Video,
                Some("audio") => TrackKind::Audio,
                Some("auto") => TrackKind::Auto,
                _ => infer_track_from_url(&url),
            };
            let headers = extract_headers(source.get("headers"));
            Some(TrackDescriptor::new(url, track).with_headers(headers))
        })
        .collect();

    if entries.is_empty() {
        return None;
    }

    let duration_seconds = positive_seconds(
        payload
            .get("duration")
            .or_else(|| payload.get("durationSeconds")),
    );
    Some(ParsedSourceInput {
        entries,
        duration_seconds,
        title: trimmed_string(payload.get("title")),
        from_structured_manifest: false,
    })
}

fn parse_extractor_manifest(payload: &JsonObject) -> ParsedSourceInput {
    ParsedSourceInput {
        entries: extractor_entries(payload),
        duration_seconds: positive_seconds(payload.get("duration")),
        title: trimmed_string(payload.get("title")),
        from_structured_manifest: true,
    }
}

fn extractor_entries(payload: &JsonObject) -> Vec<TrackDescriptor> {
    let root_headers = extract_headers(payload.get("http_headers"));

    if let Some(manifest_url) = trimmed_string(payload.get("manifest_url")) {
        if is_http_url(&manifest_url) {
            return vec![TrackDescriptor::new(manifest_url, TrackKind::Auto)
                .with_headers(root_headers)];
        }
    }

    let formats: Vec<TrackDescriptor> = object_items(payload.get("requested_formats"))
        .filter_map(|format| {
            let url = http_url_field(format)?;
            let track = track_from_codecs(Some(format), &url);
            let headers = extract_headers(format.get("http_headers")).or(root_headers.clone());
            Some(TrackDescriptor::new(url, track).with_headers(headers))
        })
        .collect();
    if !formats.is_empty() {
        return formats;
    }

    let downloads: Vec<TrackDescriptor> = object_items(payload.get("requested_downloads"))
        .filter_map(|download| {
            let url = http_url_field(download)?;
            // A nested `requested_formats` object describes the download; a
            // nested array carries no codec fields of its own.
            let nested = match download.get("requested_formats") {
                Some(Value::Object(nested)) => Some(nested),
                Some(Value::Array(_)) => None,
                _ => Some(download),
            };
            let track = track_from_codecs(nested, &url);
            let headers = extract_headers(download.get("http_headers"))
                .or_else(|| extract_headers(nested.and_then(|nested| nested.get("http_headers"))))
                .or(root_headers.clone());
            Some(TrackDescriptor::new(url, track).with_headers(headers))
        })
        .collect();
    if !downloads.is_empty() {
        return downloads;
    }

    match trimmed_string(payload.get("url")) {
        Some(url) if is_http_url(&url) => {
            let track = infer_track_from_url(&url);
            vec![TrackDescriptor::new(url, track).with_headers(root_headers)]
        }
        _ => Vec::new(),
    }
}

fn object_items(raw: Option<&Value>) -> impl Iterator<Item = &JsonObject> {
    raw.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn http_url_field(object: &JsonObject) -> Option<String> {
    trimmed_string(object.get("url")).filter(|url| is_http_url(url))
}

fn track_from_codecs(format: Option<&JsonObject>, fallback_url: &str) -> TrackKind {
    let codec = |key: &str| {
        format
            .and_then(|format| format.get(key))
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .filter(|codec| !codec.is_empty() && codec != "none")
    };
    match (codec("vcodec").is_some(), codec("acodec").is_some()) {
        (true, false) => TrackKind::Video,
        (false, true) => TrackKind::Audio,
        _ => infer_track_from_url(fallback_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(parsed: &ParsedSourceInput) -> Vec<TrackKind> {
        parsed.entries.iter().map(|entry| entry.track).collect()
    }

    #[test]
    fn empty_input_yields_no_entries() {
        let parsed = parse_source_input("");
        assert!(parsed.is_empty());
        assert!(!parsed.from_structured_manifest);
        assert!(parse_source_input("   \n\n  ").is_empty());
    }

    #[test]
    fn two_ambiguous_lines_become_video_then_audio() {
        let parsed = parse_source_input("https://cdn.example/one\nhttps://cdn.example/two");
        assert_eq!(tracks(&parsed), vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(parsed.entries[0].url, "https://cdn.example/one");
    }

    #[test]
    fn two_raw_segments_are_not_split_into_tracks() {
        let parsed = parse_source_input("https://x/a.m4s\nhttps://x/b.m4s");
        assert_eq!(tracks(&parsed), vec![TrackKind::Auto, TrackKind::Auto]);
    }

    #[test]
    fn segment_and_progressive_pair_becomes_video_then_audio() {
        let parsed = parse_source_input("https://x/a.m4s\nhttps://x/b.mp4");
        assert_eq!(tracks(&parsed), vec![TrackKind::Video, TrackKind::Audio]);
    }

    #[test]
    fn two_lines_with_one_hint_keep_heuristics() {
        let parsed = parse_source_input("https://x/a.m4s\nhttps://x/b.m4s?type=audio");
        assert_eq!(tracks(&parsed), vec![TrackKind::Auto, TrackKind::Audio]);
    }

    #[test]
    fn prefixes_are_case_insensitive_and_accept_pipe() {
        let parsed = parse_source_input(
            "VIDEO: https://x/v.mp4\r\na|https://x/a.mp4\nv:ftp://x/ignored\nnot a url",
        );
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(tracks(&parsed), vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(parsed.entries[1].url, "https://x/a.mp4");
    }

    #[test]
    fn url_heuristics() {
        assert_eq!(
            infer_track_from_url("https://x/videoplayback?mime=audio%2Fwebm&itag=251"),
            TrackKind::Audio
        );
        assert_eq!(
            infer_track_from_url("https://x/videoplayback?mime=video/mp4"),
            TrackKind::Video
        );
        assert_eq!(
            infer_track_from_url("https://x/seg/30280-audio-1.m4s"),
            TrackKind::Audio
        );
        assert_eq!(infer_track_from_url("https://x/chunk_avc_01.m4s"), TrackKind::Video);
        assert_eq!(infer_track_from_url("https://x/s?stream=video"), TrackKind::Video);
        assert_eq!(infer_track_from_url("https://x/plain.mp4"), TrackKind::Auto);
    }

    #[test]
    fn compact_manifest_keeps_headers_and_explicit_tracks() {
        let input = r#"{
            "title": "  Clip  ",
            "durationSeconds": 42.5,
            "sources": [
                {"url": "https://x/v.mp4", "track": "video", "headers": {"Referer": "https://x", "X-Empty": "", "X-Num": 1}},
                {"url": "https://x/a.mp4", "track": "audio"},
                {"url": "ftp://x/skip.mp4"},
                {"url": "https://x/other.mp4", "track": "auto"}
            ]
        }"#;
        let parsed = parse_source_input(input);
        assert!(!parsed.from_structured_manifest);
        assert_eq!(parsed.title.as_deref(), Some("Clip"));
        assert_eq!(parsed.duration_seconds, Some(42.5));
        assert_eq!(
            tracks(&parsed),
            vec![TrackKind::Video, TrackKind::Audio, TrackKind::Auto]
        );
        let headers = parsed.entries[0].request_headers.as_ref().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Referer").map(String::as_str), Some("https://x"));
        assert!(parsed.entries[1].request_headers.is_none());
    }

    #[test]
    fn compact_manifest_without_usable_sources_is_read_as_extractor_manifest() {
        let parsed = parse_source_input(r#"{"sources": [{"url": "nope"}], "url": "https://x/f.mp4"}"#);
        assert!(parsed.from_structured_manifest);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].url, "https://x/f.mp4");
    }

    #[test]
    fn extractor_manifest_prefers_manifest_url() {
        let input = r#"{
            "manifest_url": "https://x/master.m3u8",
            "requested_formats": [{"url": "https://x/v.mp4", "vcodec": "avc1"}],
            "http_headers": {"User-Agent": "ua"},
            "duration": 12
        }"#;
        let parsed = parse_source_input(input);
        assert!(parsed.from_structured_manifest);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].track, TrackKind::Auto);
        assert_eq!(parsed.duration_seconds, Some(12.0));
        assert_eq!(
            parsed.entries[0]
                .request_headers
                .as_ref()
                .and_then(|headers| headers.get("User-Agent"))
                .map(String::as_str),
            Some("ua")
        );
    }

    #[test]
    fn extractor_requested_formats_classify_by_codec() {
        let input = r#"{
            "title": "Talk",
            "http_headers": {"Referer": "https://root"},
            "requested_formats": [
                {"url": "https://x/v", "vcodec": "vp09.00.40.08", "acodec": "none", "http_headers": {"Referer": "https://fmt"}},
                {"url": "https://x/a", "vcodec": "none", "acodec": "opus"}
            ]
        }"#;
        let parsed = parse_source_input(input);
        assert_eq!(tracks(&parsed), vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(parsed.title.as_deref(), Some("Talk"));
        let referer = |index: usize| {
            parsed.entries[index]
                .request_headers
                .as_ref()
                .and_then(|headers| headers.get("Referer"))
                .cloned()
        };
        assert_eq!(referer(0).as_deref(), Some("https://fmt"));
        assert_eq!(referer(1).as_deref(), Some("https://root"));
    }

    #[test]
    fn extractor_requested_downloads_use_nested_formats() {
        let input = r#"{
            "requested_downloads": [
                {"url": "https://x/muxed.mp4", "requested_formats": {"vcodec": "none", "acodec": "mp4a.40.2"}},
                {"url": "https://x/dl-video/1.mp4", "requested_formats": [{"vcodec": "avc1"}]}
            ]
        }"#;
        let parsed = parse_source_input(input);
        assert_eq!(tracks(&parsed), vec![TrackKind::Audio, TrackKind::Video]);
    }

    #[test]
    fn extractor_manifest_without_urls_has_no_entries() {
        let parsed = parse_source_input(r#"{"title": "nothing here", "duration": -4}"#);
        assert!(parsed.is_empty());
        assert!(parsed.from_structured_manifest);
        assert_eq!(parsed.duration_seconds, None);
    }

    #[test]
    fn malformed_json_falls_back_to_lines() {
        let parsed = parse_source_input("{not json}");
        assert!(parsed.is_empty());
        assert!(!parsed.from_structured_manifest);
    }
}
