mod classify;
mod parse;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub use classify::{
    classify, is_dash_manifest, is_hls_manifest, is_raw_segment, local_source, AdaptiveProtocol,
    ClassifyError, ClassifyResult, PlaybackStrategy,
};
pub use parse::{infer_track_from_url, parse_source_input};

pub type RequestHeaders = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Auto,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Auto => "auto",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, TrackKind::Audio)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL plus its declared or inferred media kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackDescriptor {
    pub url: String,
    pub track: TrackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<RequestHeaders>,
}

impl TrackDescriptor {
    pub fn new(url: impl Into<String>, track: TrackKind) -> Self {
        Self {
            url: url.into(),
            track,
            request_headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Option<RequestHeaders>) -> Self {
        self.request_headers = headers.filter(|headers| !headers.is_empty());
        self
    }

    pub fn with_track(mut self, track: TrackKind) -> Self {
        self.track = track;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSourceInput {
    pub entries: Vec<TrackDescriptor>,
    pub duration_seconds: Option<f64>,
    pub title: Option<String>,
    pub from_structured_manifest: bool,
}

impl ParsedSourceInput {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
