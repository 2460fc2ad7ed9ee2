use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::{TrackDescriptor, TrackKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("no playable source was found in the input")]
    Empty,
    #[error("{count} sources cannot be combined; provide raw segments or exactly one video and one audio link")]
    UnsupportedCombination { count: usize },
    #[error("a single .m4s segment cannot be played on its own: {url}")]
    LoneSegment { url: String },
    #[error("{audio} audio segment(s) given without a video segment")]
    MissingVideoSegments { audio: usize },
}

pub type ClassifyResult<T> = Result<T, ClassifyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveProtocol {
    Hls,
    Dash,
}

impl fmt::Display for AdaptiveProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptiveProtocol::Hls => f.write_str("hls"),
            AdaptiveProtocol::Dash => f.write_str("dash"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PlaybackStrategy {
    /// `blob:`/`file:`/`data:` input attached as-is.
    Local { url: String },
    MultiSegment {
        video: Vec<TrackDescriptor>,
        audio: Vec<TrackDescriptor>,
    },
    DualDirect {
        video: TrackDescriptor,
        audio: TrackDescriptor,
    },
    Adaptive {
        protocol: AdaptiveProtocol,
        entry: TrackDescriptor,
    },
    Direct { entry: TrackDescriptor },
}

impl PlaybackStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackStrategy::Local { .. } => "local",
            PlaybackStrategy::MultiSegment { .. } => "multi_segment",
            PlaybackStrategy::DualDirect { .. } => "dual_direct",
            PlaybackStrategy::Adaptive { .. } => "adaptive",
            PlaybackStrategy::Direct { .. } => "direct",
        }
    }

    /// Label published as the element's source. Assembled strategies get a
    /// descriptive pseudo-URL instead of a real one.
    pub fn display_label(&self) -> String {
        match self {
            PlaybackStrategy::Local { url } => url.clone(),
            PlaybackStrategy::MultiSegment { video, audio } if audio.is_empty() => {
                format!("m4s://merged({})", video.len())
            }
            PlaybackStrategy::MultiSegment { video, audio } => {
                format!("m4s://mse(video:{},audio:{})", video.len(), audio.len())
            }
            PlaybackStrategy::DualDirect { .. } => "mse://dual-direct(video:1,audio:1)".into(),
            PlaybackStrategy::Adaptive { entry, .. } | PlaybackStrategy::Direct { entry } => {
                entry.url.clone()
            }
        }
    }
}

/// Returns the trimmed input when it names a local resource.
pub fn local_source(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let lower = trimmed.get(..5).map(str::to_ascii_lowercase)?;
    match lower.as_str() {
        "blob:" | "file:" | "data:" => Some(trimmed),
        _ => None,
    }
}

fn has_suffix(url: &str, suffix: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = match lower.find('?') {
        Some(index) => &lower[..index],
        None => lower.as_str(),
    };
    path.ends_with(suffix)
}

pub fn is_raw_segment(url: &str) -> bool {
    has_suffix(url, ".m4s")
}

pub fn is_hls_manifest(url: &str) -> bool {
    has_suffix(url, ".m3u8")
}

pub fn is_dash_manifest(url: &str) -> bool {
    has_suffix(url, ".mpd")
}

/// Picks exactly one playback strategy for the parsed entries. Local inputs
/// are recognised from the raw string before parsing, so callers check
/// [`local_source`] first.
pub fn classify(entries: &[TrackDescriptor]) -> ClassifyResult<PlaybackStrategy> {
    let (audio, video): (Vec<&TrackDescriptor>, Vec<&TrackDescriptor>) =
        entries.iter().partition(|entry| entry.track.is_audio());

    match entries {
        [] => Err(ClassifyError::Empty),
        [entry] => classify_single(entry),
        _ if entries.iter().all(|entry| is_raw_segment(&entry.url)) => {
            if video.is_empty() {
                return Err(ClassifyError::MissingVideoSegments { audio: audio.len() });
            }
            Ok(PlaybackStrategy::MultiSegment {
                video: video.into_iter().cloned().collect(),
                audio: audio.into_iter().cloned().collect(),
            })
        }
        [_, _] if video.len() == 1 && audio.len() == 1 => Ok(PlaybackStrategy::DualDirect {
            video: video[0].clone().with_track(TrackKind::Video),
            audio: audio[0].clone(),
        }),
        _ => Err(ClassifyError::UnsupportedCombination {
            count: entries.len(),
        }),
    }
}

fn classify_single(entry: &TrackDescriptor) -> ClassifyResult<PlaybackStrategy> {
    let url = &entry.url;
    let entry = entry.clone();
    if is_hls_manifest(url) {
        Ok(PlaybackStrategy::Adaptive {
            protocol: AdaptiveProtocol::Hls,
            entry,
        })
    } else if is_dash_manifest(url) {
        Ok(PlaybackStrategy::Adaptive {
            protocol: AdaptiveProtocol::Dash,
            entry,
        })
    } else if is_raw_segment(url) {
        Err(ClassifyError::LoneSegment { url: url.clone() })
    } else {
        Ok(PlaybackStrategy::Direct { entry })
    }
}
