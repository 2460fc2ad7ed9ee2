use thiserror::Error;

use crate::fetch::FetchError;
use crate::media::MediaError;
use crate::source::TrackKind;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("{track} segment {ordinal} download failed (HTTP {status})")]
    SegmentStatus {
        track: TrackKind,
        ordinal: usize,
        status: u16,
    },
    #[error("{track} segment {ordinal} download failed: {message}")]
    SegmentTransport {
        track: TrackKind,
        ordinal: usize,
        message: String,
    },
    #[error("{track} direct download failed (HTTP {status})")]
    DirectStatus { track: TrackKind, status: u16 },
    #[error("direct link request failed (the link may have expired or auth headers may be missing): {message}")]
    DirectTransport { message: String },
    #[error("no {track} segments to assemble")]
    MissingTrack { track: TrackKind },
    #[error("the runtime supports none of the {track} codec candidates")]
    NoSupportedCodec { track: TrackKind },
    #[error("{label}, every codec candidate failed{}", cause_suffix(.last))]
    NegotiationExhausted { label: String, last: Option<String> },
    #[error("{track} segment {ordinal} append failed: {source}")]
    Append {
        track: TrackKind,
        ordinal: usize,
        #[source]
        source: MediaError,
    },
    #[error(transparent)]
    Media(#[from] MediaError),
}

fn cause_suffix(last: &Option<String>) -> String {
    last.as_deref()
        .map(|cause| format!(": {cause}"))
        .unwrap_or_default()
}

impl AssemblyError {
    /// Maps a segment download failure, keeping the HTTP status when known.
    pub fn segment(track: TrackKind, ordinal: usize, err: FetchError) -> Self {
        match err {
            FetchError::Status { status, .. } => AssemblyError::SegmentStatus {
                track,
                ordinal,
                status,
            },
            other => AssemblyError::SegmentTransport {
                track,
                ordinal,
                message: other.to_string(),
            },
        }
    }

    pub fn direct(track: TrackKind, err: FetchError) -> Self {
        match err {
            FetchError::Status { status, .. } => AssemblyError::DirectStatus { track, status },
            other => AssemblyError::DirectTransport {
                message: other.to_string(),
            },
        }
    }
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;
